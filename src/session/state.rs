//! Session state machine
//!
//! Tracks where a connection is in its lifecycle and which message stream
//! ids it has allocated. Each message stream is idle, publishing, or
//! playing; a session may publish on one id and play on another, but a
//! single id never does both.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::protocol::constants::DEFAULT_CHUNK_SIZE;
use crate::registry::{PublishStream, Subscriber};
use crate::stats::SessionStats;

/// Connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Exchanging C0/C1/C2
    Handshake,
    /// Handshake done, waiting for `connect`
    AwaitingConnect,
    /// `connect` accepted
    Connected,
    /// Tearing down
    Closing,
}

/// What a message stream is used for
#[derive(Debug, Clone, Default)]
pub enum StreamMode {
    #[default]
    Idle,
    Publishing(Arc<PublishStream>),
    Playing {
        stream: Arc<PublishStream>,
        subscriber: Arc<Subscriber>,
    },
}

impl StreamMode {
    pub fn is_idle(&self) -> bool {
        matches!(self, StreamMode::Idle)
    }

    pub fn is_publishing(&self) -> bool {
        matches!(self, StreamMode::Publishing(_))
    }

    pub fn is_playing(&self) -> bool {
        matches!(self, StreamMode::Playing { .. })
    }
}

/// Mutable per-connection state owned by the session loop
#[derive(Debug)]
pub struct SessionState {
    pub id: u64,
    pub peer_addr: SocketAddr,
    pub phase: SessionPhase,
    /// Chunk size the peer writes with
    pub in_chunk_size: u32,
    /// Chunk size we write with
    pub out_chunk_size: u32,
    /// Window the peer asked us to acknowledge at
    pub in_window_ack_size: u32,
    /// Window we announced to the peer
    pub out_window_ack_size: u32,
    pub stats: SessionStats,
    next_stream_id: u32,
    streams: HashMap<u32, StreamMode>,
}

impl SessionState {
    pub fn new(id: u64, peer_addr: SocketAddr) -> Self {
        Self {
            id,
            peer_addr,
            phase: SessionPhase::Handshake,
            in_chunk_size: DEFAULT_CHUNK_SIZE,
            out_chunk_size: DEFAULT_CHUNK_SIZE,
            in_window_ack_size: 0,
            out_window_ack_size: 0,
            stats: SessionStats::new(),
            next_stream_id: 1,
            streams: HashMap::new(),
        }
    }

    pub fn complete_handshake(&mut self) {
        self.phase = SessionPhase::AwaitingConnect;
    }

    pub fn on_connect(&mut self) {
        self.phase = SessionPhase::Connected;
    }

    pub fn is_connected(&self) -> bool {
        self.phase == SessionPhase::Connected
    }

    /// Allocate the next message stream id (`createStream`)
    pub fn allocate_stream_id(&mut self) -> u32 {
        let id = self.next_stream_id;
        self.next_stream_id = self.next_stream_id.wrapping_add(1).max(1);
        self.streams.insert(id, StreamMode::Idle);
        id
    }

    pub fn has_stream(&self, stream_id: u32) -> bool {
        self.streams.contains_key(&stream_id)
    }

    pub fn stream(&self, stream_id: u32) -> Option<&StreamMode> {
        self.streams.get(&stream_id)
    }

    /// Set the mode of an allocated stream id; unknown ids are allocated
    /// on the fly, since some encoders publish on id 1 without asking
    pub fn set_mode(&mut self, stream_id: u32, mode: StreamMode) {
        self.streams.insert(stream_id, mode);
    }

    /// Reset a stream id to idle, returning what it was doing
    pub fn take_mode(&mut self, stream_id: u32) -> StreamMode {
        self.streams
            .get_mut(&stream_id)
            .map(std::mem::take)
            .unwrap_or_default()
    }

    /// Forget a stream id (`deleteStream`), returning what it was doing
    pub fn remove_stream(&mut self, stream_id: u32) -> Option<StreamMode> {
        self.streams.remove(&stream_id)
    }

    /// Publish running on `stream_id`
    pub fn publishing(&self, stream_id: u32) -> Option<&Arc<PublishStream>> {
        match self.streams.get(&stream_id) {
            Some(StreamMode::Publishing(stream)) => Some(stream),
            _ => None,
        }
    }

    /// Subscription running on `stream_id`
    pub fn playing(&self, stream_id: u32) -> Option<&Arc<Subscriber>> {
        match self.streams.get(&stream_id) {
            Some(StreamMode::Playing { subscriber, .. }) => Some(subscriber),
            _ => None,
        }
    }

    /// Drain every stream id for teardown
    pub fn drain_streams(&mut self) -> Vec<(u32, StreamMode)> {
        self.streams.drain().collect()
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{StreamArgs, StreamPath};
    use std::net::{IpAddr, Ipv4Addr};

    fn state() -> SessionState {
        SessionState::new(7, SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 1935))
    }

    fn publish_stream() -> Arc<PublishStream> {
        Arc::new(PublishStream::new(
            StreamPath::from_raw("/live/demo"),
            StreamArgs::new(),
            7,
            "live".into(),
            0,
        ))
    }

    #[test]
    fn test_phases() {
        let mut state = state();
        assert_eq!(state.phase, SessionPhase::Handshake);
        assert_eq!(state.in_chunk_size, DEFAULT_CHUNK_SIZE);
        state.complete_handshake();
        assert_eq!(state.phase, SessionPhase::AwaitingConnect);
        assert!(!state.is_connected());
        state.on_connect();
        assert!(state.is_connected());
    }

    #[test]
    fn test_stream_ids() {
        let mut state = state();
        assert_eq!(state.allocate_stream_id(), 1);
        assert_eq!(state.allocate_stream_id(), 2);
        assert!(state.stream(1).map(StreamMode::is_idle).unwrap_or(false));
        assert!(state.remove_stream(1).is_some());
        assert!(!state.has_stream(1));
        assert_eq!(state.stream_count(), 1);
    }

    #[test]
    fn test_modes() {
        let mut state = state();
        let id = state.allocate_stream_id();
        state.set_mode(id, StreamMode::Publishing(publish_stream()));
        assert!(state.publishing(id).is_some());
        assert!(state.playing(id).is_none());

        let previous = state.take_mode(id);
        assert!(previous.is_publishing());
        assert!(state.stream(id).map(StreamMode::is_idle).unwrap_or(false));
        assert!(state.take_mode(99).is_idle());

        state.set_mode(id, StreamMode::Publishing(publish_stream()));
        let drained = state.drain_streams();
        assert_eq!(drained.len(), 1);
        assert_eq!(state.stream_count(), 0);
    }
}
