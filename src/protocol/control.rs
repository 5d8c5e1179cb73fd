//! Protocol control handling
//!
//! Chunk size, abort, window and bandwidth messages are interpreted inline
//! by the session; none of them reach the command layer.

use tracing::{debug, trace};

use crate::error::{ProtocolError, Result};
use crate::protocol::chunk::ChunkDecoder;
use crate::protocol::constants::ACK_SEQUENCE_OVERFLOW;
use crate::protocol::message::{RtmpMessage, UserControlEvent};

/// Inbound byte accounting for Acknowledgement messages
///
/// The counter is 32 bits on the wire. Once it passes
/// [`ACK_SEQUENCE_OVERFLOW`] both the counter and the last acknowledged
/// value drop by that constant, so their difference is unchanged.
#[derive(Debug, Clone, Default)]
pub struct AckTracker {
    window: u32,
    received: u32,
    last_ack: u32,
}

impl AckTracker {
    pub fn new(window: u32) -> Self {
        Self {
            window,
            received: 0,
            last_ack: 0,
        }
    }

    /// Window announced by the peer; 0 turns acknowledgements off
    pub fn set_window(&mut self, window: u32) {
        self.window = window;
    }

    pub fn window(&self) -> u32 {
        self.window
    }

    /// Bytes received, as reported in the next acknowledgement
    pub fn received(&self) -> u32 {
        self.received
    }

    pub fn last_ack(&self) -> u32 {
        self.last_ack
    }

    /// Count `n` inbound bytes. Returns the sequence number to acknowledge
    /// once a full window has arrived since the previous acknowledgement.
    pub fn on_bytes(&mut self, n: usize) -> Option<u32> {
        self.received = self.received.wrapping_add(n as u32);
        if self.received >= ACK_SEQUENCE_OVERFLOW {
            self.received = self.received.wrapping_sub(ACK_SEQUENCE_OVERFLOW);
            self.last_ack = self.last_ack.wrapping_sub(ACK_SEQUENCE_OVERFLOW);
        }

        if self.window == 0 {
            return None;
        }
        if self.received.wrapping_sub(self.last_ack) >= self.window {
            self.last_ack = self.received;
            return Some(self.received);
        }
        None
    }
}

/// Applies protocol control messages to the inbound codec state
#[derive(Debug)]
pub struct ProtocolControl {
    max_chunk_size: u32,
    acks: AckTracker,
    peer_bandwidth: Option<u32>,
}

impl ProtocolControl {
    pub fn new(max_chunk_size: u32) -> Self {
        Self {
            max_chunk_size,
            acks: AckTracker::new(0),
            peer_bandwidth: None,
        }
    }

    pub fn acks(&self) -> &AckTracker {
        &self.acks
    }

    pub fn acks_mut(&mut self) -> &mut AckTracker {
        &mut self.acks
    }

    /// Last bandwidth the peer announced, never enforced
    pub fn peer_bandwidth(&self) -> Option<u32> {
        self.peer_bandwidth
    }

    /// Handle a control message. Returns a reply for the peer, if any.
    ///
    /// A chunk size of zero or above the configured maximum is fatal.
    pub fn handle(
        &mut self,
        msg: &RtmpMessage,
        decoder: &mut ChunkDecoder,
    ) -> Result<Option<RtmpMessage>> {
        match msg {
            RtmpMessage::SetChunkSize(size) => {
                if *size == 0 {
                    return Err(ProtocolError::InvalidChunkSize(*size).into());
                }
                if *size > self.max_chunk_size {
                    return Err(ProtocolError::ChunkSizeTooLarge {
                        size: *size,
                        max: self.max_chunk_size,
                    }
                    .into());
                }
                debug!(size = size, "Peer set chunk size");
                decoder.set_chunk_size(*size);
                Ok(None)
            }
            RtmpMessage::Abort { csid } => {
                debug!(csid = csid, "Peer aborted chunk stream");
                decoder.abort(*csid);
                Ok(None)
            }
            RtmpMessage::WindowAckSize(size) => {
                debug!(window = size, "Peer set acknowledgement window");
                self.acks.set_window(*size);
                Ok(None)
            }
            RtmpMessage::SetPeerBandwidth { size, limit_type } => {
                debug!(size = size, limit_type = limit_type, "Ignoring peer bandwidth");
                self.peer_bandwidth = Some(*size);
                Ok(None)
            }
            RtmpMessage::Acknowledgement { sequence } => {
                trace!(sequence = sequence, "Peer acknowledged");
                Ok(None)
            }
            RtmpMessage::UserControl(UserControlEvent::PingRequest(ts)) => Ok(Some(
                RtmpMessage::UserControl(UserControlEvent::PingResponse(*ts)),
            )),
            RtmpMessage::UserControl(event) => {
                trace!(event = ?event, "User control event");
                Ok(None)
            }
            _ => Ok(None),
        }
    }
}
