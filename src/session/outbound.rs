//! Per-session outbound queue
//!
//! Everything a session sends, its own replies as well as media fanned out
//! by publishers, goes through one unbounded channel drained by the
//! session's writer task. Enqueueing never blocks, so a slow subscriber
//! never stalls the publisher feeding it; instead the queue depth is
//! tracked so skippable frames can be dropped once it grows too large.

use bytes::Bytes;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::buffer::RentedBuffer;
use crate::protocol::constants::*;
use crate::protocol::message::{Command, DataMessage, RtmpMessage, UserControlEvent};

/// Payload of an outbound message
#[derive(Debug)]
pub enum Payload {
    /// Control and command payloads, encoded once
    Shared(Bytes),
    /// Media payloads; the claim is released once the message is written
    Rented(RentedBuffer),
}

impl Payload {
    pub fn as_slice(&self) -> &[u8] {
        match self {
            Payload::Shared(b) => &b[..],
            Payload::Rented(b) => b.as_slice(),
        }
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_slice().is_empty()
    }
}

/// A message waiting for the writer task
#[derive(Debug)]
pub struct OutboundMessage {
    pub csid: u32,
    pub timestamp: u32,
    pub message_type: u8,
    pub stream_id: u32,
    pub payload: Payload,
}

impl OutboundMessage {
    /// Protocol control and user control messages go out on csid 2, stream 0
    pub fn control(msg: &RtmpMessage) -> Self {
        let (message_type, payload) = msg.encode();
        Self {
            csid: CSID_PROTOCOL_CONTROL,
            timestamp: 0,
            message_type,
            stream_id: 0,
            payload: Payload::Shared(payload),
        }
    }

    pub fn command(cmd: &Command) -> Self {
        Self {
            csid: CSID_COMMAND,
            timestamp: 0,
            message_type: MSG_COMMAND_AMF0,
            stream_id: cmd.stream_id,
            payload: Payload::Shared(cmd.encode()),
        }
    }

    pub fn data(data: &DataMessage, timestamp: u32) -> Self {
        Self {
            csid: CSID_DATA,
            timestamp,
            message_type: MSG_DATA_AMF0,
            stream_id: data.stream_id,
            payload: Payload::Shared(data.encode()),
        }
    }

    pub fn audio(stream_id: u32, timestamp: u32, buffer: RentedBuffer) -> Self {
        Self {
            csid: CSID_AUDIO,
            timestamp,
            message_type: MSG_AUDIO,
            stream_id,
            payload: Payload::Rented(buffer),
        }
    }

    pub fn video(stream_id: u32, timestamp: u32, buffer: RentedBuffer) -> Self {
        Self {
            csid: CSID_VIDEO,
            timestamp,
            message_type: MSG_VIDEO,
            stream_id,
            payload: Payload::Rented(buffer),
        }
    }

    /// `SetChunkSize` needs the writer to switch sizes after sending it
    pub fn chunk_size_change(&self) -> Option<u32> {
        if self.message_type != MSG_SET_CHUNK_SIZE || self.csid != CSID_PROTOCOL_CONTROL {
            return None;
        }
        let bytes = self.payload.as_slice();
        if bytes.len() < 4 {
            return None;
        }
        Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) & 0x7FFF_FFFF)
    }
}

/// Sending half, cloned into every subscription the session holds
#[derive(Debug, Clone)]
pub struct OutboundQueue {
    tx: mpsc::UnboundedSender<OutboundMessage>,
    pending: Arc<AtomicUsize>,
}

/// Receiving half, owned by the writer task
#[derive(Debug)]
pub struct OutboundReceiver {
    rx: mpsc::UnboundedReceiver<OutboundMessage>,
    pending: Arc<AtomicUsize>,
}

impl OutboundQueue {
    pub fn new() -> (Self, OutboundReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));
        (
            Self {
                tx,
                pending: Arc::clone(&pending),
            },
            OutboundReceiver { rx, pending },
        )
    }

    /// Enqueue `msg`. Returns false when the writer is gone; the message is
    /// dropped and any buffer claim it held released.
    pub fn send(&self, msg: OutboundMessage) -> bool {
        self.pending.fetch_add(1, Ordering::AcqRel);
        if self.tx.send(msg).is_err() {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            return false;
        }
        true
    }

    pub fn send_control(&self, msg: &RtmpMessage) -> bool {
        self.send(OutboundMessage::control(msg))
    }

    pub fn send_command(&self, cmd: &Command) -> bool {
        self.send(OutboundMessage::command(cmd))
    }

    pub fn send_status(&self, stream_id: u32, level: &str, code: &str, description: &str) -> bool {
        self.send_command(&Command::on_status(stream_id, level, code, description))
    }

    pub fn send_user_control(&self, event: UserControlEvent) -> bool {
        self.send_control(&RtmpMessage::UserControl(event))
    }

    /// Messages enqueued but not yet picked up by the writer
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl OutboundReceiver {
    pub async fn recv(&mut self) -> Option<OutboundMessage> {
        let msg = self.rx.recv().await?;
        self.pending.fetch_sub(1, Ordering::AcqRel);
        Some(msg)
    }

    pub fn try_recv(&mut self) -> Option<OutboundMessage> {
        let msg = self.rx.try_recv().ok()?;
        self.pending.fetch_sub(1, Ordering::AcqRel);
        Some(msg)
    }

    /// Stop accepting messages; queued ones can still be drained
    pub fn close(&mut self) {
        self.rx.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferPool;

    #[tokio::test]
    async fn test_pending_tracks_queue_depth() {
        let (queue, mut rx) = OutboundQueue::new();
        assert!(queue.send_control(&RtmpMessage::WindowAckSize(DEFAULT_WINDOW_ACK_SIZE)));
        assert!(queue.send_status(1, "status", NS_PLAY_START, "Started"));
        assert_eq!(queue.pending(), 2);

        let first = rx.recv().await.unwrap();
        assert_eq!(first.message_type, MSG_WINDOW_ACK_SIZE);
        assert_eq!(first.csid, CSID_PROTOCOL_CONTROL);
        assert_eq!(queue.pending(), 1);

        let second = rx.try_recv().unwrap();
        assert_eq!(second.message_type, MSG_COMMAND_AMF0);
        assert_eq!(second.stream_id, 1);
        assert_eq!(queue.pending(), 0);
    }

    #[tokio::test]
    async fn test_closed_queue_releases_claims() {
        let pool = BufferPool::new(4);
        let (queue, rx) = OutboundQueue::new();
        drop(rx);

        let buffer = pool.rent_copy(&[0x17, 0x01]);
        assert!(!queue.send(OutboundMessage::video(1, 0, buffer.claim())));
        assert_eq!(queue.pending(), 0);
        assert!(queue.is_closed());
        assert_eq!(buffer.claims(), 1);
    }

    #[test]
    fn test_chunk_size_change() {
        let msg = OutboundMessage::control(&RtmpMessage::SetChunkSize(4096));
        assert_eq!(msg.chunk_size_change(), Some(4096));

        let msg = OutboundMessage::control(&RtmpMessage::WindowAckSize(4096));
        assert_eq!(msg.chunk_size_change(), None);
    }
}
