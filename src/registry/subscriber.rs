//! Subscription state
//!
//! One [`Subscriber`] exists per playing session and stream. It is shared
//! between the subscribing session (which toggles pause and muting) and the
//! publisher (which delivers media into the subscriber's outbound queue).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use super::path::{StreamArgs, StreamPath};
use crate::amf::{AmfObject, AmfValue};
use crate::buffer::RentedBuffer;
use crate::media::{MediaFrame, MediaKind};
use crate::protocol::constants::*;
use crate::protocol::message::{DataMessage, UserControlEvent};
use crate::session::outbound::{OutboundMessage, OutboundQueue};

/// Result of offering one media message to a subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// Skippable frame dropped because the queue is over the threshold
    Skipped,
    /// Paused, muted, not yet primed, or already sent during priming
    Filtered,
    /// The subscriber's session has gone away
    Closed,
}

/// A session playing a stream
#[derive(Debug)]
pub struct Subscriber {
    session_id: u64,
    /// Message stream id on the subscriber's connection
    stream_id: u32,
    path: StreamPath,
    args: StreamArgs,
    queue: OutboundQueue,
    paused: AtomicBool,
    receive_audio: AtomicBool,
    receive_video: AtomicBool,
    /// Priming finished; live delivery may start
    initialized: AtomicBool,
    /// Highest frame sequence number delivered during priming
    primed_through: AtomicU64,
    /// Publisher went away
    ended: AtomicBool,
    dropped: AtomicU64,
}

impl Subscriber {
    pub fn new(
        session_id: u64,
        stream_id: u32,
        path: StreamPath,
        args: StreamArgs,
        queue: OutboundQueue,
    ) -> Self {
        Self {
            session_id,
            stream_id,
            path,
            args,
            queue,
            paused: AtomicBool::new(false),
            receive_audio: AtomicBool::new(true),
            receive_video: AtomicBool::new(true),
            initialized: AtomicBool::new(false),
            primed_through: AtomicU64::new(0),
            ended: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    pub fn stream_id(&self) -> u32 {
        self.stream_id
    }

    pub fn path(&self) -> &StreamPath {
        &self.path
    }

    pub fn args(&self) -> &StreamArgs {
        &self.args
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Release);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub fn set_receive_audio(&self, enabled: bool) {
        self.receive_audio.store(enabled, Ordering::Release);
    }

    pub fn set_receive_video(&self, enabled: bool) {
        self.receive_video.store(enabled, Ordering::Release);
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub fn has_ended(&self) -> bool {
        self.ended.load(Ordering::Acquire)
    }

    /// Skippable frames dropped for this subscriber
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn queue(&self) -> &OutboundQueue {
        &self.queue
    }

    /// StreamBegin and the play status sequence
    pub(crate) fn send_play_start(&self) {
        let id = self.stream_id;
        self.queue
            .send_user_control(UserControlEvent::StreamBegin(id));
        self.queue.send_status(
            id,
            "status",
            NS_PLAY_RESET,
            &format!("Playing and resetting {}.", self.path),
        );
        self.queue.send_status(
            id,
            "status",
            NS_PLAY_START,
            &format!("Started playing {}.", self.path),
        );
        let access = DataMessage {
            name: "|RtmpSampleAccess".to_string(),
            values: vec![AmfValue::Boolean(true), AmfValue::Boolean(true)],
            stream_id: id,
        };
        self.queue.send(OutboundMessage::data(&access, 0));
    }

    pub(crate) fn send_metadata(&self, metadata: &AmfObject) -> bool {
        let data = DataMessage::on_metadata(metadata, self.stream_id);
        self.queue.send(OutboundMessage::data(&data, 0))
    }

    /// Priming delivery: bypasses every filter
    pub(crate) fn send_cached(&self, kind: MediaKind, timestamp: u32, buffer: RentedBuffer) -> bool {
        self.queue.send(media_message(kind, self.stream_id, timestamp, buffer))
    }

    pub(crate) fn finish_priming(&self, primed_through: u64) {
        self.primed_through.store(primed_through, Ordering::Release);
        self.initialized.store(true, Ordering::Release);
    }

    /// Offer a live media message. Sequence headers and key frames are
    /// never skipped; muting and pause never hold back sequence headers.
    pub(crate) fn deliver(
        &self,
        frame: &MediaFrame,
        seq: u64,
        timestamp: u32,
        buffer: &RentedBuffer,
        skip_threshold: usize,
    ) -> Delivery {
        if !self.is_initialized() || seq <= self.primed_through.load(Ordering::Acquire) {
            return Delivery::Filtered;
        }
        if !frame.sequence_header {
            let muted = match frame.kind {
                MediaKind::Audio => !self.receive_audio.load(Ordering::Acquire),
                MediaKind::Video => !self.receive_video.load(Ordering::Acquire),
            };
            if muted || self.is_paused() {
                return Delivery::Filtered;
            }
        }
        if frame.is_skippable() && self.queue.pending() > skip_threshold {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return Delivery::Skipped;
        }
        let msg = media_message(frame.kind, self.stream_id, timestamp, buffer.claim());
        if self.queue.send(msg) {
            Delivery::Sent
        } else {
            Delivery::Closed
        }
    }

    /// Publisher stopped: StreamEOF and UnpublishNotify
    pub(crate) fn end(&self) {
        if self.ended.swap(true, Ordering::AcqRel) {
            return;
        }
        let id = self.stream_id;
        self.queue.send_user_control(UserControlEvent::StreamEof(id));
        self.queue.send_status(
            id,
            "status",
            NS_PLAY_UNPUBLISH_NOTIFY,
            &format!("{} is now unpublished.", self.path),
        );
    }
}

fn media_message(kind: MediaKind, stream_id: u32, timestamp: u32, buffer: RentedBuffer) -> OutboundMessage {
    match kind {
        MediaKind::Audio => OutboundMessage::audio(stream_id, timestamp, buffer),
        MediaKind::Video => OutboundMessage::video(stream_id, timestamp, buffer),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferPool;
    use crate::media::flv::{classify_audio, classify_video};
    use crate::session::outbound::OutboundReceiver;

    fn subscriber() -> (Subscriber, OutboundReceiver) {
        let (queue, rx) = OutboundQueue::new();
        let sub = Subscriber::new(
            3,
            1,
            StreamPath::from_raw("/live/demo"),
            StreamArgs::new(),
            queue,
        );
        (sub, rx)
    }

    #[test]
    fn test_gated_until_primed() {
        let pool = BufferPool::new(4);
        let (sub, _rx) = subscriber();
        let buf = pool.rent_copy(&[0x27, 0x01]);
        let frame = classify_video(&buf);

        assert_eq!(sub.deliver(&frame, 1, 0, &buf, 10), Delivery::Filtered);
        sub.finish_priming(5);
        // Already covered by the GOP replay
        assert_eq!(sub.deliver(&frame, 5, 0, &buf, 10), Delivery::Filtered);
        assert_eq!(sub.deliver(&frame, 6, 0, &buf, 10), Delivery::Sent);
        assert_eq!(buf.claims(), 2);
    }

    #[test]
    fn test_skips_only_skippable_frames() {
        let pool = BufferPool::new(4);
        let (sub, _rx) = subscriber();
        sub.finish_priming(0);

        let inter = pool.rent_copy(&[0x27, 0x01]);
        let key = pool.rent_copy(&[0x17, 0x01]);
        for seq in 1..=3 {
            assert_eq!(
                sub.deliver(&classify_video(&inter), seq, 0, &inter, 2),
                Delivery::Sent
            );
        }
        assert_eq!(sub.deliver(&classify_video(&inter), 4, 0, &inter, 2), Delivery::Skipped);
        assert_eq!(sub.deliver(&classify_video(&key), 5, 0, &key, 2), Delivery::Sent);
        assert_eq!(sub.dropped(), 1);
    }

    #[test]
    fn test_mute_and_pause() {
        let pool = BufferPool::new(4);
        let (sub, mut rx) = subscriber();
        sub.finish_priming(0);

        let aac = pool.rent_copy(&[0xAF, 0x01, 0x00]);
        let aac_header = pool.rent_copy(&[0xAF, 0x00, 0x12, 0x10]);

        sub.set_receive_audio(false);
        assert_eq!(sub.deliver(&classify_audio(&aac), 1, 0, &aac, 10), Delivery::Filtered);
        assert_eq!(
            sub.deliver(&classify_audio(&aac_header), 2, 0, &aac_header, 10),
            Delivery::Sent
        );

        sub.set_receive_audio(true);
        sub.set_paused(true);
        assert_eq!(sub.deliver(&classify_audio(&aac), 3, 0, &aac, 10), Delivery::Filtered);
        sub.set_paused(false);
        assert_eq!(sub.deliver(&classify_audio(&aac), 4, 20, &aac, 10), Delivery::Sent);

        let first = rx.try_recv().unwrap();
        assert_eq!(first.message_type, MSG_AUDIO);
        assert_eq!(first.csid, CSID_AUDIO);
        let second = rx.try_recv().unwrap();
        assert_eq!(second.timestamp, 20);
    }

    #[test]
    fn test_closed_and_end() {
        let pool = BufferPool::new(4);
        let (sub, rx) = subscriber();
        sub.finish_priming(0);

        sub.end();
        sub.end();
        assert!(sub.has_ended());
        // StreamEOF and UnpublishNotify, once
        assert_eq!(sub.queue().pending(), 2);

        drop(rx);
        let buf = pool.rent_copy(&[0x27, 0x01]);
        assert_eq!(sub.deliver(&classify_video(&buf), 1, 0, &buf, 10), Delivery::Closed);
        assert_eq!(buf.claims(), 1);
    }
}
