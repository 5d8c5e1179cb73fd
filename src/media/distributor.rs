//! Media fan-out from a publisher to its subscribers
//!
//! Every inbound audio/video payload is copied once into a rented buffer
//! and classified. Sequence headers and key frames update the stream's
//! cache and are broadcast while the per-path lock is held, so a subscriber
//! being primed concurrently sees either the cached copy or the live one,
//! never neither. Ordinary frames are numbered and cached under the lock,
//! then broadcast against the lock-free subscriber snapshot. Interceptors
//! hear about cache changes only after the lock is released.

use std::sync::Arc;

use super::flv::{MediaFrame, MediaKind};
use super::gop::GopEntry;
use crate::amf::AmfObject;
use crate::buffer::{BufferPool, RentedBuffer};
use crate::events::EventDispatcher;
use crate::registry::{Delivery, PublishStream, Subscriber};

/// Cache update to report once the per-path lock is released
enum CacheEvent {
    SequenceHeader,
    KeyFrame { cleared: bool },
}

/// Per-message delivery tally
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Distribution {
    pub sent: usize,
    pub skipped: usize,
    pub filtered: usize,
    pub closed: usize,
}

impl Distribution {
    fn record(&mut self, delivery: Delivery) {
        match delivery {
            Delivery::Sent => self.sent += 1,
            Delivery::Skipped => self.skipped += 1,
            Delivery::Filtered => self.filtered += 1,
            Delivery::Closed => self.closed += 1,
        }
    }
}

/// Broadcasts a publisher's media
#[derive(Debug, Clone)]
pub struct MediaDistributor {
    pool: Arc<BufferPool>,
    events: Arc<EventDispatcher>,
    skip_threshold: usize,
}

impl MediaDistributor {
    pub fn new(pool: Arc<BufferPool>, events: Arc<EventDispatcher>, skip_threshold: usize) -> Self {
        Self {
            pool,
            events,
            skip_threshold,
        }
    }

    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    /// Cache and broadcast one audio or video message
    pub fn distribute(
        &self,
        stream: &PublishStream,
        kind: MediaKind,
        timestamp: u32,
        data: &[u8],
    ) -> Distribution {
        let frame = MediaFrame::classify(kind, data);
        let buffer = self.pool.rent_copy(data);
        stream
            .counters()
            .record_frame(kind, data.len(), frame.key_frame);

        let mut tally = Distribution::default();
        if frame.sequence_header || frame.key_frame {
            let mut cache = stream.lock_cache();
            let seq = stream.next_seq();
            let mut cached = None;
            if frame.sequence_header {
                cache.set_header(kind, buffer.claim());
                cached = Some(CacheEvent::SequenceHeader);
                tracing::debug!(stream = %stream.path(), ?kind, size = data.len(), "Sequence header cached");
            } else if cache.gop.is_enabled() {
                let cleared = !cache.gop.is_empty();
                cache.gop.start_group(GopEntry {
                    seq,
                    kind,
                    timestamp,
                    buffer: buffer.claim(),
                });
                cached = Some(CacheEvent::KeyFrame { cleared });
            }

            // Broadcast to the list as seen under the lock
            let subscribers = stream.subscribers();
            self.broadcast(&subscribers, &frame, seq, timestamp, &buffer, &mut tally);
            drop(cache);

            // Interceptors may do I/O; they run once the path is unlocked
            match cached {
                Some(CacheEvent::SequenceHeader) => {
                    self.events.cache_sequence_header(stream.path(), kind, data);
                }
                Some(CacheEvent::KeyFrame { cleared }) => {
                    if cleared {
                        self.events.clear_gop_cache(stream.path());
                    }
                    self.events.cache_key_frame(stream.path(), kind, &buffer, timestamp);
                }
                None => {}
            }
        } else {
            let seq = {
                let mut cache = stream.lock_cache();
                let seq = stream.next_seq();
                cache.gop.push(GopEntry {
                    seq,
                    kind,
                    timestamp,
                    buffer: buffer.claim(),
                });
                seq
            };
            let subscribers = stream.subscribers();
            self.broadcast(&subscribers, &frame, seq, timestamp, &buffer, &mut tally);
        }

        if tally.skipped > 0 {
            stream.counters().record_dropped(tally.skipped as u64);
        }
        if self.events.has_interceptors() {
            self.events
                .media_message(stream.path(), kind, &buffer, timestamp, frame.is_skippable());
        }
        tally
    }

    /// Replace the stream's metadata and forward it to every subscriber
    pub fn distribute_metadata(&self, stream: &PublishStream, metadata: AmfObject) -> usize {
        let mut cache = stream.lock_cache();
        let subscribers = stream.subscribers();
        let sent = subscribers
            .iter()
            .filter(|s| s.send_metadata(&metadata))
            .count();
        cache.metadata = Some(metadata);
        sent
    }

    /// Forget the cached metadata (`@clearDataFrame`)
    pub fn clear_metadata(&self, stream: &PublishStream) {
        stream.lock_cache().metadata = None;
    }

    fn broadcast(
        &self,
        subscribers: &[Arc<Subscriber>],
        frame: &MediaFrame,
        seq: u64,
        timestamp: u32,
        buffer: &RentedBuffer,
        tally: &mut Distribution,
    ) {
        for subscriber in subscribers {
            tally.record(subscriber.deliver(frame, seq, timestamp, buffer, self.skip_threshold));
        }
    }
}
