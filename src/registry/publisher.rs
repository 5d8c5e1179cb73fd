//! Published stream state
//!
//! A [`PublishStream`] is created when a publish succeeds and lives until
//! the publisher leaves. Its media cache mutex is the per-path lock: cache
//! updates for sequence headers and key frames, the broadcast that follows
//! them, and subscriber priming all happen while holding it. Steady-state
//! frames only touch it long enough to be numbered and cached, and are then
//! delivered against a lock-free snapshot of the subscriber list.

use parking_lot::{Mutex, MutexGuard, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::path::{StreamArgs, StreamPath};
use super::subscriber::Subscriber;
use crate::amf::AmfObject;
use crate::buffer::RentedBuffer;
use crate::media::{GopCache, MediaKind};
use crate::stats::{StreamCounters, StreamStats};

/// Cached state a late subscriber is primed from
#[derive(Debug)]
pub struct MediaCache {
    pub audio_header: Option<RentedBuffer>,
    pub video_header: Option<RentedBuffer>,
    pub metadata: Option<AmfObject>,
    pub gop: GopCache,
}

impl MediaCache {
    fn new(max_gop_size: usize) -> Self {
        Self {
            audio_header: None,
            video_header: None,
            metadata: None,
            gop: GopCache::new(max_gop_size),
        }
    }

    pub fn set_header(&mut self, kind: MediaKind, buffer: RentedBuffer) {
        match kind {
            MediaKind::Audio => self.audio_header = Some(buffer),
            MediaKind::Video => self.video_header = Some(buffer),
        }
    }

    /// Release every cached buffer
    pub fn clear(&mut self) {
        self.audio_header = None;
        self.video_header = None;
        self.gop.clear();
    }
}

/// One actively publishing stream
#[derive(Debug)]
pub struct PublishStream {
    path: StreamPath,
    args: StreamArgs,
    session_id: u64,
    publish_type: String,
    cache: Mutex<MediaCache>,
    /// Copy-on-write list; readers clone the `Arc` and iterate unlocked
    subscribers: RwLock<Arc<Vec<Arc<Subscriber>>>>,
    frame_seq: AtomicU64,
    counters: StreamCounters,
}

impl PublishStream {
    pub(crate) fn new(
        path: StreamPath,
        args: StreamArgs,
        session_id: u64,
        publish_type: String,
        max_gop_size: usize,
    ) -> Self {
        Self {
            path,
            args,
            session_id,
            publish_type,
            cache: Mutex::new(MediaCache::new(max_gop_size)),
            subscribers: RwLock::new(Arc::new(Vec::new())),
            frame_seq: AtomicU64::new(0),
            counters: StreamCounters::new(),
        }
    }

    pub fn path(&self) -> &StreamPath {
        &self.path
    }

    pub fn args(&self) -> &StreamArgs {
        &self.args
    }

    /// Session that owns the publish
    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    /// "live", "record" or "append"
    pub fn publish_type(&self) -> &str {
        &self.publish_type
    }

    /// Take the per-path lock
    pub fn lock_cache(&self) -> MutexGuard<'_, MediaCache> {
        self.cache.lock()
    }

    /// Take the per-path lock unless someone else holds it
    pub fn try_lock_cache(&self) -> Option<MutexGuard<'_, MediaCache>> {
        self.cache.try_lock()
    }

    pub fn metadata(&self) -> Option<AmfObject> {
        self.cache.lock().metadata.clone()
    }

    /// Number the next media message. Call with the cache lock held so the
    /// numbering matches cache order.
    pub(crate) fn next_seq(&self) -> u64 {
        self.frame_seq.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Current subscriber list without taking the per-path lock
    pub fn subscribers(&self) -> Arc<Vec<Arc<Subscriber>>> {
        Arc::clone(&self.subscribers.read())
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    pub fn has_subscriber(&self, session_id: u64) -> bool {
        self.subscribers
            .read()
            .iter()
            .any(|s| s.session_id() == session_id)
    }

    /// Add a primed subscriber. Call with the cache lock held.
    pub(crate) fn add_subscriber(&self, subscriber: Arc<Subscriber>) {
        let mut list = self.subscribers.write();
        let mut next = Vec::with_capacity(list.len() + 1);
        next.extend(list.iter().cloned());
        next.push(subscriber);
        *list = Arc::new(next);
    }

    /// Remove `subscriber`; false if it was not in the list
    pub fn remove_subscriber(&self, subscriber: &Subscriber) -> bool {
        let mut list = self.subscribers.write();
        let before = list.len();
        let next: Vec<_> = list
            .iter()
            .filter(|s| !std::ptr::eq(Arc::as_ptr(*s), subscriber))
            .cloned()
            .collect();
        let removed = next.len() != before;
        if removed {
            *list = Arc::new(next);
        }
        removed
    }

    /// Empty the subscriber list, returning who was on it
    pub(crate) fn take_subscribers(&self) -> Arc<Vec<Arc<Subscriber>>> {
        std::mem::take(&mut *self.subscribers.write())
    }

    pub fn counters(&self) -> &StreamCounters {
        &self.counters
    }

    pub fn stats(&self) -> StreamStats {
        self.counters
            .snapshot(self.path.as_str(), self.subscriber_count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::outbound::OutboundQueue;

    fn stream() -> PublishStream {
        PublishStream::new(
            StreamPath::from_raw("/live/demo"),
            StreamArgs::new(),
            1,
            "live".into(),
            1024,
        )
    }

    fn subscriber(session_id: u64) -> Arc<Subscriber> {
        let (queue, _rx) = OutboundQueue::new();
        Arc::new(Subscriber::new(
            session_id,
            1,
            StreamPath::from_raw("/live/demo"),
            StreamArgs::new(),
            queue,
        ))
    }

    #[test]
    fn test_snapshot_is_stable() {
        let stream = stream();
        let a = subscriber(2);
        stream.add_subscriber(Arc::clone(&a));

        let snapshot = stream.subscribers();
        stream.add_subscriber(subscriber(3));
        assert_eq!(snapshot.len(), 1);
        assert_eq!(stream.subscriber_count(), 2);
        assert!(stream.has_subscriber(3));

        assert!(stream.remove_subscriber(&a));
        assert!(!stream.remove_subscriber(&a));
        assert!(!stream.has_subscriber(2));
        assert_eq!(snapshot.len(), 1);
    }

    #[test]
    fn test_seq_is_monotonic() {
        let stream = stream();
        assert_eq!(stream.next_seq(), 1);
        assert_eq!(stream.next_seq(), 2);
    }

    #[test]
    fn test_take_subscribers() {
        let stream = stream();
        stream.add_subscriber(subscriber(2));
        stream.add_subscriber(subscriber(3));
        let taken = stream.take_subscribers();
        assert_eq!(taken.len(), 2);
        assert_eq!(stream.subscriber_count(), 0);
    }
}
