//! Stream registry for pub/sub routing
//!
//! Maps stream paths to their single publisher. Paths hash into a fixed
//! table of independently locked shards, so registrations on unrelated
//! streams never contend and no operation ever holds two shards.
//!
//! # Architecture
//!
//! ```text
//!                       StreamRegistry
//!              shards: [Mutex<HashMap<path, Arc<PublishStream>>>; N]
//!                              │
//!               ┌──────────────┴──────────────┐
//!               ▼                             ▼
//!         PublishStream                 PublishStream
//!         cache: Mutex<MediaCache>      ...
//!         subscribers: Arc<[Subscriber]>
//!               │
//!     publisher session ──► MediaDistributor ──► Subscriber::deliver
//!                                                     │
//!                                             OutboundQueue ──► writer task ──► TCP
//! ```
//!
//! Lock order is shard, then the stream's cache lock. Publishers take only
//! the cache lock.

pub mod config;
pub mod path;
pub mod publisher;
pub mod subscriber;

pub use config::RegistryConfig;
pub use path::{StreamArgs, StreamPath};
pub use publisher::{MediaCache, PublishStream};
pub use subscriber::{Delivery, Subscriber};

use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::error::RegistryError;
use crate::media::MediaKind;
use crate::session::outbound::OutboundQueue;

/// Arguments for [`StreamRegistry::start_publishing`]
#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub session_id: u64,
    pub path: StreamPath,
    pub args: StreamArgs,
    pub publish_type: String,
}

/// Arguments for [`StreamRegistry::start_subscribing`]
#[derive(Debug, Clone)]
pub struct SubscribeRequest {
    pub session_id: u64,
    /// Message stream id media is delivered on
    pub stream_id: u32,
    pub path: StreamPath,
    pub args: StreamArgs,
    pub queue: OutboundQueue,
}

#[derive(Default)]
struct Shard {
    publishers: Mutex<HashMap<StreamPath, Arc<PublishStream>>>,
}

/// Central registry for all active streams
pub struct StreamRegistry {
    shards: Box<[Shard]>,
    config: RegistryConfig,
}

impl StreamRegistry {
    /// Create a new stream registry with default configuration
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    pub fn with_config(config: RegistryConfig) -> Self {
        let shards = (0..config.shard_count.max(1))
            .map(|_| Shard::default())
            .collect();
        Self { shards, config }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    fn shard(&self, path: &StreamPath) -> &Shard {
        let mut hasher = DefaultHasher::new();
        path.hash(&mut hasher);
        &self.shards[(hasher.finish() % self.shards.len() as u64) as usize]
    }

    /// Register a publisher for `path`
    ///
    /// Fails if the path already has one; the existing publisher is left
    /// untouched.
    pub fn start_publishing(
        &self,
        request: PublishRequest,
    ) -> Result<Arc<PublishStream>, RegistryError> {
        let mut publishers = self.shard(&request.path).publishers.lock();
        if publishers.contains_key(&request.path) {
            return Err(RegistryError::AlreadyPublishing(request.path.to_string()));
        }

        let stream = Arc::new(PublishStream::new(
            request.path.clone(),
            request.args,
            request.session_id,
            request.publish_type,
            self.config.max_gop_size,
        ));
        publishers.insert(request.path, Arc::clone(&stream));

        tracing::info!(
            session_id = request.session_id,
            stream = %stream.path(),
            "Publisher registered"
        );
        Ok(stream)
    }

    /// Unregister `stream`
    ///
    /// Releases every cached buffer and tells the remaining subscribers the
    /// stream is gone. Returns false if `stream` is no longer the
    /// registered publisher for its path.
    pub fn stop_publishing(&self, stream: &Arc<PublishStream>) -> bool {
        {
            let mut publishers = self.shard(stream.path()).publishers.lock();
            match publishers.get(stream.path()) {
                Some(current) if Arc::ptr_eq(current, stream) => {
                    publishers.remove(stream.path());
                }
                _ => return false,
            }
        }

        let subscribers = {
            let mut cache = stream.lock_cache();
            cache.clear();
            cache.metadata = None;
            stream.take_subscribers()
        };
        for subscriber in subscribers.iter() {
            subscriber.end();
        }

        tracing::info!(
            session_id = stream.session_id(),
            stream = %stream.path(),
            subscribers = subscribers.len(),
            "Publisher unregistered"
        );
        true
    }

    /// Subscribe to the publisher of `path`
    ///
    /// The new subscriber is primed while the stream's cache lock is held:
    /// play status, cached sequence headers, metadata, then the GOP. Only
    /// then does it join the subscriber list, so live media can never
    /// overtake the cached frames.
    pub fn start_subscribing(
        &self,
        request: SubscribeRequest,
    ) -> Result<(Arc<PublishStream>, Arc<Subscriber>), RegistryError> {
        let publishers = self.shard(&request.path).publishers.lock();
        let stream = match publishers.get(&request.path) {
            Some(stream) => Arc::clone(stream),
            None => return Err(RegistryError::StreamNotFound(request.path.to_string())),
        };
        if stream.has_subscriber(request.session_id) {
            return Err(RegistryError::AlreadySubscribing(request.path.to_string()));
        }

        let subscriber = Arc::new(Subscriber::new(
            request.session_id,
            request.stream_id,
            request.path,
            request.args,
            request.queue,
        ));

        let cache = stream.lock_cache();
        subscriber.send_play_start();
        if let Some(header) = &cache.video_header {
            subscriber.send_cached(MediaKind::Video, 0, header.claim());
        }
        if let Some(header) = &cache.audio_header {
            subscriber.send_cached(MediaKind::Audio, 0, header.claim());
        }
        if let Some(metadata) = &cache.metadata {
            subscriber.send_metadata(metadata);
        }
        let replay = cache.gop.replay();
        let primed_through = replay.last().map(|e| e.seq).unwrap_or(0);
        let replayed = replay.len();
        for entry in replay {
            subscriber.send_cached(entry.kind, entry.timestamp, entry.buffer);
        }
        subscriber.finish_priming(primed_through);
        stream.add_subscriber(Arc::clone(&subscriber));
        drop(cache);
        drop(publishers);

        tracing::info!(
            session_id = subscriber.session_id(),
            stream = %stream.path(),
            gop_frames = replayed,
            "Subscriber registered"
        );
        Ok((stream, subscriber))
    }

    /// Remove `subscriber` from `stream`; false if it was not subscribed
    pub fn stop_subscribing(&self, stream: &PublishStream, subscriber: &Subscriber) -> bool {
        let removed = stream.remove_subscriber(subscriber);
        if removed {
            tracing::info!(
                session_id = subscriber.session_id(),
                stream = %stream.path(),
                "Subscriber unregistered"
            );
        }
        removed
    }

    /// Current publisher of `path`
    pub fn get(&self, path: &StreamPath) -> Option<Arc<PublishStream>> {
        self.shard(path).publishers.lock().get(path).cloned()
    }

    pub fn stream_count(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| shard.publishers.lock().len())
            .sum()
    }

    /// Paths with an active publisher, in no particular order
    pub fn stream_paths(&self) -> Vec<StreamPath> {
        self.shards
            .iter()
            .flat_map(|shard| shard.publishers.lock().keys().cloned().collect::<Vec<_>>())
            .collect()
    }
}

impl Default for StreamRegistry {
    fn default() -> Self {
        Self::new()
    }
}
