//! Lifecycle events and media interception
//!
//! Collaborators (relays, remuxers, admin APIs) observe the server through
//! two synchronous callback traits. Callbacks run on the session task that
//! raised them, in registration order, so they must not block.

use std::fmt;
use std::sync::Arc;

use crate::amf::AmfObject;
use crate::buffer::RentedBuffer;
use crate::media::MediaKind;
use crate::registry::{StreamArgs, StreamPath};
use crate::session::SessionContext;

/// Session and stream lifecycle notifications
///
/// All methods default to no-ops.
pub trait ServerEventHandler: Send + Sync + 'static {
    fn on_client_connected(&self, _ctx: &SessionContext) {}

    fn on_client_disconnected(&self, _ctx: &SessionContext) {}

    fn on_handshake_complete(&self, _ctx: &SessionContext) {}

    fn on_stream_published(&self, _ctx: &SessionContext, _path: &StreamPath, _args: &StreamArgs) {}

    fn on_stream_unpublished(&self, _ctx: &SessionContext, _path: &StreamPath) {}

    fn on_stream_subscribed(&self, _ctx: &SessionContext, _path: &StreamPath, _args: &StreamArgs) {}

    fn on_stream_unsubscribed(&self, _ctx: &SessionContext, _path: &StreamPath) {}

    fn on_stream_metadata(&self, _ctx: &SessionContext, _path: &StreamPath, _metadata: &AmfObject) {}
}

/// Access to the media flowing through a published stream
///
/// Buffers are handed over with their own claim. Keep the handle for as
/// long as the bytes are needed; dropping it releases the claim.
///
/// Callbacks run on the publisher's session task after the stream's cache
/// lock has been released, so they never block subscribers joining the
/// stream. They do hold up that publisher's ingest: hand slow work such as
/// segment writes to another task.
pub trait MediaInterceptor: Send + Sync + 'static {
    fn on_cache_sequence_header(&self, _path: &StreamPath, _kind: MediaKind, _data: &[u8]) {}

    fn on_cache_key_frame(
        &self,
        _path: &StreamPath,
        _kind: MediaKind,
        _buffer: RentedBuffer,
        _timestamp: u32,
    ) {
    }

    fn on_clear_gop_cache(&self, _path: &StreamPath) {}

    fn on_media_message(
        &self,
        _path: &StreamPath,
        _kind: MediaKind,
        _buffer: RentedBuffer,
        _timestamp: u32,
        _skippable: bool,
    ) {
    }
}

/// Ordered fan-out to registered callbacks
#[derive(Clone, Default)]
pub struct EventDispatcher {
    handlers: Vec<Arc<dyn ServerEventHandler>>,
    interceptors: Vec<Arc<dyn MediaInterceptor>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event handler; handlers run in the order added
    pub fn with_handler(mut self, handler: Arc<dyn ServerEventHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Append a media interceptor; interceptors run in the order added
    pub fn with_interceptor(mut self, interceptor: Arc<dyn MediaInterceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    pub fn has_interceptors(&self) -> bool {
        !self.interceptors.is_empty()
    }

    pub fn client_connected(&self, ctx: &SessionContext) {
        for h in &self.handlers {
            h.on_client_connected(ctx);
        }
    }

    pub fn client_disconnected(&self, ctx: &SessionContext) {
        for h in &self.handlers {
            h.on_client_disconnected(ctx);
        }
    }

    pub fn handshake_complete(&self, ctx: &SessionContext) {
        for h in &self.handlers {
            h.on_handshake_complete(ctx);
        }
    }

    pub fn stream_published(&self, ctx: &SessionContext, path: &StreamPath, args: &StreamArgs) {
        for h in &self.handlers {
            h.on_stream_published(ctx, path, args);
        }
    }

    pub fn stream_unpublished(&self, ctx: &SessionContext, path: &StreamPath) {
        for h in &self.handlers {
            h.on_stream_unpublished(ctx, path);
        }
    }

    pub fn stream_subscribed(&self, ctx: &SessionContext, path: &StreamPath, args: &StreamArgs) {
        for h in &self.handlers {
            h.on_stream_subscribed(ctx, path, args);
        }
    }

    pub fn stream_unsubscribed(&self, ctx: &SessionContext, path: &StreamPath) {
        for h in &self.handlers {
            h.on_stream_unsubscribed(ctx, path);
        }
    }

    pub fn stream_metadata(&self, ctx: &SessionContext, path: &StreamPath, metadata: &AmfObject) {
        for h in &self.handlers {
            h.on_stream_metadata(ctx, path, metadata);
        }
    }

    pub fn cache_sequence_header(&self, path: &StreamPath, kind: MediaKind, data: &[u8]) {
        for i in &self.interceptors {
            i.on_cache_sequence_header(path, kind, data);
        }
    }

    pub fn cache_key_frame(&self, path: &StreamPath, kind: MediaKind, buffer: &RentedBuffer, timestamp: u32) {
        for i in &self.interceptors {
            i.on_cache_key_frame(path, kind, buffer.claim(), timestamp);
        }
    }

    pub fn clear_gop_cache(&self, path: &StreamPath) {
        for i in &self.interceptors {
            i.on_clear_gop_cache(path);
        }
    }

    pub fn media_message(
        &self,
        path: &StreamPath,
        kind: MediaKind,
        buffer: &RentedBuffer,
        timestamp: u32,
        skippable: bool,
    ) {
        for i in &self.interceptors {
            i.on_media_message(path, kind, buffer.claim(), timestamp, skippable);
        }
    }
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("handlers", &self.handlers.len())
            .field("interceptors", &self.interceptors.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferPool;
    use parking_lot::Mutex;
    use std::net::SocketAddr;

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl ServerEventHandler for Recorder {
        fn on_client_connected(&self, ctx: &SessionContext) {
            self.log.lock().push(format!("{}:connected:{}", self.name, ctx.session_id));
        }

        fn on_stream_published(&self, _ctx: &SessionContext, path: &StreamPath, _args: &StreamArgs) {
            self.log.lock().push(format!("{}:published:{}", self.name, path));
        }
    }

    struct Keeper {
        kept: Mutex<Vec<RentedBuffer>>,
    }

    impl MediaInterceptor for Keeper {
        fn on_cache_key_frame(&self, _path: &StreamPath, _kind: MediaKind, buffer: RentedBuffer, _ts: u32) {
            self.kept.lock().push(buffer);
        }
    }

    fn ctx() -> SessionContext {
        SessionContext::new(7, "127.0.0.1:1935".parse::<SocketAddr>().unwrap())
    }

    #[test]
    fn test_handlers_run_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let events = EventDispatcher::new()
            .with_handler(Arc::new(Recorder { name: "a", log: Arc::clone(&log) }))
            .with_handler(Arc::new(Recorder { name: "b", log: Arc::clone(&log) }));

        events.client_connected(&ctx());
        events.stream_published(&ctx(), &StreamPath::from_raw("/live/demo"), &StreamArgs::new());
        // Unimplemented callbacks are no-ops
        events.client_disconnected(&ctx());

        assert_eq!(
            *log.lock(),
            vec![
                "a:connected:7",
                "b:connected:7",
                "a:published:/live/demo",
                "b:published:/live/demo",
            ]
        );
    }

    #[test]
    fn test_interceptors_get_own_claims() {
        let pool = BufferPool::new(4);
        let keeper = Arc::new(Keeper { kept: Mutex::new(Vec::new()) });
        let events = EventDispatcher::new()
            .with_interceptor(keeper.clone())
            .with_interceptor(Arc::new(Keeper { kept: Mutex::new(Vec::new()) }));
        assert!(events.has_interceptors());

        let buffer = pool.rent_copy(&[0x17, 0x01]);
        let path = StreamPath::from_raw("/live/demo");
        events.cache_key_frame(&path, MediaKind::Video, &buffer, 0);
        // One claim per interceptor plus ours
        assert_eq!(buffer.claims(), 3);

        // Default implementation releases immediately
        events.media_message(&path, MediaKind::Video, &buffer, 0, true);
        assert_eq!(buffer.claims(), 3);

        keeper.kept.lock().clear();
        assert_eq!(buffer.claims(), 2);
    }
}
