//! Simple RTMP server with pub/sub
//!
//! Run with: cargo run --example simple_server
//!
//! ## Publishing (send stream)
//!
//! With OBS:
//!   Server: rtmp://localhost/live
//!   Stream Key: test
//!
//! With ffmpeg:
//!   ffmpeg -re -i input.mp4 -c copy -f flv rtmp://localhost/live/test
//!
//! A key can be required by appending it to the stream name:
//!   rtmp://localhost/live/test?key=secret
//!
//! ## Playing (receive stream)
//!
//! With ffplay:
//!   ffplay rtmp://localhost/live/test
//!
//! Players joining after the stream started receive the sequence headers,
//! the metadata, and the current GOP before live frames.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use rtmp_server::amf::AmfObject;
use rtmp_server::buffer::RentedBuffer;
use rtmp_server::media::MediaKind;
use rtmp_server::protocol::ConnectParams;
use rtmp_server::registry::{StreamArgs, StreamPath};
use rtmp_server::server::PublishAuth;
use rtmp_server::session::SessionContext;
use rtmp_server::{
    AuthResult, EventDispatcher, MediaInterceptor, RtmpHandler, RtmpServer, ServerConfig,
    ServerEventHandler,
};

/// Requires `?key=...` on publish when a key is configured
struct KeyHandler {
    key: Option<String>,
}

#[async_trait]
impl RtmpHandler for KeyHandler {
    async fn on_connect(&self, ctx: &SessionContext, params: &ConnectParams) -> AuthResult {
        println!(
            "[{}] Connect: app={}, tcUrl={:?}",
            ctx.session_id, params.app, params.tc_url
        );
        AuthResult::Accept
    }

    async fn authorize_publish(&self, ctx: &SessionContext, req: &PublishAuth<'_>) -> AuthResult {
        println!(
            "[{}] Publish: path={}, type={}",
            ctx.session_id, req.path, req.publish_type
        );
        match (&self.key, req.args.get("key")) {
            (None, _) => AuthResult::Accept,
            (Some(expected), Some(given)) if expected == given => AuthResult::Accept,
            _ => AuthResult::Reject("Invalid stream key".into()),
        }
    }
}

/// Prints lifecycle events
struct Printer;

impl ServerEventHandler for Printer {
    fn on_stream_published(&self, ctx: &SessionContext, path: &StreamPath, _args: &StreamArgs) {
        println!("[{}] Publishing {}", ctx.session_id, path);
    }

    fn on_stream_unpublished(&self, ctx: &SessionContext, path: &StreamPath) {
        println!("[{}] Stopped publishing {}", ctx.session_id, path);
    }

    fn on_stream_subscribed(&self, ctx: &SessionContext, path: &StreamPath, _args: &StreamArgs) {
        println!("[{}] Playing {}", ctx.session_id, path);
    }

    fn on_stream_metadata(&self, ctx: &SessionContext, path: &StreamPath, metadata: &AmfObject) {
        println!("[{}] Metadata for {}:", ctx.session_id, path);

        if let (Some(width), Some(height)) = (
            metadata.get("width").and_then(|v| v.as_number()),
            metadata.get("height").and_then(|v| v.as_number()),
        ) {
            println!("  Resolution: {}x{}", width as u32, height as u32);
        }

        if let Some(fps) = metadata.get("framerate").and_then(|v| v.as_number()) {
            println!("  Framerate: {:.2} fps", fps);
        }
    }
}

/// Counts media passing through the server
#[derive(Default)]
struct Counter {
    video_frames: AtomicU64,
    audio_frames: AtomicU64,
    key_frames: AtomicU64,
    bytes: AtomicU64,
}

impl MediaInterceptor for Counter {
    fn on_cache_key_frame(&self, path: &StreamPath, _kind: MediaKind, _buffer: RentedBuffer, timestamp: u32) {
        let total = self.key_frames.fetch_add(1, Ordering::Relaxed) + 1;
        if total % 5 == 0 {
            tracing::debug!(
                stream = %path,
                timestamp,
                key_frames = total,
                video = self.video_frames.load(Ordering::Relaxed),
                audio = self.audio_frames.load(Ordering::Relaxed),
                bytes = self.bytes.load(Ordering::Relaxed),
                "Stream progress"
            );
        }
    }

    fn on_media_message(
        &self,
        _path: &StreamPath,
        kind: MediaKind,
        buffer: RentedBuffer,
        _timestamp: u32,
        _skippable: bool,
    ) {
        self.bytes.fetch_add(buffer.len() as u64, Ordering::Relaxed);
        match kind {
            MediaKind::Video => self.video_frames.fetch_add(1, Ordering::Relaxed),
            MediaKind::Audio => self.audio_frames.fetch_add(1, Ordering::Relaxed),
        };
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("rtmp_server=debug".parse()?)
                .add_directive("simple_server=debug".parse()?),
        )
        .init();

    let config = ServerConfig::default();

    println!("Starting RTMP server on {}", config.bind_addr);
    println!();
    println!("=== Publish a stream ===");
    println!("OBS:    Server: rtmp://localhost/live  Stream Key: test");
    println!("ffmpeg: ffmpeg -re -i input.mp4 -c copy -f flv rtmp://localhost/live/test");
    println!();
    println!("=== Play a stream ===");
    println!("ffplay: ffplay rtmp://localhost/live/test");
    println!();

    let events = EventDispatcher::new()
        .with_handler(Arc::new(Printer))
        .with_interceptor(Arc::new(Counter::default()));
    let handler = KeyHandler {
        key: std::env::var("RTMP_STREAM_KEY").ok(),
    };
    let server = RtmpServer::with_events(config, handler, events);

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                eprintln!("Server error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            let stats = server.stats();
            println!(
                "\nShutting down: {} connections served, {} streams live",
                stats.total_connections, stats.active_streams
            );
        }
    }

    Ok(())
}
