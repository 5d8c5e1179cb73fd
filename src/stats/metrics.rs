//! Statistics and metrics for RTMP sessions and streams

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::buffer::PoolStats;
use crate::media::MediaKind;

/// Session-level statistics
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    /// Total bytes received
    pub bytes_received: u64,
    /// Total bytes written by the writer task
    pub bytes_sent: u64,
    /// Messages reassembled from the peer
    pub messages_received: u64,
}

impl SessionStats {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Live counters of a published stream, updated by the publishing session
/// and by subscriber deliveries
#[derive(Debug)]
pub struct StreamCounters {
    started_at: Instant,
    bytes_received: AtomicU64,
    video_frames: AtomicU64,
    audio_frames: AtomicU64,
    key_frames: AtomicU64,
    frames_dropped: AtomicU64,
}

impl StreamCounters {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            bytes_received: AtomicU64::new(0),
            video_frames: AtomicU64::new(0),
            audio_frames: AtomicU64::new(0),
            key_frames: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
        }
    }

    pub fn record_frame(&self, kind: MediaKind, bytes: usize, key_frame: bool) {
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
        match kind {
            MediaKind::Video => self.video_frames.fetch_add(1, Ordering::Relaxed),
            MediaKind::Audio => self.audio_frames.fetch_add(1, Ordering::Relaxed),
        };
        if key_frame {
            self.key_frames.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Frames skipped for congested subscribers, counted per subscriber
    pub fn record_dropped(&self, frames: u64) {
        self.frames_dropped.fetch_add(frames, Ordering::Relaxed);
    }

    pub fn snapshot(&self, path: &str, subscribers: usize) -> StreamStats {
        StreamStats {
            path: path.to_string(),
            duration: self.started_at.elapsed(),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            video_frames: self.video_frames.load(Ordering::Relaxed),
            audio_frames: self.audio_frames.load(Ordering::Relaxed),
            key_frames: self.key_frames.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            subscribers,
        }
    }
}

impl Default for StreamCounters {
    fn default() -> Self {
        Self::new()
    }
}

/// Stream-level statistics snapshot
#[derive(Debug, Clone)]
pub struct StreamStats {
    /// Stream path
    pub path: String,
    /// Time since publishing started
    pub duration: Duration,
    pub bytes_received: u64,
    pub video_frames: u64,
    pub audio_frames: u64,
    pub key_frames: u64,
    /// Skippable frames dropped across all subscribers
    pub frames_dropped: u64,
    pub subscribers: usize,
}

impl StreamStats {
    /// Calculate bitrate in bits per second
    pub fn bitrate(&self) -> u64 {
        let secs = self.duration.as_secs();
        if secs > 0 {
            (self.bytes_received * 8) / secs
        } else {
            0
        }
    }

    /// Calculate video framerate
    pub fn framerate(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.video_frames as f64 / secs
        } else {
            0.0
        }
    }
}

/// Server-wide statistics
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    /// Total connections ever
    pub total_connections: u64,
    /// Current active connections
    pub active_connections: u64,
    /// Streams with an active publisher
    pub active_streams: usize,
    /// Media buffer pool usage
    pub buffers: PoolStats,
    /// Uptime
    pub uptime: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_counters() {
        let counters = StreamCounters::new();
        counters.record_frame(MediaKind::Video, 1000, true);
        counters.record_frame(MediaKind::Video, 200, false);
        counters.record_frame(MediaKind::Audio, 50, false);
        counters.record_dropped(3);

        let stats = counters.snapshot("/live/demo", 2);
        assert_eq!(stats.path, "/live/demo");
        assert_eq!(stats.bytes_received, 1250);
        assert_eq!(stats.video_frames, 2);
        assert_eq!(stats.audio_frames, 1);
        assert_eq!(stats.key_frames, 1);
        assert_eq!(stats.frames_dropped, 3);
        assert_eq!(stats.subscribers, 2);
    }

    #[test]
    fn test_bitrate_zero_duration() {
        let stats = StreamCounters::new().snapshot("/live/x", 0);
        assert_eq!(stats.bitrate(), 0);
        assert_eq!(stats.framerate(), 0.0);
    }
}
