//! GOP (Group of Pictures) cache for late joiners
//!
//! A subscriber joining mid-stream needs the frames since the last key frame
//! before live delivery can start. The cache holds exactly that delta: a key
//! frame resets it, and nothing is cached until the first key frame arrives.
//!
//! Each entry owns one claim on its buffer. Clearing the cache drops every
//! claim once; a replay hands out fresh claims so a subscriber can keep
//! reading entries that the publisher has meanwhile cleared.

use std::collections::VecDeque;

use super::flv::MediaKind;
use crate::buffer::RentedBuffer;

/// A cached media message
#[derive(Debug)]
pub struct GopEntry {
    /// Publish order, shared with live delivery
    pub seq: u64,
    pub kind: MediaKind,
    pub timestamp: u32,
    pub buffer: RentedBuffer,
}

impl GopEntry {
    pub fn size(&self) -> usize {
        self.buffer.len()
    }

    /// Copy of the entry carrying its own claim
    pub fn claim(&self) -> GopEntry {
        GopEntry {
            seq: self.seq,
            kind: self.kind,
            timestamp: self.timestamp,
            buffer: self.buffer.claim(),
        }
    }
}

/// Frames since the most recent key frame
#[derive(Debug)]
pub struct GopCache {
    max_bytes: usize,
    bytes: usize,
    entries: VecDeque<GopEntry>,
    /// A key frame opened the current group
    started: bool,
}

impl GopCache {
    /// `max_bytes` of 0 disables caching
    pub fn new(max_bytes: usize) -> Self {
        Self {
            max_bytes,
            bytes: 0,
            entries: VecDeque::new(),
            started: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.max_bytes > 0
    }

    /// Start a new group with `key_frame`, releasing the previous one
    pub fn start_group(&mut self, key_frame: GopEntry) {
        self.clear();
        if !self.is_enabled() || key_frame.size() > self.max_bytes {
            return;
        }
        self.started = true;
        self.bytes = key_frame.size();
        self.entries.push_back(key_frame);
    }

    /// Append a frame to the open group
    ///
    /// Returns false if there is no open group. A group that would outgrow
    /// the byte cap is discarded whole, since a group missing its key frame
    /// cannot be decoded; caching resumes at the next key frame.
    pub fn push(&mut self, entry: GopEntry) -> bool {
        if !self.started {
            return false;
        }
        if self.bytes + entry.size() > self.max_bytes {
            tracing::debug!(
                cached = self.entries.len(),
                bytes = self.bytes,
                "GOP exceeds cache limit, waiting for next key frame"
            );
            self.clear();
            return false;
        }
        self.bytes += entry.size();
        self.entries.push_back(entry);
        true
    }

    /// Release every cached claim. Returns the number of entries dropped.
    pub fn clear(&mut self) -> usize {
        let dropped = self.entries.len();
        self.entries.clear();
        self.bytes = 0;
        self.started = false;
        dropped
    }

    /// Claimed copies of all entries, oldest first
    pub fn replay(&self) -> Vec<GopEntry> {
        self.entries.iter().map(GopEntry::claim).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bytes held by the cached payloads
    pub fn size(&self) -> usize {
        self.bytes
    }

    /// Sequence number of the newest entry
    pub fn last_seq(&self) -> Option<u64> {
        self.entries.back().map(|e| e.seq)
    }

    /// First and last cached timestamps
    pub fn timestamp_range(&self) -> Option<(u32, u32)> {
        let first = self.entries.front()?.timestamp;
        let last = self.entries.back()?.timestamp;
        Some((first, last))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferPool;

    fn entry(pool: &BufferPool, timestamp: u32, key: bool, size: usize) -> GopEntry {
        let mut data = vec![0u8; size];
        data[0] = if key { 0x17 } else { 0x27 };
        GopEntry {
            seq: timestamp as u64 + 1,
            kind: MediaKind::Video,
            timestamp,
            buffer: pool.rent_copy(&data),
        }
    }

    #[test]
    fn test_nothing_cached_before_key_frame() {
        let pool = BufferPool::new(8);
        let mut gop = GopCache::new(1 << 20);

        assert!(!gop.push(entry(&pool, 0, false, 100)));
        assert!(!gop.push(entry(&pool, 33, false, 100)));
        assert!(gop.is_empty());
        // Rejected entries were released right away
        assert_eq!(pool.stats().outstanding, 0);
    }

    #[test]
    fn test_key_frame_resets_group() {
        let pool = BufferPool::new(8);
        let mut gop = GopCache::new(1 << 20);

        gop.start_group(entry(&pool, 0, true, 500));
        assert!(gop.push(entry(&pool, 33, false, 200)));
        assert!(gop.push(entry(&pool, 66, false, 200)));
        assert_eq!(gop.len(), 3);
        assert_eq!(gop.size(), 900);

        gop.start_group(entry(&pool, 100, true, 500));
        assert_eq!(gop.len(), 1);
        assert_eq!(gop.timestamp_range(), Some((100, 100)));
        assert_eq!(pool.stats().outstanding, 1);
    }

    #[test]
    fn test_replay_outlives_clear() {
        let pool = BufferPool::new(8);
        let mut gop = GopCache::new(1 << 20);
        gop.start_group(entry(&pool, 0, true, 10));
        gop.push(entry(&pool, 40, false, 10));

        let replay = gop.replay();
        assert_eq!(replay[0].buffer.claims(), 2);
        assert_eq!(gop.clear(), 2);

        assert_eq!(replay.len(), 2);
        assert_eq!(replay[1].timestamp, 40);
        assert_eq!(replay[0].buffer.claims(), 1);
        assert_eq!(pool.stats().outstanding, 2);

        drop(replay);
        assert_eq!(pool.stats().outstanding, 0);
    }

    #[test]
    fn test_size_limit_drops_whole_group() {
        let pool = BufferPool::new(8);
        let mut gop = GopCache::new(500);

        gop.start_group(entry(&pool, 0, true, 200));
        assert!(gop.push(entry(&pool, 33, false, 200)));
        assert!(!gop.push(entry(&pool, 66, false, 200)));
        assert!(gop.is_empty());

        // Stays closed until the next key frame
        assert!(!gop.push(entry(&pool, 99, false, 10)));
        gop.start_group(entry(&pool, 132, true, 100));
        assert_eq!(gop.len(), 1);
    }

    #[test]
    fn test_disabled() {
        let pool = BufferPool::new(8);
        let mut gop = GopCache::new(0);
        gop.start_group(entry(&pool, 0, true, 10));
        assert!(gop.is_empty());
        assert_eq!(pool.stats().outstanding, 0);
    }
}
