//! Session liveness
//!
//! A session counts as active while bytes move in either direction. The
//! read loop touches the clock when data arrives and the writer task
//! touches it after every flush, so a player that only receives media
//! stays alive for as long as media is written to it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

/// Last time the session's socket saw traffic
#[derive(Debug, Clone)]
pub struct Activity {
    epoch: Instant,
    /// Milliseconds since `epoch`
    last: Arc<AtomicU64>,
}

impl Activity {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            last: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Record traffic now
    pub fn touch(&self) {
        self.last.fetch_max(self.now_ms(), Ordering::Relaxed);
    }

    /// Time since the last traffic in either direction
    pub fn idle_for(&self) -> Duration {
        let last = self.last.load(Ordering::Relaxed);
        Duration::from_millis(self.now_ms().saturating_sub(last))
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }
}

impl Default for Activity {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_touch_from_any_clone_resets_idle() {
        let activity = Activity::new();
        let writer_side = activity.clone();

        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(activity.idle_for(), Duration::from_secs(3));

        writer_side.touch();
        assert_eq!(activity.idle_for(), Duration::ZERO);

        tokio::time::advance(Duration::from_millis(250)).await;
        assert_eq!(activity.idle_for(), Duration::from_millis(250));
    }
}
