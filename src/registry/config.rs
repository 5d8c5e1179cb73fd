//! Registry configuration
//!
//! Lock sharding, GOP cache limits, and the subscriber backpressure
//! threshold.

/// Configuration for the stream registry
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Number of independently locked shards stream paths hash into
    pub shard_count: usize,

    /// Maximum GOP cache size in bytes per stream; 0 disables the cache
    pub max_gop_size: usize,

    /// Queued messages above which a subscriber stops receiving
    /// skippable frames
    ///
    /// At 30fps video plus audio, 300 messages is a few seconds behind.
    pub skip_threshold: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            shard_count: 64,
            max_gop_size: 4 * 1024 * 1024, // 4MB
            skip_threshold: 300,
        }
    }
}

impl RegistryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of lock shards (at least 1)
    pub fn shard_count(mut self, count: usize) -> Self {
        self.shard_count = count.max(1);
        self
    }

    /// Set the maximum GOP cache size
    pub fn max_gop_size(mut self, size: usize) -> Self {
        self.max_gop_size = size;
        self
    }

    /// Set the backpressure threshold
    pub fn skip_threshold(mut self, messages: usize) -> Self {
        self.skip_threshold = messages;
        self
    }
}
