//! Server configuration

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::protocol::constants::*;
use crate::registry::RegistryConfig;

/// Server configuration options
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// Maximum concurrent connections (0 = unlimited)
    pub max_connections: usize,

    /// Chunk size we announce and write with after the handshake
    pub chunk_size: u32,

    /// Largest inbound chunk size a peer may announce
    pub max_chunk_size: u32,

    /// Largest reassembled inbound message
    pub max_message_size: u32,

    /// Window acknowledgement size announced to peers
    pub window_ack_size: u32,

    /// Peer bandwidth announced to peers
    pub peer_bandwidth: u32,

    /// Handshake must complete within this time
    pub connection_timeout: Duration,

    /// Disconnect if no data is received for this long
    pub idle_timeout: Duration,

    /// Enable TCP_NODELAY (disable Nagle's algorithm)
    pub tcp_nodelay: bool,

    /// Application-level read buffer size
    pub read_buffer_size: usize,

    /// Application-level write buffer size
    pub write_buffer_size: usize,

    /// Media buffers kept for reuse
    pub buffer_pool_size: usize,

    /// Stream registry settings (sharding, GOP cache, backpressure)
    pub registry: RegistryConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 1935),
            max_connections: 0, // Unlimited
            chunk_size: RECOMMENDED_CHUNK_SIZE,
            max_chunk_size: 64 * 1024,
            max_message_size: MAX_MESSAGE_SIZE,
            window_ack_size: DEFAULT_WINDOW_ACK_SIZE,
            peer_bandwidth: DEFAULT_PEER_BANDWIDTH,
            connection_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(60),
            tcp_nodelay: true, // Important for low latency
            read_buffer_size: 64 * 1024, // 64KB
            write_buffer_size: 64 * 1024,
            buffer_pool_size: 1024,
            registry: RegistryConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Create a new config with custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set maximum connections
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the outbound chunk size
    pub fn chunk_size(mut self, size: u32) -> Self {
        self.chunk_size = size.clamp(1, MAX_CHUNK_SIZE);
        self
    }

    /// Set the largest inbound chunk size peers may announce
    pub fn max_chunk_size(mut self, size: u32) -> Self {
        self.max_chunk_size = size.clamp(1, MAX_CHUNK_SIZE);
        self
    }

    /// Set the window acknowledgement size announced to peers
    pub fn window_ack_size(mut self, size: u32) -> Self {
        self.window_ack_size = size;
        self
    }

    /// Set connection timeout
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set idle timeout
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the number of pooled media buffers
    pub fn buffer_pool_size(mut self, size: usize) -> Self {
        self.buffer_pool_size = size;
        self
    }

    /// Replace the registry settings
    pub fn registry(mut self, registry: RegistryConfig) -> Self {
        self.registry = registry;
        self
    }

    /// Disable GOP caching
    pub fn disable_gop_cache(mut self) -> Self {
        self.registry.max_gop_size = 0;
        self
    }

    /// Check that the settings are usable together
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::Config("chunk size must be non-zero".into()));
        }
        if self.chunk_size > self.max_message_size {
            return Err(Error::Config(format!(
                "chunk size {} exceeds max message size {}",
                self.chunk_size, self.max_message_size
            )));
        }
        if self.max_chunk_size < DEFAULT_CHUNK_SIZE {
            return Err(Error::Config(format!(
                "max chunk size {} is below the protocol default {}",
                self.max_chunk_size, DEFAULT_CHUNK_SIZE
            )));
        }
        if self.read_buffer_size == 0 || self.write_buffer_size == 0 {
            return Err(Error::Config("buffer sizes must be non-zero".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr.port(), 1935);
        assert_eq!(config.chunk_size, RECOMMENDED_CHUNK_SIZE);
        assert_eq!(config.registry.shard_count, 64);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let config = ServerConfig::with_addr(addr)
            .max_connections(10)
            .chunk_size(0)
            .idle_timeout(Duration::from_secs(5))
            .disable_gop_cache();
        assert_eq!(config.bind_addr, addr);
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.chunk_size, 1);
        assert_eq!(config.registry.max_gop_size, 0);
    }

    #[test]
    fn test_validate() {
        let config = ServerConfig::default().max_chunk_size(64);
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = ServerConfig::default();
        config.read_buffer_size = 0;
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.chunk_size = 0;
        assert!(config.validate().is_err());
    }
}
