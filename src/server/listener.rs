//! RTMP server listener
//!
//! Handles the TCP accept loop and spawns one task per connection. All
//! connections share the stream registry, the media buffer pool, and the
//! event dispatcher.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;

use crate::buffer::BufferPool;
use crate::error::Result;
use crate::events::EventDispatcher;
use crate::media::MediaDistributor;
use crate::protocol::CommandDispatcher;
use crate::registry::StreamRegistry;
use crate::server::config::ServerConfig;
use crate::server::connection::Connection;
use crate::server::handler::RtmpHandler;
use crate::stats::ServerStats;

/// State shared by every connection of one server
pub(crate) struct Shared {
    pub registry: StreamRegistry,
    pub distributor: MediaDistributor,
    pub events: Arc<EventDispatcher>,
    pub commands: CommandDispatcher,
    total_connections: AtomicU64,
    active_connections: AtomicU64,
    started_at: Instant,
}

impl Shared {
    fn new(config: &ServerConfig, events: EventDispatcher) -> Self {
        let events = Arc::new(events);
        let pool = Arc::new(BufferPool::new(config.buffer_pool_size));
        Self {
            registry: StreamRegistry::with_config(config.registry.clone()),
            distributor: MediaDistributor::new(
                pool,
                Arc::clone(&events),
                config.registry.skip_threshold,
            ),
            events,
            commands: CommandDispatcher::new(),
            total_connections: AtomicU64::new(0),
            active_connections: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }
}

/// RTMP server
pub struct RtmpServer<H: RtmpHandler> {
    config: ServerConfig,
    handler: Arc<H>,
    shared: Arc<Shared>,
    next_session_id: AtomicU64,
    connection_semaphore: Option<Arc<Semaphore>>,
}

impl<H: RtmpHandler> RtmpServer<H> {
    /// Create a new server with the given configuration and handler
    pub fn new(config: ServerConfig, handler: H) -> Self {
        Self::with_events(config, handler, EventDispatcher::new())
    }

    /// Create a server that reports lifecycle events and media to `events`
    pub fn with_events(config: ServerConfig, handler: H, events: EventDispatcher) -> Self {
        let connection_semaphore = if config.max_connections > 0 {
            Some(Arc::new(Semaphore::new(config.max_connections)))
        } else {
            None
        };

        Self {
            shared: Arc::new(Shared::new(&config, events)),
            config,
            handler: Arc::new(handler),
            next_session_id: AtomicU64::new(1),
            connection_semaphore,
        }
    }

    /// Run the server
    ///
    /// This method blocks until the server is shut down.
    pub async fn run(&self) -> Result<()> {
        self.config.validate()?;
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Run the server with graceful shutdown
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        self.config.validate()?;
        let listener = TcpListener::bind(self.config.bind_addr).await?;

        tokio::select! {
            _ = shutdown => {
                tracing::info!("Shutdown signal received");
                Ok(())
            }
            result = self.serve(listener) => result,
        }
    }

    /// Accept connections from an already bound listener
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        tracing::info!(addr = %listener.local_addr()?, "RTMP server listening");

        loop {
            match listener.accept().await {
                Ok((socket, peer_addr)) => {
                    self.handle_connection(socket, peer_addr);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr) {
        // Check connection limit
        let permit = if let Some(ref sem) = self.connection_semaphore {
            match sem.clone().try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    tracing::warn!(peer = %peer_addr, "Connection rejected: limit reached");
                    return;
                }
            }
        } else {
            None
        };

        let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(
            session_id = session_id,
            peer = %peer_addr,
            "New connection"
        );

        if self.config.tcp_nodelay {
            if let Err(e) = socket.set_nodelay(true) {
                tracing::error!(error = %e, "Failed to configure socket");
                return;
            }
        }

        let config = self.config.clone();
        let handler = Arc::clone(&self.handler);
        let shared = Arc::clone(&self.shared);
        shared.total_connections.fetch_add(1, Ordering::Relaxed);
        shared.active_connections.fetch_add(1, Ordering::Relaxed);

        tokio::spawn(async move {
            let _permit = permit;
            let connection = Connection::new(
                session_id,
                socket,
                peer_addr,
                config,
                handler,
                Arc::clone(&shared),
            );

            if let Err(e) = connection.run().await {
                tracing::debug!(
                    session_id = session_id,
                    error = %e,
                    "Connection error"
                );
            }

            shared.active_connections.fetch_sub(1, Ordering::Relaxed);
            tracing::debug!(session_id = session_id, "Connection closed");
        });
    }

    /// Get the configured bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.config.bind_addr
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The registry shared by this server's connections
    pub fn registry(&self) -> &StreamRegistry {
        &self.shared.registry
    }

    pub fn stats(&self) -> ServerStats {
        ServerStats {
            total_connections: self.shared.total_connections.load(Ordering::Relaxed),
            active_connections: self.shared.active_connections.load(Ordering::Relaxed),
            active_streams: self.shared.registry.stream_count(),
            buffers: self.shared.distributor.pool().stats(),
            uptime: self.shared.started_at.elapsed(),
        }
    }
}
