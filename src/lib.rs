//! rtmp-server: RTMP session engine and live media distribution
//!
//! This library provides:
//! - The RTMP handshake (simple and both complex digest schemas)
//! - Chunk stream encoding and reassembly
//! - AMF0/AMF3 command decoding with typed command payloads
//! - A sharded publish/subscribe stream registry
//! - GOP caching and backpressure-aware fan-out over pooled,
//!   reference-counted media buffers
//!
//! # Example: Simple Server
//!
//! ```no_run
//! use rtmp_server::{AuthResult, RtmpHandler, RtmpServer, ServerConfig};
//! use rtmp_server::server::PublishAuth;
//! use rtmp_server::session::SessionContext;
//!
//! struct MyHandler;
//!
//! #[async_trait::async_trait]
//! impl RtmpHandler for MyHandler {
//!     async fn authorize_publish(&self, _ctx: &SessionContext, req: &PublishAuth<'_>) -> AuthResult {
//!         println!("Stream published: {}", req.path);
//!         AuthResult::Accept
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = RtmpServer::new(ServerConfig::default(), MyHandler);
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod amf;
pub mod buffer;
pub mod error;
pub mod events;
pub mod media;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
pub mod stats;

// Re-export main types for convenience
pub use buffer::{BufferPool, RentedBuffer};
pub use error::{Error, Result};
pub use events::{EventDispatcher, MediaInterceptor, ServerEventHandler};
pub use registry::{StreamPath, StreamRegistry};
pub use server::config::ServerConfig;
pub use server::handler::{AuthResult, RtmpHandler};
pub use server::listener::RtmpServer;
