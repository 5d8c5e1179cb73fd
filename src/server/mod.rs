//! RTMP server implementation
//!
//! This module provides the server-side RTMP implementation:
//! - TCP listener for accepting connections
//! - Per-connection session loop and writer task
//! - Handler trait for authorization callbacks

pub mod config;
pub mod connection;
pub mod handler;
pub mod listener;
pub mod writer;

pub use config::ServerConfig;
pub use handler::{AuthResult, LoggingHandler, PublishAuth, RtmpHandler};
pub use listener::RtmpServer;
