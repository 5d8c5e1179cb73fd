//! Session context
//!
//! Read-only view of a session handed to authorization callbacks and
//! lifecycle events.

use std::net::SocketAddr;
use std::sync::Arc;

use crate::protocol::command::ConnectParams;

/// Context passed to handler and event callbacks
#[derive(Debug, Clone)]
pub struct SessionContext {
    /// Unique session ID
    pub session_id: u64,

    /// Remote peer address
    pub peer_addr: SocketAddr,

    /// Application name (from connect)
    pub app: String,

    /// Connect parameters (if available)
    pub connect_params: Option<Arc<ConnectParams>>,
}

impl SessionContext {
    pub fn new(session_id: u64, peer_addr: SocketAddr) -> Self {
        Self {
            session_id,
            peer_addr,
            app: String::new(),
            connect_params: None,
        }
    }

    /// Update with connect parameters
    pub fn with_connect(&mut self, params: ConnectParams) {
        self.app = params.app.clone();
        self.connect_params = Some(Arc::new(params));
    }

    pub fn is_connected(&self) -> bool {
        self.connect_params.is_some()
    }

    /// Get the TC URL if available
    pub fn tc_url(&self) -> Option<&str> {
        self.connect_params
            .as_ref()
            .and_then(|p| p.tc_url.as_deref())
    }

    /// Get the flash version string if available
    pub fn flash_ver(&self) -> Option<&str> {
        self.connect_params
            .as_ref()
            .and_then(|p| p.flash_ver.as_deref())
    }
}
