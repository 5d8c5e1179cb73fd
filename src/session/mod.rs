//! RTMP session state management
//!
//! This module manages the state of RTMP connections, including:
//! - Session lifecycle (handshake, connect, publish/play, disconnect)
//! - Per-stream state (message stream ID, publish/play mode)
//! - The outbound queue drained by each session's writer task
//! - Liveness shared between the read loop and the writer task
//! - Context passed to handlers

pub mod activity;
pub mod context;
pub mod outbound;
pub mod state;

pub use activity::Activity;
pub use context::SessionContext;
pub use outbound::{OutboundMessage, OutboundQueue, OutboundReceiver, Payload};
pub use state::{SessionPhase, SessionState, StreamMode};
