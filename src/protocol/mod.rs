//! RTMP wire protocol implementation
//!
//! This module handles the low-level protocol details:
//! - Handshake (C0C1C2/S0S1S2 exchange, simple and digest variants)
//! - Chunk stream multiplexing and demultiplexing
//! - Message classification and protocol control
//! - Command decoding

pub mod chunk;
pub mod command;
pub mod constants;
pub mod control;
pub mod handshake;
pub mod message;

pub use chunk::{ChunkDecoder, ChunkEncoder, RawMessage};
pub use command::{CommandCall, CommandDispatcher, ConnectParams, PlayParams, PublishParams, RtmpCommand};
pub use control::{AckTracker, ProtocolControl};
pub use handshake::{Handshake, HandshakeSchema, HandshakeState};
pub use message::{Command, DataMessage, RtmpMessage, UserControlEvent};
