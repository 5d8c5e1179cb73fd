//! Media handling for RTMP
//!
//! This module provides:
//! - FLV tag body classification (sequence headers, key frames)
//! - GOP caching for late joiners
//! - Fan-out of published media to subscribers

pub mod distributor;
pub mod flv;
pub mod gop;

pub use distributor::{Distribution, MediaDistributor};
pub use flv::{MediaFrame, MediaKind};
pub use gop::{GopCache, GopEntry};
