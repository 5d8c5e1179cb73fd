//! Pooled, reference-counted media buffers
//!
//! Each inbound audio/video payload is copied once into a [`RentedBuffer`].
//! The GOP cache and every subscriber queue hold their own claim on it; the
//! backing allocation goes back to the [`BufferPool`] when the last claim is
//! released.

pub mod pool;

pub use pool::{BufferPool, PoolStats, RentedBuffer};
