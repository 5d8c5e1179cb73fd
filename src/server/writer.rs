//! Per-connection writer task
//!
//! Drains the session's outbound queue into the socket. Messages queued
//! together are chunked into one buffer and written with a single flush.
//! Each media payload's claim is released as soon as its chunks have been
//! copied out, and everything still queued is released when the task ends,
//! whether it ends cleanly or on a write error. Every flush counts as
//! session activity.

use bytes::BytesMut;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::oneshot;

use crate::error::Result;
use crate::protocol::chunk::ChunkEncoder;
use crate::session::activity::Activity;
use crate::session::outbound::{OutboundMessage, OutboundReceiver};

/// Outbound half of a session
pub struct Writer<W> {
    io: BufWriter<W>,
    encoder: ChunkEncoder,
    buf: BytesMut,
    batch_limit: usize,
    bytes_written: u64,
    activity: Activity,
}

impl<W: AsyncWrite + Unpin> Writer<W> {
    pub fn new(io: W, buffer_size: usize) -> Self {
        Self {
            io: BufWriter::with_capacity(buffer_size, io),
            encoder: ChunkEncoder::new(),
            buf: BytesMut::with_capacity(buffer_size),
            batch_limit: buffer_size,
            bytes_written: 0,
            activity: Activity::new(),
        }
    }

    /// Report flushes to the session's liveness clock
    pub fn with_activity(mut self, activity: Activity) -> Self {
        self.activity = activity;
        self
    }

    /// Run until the queue closes, a write fails, or `shutdown` fires.
    /// On shutdown, whatever is already queued is still written.
    ///
    /// Returns the number of bytes written.
    pub async fn run(
        mut self,
        mut rx: OutboundReceiver,
        mut shutdown: oneshot::Receiver<()>,
    ) -> Result<u64> {
        loop {
            let msg = tokio::select! {
                msg = rx.recv() => match msg {
                    Some(msg) => msg,
                    None => break,
                },
                _ = &mut shutdown => {
                    rx.close();
                    while let Some(msg) = rx.try_recv() {
                        self.encode(msg);
                    }
                    self.flush().await?;
                    return Ok(self.bytes_written);
                }
            };

            self.encode(msg);
            while self.buf.len() < self.batch_limit {
                match rx.try_recv() {
                    Some(msg) => self.encode(msg),
                    None => break,
                }
            }
            self.flush().await?;
        }
        self.flush().await?;
        Ok(self.bytes_written)
    }

    fn encode(&mut self, msg: OutboundMessage) {
        self.encoder.encode_parts(
            msg.csid,
            msg.timestamp,
            msg.message_type,
            msg.stream_id,
            msg.payload.as_slice(),
            &mut self.buf,
        );
        // The peer switches chunk size after reading this message
        if let Some(size) = msg.chunk_size_change() {
            self.encoder.set_chunk_size(size);
        }
    }

    async fn flush(&mut self) -> Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        self.io.write_all(&self.buf).await?;
        self.io.flush().await?;
        self.bytes_written += self.buf.len() as u64;
        self.buf.clear();
        self.activity.touch();
        Ok(())
    }
}
