//! Outbound side of an agent transport.
//!
//! The agent's stdin is shared between the protocol client (requests) and
//! the supervisor's health probe, so it lives behind an async mutex. Holding
//! the lock for the whole write keeps every line contiguous on the wire.

use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_util::codec::Encoder;

use crate::acp::codec::NdjsonCodec;
use crate::{AppError, Result};

/// Type-erased byte sink (child stdin, duplex half, …).
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Writer shared by everyone allowed to write to one agent's stdin.
pub type SharedWriter = Arc<Mutex<BoxedWriter>>;

/// Wrap a raw writer for sharing.
pub fn shared_writer<W>(writer: W) -> SharedWriter
where
    W: AsyncWrite + Send + Unpin + 'static,
{
    Arc::new(Mutex::new(Box::new(writer)))
}

/// Write `line` followed by `\n` and flush.
///
/// # Errors
///
/// Returns [`AppError::Transport`]`("write failed: …")` when the stream is
/// closed (for example the agent process has exited).
pub async fn write_line<W>(writer: &mut W, line: String) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = BytesMut::with_capacity(line.len() + 1);
    NdjsonCodec::new().encode(line, &mut buf)?;

    writer
        .write_all(&buf)
        .await
        .map_err(|e| AppError::Transport(format!("write failed: {e}")))?;
    writer
        .flush()
        .await
        .map_err(|e| AppError::Transport(format!("flush failed: {e}")))
}
