//! Duplex line transport handed from the supervisor to the protocol client.

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::acp::reader::run_line_reader;
use crate::acp::writer::{shared_writer, SharedWriter};

/// Capacity of the inbound line channel between the reader task and the
/// protocol client.
pub const LINE_CHANNEL_CAPACITY: usize = 256;

/// One bound stream pair: a shared writer for outbound lines and a channel
/// of complete inbound lines.
///
/// The line channel closing means the agent's output reached EOF.
pub struct Transport {
    writer: SharedWriter,
    lines: mpsc::Receiver<String>,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("lines", &self.lines)
            .finish_non_exhaustive()
    }
}

impl Transport {
    /// Assemble a transport from an already-framed line channel.
    #[must_use]
    pub fn new(writer: SharedWriter, lines: mpsc::Receiver<String>) -> Self {
        Self { writer, lines }
    }

    /// Build a transport over raw byte halves, spawning the framing task.
    ///
    /// The reader task stops at EOF or when `cancel` fires.
    pub fn from_io<R, W>(reader: R, writer: W, cancel: CancellationToken) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (line_tx, lines) = mpsc::channel(LINE_CHANNEL_CAPACITY);
        tokio::spawn(run_line_reader(
            "transport".to_owned(),
            reader,
            line_tx,
            |_| {},
            cancel,
        ));
        Self::new(shared_writer(writer), lines)
    }

    /// Split into the writer and the inbound line receiver.
    #[must_use]
    pub fn into_parts(self) -> (SharedWriter, mpsc::Receiver<String>) {
        (self.writer, self.lines)
    }
}
