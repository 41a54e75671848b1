//! Newline-delimited JSON framing for agent stdio.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] with a maximum line length so an
//! agent that never terminates a line cannot make the host buffer without
//! bound. Partial lines stay in the read buffer until their `\n` arrives.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use crate::{AppError, Result};

/// Maximum accepted inbound line length: 1 MiB.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// Line codec used on both directions of an agent transport.
///
/// Decoding yields each complete UTF-8 line without its terminator (a
/// trailing `\r` is stripped as well). Lines over [`MAX_LINE_BYTES`] produce
/// [`AppError::Transport`] and are discarded; the codec then resynchronises
/// on the next newline.
///
/// # Examples
///
/// ```rust,ignore
/// use tokio_util::codec::FramedRead;
/// use agent_conduit::acp::codec::NdjsonCodec;
///
/// let lines = FramedRead::new(child_stdout, NdjsonCodec::new());
/// ```
#[derive(Debug)]
pub struct NdjsonCodec(LinesCodec);

impl NdjsonCodec {
    /// Create a codec with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self(LinesCodec::new_with_max_length(MAX_LINE_BYTES))
    }
}

impl Default for NdjsonCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for NdjsonCodec {
    type Item = String;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.0.decode(src).map_err(framing_error)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.0.decode_eof(src).map_err(framing_error)
    }
}

impl Encoder<String> for NdjsonCodec {
    type Error = AppError;

    /// Encode `item` as `item\n`. The length cap is decoder-only.
    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<()> {
        self.0.encode(item, dst).map_err(framing_error)
    }
}

fn framing_error(err: LinesCodecError) -> AppError {
    match err {
        LinesCodecError::MaxLineLengthExceeded => {
            AppError::Transport(format!("line too long: exceeded {MAX_LINE_BYTES} bytes"))
        }
        LinesCodecError::Io(source) => AppError::from(source),
    }
}
