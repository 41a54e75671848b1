//! Inbound side of an agent transport.
//!
//! [`run_line_reader`] drives a [`FramedRead`] over the agent's stdout and
//! forwards every complete line into an [`mpsc`] channel; dropping the
//! sender at EOF is how the consumer learns the stream closed.
//! [`parse_inbound_line`] classifies one line into an [`Inbound`] message.
//!
//! | Shape                      | Classified as            |
//! |----------------------------|--------------------------|
//! | `id` set, no `method`      | [`Inbound::Response`]    |
//! | `method` set, no `id`      | [`Inbound::Notification`]|
//! | both `id` and `method` set | [`Inbound::Request`]     |

use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::Value;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::acp::codec::NdjsonCodec;
use crate::acp::messages::{Inbound, RequestId, RpcError};
use crate::{AppError, Result};

#[derive(Debug, Deserialize)]
struct RawEnvelope {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

/// Parse one NDJSON line into an [`Inbound`] message.
///
/// Returns `Ok(None)` for blank lines.
///
/// # Errors
///
/// - [`AppError::Transport`]`("malformed json: …")`: not a JSON object or
///   a member has the wrong shape.
/// - [`AppError::Transport`]`("unsupported id: …")`: `id` is neither an
///   unsigned integer nor a string.
/// - [`AppError::Transport`]`("envelope has neither id nor method")`.
pub fn parse_inbound_line(line: &str) -> Result<Option<Inbound>> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    let envelope: RawEnvelope = serde_json::from_str(trimmed)
        .map_err(|e| AppError::Transport(format!("malformed json: {e}")))?;

    let id = envelope.id.map(parse_id).transpose()?;
    let params = envelope.params.unwrap_or(Value::Null);

    match (id, envelope.method) {
        (Some(id), None) => {
            let outcome = match envelope.error {
                Some(error) => Err(error),
                None => Ok(envelope.result.unwrap_or(Value::Null)),
            };
            Ok(Some(Inbound::Response { id, outcome }))
        }
        (None, Some(method)) => Ok(Some(Inbound::Notification { method, params })),
        (Some(id), Some(method)) => Ok(Some(Inbound::Request { id, method, params })),
        (None, None) => Err(AppError::Transport(
            "envelope has neither id nor method".into(),
        )),
    }
}

/// Frame `reader` into lines and forward each one to `line_tx`.
///
/// `observe` sees every line before it is forwarded. Lines over the codec
/// limit are logged and skipped. The task ends on EOF, on an I/O error, when
/// `line_tx` has no receiver left, or when `cancel` fires; in every case
/// `line_tx` is dropped on return.
pub async fn run_line_reader<R, F>(
    label: String,
    reader: R,
    line_tx: mpsc::Sender<String>,
    mut observe: F,
    cancel: CancellationToken,
) where
    R: AsyncRead + Unpin + Send,
    F: FnMut(&str) + Send,
{
    let mut framed = FramedRead::new(reader, NdjsonCodec::new());

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(%label, "line reader: cancellation received, stopping");
                break;
            }

            item = framed.next() => {
                match item {
                    None => {
                        debug!(%label, "line reader: EOF");
                        break;
                    }
                    Some(Err(AppError::Transport(ref msg))) => {
                        warn!(%label, error = msg.as_str(), "line reader: framing error, skipping");
                    }
                    Some(Err(e)) => {
                        warn!(%label, error = %e, "line reader: io error, stopping");
                        break;
                    }
                    Some(Ok(line)) => {
                        observe(&line);
                        if line_tx.send(line).await.is_err() {
                            debug!(%label, "line reader: receiver dropped, stopping");
                            break;
                        }
                    }
                }
            }
        }
    }
}

fn parse_id(raw: Value) -> Result<RequestId> {
    match raw {
        Value::Number(ref n) => n
            .as_u64()
            .map(RequestId::Number)
            .ok_or_else(|| AppError::Transport(format!("unsupported id: {raw}"))),
        Value::String(s) => Ok(RequestId::Text(s)),
        other => Err(AppError::Transport(format!("unsupported id: {other}"))),
    }
}
