//! Typed notifications delivered to client subscribers.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::acp::messages::RequestId;
use crate::{AppError, Result};

/// Notification method carrying incremental session output.
pub const SESSION_UPDATE: &str = "session/update";
/// Notification method marking the end of a turn.
pub const SESSION_COMPLETE: &str = "session/complete";

/// Event broadcast by the protocol client.
///
/// Notifications for every session arrive on the same stream; subscribers
/// filter by `session_id`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClientEvent {
    /// `session/update` notification.
    SessionUpdate {
        /// Session that produced the update.
        session_id: String,
        /// Update payload.
        content: UpdateContent,
    },
    /// `session/complete` notification.
    SessionComplete {
        /// Session whose turn finished.
        session_id: String,
        /// Agent-reported reason, when given.
        stop_reason: Option<String>,
    },
    /// Request initiated by the agent; answer with
    /// [`ProtocolClient::respond`](crate::client::ProtocolClient::respond).
    AgentRequest {
        /// Id to echo back.
        id: RequestId,
        /// Request method.
        method: String,
        /// Request payload.
        params: Value,
    },
}

/// One entry of a `task_list` update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskItem {
    /// Task description.
    pub content: String,
    /// Agent-defined status (`pending`, `in_progress`, `completed`, …).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// Payload of a `session/update` notification, discriminated by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum UpdateContent {
    /// Assistant output text.
    Text {
        /// Text chunk.
        text: String,
    },
    /// Reasoning text.
    Thought {
        /// Text chunk.
        text: String,
    },
    /// The agent invoked a tool.
    ToolUse {
        /// Tool call id.
        id: String,
        /// Tool name.
        name: String,
        /// Tool input, uninterpreted.
        #[serde(default)]
        input: Value,
    },
    /// A tool call finished.
    ToolResult {
        /// Id of the matching `tool_use`.
        tool_use_id: String,
        /// Tool output, uninterpreted.
        #[serde(default)]
        content: Value,
        /// Whether the tool reported failure.
        #[serde(default)]
        is_error: bool,
    },
    /// The agent asks permission to run a shell command.
    BashRequest {
        /// Id to pass to `bash/confirm` or `bash/skip`.
        id: String,
        /// Command line.
        command: String,
        /// Working directory, when given.
        #[serde(default)]
        cwd: Option<String>,
    },
    /// The agent proposes a file change.
    FileChange {
        /// Target path, passed to `file/accept` or `file/reject`.
        path: String,
        /// Unified diff, when given.
        #[serde(default)]
        diff: Option<String>,
    },
    /// A plan awaiting `plan/confirm`.
    Plan {
        /// Plan text.
        plan: String,
    },
    /// Current task list snapshot.
    TaskList {
        /// Tasks in display order.
        tasks: Vec<TaskItem>,
    },
    /// Agent-side error report.
    Error {
        /// Error message.
        message: String,
    },
    /// Any payload this client does not understand.
    #[serde(skip_deserializing)]
    Unknown {
        /// The `type` discriminator as sent.
        kind: String,
        /// The whole payload.
        raw: Value,
    },
}

impl UpdateContent {
    /// Decode a payload, falling back to [`UpdateContent::Unknown`].
    #[must_use]
    pub fn from_value(raw: Value) -> Self {
        match serde_json::from_value::<Self>(raw.clone()) {
            Ok(content) => content,
            Err(err) => {
                let kind = raw
                    .get("type")
                    .and_then(Value::as_str)
                    .unwrap_or("<missing>")
                    .to_owned();
                debug!(%kind, error = %err, "client: unrecognised update content");
                Self::Unknown { kind, raw }
            }
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateParams {
    session_id: String,
    #[serde(default)]
    content: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompleteParams {
    session_id: String,
    #[serde(default)]
    stop_reason: Option<String>,
}

/// Map a notification onto a [`ClientEvent`].
///
/// Returns `Ok(None)` for methods outside the known set.
///
/// # Errors
///
/// Returns [`AppError::Transport`] when a known method has malformed params.
pub fn from_notification(method: &str, params: Value) -> Result<Option<ClientEvent>> {
    match method {
        SESSION_UPDATE => {
            let params: UpdateParams = serde_json::from_value(params)
                .map_err(|e| AppError::Transport(format!("invalid {SESSION_UPDATE} params: {e}")))?;
            Ok(Some(ClientEvent::SessionUpdate {
                session_id: params.session_id,
                content: UpdateContent::from_value(params.content),
            }))
        }
        SESSION_COMPLETE => {
            let params: CompleteParams = serde_json::from_value(params).map_err(|e| {
                AppError::Transport(format!("invalid {SESSION_COMPLETE} params: {e}"))
            })?;
            Ok(Some(ClientEvent::SessionComplete {
                session_id: params.session_id,
                stop_reason: params.stop_reason,
            }))
        }
        _ => Ok(None),
    }
}
