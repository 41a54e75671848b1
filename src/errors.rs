//! Error types shared across the crate.

use std::fmt::{Display, Formatter};

/// Shared crate result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Why the client gave up on a pending request without a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The current session was replaced by `switch_session`.
    SessionSwitched,
    /// The current session was deleted.
    SessionDeleted,
    /// The client was shut down.
    ClientShutdown,
    /// The underlying stream pair was swapped for a fresh one.
    TransportReplaced,
}

impl Display for CancelReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::SessionSwitched => "session switched",
            Self::SessionDeleted => "session deleted",
            Self::ClientShutdown => "client shutdown",
            Self::TransportReplaced => "transport replaced",
        };
        f.write_str(text)
    }
}

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// File-system or I/O operation failure.
    Io(String),
    /// Line framing failure, closed stream, or no transport bound.
    Transport(String),
    /// Error returned by the agent in a response; the message is verbatim.
    Protocol(String),
    /// Pending request released by the client without a response.
    Cancelled(CancelReason),
    /// The agent process could not be launched.
    Spawn(String),
    /// Process-level failure that requires manual action.
    Process(String),
    /// Requested entity does not exist.
    NotFound(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Transport(msg) => write!(f, "transport: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::Cancelled(reason) => write!(f, "cancelled: {reason}"),
            Self::Spawn(msg) => write!(f, "spawn: {msg}"),
            Self::Process(msg) => write!(f, "process: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Transport(format!("json: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
