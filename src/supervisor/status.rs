//! Supervisor status and event types.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

/// Lifecycle state of the supervised agent process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    /// No process; either never started or intentionally stopped.
    Stopped,
    /// Spawn in progress.
    Starting,
    /// Process alive and passing health checks.
    Running,
    /// Process alive but health checks have failed past the timeout.
    Degraded,
    /// Crashed; waiting out backoff before respawning.
    Reconnecting,
    /// Spawn failed or the restart budget is exhausted; needs a manual start.
    Error,
}

impl ProcessStatus {
    /// Whether a live process is attached.
    #[must_use]
    pub fn is_alive(self) -> bool {
        matches!(self, Self::Running | Self::Degraded)
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Degraded => "degraded",
            Self::Reconnecting => "reconnecting",
            Self::Error => "error",
        };
        f.write_str(label)
    }
}

/// How a process ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExitInfo {
    /// Exit code, when the process exited normally.
    pub code: Option<i32>,
    /// Terminating signal number (unix only).
    pub signal: Option<i32>,
}

impl ExitInfo {
    /// Extract code and signal from an OS exit status.
    #[must_use]
    pub fn from_status(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = std::os::unix::process::ExitStatusExt::signal(&status);
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }
}

impl fmt::Display for ExitInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {code}"),
            (None, Some(signal)) => write!(f, "signal {signal}"),
            (None, None) => f.write_str("unknown exit"),
        }
    }
}

/// Lifecycle event broadcast by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SupervisorEvent {
    /// One complete stdout line.
    Data {
        /// Line text without the terminator.
        line: String,
    },
    /// The process exited, expectedly or not.
    Exit {
        /// Exit code, when available.
        code: Option<i32>,
        /// Terminating signal, when available.
        signal: Option<i32>,
    },
    /// Spawn failure or exhausted restart budget.
    Error {
        /// Human-readable description.
        message: String,
    },
    /// Status transition.
    StatusChanged {
        /// New status.
        status: ProcessStatus,
    },
    /// A periodic health probe failed.
    HealthCheckFailed,
    /// An automatic restart is scheduled.
    Reconnecting {
        /// 1-based attempt number within the crash window.
        attempt: u32,
        /// Backoff applied before the attempt.
        #[serde(with = "millis")]
        delay: Duration,
    },
    /// An automatic restart succeeded.
    Reconnected,
}

mod millis {
    use std::time::Duration;

    use serde::Serializer;

    #[allow(clippy::cast_possible_truncation)]
    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }
}
