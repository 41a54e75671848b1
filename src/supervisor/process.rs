//! Agent process spawning, exit watching, and termination.
//!
//! Each spawned process gets:
//! - `kill_on_drop(true)` so an abandoned child never outlives the
//!   supervisor.
//! - A stdout framing task feeding the protocol [`Transport`] and mirroring
//!   every line as [`SupervisorEvent::Data`].
//! - A stderr task that logs each line at INFO and nothing else.
//! - An exit watcher that owns the [`Child`], publishes the [`ExitInfo`] on a
//!   watch channel, and reports an [`ExitNotice`] to the supervisor.

use std::process::Stdio;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio::process::{Child, Command};
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::acp::codec::NdjsonCodec;
use crate::acp::reader::run_line_reader;
use crate::acp::transport::LINE_CHANNEL_CAPACITY;
use crate::acp::writer::{shared_writer, SharedWriter};
use crate::acp::Transport;
use crate::supervisor::profile::AgentProfile;
use crate::supervisor::status::{ExitInfo, SupervisorEvent};
use crate::{AppError, Result};

/// Exit report sent from a process's exit watcher to the supervisor.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ExitNotice {
    /// Spawn generation the process belonged to.
    pub generation: u64,
    /// How it ended.
    pub exit: ExitInfo,
}

/// Supervisor-side handle to one live agent process.
pub(crate) struct AgentProcess {
    pub pid: Option<u32>,
    pub writer: SharedWriter,
    pub exit: watch::Receiver<Option<ExitInfo>>,
    kill: CancellationToken,
    io_cancel: CancellationToken,
}

impl std::fmt::Debug for AgentProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentProcess")
            .field("pid", &self.pid)
            .field("exit", &*self.exit.borrow())
            .finish_non_exhaustive()
    }
}

impl AgentProcess {
    /// Whether the exit watcher has reaped the process.
    pub fn has_exited(&self) -> bool {
        self.exit.borrow().is_some()
    }

    /// Stop the stdout and stderr tasks; the bound client sees EOF.
    pub fn close_io(&self) {
        self.io_cancel.cancel();
    }

    /// Ask the process to exit, escalating to a kill after `grace`.
    ///
    /// Resolves once the exit watcher has reaped the process.
    pub async fn terminate(&self, grace: Duration) -> Option<ExitInfo> {
        let mut exit = self.exit.clone();
        let already = *exit.borrow();
        if already.is_some() {
            return already;
        }

        self.signal_terminate();

        match tokio::time::timeout(grace, exit.wait_for(Option::is_some)).await {
            Ok(Ok(info)) => return *info,
            Ok(Err(_)) => return None,
            Err(_elapsed) => {
                warn!(pid = ?self.pid, grace_ms = grace.as_millis(), "agent ignored SIGTERM, killing");
            }
        }

        self.kill.cancel();
        exit.wait_for(Option::is_some).await.ok().and_then(|info| *info)
    }

    #[cfg(unix)]
    fn signal_terminate(&self) {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let Some(raw) = self.pid.and_then(|pid| i32::try_from(pid).ok()) else {
            self.kill.cancel();
            return;
        };
        if let Err(err) = kill(Pid::from_raw(raw), Signal::SIGTERM) {
            debug!(pid = raw, %err, "SIGTERM delivery failed, killing");
            self.kill.cancel();
        }
    }

    #[cfg(not(unix))]
    fn signal_terminate(&self) {
        self.kill.cancel();
    }
}

/// Launch `profile` and wire its stdio.
///
/// # Errors
///
/// - `AppError::Spawn("failed to spawn …")`: OS spawn failure.
/// - `AppError::Spawn("failed to capture …")`: a stdio pipe was missing.
pub(crate) fn spawn_agent(
    profile: &AgentProfile,
    generation: u64,
    events: broadcast::Sender<SupervisorEvent>,
    exits: mpsc::UnboundedSender<ExitNotice>,
    parent: &CancellationToken,
) -> Result<(AgentProcess, Transport)> {
    let mut cmd = Command::new(&profile.command);
    cmd.args(&profile.args)
        .envs(profile.resolved_env())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|err| {
        AppError::Spawn(format!("failed to spawn {}: {err}", profile.command))
    })?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| AppError::Spawn("failed to capture agent stdin".into()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::Spawn("failed to capture agent stdout".into()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| AppError::Spawn("failed to capture agent stderr".into()))?;

    let pid = child.id();
    info!(
        profile_id = %profile.id,
        command = %profile.command,
        ?pid,
        generation,
        "agent process spawned"
    );

    let io_cancel = parent.child_token();
    let kill = CancellationToken::new();
    let (exit_tx, exit_rx) = watch::channel(None);

    let (line_tx, lines) = mpsc::channel(LINE_CHANNEL_CAPACITY);
    tokio::spawn(run_line_reader(
        format!("stdout:{}", profile.id),
        stdout,
        line_tx,
        move |line: &str| {
            let _ = events.send(SupervisorEvent::Data {
                line: line.to_owned(),
            });
        },
        io_cancel.clone(),
    ));
    tokio::spawn(log_stderr(profile.id.clone(), stderr, io_cancel.clone()));
    tokio::spawn(watch_exit(child, generation, kill.clone(), exit_tx, exits));

    let writer = shared_writer(stdin);
    let process = AgentProcess {
        pid,
        writer: writer.clone(),
        exit: exit_rx,
        kill,
        io_cancel,
    };
    Ok((process, Transport::new(writer, lines)))
}

async fn watch_exit(
    mut child: Child,
    generation: u64,
    kill: CancellationToken,
    exit_tx: watch::Sender<Option<ExitInfo>>,
    exits: mpsc::UnboundedSender<ExitNotice>,
) {
    let pid = child.id();
    let status = tokio::select! {
        status = child.wait() => status,
        () = kill.cancelled() => {
            if let Err(err) = child.start_kill() {
                warn!(?pid, %err, "failed to kill agent process");
            }
            child.wait().await
        }
    };

    let exit = match status {
        Ok(status) => ExitInfo::from_status(status),
        Err(err) => {
            warn!(?pid, %err, "error waiting for agent process");
            ExitInfo::default()
        }
    };
    info!(?pid, generation, %exit, "agent process exited");

    exit_tx.send_replace(Some(exit));
    if exits.send(ExitNotice { generation, exit }).is_err() {
        debug!(?pid, "supervisor gone before exit could be reported");
    }
}

async fn log_stderr<R>(profile_id: String, stderr: R, cancel: CancellationToken)
where
    R: AsyncRead + Unpin + Send,
{
    let mut framed = FramedRead::new(stderr, NdjsonCodec::new());
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            item = framed.next() => match item {
                Some(Ok(line)) => info!(profile_id = %profile_id, stderr = %line, "agent stderr"),
                Some(Err(AppError::Transport(msg))) => debug!(profile_id = %profile_id, error = %msg, "stderr line skipped"),
                Some(Err(_)) | None => break,
            },
        }
    }
}
