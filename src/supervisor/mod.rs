//! Agent process supervisor.
//!
//! [`ProcessSupervisor`] owns the agent's lifecycle: it spawns the process
//! for an [`AgentProfile`], hands a fresh [`Transport`] to whoever holds the
//! receiver from [`ProcessSupervisor::take_transports`], tells intentional
//! stops apart from crashes, restarts crashed processes under a bounded
//! [`RestartPolicy`], and probes liveness while the process runs.
//!
//! Exit classification relies on a spawn generation: `stop()` and every
//! launch bump it, so an exit report carrying an older generation is the
//! expected end of a process the supervisor already let go of.

pub mod health;
pub(crate) mod process;
pub mod profile;
pub mod restart;
pub mod status;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::acp::Transport;
use crate::{AppError, Result};

pub use health::{HealthConfig, HealthVerdict};
pub use profile::AgentProfile;
pub use restart::{CrashRecord, CrashWindow, RestartDecision, RestartPolicy};
pub use status::{ExitInfo, ProcessStatus, SupervisorEvent};

use process::{AgentProcess, ExitNotice};

/// Capacity of the supervisor event broadcast channel.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Tunables for one supervisor instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorOptions {
    /// Automatic restart budget.
    pub restart: RestartPolicy,
    /// Liveness probe timing.
    pub health: HealthConfig,
    /// Time between SIGTERM and a forced kill in `stop()`.
    pub stop_grace: Duration,
    /// Pause between stop and start in `restart()`.
    pub restart_pause: Duration,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            restart: RestartPolicy::default(),
            health: HealthConfig::default(),
            stop_grace: Duration::from_secs(3),
            restart_pause: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Default)]
struct SupervisorState {
    process: Option<AgentProcess>,
    /// Profile of the attached process.
    profile: Option<AgentProfile>,
    /// Most recently launched profile; survives stop for `restart()`.
    last_profile: Option<AgentProfile>,
    crashes: CrashWindow,
    generation: u64,
    health_cancel: Option<CancellationToken>,
}

struct Inner {
    state: Mutex<SupervisorState>,
    status: watch::Sender<ProcessStatus>,
    events: broadcast::Sender<SupervisorEvent>,
    transports_tx: mpsc::UnboundedSender<Transport>,
    transports_rx: Mutex<Option<mpsc::UnboundedReceiver<Transport>>>,
    /// Set once [`ProcessSupervisor::take_transports`] handed the receiver out.
    transports_taken: AtomicBool,
    exits_tx: mpsc::UnboundedSender<ExitNotice>,
    options: SupervisorOptions,
    shutdown: CancellationToken,
}

/// Handle to the supervisor; clones share the same process.
#[derive(Clone)]
pub struct ProcessSupervisor {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ProcessSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessSupervisor")
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl ProcessSupervisor {
    /// Create a stopped supervisor.
    ///
    /// Must be called from within a Tokio runtime; the exit monitor task is
    /// spawned here.
    #[must_use]
    pub fn new(options: SupervisorOptions) -> Self {
        let (status, _) = watch::channel(ProcessStatus::Stopped);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (transports_tx, transports_rx) = mpsc::unbounded_channel();
        let (exits_tx, exits_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        let inner = Arc::new(Inner {
            state: Mutex::new(SupervisorState::default()),
            status,
            events,
            transports_tx,
            transports_rx: Mutex::new(Some(transports_rx)),
            transports_taken: AtomicBool::new(false),
            exits_tx,
            options,
            shutdown: shutdown.clone(),
        });

        tokio::spawn(run_exit_monitor(Arc::downgrade(&inner), exits_rx, shutdown));

        Self { inner }
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> ProcessStatus {
        *self.inner.status.borrow()
    }

    /// Watch status transitions.
    #[must_use]
    pub fn watch_status(&self) -> watch::Receiver<ProcessStatus> {
        self.inner.status.subscribe()
    }

    /// Subscribe to lifecycle events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.inner.events.subscribe()
    }

    /// Take the receiver of fresh transports; `None` after the first call.
    ///
    /// Transports of processes launched before this call are not queued.
    /// Their output is drained so the processes never block on stdout.
    pub async fn take_transports(&self) -> Option<mpsc::UnboundedReceiver<Transport>> {
        let receiver = self.inner.transports_rx.lock().await.take();
        if receiver.is_some() {
            self.inner.transports_taken.store(true, Ordering::Release);
        }
        receiver
    }

    /// Profile of the attached process, if any.
    pub async fn active_profile(&self) -> Option<AgentProfile> {
        self.inner.state.lock().await.profile.clone()
    }

    /// Crash records currently counted against the restart budget.
    pub async fn crash_count(&self) -> usize {
        self.inner.state.lock().await.crashes.len()
    }

    /// Launch `profile`.
    ///
    /// A no-op when the same profile id is already running or degraded; a
    /// different running profile is stopped first. Clears the crash window.
    ///
    /// # Errors
    ///
    /// - `AppError::Spawn`: the process could not be launched; status is
    ///   left at `error`.
    /// - `AppError::Process`: the supervisor was shut down.
    pub async fn start(&self, profile: AgentProfile) -> Result<()> {
        let inner = &self.inner;
        if inner.shutdown.is_cancelled() {
            return Err(AppError::Process("supervisor is shut down".into()));
        }

        let mut state = inner.state.lock().await;
        let same_profile = state.profile.as_ref().is_some_and(|p| p.id == profile.id);
        if inner.current_status().is_alive() && same_profile {
            debug!(profile_id = %profile.id, "supervisor: profile already running");
            return Ok(());
        }

        if state.process.is_some() {
            info!(profile_id = %profile.id, "supervisor: replacing running profile");
            inner.stop_locked(&mut state).await;
        }

        state.crashes.clear();
        inner.set_status(ProcessStatus::Starting);
        match inner.launch_locked(&mut state, profile) {
            Ok(()) => {
                inner.set_status(ProcessStatus::Running);
                Ok(())
            }
            Err(err) => {
                error!(error = %err, "supervisor: spawn failed");
                inner.set_status(ProcessStatus::Error);
                inner.emit(SupervisorEvent::Error {
                    message: err.to_string(),
                });
                Err(err)
            }
        }
    }

    /// Stop the process; its exit is classified as expected.
    pub async fn stop(&self) {
        let mut state = self.inner.state.lock().await;
        self.inner.stop_locked(&mut state).await;
    }

    /// Stop, pause, then start the previously launched profile.
    ///
    /// # Errors
    ///
    /// - `AppError::Process`: no profile was ever started.
    /// - Any error from [`start`](Self::start).
    pub async fn restart(&self) -> Result<()> {
        let profile = self
            .inner
            .state
            .lock()
            .await
            .last_profile
            .clone()
            .ok_or_else(|| AppError::Process("no previous profile to restart".into()))?;

        info!(profile_id = %profile.id, "supervisor: manual restart");
        self.stop().await;
        tokio::time::sleep(self.inner.options.restart_pause).await;
        self.start(profile).await
    }

    /// Stop the process and cancel all background work.
    pub async fn shutdown(&self) {
        self.stop().await;
        self.inner.shutdown.cancel();
        info!("supervisor: shut down");
    }
}

impl Inner {
    fn current_status(&self) -> ProcessStatus {
        *self.status.borrow()
    }

    fn emit(&self, event: SupervisorEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn set_status(&self, next: ProcessStatus) {
        let changed = self.status.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
        if changed {
            info!(status = %next, "supervisor: status changed");
            self.emit(SupervisorEvent::StatusChanged { status: next });
        }
    }

    /// Move `from` to `to` only if the status is still `from`.
    fn transition(&self, from: ProcessStatus, to: ProcessStatus) {
        let changed = self.status.send_if_modified(|current| {
            if *current == from {
                *current = to;
                true
            } else {
                false
            }
        });
        if changed {
            info!(status = %to, "supervisor: status changed");
            self.emit(SupervisorEvent::StatusChanged { status: to });
        }
    }

    /// Spawn `profile`, attach it, and publish its transport.
    ///
    /// Leaves the status untouched.
    fn launch_locked(self: &Arc<Self>, state: &mut SupervisorState, profile: AgentProfile) -> Result<()> {
        state.generation += 1;
        state.last_profile = Some(profile.clone());

        let (process, transport) = process::spawn_agent(
            &profile,
            state.generation,
            self.events.clone(),
            self.exits_tx.clone(),
            &self.shutdown,
        )?;

        let health_cancel = self.shutdown.child_token();
        let weak = Arc::downgrade(self);
        health::spawn_health_monitor(
            process.writer.clone(),
            process.exit.clone(),
            self.status.subscribe(),
            self.options.health,
            health_cancel.clone(),
            move |verdict| {
                if let Some(inner) = weak.upgrade() {
                    inner.apply_health(verdict);
                }
            },
        );

        state.process = Some(process);
        state.profile = Some(profile);
        state.health_cancel = Some(health_cancel);

        self.publish(transport);
        Ok(())
    }

    /// Hand `transport` to the consumer, or drain it when there is none.
    fn publish(&self, transport: Transport) {
        let unclaimed = if self.transports_taken.load(Ordering::Acquire) {
            match self.transports_tx.send(transport) {
                Ok(()) => return,
                Err(mpsc::error::SendError(transport)) => transport,
            }
        } else {
            transport
        };

        debug!("supervisor: no transport consumer, draining agent output");
        let (_writer, mut lines) = unclaimed.into_parts();
        tokio::spawn(async move { while lines.recv().await.is_some() {} });
    }

    async fn stop_locked(&self, state: &mut SupervisorState) {
        state.generation += 1;
        self.set_status(ProcessStatus::Stopped);
        if let Some(cancel) = state.health_cancel.take() {
            cancel.cancel();
        }
        state.profile = None;

        let Some(process) = state.process.take() else {
            return;
        };
        if process.has_exited() {
            debug!(pid = ?process.pid, "supervisor: process already exited");
        }
        let exit = process.terminate(self.options.stop_grace).await;
        process.close_io();
        info!(pid = ?process.pid, exit = ?exit, "supervisor: process stopped");
    }

    fn apply_health(&self, verdict: HealthVerdict) {
        match verdict {
            HealthVerdict::Healthy => {}
            HealthVerdict::Recovered => {
                info!("supervisor: health check recovered");
                self.transition(ProcessStatus::Degraded, ProcessStatus::Running);
            }
            HealthVerdict::Failed => {
                warn!("supervisor: health check failed");
                self.emit(SupervisorEvent::HealthCheckFailed);
            }
            HealthVerdict::Degraded => {
                warn!(
                    timeout_ms = self.options.health.timeout.as_millis(),
                    "supervisor: health check failing past timeout"
                );
                self.emit(SupervisorEvent::HealthCheckFailed);
                self.transition(ProcessStatus::Running, ProcessStatus::Degraded);
            }
        }
    }

    async fn handle_exit(self: &Arc<Self>, notice: ExitNotice) {
        self.emit(SupervisorEvent::Exit {
            code: notice.exit.code,
            signal: notice.exit.signal,
        });

        let mut state = self.state.lock().await;
        if notice.generation != state.generation
            || state.process.is_none()
            || self.current_status() == ProcessStatus::Stopped
        {
            debug!(generation = notice.generation, exit = %notice.exit, "supervisor: expected exit");
            return;
        }

        warn!(exit = %notice.exit, generation = notice.generation, "supervisor: agent process crashed");
        if let Some(process) = state.process.take() {
            process.close_io();
        }
        if let Some(cancel) = state.health_cancel.take() {
            cancel.cancel();
        }
        state.profile = None;

        let now = Instant::now();
        let decision = state
            .crashes
            .admit(CrashRecord::from_exit(notice.exit, now), &self.options.restart, now);
        self.apply_decision(&state, decision);
    }

    fn apply_decision(self: &Arc<Self>, state: &SupervisorState, decision: RestartDecision) {
        match decision {
            RestartDecision::Retry { attempt, delay } => {
                info!(attempt, delay_ms = delay.as_millis(), "supervisor: scheduling restart");
                self.set_status(ProcessStatus::Reconnecting);
                self.emit(SupervisorEvent::Reconnecting { attempt, delay });
                tokio::spawn(Arc::clone(self).recover(state.generation, delay));
            }
            RestartDecision::Exhausted { crashes } => {
                let message = format!(
                    "restart budget exhausted after {crashes} crashes within {}s; restart manually",
                    self.options.restart.reset_after.as_secs()
                );
                error!(crashes, "supervisor: restart budget exhausted");
                self.set_status(ProcessStatus::Error);
                self.emit(SupervisorEvent::Error { message });
            }
        }
    }

    async fn recover(self: Arc<Self>, generation: u64, delay: Duration) {
        tokio::select! {
            () = self.shutdown.cancelled() => return,
            () = tokio::time::sleep(delay) => {}
        }

        let mut state = self.state.lock().await;
        if state.generation != generation || self.current_status() != ProcessStatus::Reconnecting {
            info!(generation, "supervisor: restart abandoned, state changed during backoff");
            return;
        }

        let Some(profile) = state.last_profile.clone() else {
            self.set_status(ProcessStatus::Error);
            self.emit(SupervisorEvent::Error {
                message: "no profile to restart".into(),
            });
            return;
        };

        match self.launch_locked(&mut state, profile) {
            Ok(()) => {
                info!(generation = state.generation, "supervisor: agent process restarted");
                self.set_status(ProcessStatus::Running);
                self.emit(SupervisorEvent::Reconnected);
            }
            Err(err) => {
                warn!(error = %err, "supervisor: restart spawn failed");
                let now = Instant::now();
                let decision = state
                    .crashes
                    .admit(CrashRecord::spawn_failure(now), &self.options.restart, now);
                self.apply_decision(&state, decision);
            }
        }
    }
}

async fn run_exit_monitor(
    inner: Weak<Inner>,
    mut exits: mpsc::UnboundedReceiver<ExitNotice>,
    shutdown: CancellationToken,
) {
    loop {
        let notice = tokio::select! {
            () = shutdown.cancelled() => break,
            notice = exits.recv() => notice,
        };
        let Some(notice) = notice else { break };
        let Some(inner) = inner.upgrade() else { break };
        inner.handle_exit(notice).await;
    }
    debug!("supervisor: exit monitor stopped");
}
