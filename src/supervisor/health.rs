//! Periodic liveness probe for the supervised process.
//!
//! Every [`HealthConfig::interval`] the monitor checks that the process has
//! not exited and that a bare newline can be written to its stdin and
//! flushed within the interval. [`HealthTracker`] turns the probe outcomes
//! into verdicts; the supervisor applies them to its status.

use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, Instrument};

use crate::acp::writer::{write_line, SharedWriter};
use crate::supervisor::status::{ExitInfo, ProcessStatus};

/// Probe timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthConfig {
    /// Time between probes.
    pub interval: Duration,
    /// Failing longer than this while running moves the status to degraded.
    pub timeout: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(10),
        }
    }
}

/// What one probe outcome means for the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthVerdict {
    /// Probe succeeded; nothing to do.
    Healthy,
    /// Probe succeeded while degraded; go back to running.
    Recovered,
    /// Probe failed, still within the timeout.
    Failed,
    /// Probe failed and the timeout has passed while running.
    Degraded,
}

/// Tracks the last successful probe.
#[derive(Debug, Clone)]
pub struct HealthTracker {
    timeout: Duration,
    last_success: Instant,
}

impl HealthTracker {
    /// Tracker that treats `started` as the last success.
    #[must_use]
    pub fn new(timeout: Duration, started: Instant) -> Self {
        Self {
            timeout,
            last_success: started,
        }
    }

    /// Fold one probe outcome observed at `now` under `status`.
    pub fn observe(&mut self, ok: bool, now: Instant, status: ProcessStatus) -> HealthVerdict {
        if ok {
            self.last_success = now;
            return if status == ProcessStatus::Degraded {
                HealthVerdict::Recovered
            } else {
                HealthVerdict::Healthy
            };
        }

        let silent_for = now.saturating_duration_since(self.last_success);
        if status == ProcessStatus::Running && silent_for > self.timeout {
            HealthVerdict::Degraded
        } else {
            HealthVerdict::Failed
        }
    }
}

/// Whether the process is alive and its stdin accepts a keep-alive newline
/// within `within`.
pub async fn probe(
    writer: &SharedWriter,
    exit: &watch::Receiver<Option<ExitInfo>>,
    within: Duration,
) -> bool {
    if exit.borrow().is_some() {
        return false;
    }

    let attempt = async {
        let mut guard = writer.lock().await;
        write_line(&mut **guard, String::new()).await
    };
    match tokio::time::timeout(within, attempt).await {
        Ok(Ok(())) => true,
        Ok(Err(err)) => {
            debug!(error = %err, "health probe write failed");
            false
        }
        Err(_elapsed) => {
            debug!("health probe timed out");
            false
        }
    }
}

/// Spawn the probe loop for one process.
///
/// `report` receives every verdict. The loop ends when `cancel` fires or the
/// process exits.
pub(crate) fn spawn_health_monitor<F>(
    writer: SharedWriter,
    mut exit: watch::Receiver<Option<ExitInfo>>,
    status: watch::Receiver<ProcessStatus>,
    config: HealthConfig,
    cancel: CancellationToken,
    mut report: F,
) -> JoinHandle<()>
where
    F: FnMut(HealthVerdict) + Send + 'static,
{
    tokio::spawn(
        async move {
            let mut tracker = HealthTracker::new(config.timeout, Instant::now());
            let mut ticker = tokio::time::interval(config.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately; a fresh process needs no probe.
            ticker.tick().await;

            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        debug!("health monitor cancelled");
                        return;
                    }
                    _ = exit.wait_for(Option::is_some) => {
                        debug!("health monitor: process exited");
                        return;
                    }
                    _ = ticker.tick() => {}
                }

                let ok = probe(&writer, &exit, config.interval).await;
                let current = *status.borrow();
                let verdict = tracker.observe(ok, Instant::now(), current);
                report(verdict);
            }
        }
        .instrument(info_span!("health_monitor")),
    )
}
