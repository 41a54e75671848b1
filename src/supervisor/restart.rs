//! Restart budget accounting.
//!
//! [`CrashWindow`] keeps the crash records that still count against the
//! budget. [`CrashWindow::admit`] prunes records older than
//! [`RestartPolicy::reset_after`], decides from the count that remains, then
//! records the new crash. Crashes spaced further apart than the window
//! therefore never accumulate.

use std::time::{Duration, Instant};

use crate::supervisor::status::ExitInfo;

/// Bounded auto-restart policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestartPolicy {
    /// Automatic restarts allowed within one window.
    pub max_retries: u32,
    /// Delay before attempt N is `backoff_schedule[min(N-1, len-1)]`.
    pub backoff_schedule: Vec<Duration>,
    /// Age after which a crash no longer counts.
    pub reset_after: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            backoff_schedule: [1000, 2000, 4000, 8000, 16_000]
                .into_iter()
                .map(Duration::from_millis)
                .collect(),
            reset_after: Duration::from_secs(60),
        }
    }
}

impl RestartPolicy {
    /// Backoff before the 1-based `attempt`, saturating at the last entry.
    ///
    /// An empty schedule means no delay.
    #[must_use]
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let Some(last) = self.backoff_schedule.len().checked_sub(1) else {
            return Duration::ZERO;
        };
        let index = usize::try_from(attempt.saturating_sub(1)).unwrap_or(usize::MAX);
        self.backoff_schedule[index.min(last)]
    }
}

/// One unexpected exit or failed automatic respawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrashRecord {
    /// Exit code, when the process exited.
    pub exit_code: Option<i32>,
    /// Terminating signal, when known.
    pub signal: Option<i32>,
    /// When the crash was observed.
    pub at: Instant,
}

impl CrashRecord {
    /// Record for an observed exit.
    #[must_use]
    pub fn from_exit(exit: ExitInfo, at: Instant) -> Self {
        Self {
            exit_code: exit.code,
            signal: exit.signal,
            at,
        }
    }

    /// Record for a respawn that never produced a process.
    #[must_use]
    pub fn spawn_failure(at: Instant) -> Self {
        Self {
            exit_code: None,
            signal: None,
            at,
        }
    }
}

/// Outcome of [`CrashWindow::admit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartDecision {
    /// Restart after `delay`.
    Retry {
        /// 1-based attempt within the window.
        attempt: u32,
        /// Backoff to sleep first.
        delay: Duration,
    },
    /// Budget spent; stay down until a manual start.
    Exhausted {
        /// Crashes counted in the window, including the current one.
        crashes: usize,
    },
}

/// Crash records still inside the reset window.
#[derive(Debug, Default, Clone)]
pub struct CrashWindow {
    records: Vec<CrashRecord>,
}

impl CrashWindow {
    /// Empty window.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Prune, decide, then append `record`.
    pub fn admit(&mut self, record: CrashRecord, policy: &RestartPolicy, now: Instant) -> RestartDecision {
        self.prune(policy.reset_after, now);
        let prior = self.records.len();
        self.records.push(record);

        let prior_u32 = u32::try_from(prior).unwrap_or(u32::MAX);
        if prior_u32 < policy.max_retries {
            let attempt = prior_u32 + 1;
            RestartDecision::Retry {
                attempt,
                delay: policy.backoff_for(attempt),
            }
        } else {
            RestartDecision::Exhausted {
                crashes: self.records.len(),
            }
        }
    }

    /// Forget every record.
    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Records currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no record is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Most recent record.
    #[must_use]
    pub fn last(&self) -> Option<&CrashRecord> {
        self.records.last()
    }

    fn prune(&mut self, reset_after: Duration, now: Instant) {
        self.records
            .retain(|record| now.saturating_duration_since(record.at) <= reset_after);
    }
}
