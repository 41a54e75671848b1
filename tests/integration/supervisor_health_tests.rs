//! Periodic health probing of a live process.

#![cfg(unix)]

use std::time::Duration;

use agent_conduit::supervisor::{HealthConfig, ProcessStatus, ProcessSupervisor, SupervisorEvent};

use super::test_helpers::{events_until, fast_options, sh_profile};

fn probing_options(interval_ms: u64, timeout_ms: u64) -> agent_conduit::supervisor::SupervisorOptions {
    let mut options = fast_options();
    options.health = HealthConfig {
        interval: Duration::from_millis(interval_ms),
        timeout: Duration::from_millis(timeout_ms),
    };
    options
}

/// A process that keeps its stdin open passes every probe.
#[tokio::test]
async fn healthy_process_stays_running() {
    let supervisor = ProcessSupervisor::new(probing_options(50, 20));
    let mut events = supervisor.subscribe();
    supervisor.start(sh_profile("agent", "sleep 30")).await.unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(supervisor.status(), ProcessStatus::Running);
    while let Ok(event) = events.try_recv() {
        assert!(
            !matches!(event, SupervisorEvent::HealthCheckFailed),
            "healthy process must not fail probes"
        );
    }
    supervisor.shutdown().await;
}

/// A live process whose stdin is closed fails the probe and, once the
/// failure outlasts the timeout, is marked degraded rather than restarted.
#[tokio::test]
async fn closed_stdin_degrades_running_process() {
    let supervisor = ProcessSupervisor::new(probing_options(50, 20));
    let mut events = supervisor.subscribe();
    supervisor
        .start(sh_profile("deaf", "exec 0<&-; sleep 30"))
        .await
        .unwrap();

    let seen = events_until(&mut events, |e| {
        matches!(e, SupervisorEvent::StatusChanged { status: ProcessStatus::Degraded })
    })
    .await;
    assert!(seen
        .iter()
        .any(|e| matches!(e, SupervisorEvent::HealthCheckFailed)));
    assert_eq!(supervisor.status(), ProcessStatus::Degraded);
    assert!(!seen
        .iter()
        .any(|e| matches!(e, SupervisorEvent::Reconnecting { .. })));

    // Degraded still counts as alive: starting the same profile is a no-op.
    supervisor
        .start(sh_profile("deaf", "exec 0<&-; sleep 30"))
        .await
        .unwrap();
    assert_eq!(supervisor.status(), ProcessStatus::Degraded);

    // A manual restart brings it back.
    supervisor.restart().await.unwrap();
    assert_eq!(supervisor.status(), ProcessStatus::Running);

    supervisor.shutdown().await;
}
