//! Supervisor start/stop/restart against real `sh` child processes.

#![cfg(unix)]

use std::time::Duration;

use tokio::sync::mpsc::error::TryRecvError;

use agent_conduit::supervisor::{
    AgentProfile, ProcessStatus, ProcessSupervisor, SupervisorEvent,
};
use agent_conduit::AppError;

use super::test_helpers::{events_until, fast_options, sh_profile, within};

fn status_changes(events: &[SupervisorEvent]) -> Vec<ProcessStatus> {
    events
        .iter()
        .filter_map(|event| match event {
            SupervisorEvent::StatusChanged { status } => Some(*status),
            _ => None,
        })
        .collect()
}

// ── Start ───────────────────────────────────────────────────────────────────

/// A successful start goes stopped → starting → running and publishes one
/// transport.
#[tokio::test]
async fn start_publishes_transport_and_runs() {
    let supervisor = ProcessSupervisor::new(fast_options());
    let mut events = supervisor.subscribe();
    let mut transports = supervisor.take_transports().await.unwrap();
    assert!(supervisor.take_transports().await.is_none());
    assert_eq!(supervisor.status(), ProcessStatus::Stopped);

    supervisor
        .start(sh_profile("agent", "sleep 30"))
        .await
        .unwrap();

    assert_eq!(supervisor.status(), ProcessStatus::Running);
    assert!(transports.try_recv().is_ok());
    assert_eq!(
        supervisor.active_profile().await.map(|p| p.id),
        Some("agent".to_owned())
    );

    let seen = events_until(&mut events, |e| {
        matches!(e, SupervisorEvent::StatusChanged { status: ProcessStatus::Running })
    })
    .await;
    assert_eq!(
        status_changes(&seen),
        vec![ProcessStatus::Starting, ProcessStatus::Running]
    );

    supervisor.shutdown().await;
}

/// Starting the profile that is already running is a no-op.
#[tokio::test]
async fn starting_same_profile_twice_is_noop() {
    let supervisor = ProcessSupervisor::new(fast_options());
    let mut transports = supervisor.take_transports().await.unwrap();
    let profile = sh_profile("agent", "sleep 30");

    supervisor.start(profile.clone()).await.unwrap();
    supervisor.start(profile).await.unwrap();

    assert!(transports.try_recv().is_ok());
    assert!(matches!(transports.try_recv(), Err(TryRecvError::Empty)));
    assert_eq!(supervisor.status(), ProcessStatus::Running);

    supervisor.shutdown().await;
}

/// Starting a different profile stops the running one first.
#[tokio::test]
async fn starting_other_profile_replaces_running_one() {
    let supervisor = ProcessSupervisor::new(fast_options());
    let mut events = supervisor.subscribe();
    let mut transports = supervisor.take_transports().await.unwrap();

    supervisor.start(sh_profile("first", "sleep 30")).await.unwrap();
    supervisor.start(sh_profile("second", "sleep 30")).await.unwrap();

    assert!(transports.try_recv().is_ok());
    assert!(transports.try_recv().is_ok());
    assert_eq!(
        supervisor.active_profile().await.map(|p| p.id),
        Some("second".to_owned())
    );

    let seen = events_until(&mut events, |e| matches!(e, SupervisorEvent::Exit { .. })).await;
    assert!(status_changes(&seen).contains(&ProcessStatus::Stopped));
    // The replaced process exited on request; that is not a crash.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(supervisor.status(), ProcessStatus::Running);
    assert_eq!(supervisor.crash_count().await, 0);

    supervisor.shutdown().await;
}

/// A command that cannot be spawned leaves the supervisor in `error`.
#[tokio::test]
async fn spawn_failure_sets_error_status() {
    let supervisor = ProcessSupervisor::new(fast_options());
    let mut events = supervisor.subscribe();

    let err = supervisor
        .start(AgentProfile::new("ghost", "/nonexistent/agent-conduit-test-binary"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Spawn(_)), "got {err:?}");
    assert_eq!(supervisor.status(), ProcessStatus::Error);

    let seen = events_until(&mut events, |e| matches!(e, SupervisorEvent::Error { .. })).await;
    assert!(status_changes(&seen).contains(&ProcessStatus::Error));
}

// ── Stdio ───────────────────────────────────────────────────────────────────

/// Complete stdout lines are mirrored as data events and delivered on the
/// transport; profile env overrides reach the child.
#[tokio::test]
async fn stdout_lines_become_data_events() {
    let supervisor = ProcessSupervisor::new(fast_options());
    let mut events = supervisor.subscribe();
    let mut transports = supervisor.take_transports().await.unwrap();

    let profile = sh_profile("agent", r#"printf 'hel'; printf 'lo\n'; echo "$GREETING"; sleep 30"#)
        .with_env("GREETING", "world");
    supervisor.start(profile).await.unwrap();

    let (_writer, mut lines) = transports.try_recv().unwrap().into_parts();
    assert_eq!(within(lines.recv()).await.as_deref(), Some("hello"));
    assert_eq!(within(lines.recv()).await.as_deref(), Some("world"));

    let seen = events_until(&mut events, |e| {
        matches!(e, SupervisorEvent::Data { line } if line == "world")
    })
    .await;
    let data: Vec<&str> = seen
        .iter()
        .filter_map(|e| match e {
            SupervisorEvent::Data { line } => Some(line.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(data, vec!["hello", "world"]);

    supervisor.shutdown().await;
}

// ── Stop ────────────────────────────────────────────────────────────────────

/// `stop` marks the exit as expected: status stays stopped, no restart.
#[tokio::test]
async fn stop_is_not_treated_as_crash() {
    let supervisor = ProcessSupervisor::new(fast_options());
    let mut events = supervisor.subscribe();
    supervisor.start(sh_profile("agent", "sleep 30")).await.unwrap();

    supervisor.stop().await;
    assert_eq!(supervisor.status(), ProcessStatus::Stopped);
    assert!(supervisor.active_profile().await.is_none());

    let seen = events_until(&mut events, |e| matches!(e, SupervisorEvent::Exit { .. })).await;
    assert!(matches!(
        seen.last(),
        Some(SupervisorEvent::Exit { code: None, signal: Some(15) })
    ));

    tokio::time::sleep(Duration::from_millis(100)).await;
    while let Ok(event) = events.try_recv() {
        assert!(
            !matches!(event, SupervisorEvent::Reconnecting { .. }),
            "stop must not trigger a restart"
        );
    }
    assert_eq!(supervisor.status(), ProcessStatus::Stopped);
    assert_eq!(supervisor.crash_count().await, 0);
}

/// A process ignoring SIGTERM is killed once the grace period passes.
#[tokio::test]
async fn stop_force_kills_after_grace() {
    let mut options = fast_options();
    options.stop_grace = Duration::from_millis(200);
    let supervisor = ProcessSupervisor::new(options);
    let mut events = supervisor.subscribe();

    supervisor
        .start(sh_profile("stubborn", "trap '' TERM; while :; do sleep 1; done"))
        .await
        .unwrap();
    // Let the shell install its trap.
    tokio::time::sleep(Duration::from_millis(100)).await;

    within(supervisor.stop()).await;
    assert_eq!(supervisor.status(), ProcessStatus::Stopped);

    let seen = events_until(&mut events, |e| matches!(e, SupervisorEvent::Exit { .. })).await;
    assert!(matches!(
        seen.last(),
        Some(SupervisorEvent::Exit { code: None, signal: Some(9) })
    ));
}

// ── Restart ─────────────────────────────────────────────────────────────────

/// `restart` relaunches the last profile and publishes a new transport.
#[tokio::test]
async fn restart_relaunches_previous_profile() {
    let supervisor = ProcessSupervisor::new(fast_options());
    let mut transports = supervisor.take_transports().await.unwrap();
    supervisor.start(sh_profile("agent", "sleep 30")).await.unwrap();
    assert!(transports.try_recv().is_ok());

    supervisor.restart().await.unwrap();

    assert_eq!(supervisor.status(), ProcessStatus::Running);
    assert!(transports.try_recv().is_ok());
    assert_eq!(
        supervisor.active_profile().await.map(|p| p.id),
        Some("agent".to_owned())
    );

    supervisor.shutdown().await;
}

/// `restart` without any previous start is a process error.
#[tokio::test]
async fn restart_without_profile_fails() {
    let supervisor = ProcessSupervisor::new(fast_options());
    let err = supervisor.restart().await.unwrap_err();
    assert!(matches!(err, AppError::Process(_)), "got {err:?}");
}

/// After shutdown the supervisor refuses to start again.
#[tokio::test]
async fn start_after_shutdown_fails() {
    let supervisor = ProcessSupervisor::new(fast_options());
    supervisor.shutdown().await;
    let err = supervisor
        .start(sh_profile("agent", "sleep 30"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Process(_)), "got {err:?}");
}

// ── Transport hand-off ──────────────────────────────────────────────────────

/// Without a transport consumer the agent's output keeps flowing: every
/// line is still mirrored as a `Data` event past the line channel capacity.
#[tokio::test]
async fn unclaimed_transport_is_drained() {
    let supervisor = ProcessSupervisor::new(fast_options());
    let mut events = supervisor.subscribe();

    supervisor
        .start(sh_profile(
            "chatty",
            "i=0; while [ $i -lt 600 ]; do echo line$i; i=$((i+1)); done; sleep 30",
        ))
        .await
        .unwrap();

    let seen = events_until(&mut events, |e| {
        matches!(e, SupervisorEvent::Data { line } if line == "line599")
    })
    .await;
    let data = seen
        .iter()
        .filter(|e| matches!(e, SupervisorEvent::Data { .. }))
        .count();
    assert_eq!(data, 600);

    supervisor.shutdown().await;
}

/// Only processes launched after `take_transports` are handed over.
#[tokio::test]
async fn transports_before_take_are_not_queued() {
    let supervisor = ProcessSupervisor::new(fast_options());
    let mut status = supervisor.watch_status();

    supervisor.start(sh_profile("agent", "sleep 30")).await.unwrap();
    let mut transports = supervisor.take_transports().await.unwrap();
    assert!(matches!(transports.try_recv(), Err(TryRecvError::Empty)));

    supervisor.restart().await.unwrap();
    within(status.wait_for(|s| *s == ProcessStatus::Running))
        .await
        .unwrap();
    assert!(transports.try_recv().is_ok());
    assert!(matches!(transports.try_recv(), Err(TryRecvError::Empty)));

    supervisor.shutdown().await;
}
