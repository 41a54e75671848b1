//! Crash classification and bounded auto-restart.

#![cfg(unix)]

use std::time::Duration;

use agent_conduit::supervisor::{
    ProcessStatus, ProcessSupervisor, RestartPolicy, SupervisorEvent,
};

use super::test_helpers::{events_until, fast_options, sh_profile};

/// A process that dies right after every spawn is restarted exactly
/// `max_retries` times with saturating backoff, then left in `error`.
#[tokio::test]
async fn crash_loop_exhausts_budget_after_max_retries() {
    let mut options = fast_options();
    options.restart = RestartPolicy {
        max_retries: 5,
        backoff_schedule: [10, 20, 40].into_iter().map(Duration::from_millis).collect(),
        reset_after: Duration::from_secs(60),
    };
    let supervisor = ProcessSupervisor::new(options);
    let mut events = supervisor.subscribe();
    let mut transports = supervisor.take_transports().await.unwrap();

    supervisor.start(sh_profile("crasher", "exit 1")).await.unwrap();

    let seen = events_until(&mut events, |e| matches!(e, SupervisorEvent::Error { .. })).await;

    let attempts: Vec<(u32, Duration)> = seen
        .iter()
        .filter_map(|e| match e {
            SupervisorEvent::Reconnecting { attempt, delay } => Some((*attempt, *delay)),
            _ => None,
        })
        .collect();
    let ms = Duration::from_millis;
    assert_eq!(
        attempts,
        vec![(1, ms(10)), (2, ms(20)), (3, ms(40)), (4, ms(40)), (5, ms(40))]
    );

    let reconnected = seen
        .iter()
        .filter(|e| matches!(e, SupervisorEvent::Reconnected))
        .count();
    assert_eq!(reconnected, 5);

    let exits = seen
        .iter()
        .filter(|e| matches!(e, SupervisorEvent::Exit { code: Some(1), .. }))
        .count();
    assert_eq!(exits, 6);

    let Some(SupervisorEvent::Error { message }) = seen.last() else {
        panic!("expected terminal error event");
    };
    assert!(message.contains("restart budget exhausted"), "{message}");
    assert_eq!(supervisor.status(), ProcessStatus::Error);

    // Initial spawn plus five restarts, and nothing after the budget is spent.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let mut published = 0;
    while transports.try_recv().is_ok() {
        published += 1;
    }
    assert_eq!(published, 6);
    while let Ok(event) = events.try_recv() {
        assert!(
            !matches!(event, SupervisorEvent::Reconnecting { .. }),
            "no restart may follow exhaustion"
        );
    }
    assert_eq!(supervisor.status(), ProcessStatus::Error);

    supervisor.shutdown().await;
}

/// Crashes spaced further apart than `reset_after` never accumulate, so a
/// budget of one restart is never exhausted.
#[tokio::test]
async fn spaced_crashes_do_not_exhaust_budget() {
    let mut options = fast_options();
    options.restart = RestartPolicy {
        max_retries: 1,
        backoff_schedule: vec![Duration::from_millis(10)],
        reset_after: Duration::from_millis(100),
    };
    let supervisor = ProcessSupervisor::new(options);
    let mut events = supervisor.subscribe();

    supervisor
        .start(sh_profile("flaky", "sleep 0.3; exit 2"))
        .await
        .unwrap();

    let mut reconnected = 0;
    while reconnected < 3 {
        let seen = events_until(&mut events, |e| {
            matches!(e, SupervisorEvent::Reconnected | SupervisorEvent::Error { .. })
        })
        .await;
        match seen.last() {
            Some(SupervisorEvent::Reconnected) => reconnected += 1,
            other => panic!("budget exhausted unexpectedly: {other:?}"),
        }
        assert!(seen.iter().any(|e| matches!(
            e,
            SupervisorEvent::Reconnecting { attempt: 1, .. }
        )));
    }

    assert_eq!(supervisor.status(), ProcessStatus::Running);
    supervisor.shutdown().await;
}

/// Stopping during the backoff sleep abandons the pending restart.
#[tokio::test]
async fn stop_during_backoff_abandons_restart() {
    let mut options = fast_options();
    options.restart.backoff_schedule = vec![Duration::from_millis(300)];
    let supervisor = ProcessSupervisor::new(options);
    let mut events = supervisor.subscribe();
    let mut transports = supervisor.take_transports().await.unwrap();

    supervisor.start(sh_profile("crasher", "exit 3")).await.unwrap();
    assert!(transports.try_recv().is_ok());

    events_until(&mut events, |e| matches!(e, SupervisorEvent::Reconnecting { .. })).await;
    assert_eq!(supervisor.status(), ProcessStatus::Reconnecting);

    supervisor.stop().await;
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(supervisor.status(), ProcessStatus::Stopped);
    assert!(transports.try_recv().is_err(), "no respawn after stop");
    while let Ok(event) = events.try_recv() {
        assert!(!matches!(event, SupervisorEvent::Reconnected));
    }
}

/// A manual start after exhaustion gets a fresh budget.
#[tokio::test]
async fn manual_start_clears_crash_window() {
    let mut options = fast_options();
    options.restart.max_retries = 1;
    let supervisor = ProcessSupervisor::new(options);
    let mut events = supervisor.subscribe();

    supervisor.start(sh_profile("crasher", "exit 1")).await.unwrap();
    events_until(&mut events, |e| matches!(e, SupervisorEvent::Error { .. })).await;
    assert_eq!(supervisor.status(), ProcessStatus::Error);
    assert_eq!(supervisor.crash_count().await, 2);

    supervisor.start(sh_profile("steady", "sleep 30")).await.unwrap();
    assert_eq!(supervisor.status(), ProcessStatus::Running);
    assert_eq!(supervisor.crash_count().await, 0);

    supervisor.shutdown().await;
}
