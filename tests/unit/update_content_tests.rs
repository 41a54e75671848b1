//! Notification mapping and `session/update` payload decoding.

use serde_json::json;

use agent_conduit::client::events::from_notification;
use agent_conduit::client::{ClientEvent, TaskItem, UpdateContent};
use agent_conduit::AppError;

// ── session/update ──────────────────────────────────────────────────────────

/// Known payload types decode into their typed variants.
#[test]
fn known_update_types_decode() {
    let cases = [
        (
            json!({ "type": "text", "text": "hi" }),
            UpdateContent::Text { text: "hi".into() },
        ),
        (
            json!({ "type": "thought", "text": "hmm" }),
            UpdateContent::Thought { text: "hmm".into() },
        ),
        (
            json!({ "type": "tool_use", "id": "t1", "name": "read", "input": { "path": "a" } }),
            UpdateContent::ToolUse {
                id: "t1".into(),
                name: "read".into(),
                input: json!({ "path": "a" }),
            },
        ),
        (
            json!({ "type": "tool_result", "toolUseId": "t1", "content": "ok", "isError": true }),
            UpdateContent::ToolResult {
                tool_use_id: "t1".into(),
                content: json!("ok"),
                is_error: true,
            },
        ),
        (
            json!({ "type": "bash_request", "id": "b1", "command": "ls", "cwd": "/tmp" }),
            UpdateContent::BashRequest {
                id: "b1".into(),
                command: "ls".into(),
                cwd: Some("/tmp".into()),
            },
        ),
        (
            json!({ "type": "file_change", "path": "src/lib.rs" }),
            UpdateContent::FileChange {
                path: "src/lib.rs".into(),
                diff: None,
            },
        ),
        (
            json!({ "type": "plan", "plan": "1. read" }),
            UpdateContent::Plan { plan: "1. read".into() },
        ),
        (
            json!({ "type": "task_list", "tasks": [{ "content": "a", "status": "pending" }, { "content": "b" }] }),
            UpdateContent::TaskList {
                tasks: vec![
                    TaskItem { content: "a".into(), status: Some("pending".into()) },
                    TaskItem { content: "b".into(), status: None },
                ],
            },
        ),
        (
            json!({ "type": "error", "message": "boom" }),
            UpdateContent::Error { message: "boom".into() },
        ),
    ];

    for (raw, expected) in cases {
        assert_eq!(UpdateContent::from_value(raw.clone()), expected, "{raw}");
    }
}

/// An unrecognised `type` keeps the raw payload.
#[test]
fn unknown_update_type_is_preserved() {
    let raw = json!({ "type": "hologram", "frames": 3 });
    assert_eq!(
        UpdateContent::from_value(raw.clone()),
        UpdateContent::Unknown { kind: "hologram".into(), raw }
    );
}

/// A payload without any `type` is unknown as well.
#[test]
fn missing_update_type_is_unknown() {
    let content = UpdateContent::from_value(json!({ "text": "orphan" }));
    assert!(matches!(content, UpdateContent::Unknown { ref kind, .. } if kind == "<missing>"));
}

// ── Notification mapping ────────────────────────────────────────────────────

/// `session/update` carries the session id and decoded content.
#[test]
fn session_update_maps_to_event() {
    let event = from_notification(
        "session/update",
        json!({ "sessionId": "s1", "content": { "type": "text", "text": "hi" } }),
    )
    .unwrap();
    assert_eq!(
        event,
        Some(ClientEvent::SessionUpdate {
            session_id: "s1".into(),
            content: UpdateContent::Text { text: "hi".into() },
        })
    );
}

/// `session/complete` keeps the optional stop reason.
#[test]
fn session_complete_maps_to_event() {
    let event = from_notification(
        "session/complete",
        json!({ "sessionId": "s2", "stopReason": "end_turn" }),
    )
    .unwrap();
    assert_eq!(
        event,
        Some(ClientEvent::SessionComplete {
            session_id: "s2".into(),
            stop_reason: Some("end_turn".into()),
        })
    );
}

/// Methods outside the known set are ignored.
#[test]
fn unknown_method_yields_nothing() {
    assert!(from_notification("agent/telemetry", json!({})).unwrap().is_none());
}

/// A known method without `sessionId` is a transport error.
#[test]
fn missing_session_id_is_rejected() {
    let err = from_notification("session/update", json!({ "content": {} })).unwrap_err();
    assert!(matches!(err, AppError::Transport(ref m) if m.contains("session/update")), "{err}");
}

/// Events serialise with an `event` tag for line-oriented consumers.
#[test]
fn client_event_serialises_with_tag() {
    let value = serde_json::to_value(ClientEvent::SessionComplete {
        session_id: "s1".into(),
        stop_reason: None,
    })
    .unwrap();
    assert_eq!(value["event"], "session_complete");
    assert_eq!(value["session_id"], "s1");
}
