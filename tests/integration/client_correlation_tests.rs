//! Request/response correlation and notification dispatch over a mock agent.

use std::time::Duration;

use serde_json::json;

use agent_conduit::acp::messages::RequestId;
use agent_conduit::client::{ClientEvent, ClientInfo, UpdateContent};
use agent_conduit::AppError;

use super::test_helpers::{bound_client, client_with_session, within};

// ── Handshake ───────────────────────────────────────────────────────────────

/// `initialize` writes exactly one line naming the method and resolves with
/// the `serverInfo` from the matching response.
#[tokio::test]
async fn initialize_returns_server_info_from_response() {
    let (client, mut agent) = bound_client().await;

    let task = {
        let client = client.clone();
        tokio::spawn(async move {
            client
                .initialize(&ClientInfo::default(), json!({ "fs": true }))
                .await
        })
    };

    let request = agent.next_request().await;
    assert_eq!(request["jsonrpc"], "2.0");
    assert_eq!(request["id"], 1);
    assert_eq!(request["method"], "initialize");
    assert_eq!(request["params"]["capabilities"]["fs"], true);
    assert_eq!(request["params"]["clientInfo"]["name"], "agent-conduit");

    agent
        .reply(1, json!({ "serverInfo": { "name": "agent" } }))
        .await;

    let info = within(task).await.unwrap().unwrap();
    assert_eq!(info.name, "agent");
    assert!(info.version.is_none());

    agent.expect_silence(Duration::from_millis(50)).await;
}

/// `reinitialize` replays the params of the last successful `initialize`.
#[tokio::test]
async fn reinitialize_replays_remembered_params() {
    let (client, mut agent) = bound_client().await;
    assert!(client.reinitialize().await.unwrap().is_none());

    let task = {
        let client = client.clone();
        tokio::spawn(async move { client.initialize(&ClientInfo::default(), json!({})).await })
    };
    let (id, first) = agent.expect_request("initialize").await;
    agent.reply(id, json!({ "serverInfo": { "name": "a" } })).await;
    within(task).await.unwrap().unwrap();

    let task = {
        let client = client.clone();
        tokio::spawn(async move { client.reinitialize().await })
    };
    let (id, second) = agent.expect_request("initialize").await;
    assert_eq!(first["params"], second["params"]);
    agent
        .reply(id, json!({ "serverInfo": { "name": "a", "version": "2" } }))
        .await;

    let info = within(task).await.unwrap().unwrap().unwrap();
    assert_eq!(info.version.as_deref(), Some("2"));
}

// ── Correlation ─────────────────────────────────────────────────────────────

/// Responses delivered in reverse order still reach the request with the
/// matching id.
#[tokio::test]
async fn responses_are_matched_by_id_not_arrival_order() {
    let (client, mut agent) = bound_client().await;

    let first = {
        let client = client.clone();
        tokio::spawn(async move { client.list_sessions().await })
    };
    let (first_id, _) = agent.expect_request("session/list").await;

    let second = {
        let client = client.clone();
        tokio::spawn(async move { client.list_sessions().await })
    };
    let (second_id, _) = agent.expect_request("session/list").await;
    assert!(second_id > first_id);

    agent
        .reply(second_id, json!({ "sessions": [{ "id": "b" }, { "id": "c" }] }))
        .await;
    agent
        .reply(first_id, json!({ "sessions": [{ "id": "a" }] }))
        .await;

    let first = within(first).await.unwrap().unwrap();
    let second = within(second).await.unwrap().unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].id, "a");
    assert_eq!(second.len(), 2);
    assert_eq!(second[0].id, "b");
}

/// A response carrying `error` rejects the call with the agent's message
/// verbatim.
#[tokio::test]
async fn error_response_rejects_with_server_message() {
    let (client, mut agent) = bound_client().await;

    let task = {
        let client = client.clone();
        tokio::spawn(async move { client.delete_session("s9").await })
    };
    let (id, request) = agent.expect_request("session/delete").await;
    assert_eq!(request["params"]["sessionId"], "s9");
    agent.reply_error(id, "no such session: s9").await;

    let err = within(task).await.unwrap().unwrap_err();
    match err {
        AppError::Protocol(message) => assert_eq!(message, "no such session: s9"),
        other => panic!("expected protocol error, got {other:?}"),
    }
    assert_eq!(client.pending_count().await, 0);
}

/// Unknown ids, malformed lines and blank lines are dropped without
/// disturbing the pending request that follows.
#[tokio::test]
async fn junk_lines_do_not_stop_the_read_loop() {
    let (client, mut agent) = bound_client().await;

    let task = {
        let client = client.clone();
        tokio::spawn(async move { client.list_sessions().await })
    };
    let (id, _) = agent.expect_request("session/list").await;

    agent.send_line("this is not json").await;
    agent.send_line("").await;
    agent.send_line(r#"{"jsonrpc":"2.0"}"#).await;
    agent.reply(id + 100, json!({ "sessions": [] })).await;
    agent.send_line(r#"{"jsonrpc":"2.0","id":[1],"result":{}}"#).await;
    agent.reply(id, json!({})).await;

    let sessions = within(task).await.unwrap().unwrap();
    assert!(sessions.is_empty(), "missing sessions member means empty");
}

/// Ids keep increasing across calls and are never reused.
#[tokio::test]
async fn ids_increase_monotonically() {
    let (client, mut agent) = bound_client().await;
    let mut seen = Vec::new();

    for _ in 0..3 {
        let task = {
            let client = client.clone();
            tokio::spawn(async move { client.list_sessions().await })
        };
        let (id, _) = agent.expect_request("session/list").await;
        agent.reply(id, json!({ "sessions": [] })).await;
        within(task).await.unwrap().unwrap();
        seen.push(id);
    }

    assert_eq!(seen, vec![1, 2, 3]);
}

// ── Notifications ───────────────────────────────────────────────────────────

/// `session/update` and `session/complete` become typed events in stream
/// order; unknown methods are skipped.
#[tokio::test]
async fn notifications_are_dispatched_as_typed_events() {
    let (client, mut agent) = bound_client().await;
    let mut events = client.subscribe();

    agent
        .notify(
            "session/update",
            json!({ "sessionId": "s1", "content": { "type": "text", "text": "hel" } }),
        )
        .await;
    agent.notify("agent/heartbeat", json!({})).await;
    agent
        .notify(
            "session/update",
            json!({
                "sessionId": "s1",
                "content": { "type": "bash_request", "id": "b1", "command": "ls" }
            }),
        )
        .await;
    agent
        .notify(
            "session/complete",
            json!({ "sessionId": "s1", "stopReason": "end_turn" }),
        )
        .await;

    let first = within(events.recv()).await.unwrap();
    assert_eq!(
        first,
        ClientEvent::SessionUpdate {
            session_id: "s1".into(),
            content: UpdateContent::Text { text: "hel".into() },
        }
    );

    let second = within(events.recv()).await.unwrap();
    match second {
        ClientEvent::SessionUpdate {
            content: UpdateContent::BashRequest { id, command, cwd },
            ..
        } => {
            assert_eq!(id, "b1");
            assert_eq!(command, "ls");
            assert!(cwd.is_none());
        }
        other => panic!("expected bash request, got {other:?}"),
    }

    let third = within(events.recv()).await.unwrap();
    assert_eq!(
        third,
        ClientEvent::SessionComplete {
            session_id: "s1".into(),
            stop_reason: Some("end_turn".into()),
        }
    );
}

/// A message with both `id` and `method` surfaces as an agent request, and
/// `respond` writes a response echoing the id.
#[tokio::test]
async fn agent_requests_can_be_answered() {
    let (client, mut agent) = client_with_session("s1").await;
    let mut events = client.subscribe();

    agent
        .send_line(
            r#"{"jsonrpc":"2.0","id":"perm-7","method":"session/request_permission","params":{"tool":"write"}}"#,
        )
        .await;

    let event = within(events.recv()).await.unwrap();
    let ClientEvent::AgentRequest { id, method, params } = event else {
        panic!("expected agent request, got {event:?}");
    };
    assert_eq!(id, RequestId::Text("perm-7".into()));
    assert_eq!(method, "session/request_permission");
    assert_eq!(params["tool"], "write");

    client
        .respond(&id, &json!({ "outcome": "allow" }))
        .await
        .unwrap();

    let response = agent.next_request().await;
    assert_eq!(response["id"], "perm-7");
    assert_eq!(response["result"]["outcome"], "allow");
    assert!(response.get("method").is_none());
}
