//! Protocol client: request/response correlation over one agent transport.
//!
//! Every request gets a fresh integer id and a [`oneshot`] responder stored
//! in the pending table. A single read task per bound transport classifies
//! inbound lines: responses resolve the matching pending entry (unknown ids
//! are ignored), notifications become [`ClientEvent`]s on a broadcast
//! channel. Nothing here times out a request; a pending entry only ends by
//! its response, by invalidation of the session it was issued against, by
//! the transport being replaced or closing, or by [`ProtocolClient::shutdown`].
//!
//! Lock order is writer first, then state. The read task only takes the
//! state lock, so a slow agent stdin never blocks response delivery.
//!
//! A binding made by [`ProtocolClient::rebind_with_init`] starts closed:
//! only `initialize` may use it until the handshake has finished, so a fresh
//! agent never sees a session request first.

pub mod events;
pub mod session;

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Map, Value};
use tokio::sync::{broadcast, mpsc, oneshot, watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::acp::messages::{encode_request, encode_response, Inbound, RequestId};
use crate::acp::reader::parse_inbound_line;
use crate::acp::writer::{write_line, SharedWriter};
use crate::acp::Transport;
use crate::{AppError, CancelReason, Result};

pub use events::{ClientEvent, TaskItem, UpdateContent};
pub use session::{ClientInfo, ServerInfo, SessionHandle, SettingsDelta};

/// Outbound method names.
pub mod method {
    /// Handshake.
    pub const INITIALIZE: &str = "initialize";
    /// Create a session.
    pub const SESSION_NEW: &str = "session/new";
    /// List sessions.
    pub const SESSION_LIST: &str = "session/list";
    /// Make a session current on the agent side.
    pub const SESSION_SWITCH: &str = "session/switch";
    /// Delete a session.
    pub const SESSION_DELETE: &str = "session/delete";
    /// Send user input.
    pub const SESSION_PROMPT: &str = "session/prompt";
    /// Interrupt the running turn.
    pub const SESSION_CANCEL: &str = "session/cancel";
    /// Apply a settings delta.
    pub const SETTINGS_CHANGE: &str = "settings/change";
    /// Accept a proposed file change.
    pub const FILE_ACCEPT: &str = "file/accept";
    /// Reject a proposed file change.
    pub const FILE_REJECT: &str = "file/reject";
    /// Allow a shell command.
    pub const BASH_CONFIRM: &str = "bash/confirm";
    /// Skip a shell command.
    pub const BASH_SKIP: &str = "bash/skip";
    /// Accept the proposed plan.
    pub const PLAN_CONFIRM: &str = "plan/confirm";
}

/// Capacity of the client event broadcast channel.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Longest raw line echoed into a warning.
const LOG_LINE_LIMIT: usize = 200;

struct PendingRequest {
    method: String,
    session_id: Option<String>,
    responder: oneshot::Sender<Result<Value>>,
}

struct Binding {
    writer: SharedWriter,
    reader_cancel: CancellationToken,
    generation: u64,
    /// `false` while the handshake on this transport is still running.
    ready: watch::Sender<bool>,
}

struct ClientState {
    next_id: u64,
    generation: u64,
    binding: Option<Binding>,
    pending: HashMap<u64, PendingRequest>,
    current: Option<SessionHandle>,
    desired: SettingsDelta,
    desired_applied: bool,
    init_params: Option<Value>,
    shut_down: bool,
}

impl ClientState {
    fn ensure_open(&self) -> Result<()> {
        if self.shut_down {
            Err(AppError::Cancelled(CancelReason::ClientShutdown))
        } else {
            Ok(())
        }
    }

    /// Reject every pending request accepted by `filter`; returns the count.
    fn reject_where<F, E>(&mut self, filter: F, error: E) -> usize
    where
        F: Fn(&PendingRequest) -> bool,
        E: Fn() -> AppError,
    {
        let ids: Vec<u64> = self
            .pending
            .iter()
            .filter(|entry| filter(entry.1))
            .map(|(id, _)| *id)
            .collect();

        for id in &ids {
            if let Some(pending) = self.pending.remove(id) {
                debug!(id, method = %pending.method, "client: rejecting pending request");
                let _ = pending.responder.send(Err(error()));
            }
        }
        ids.len()
    }

    fn reject_session(&mut self, session_id: &str, reason: CancelReason) -> usize {
        self.reject_where(
            |pending| pending.session_id.as_deref() == Some(session_id),
            || AppError::Cancelled(reason),
        )
    }

    fn reject_all<E: Fn() -> AppError>(&mut self, error: E) -> usize {
        self.reject_where(|_| true, error)
    }
}

struct Inner {
    state: Mutex<ClientState>,
    events: broadcast::Sender<ClientEvent>,
    /// Serialises "create a session if none is current" in `prompt`.
    session_gate: Mutex<()>,
}

/// Cheaply clonable handle to one protocol client instance.
#[derive(Clone)]
pub struct ProtocolClient {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ProtocolClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolClient").finish_non_exhaustive()
    }
}

impl Default for ProtocolClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolClient {
    /// Create an unbound client. Call [`rebind`](Self::rebind) before issuing
    /// requests.
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(ClientState {
                    next_id: 1,
                    generation: 0,
                    binding: None,
                    pending: HashMap::new(),
                    current: None,
                    desired: SettingsDelta::default(),
                    desired_applied: true,
                    init_params: None,
                    shut_down: false,
                }),
                events,
                session_gate: Mutex::new(()),
            }),
        }
    }

    /// Subscribe to notifications. Slow subscribers may observe
    /// [`broadcast::error::RecvError::Lagged`].
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.inner.events.subscribe()
    }

    /// The current session handle, if any.
    pub async fn current_session(&self) -> Option<SessionHandle> {
        self.inner.state.lock().await.current.clone()
    }

    /// Settings recorded through [`change_settings`](Self::change_settings).
    pub async fn desired_settings(&self) -> SettingsDelta {
        self.inner.state.lock().await.desired.clone()
    }

    /// Number of requests awaiting a response.
    pub async fn pending_count(&self) -> usize {
        self.inner.state.lock().await.pending.len()
    }

    /// Whether [`shutdown`](Self::shutdown) has run.
    pub async fn is_shut_down(&self) -> bool {
        self.inner.state.lock().await.shut_down
    }

    // ── Transport binding ───────────────────────────────────────────────

    /// Attach a fresh transport.
    ///
    /// Every request still pending against the previous transport is
    /// rejected with [`CancelReason::TransportReplaced`] first. The id counter
    /// carries on unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Cancelled`] after [`shutdown`](Self::shutdown).
    pub async fn rebind(&self, transport: Transport) -> Result<()> {
        self.bind(transport, true).await.map(drop)
    }

    /// Attach a fresh transport and repeat the last successful `initialize`
    /// on it before anything else may use it.
    ///
    /// Other calls issued meanwhile wait for the handshake. They are released
    /// once it ends, whether it succeeded or not. Without a previous
    /// `initialize` this is [`rebind`](Self::rebind).
    ///
    /// # Errors
    ///
    /// [`AppError::Cancelled`] after shutdown, or any `initialize` failure.
    pub async fn rebind_with_init(&self, transport: Transport) -> Result<Option<ServerInfo>> {
        let params = self.inner.state.lock().await.init_params.clone();
        let Some(params) = params else {
            self.bind(transport, true).await?;
            return Ok(None);
        };

        let generation = self.bind(transport, false).await?;
        let outcome = self.send_initialize(params).await;

        let state = self.inner.state.lock().await;
        if let Some(binding) = state.binding.as_ref().filter(|b| b.generation == generation) {
            binding.ready.send_replace(true);
        }
        drop(state);

        if let Err(err) = &outcome {
            warn!(generation, %err, "client: handshake on new transport failed");
        }
        outcome.map(Some)
    }

    async fn bind(&self, transport: Transport, ready: bool) -> Result<u64> {
        let (writer, lines) = transport.into_parts();
        let mut state = self.inner.state.lock().await;
        state.ensure_open()?;

        let rejected =
            state.reject_all(|| AppError::Cancelled(CancelReason::TransportReplaced));
        if let Some(old) = state.binding.take() {
            old.reader_cancel.cancel();
        }

        state.generation += 1;
        let generation = state.generation;
        let cancel = CancellationToken::new();
        state.binding = Some(Binding {
            writer,
            reader_cancel: cancel.clone(),
            generation,
            ready: watch::Sender::new(ready),
        });
        drop(state);

        tokio::spawn(run_read_loop(
            Arc::clone(&self.inner),
            lines,
            generation,
            cancel,
        ));

        info!(generation, rejected, ready, "client: transport bound");
        Ok(generation)
    }

    /// Reject everything pending, detach the transport, and refuse all later
    /// requests with [`CancelReason::ClientShutdown`]. Idempotent.
    pub async fn shutdown(&self) {
        let mut state = self.inner.state.lock().await;
        if state.shut_down {
            return;
        }
        state.shut_down = true;
        let rejected = state.reject_all(|| AppError::Cancelled(CancelReason::ClientShutdown));
        if let Some(binding) = state.binding.take() {
            binding.reader_cancel.cancel();
        }
        state.current = None;
        info!(rejected, "client: shut down");
    }

    // ── Handshake ───────────────────────────────────────────────────────

    /// Send `initialize` and return the agent's `serverInfo`.
    ///
    /// The params are remembered for [`reinitialize`](Self::reinitialize).
    ///
    /// # Errors
    ///
    /// Any request failure, or [`AppError::Transport`] when the result has
    /// no valid `serverInfo`.
    pub async fn initialize(
        &self,
        client_info: &ClientInfo,
        capabilities: Value,
    ) -> Result<ServerInfo> {
        let params = json!({
            "clientInfo": client_info,
            "capabilities": capabilities,
        });
        let info = self.send_initialize(params.clone()).await?;
        self.inner.state.lock().await.init_params = Some(params);
        Ok(info)
    }

    /// Repeat the last successful `initialize` on the current transport.
    ///
    /// Returns `Ok(None)` when the client was never initialized.
    ///
    /// # Errors
    ///
    /// Same as [`initialize`](Self::initialize).
    pub async fn reinitialize(&self) -> Result<Option<ServerInfo>> {
        let params = self.inner.state.lock().await.init_params.clone();
        match params {
            Some(params) => self.send_initialize(params).await.map(Some),
            None => Ok(None),
        }
    }

    async fn send_initialize(&self, params: Value) -> Result<ServerInfo> {
        let result = self.call(method::INITIALIZE, Some(params), None).await?;
        let server_info = result
            .get("serverInfo")
            .cloned()
            .ok_or_else(|| AppError::Transport("initialize result has no serverInfo".into()))?;
        let info: ServerInfo = serde_json::from_value(server_info)
            .map_err(|e| AppError::Transport(format!("invalid serverInfo: {e}")))?;
        info!(server = %info.name, version = ?info.version, "client: initialized");
        Ok(info)
    }

    // ── Sessions ────────────────────────────────────────────────────────

    /// Create a session and make it current.
    ///
    /// Desired settings recorded before the session existed are re-applied
    /// in the background; failures there are logged, not returned.
    ///
    /// # Errors
    ///
    /// Any request failure, or [`AppError::Transport`] for a result without
    /// a valid `session`.
    pub async fn new_session(
        &self,
        title: Option<&str>,
        context: Option<Value>,
    ) -> Result<SessionHandle> {
        let session = self.create_session(title, context).await?;

        if self.settings_pending().await {
            let client = self.clone();
            let session_id = session.id.clone();
            tokio::spawn(async move {
                if let Err(err) = client.apply_desired(&session_id).await {
                    warn!(%session_id, %err, "client: re-applying settings failed");
                }
            });
        }

        Ok(session)
    }

    /// List the agent's sessions. Entries that fail to parse are skipped.
    ///
    /// # Errors
    ///
    /// Any request failure.
    pub async fn list_sessions(&self) -> Result<Vec<SessionHandle>> {
        let result = self
            .call(method::SESSION_LIST, Some(json!({})), None)
            .await?;
        let entries = match result.get("sessions") {
            Some(Value::Array(entries)) => entries.clone(),
            _ => Vec::new(),
        };
        Ok(entries
            .into_iter()
            .filter_map(|entry| match serde_json::from_value(entry) {
                Ok(handle) => Some(handle),
                Err(err) => {
                    warn!(%err, "client: skipping malformed session entry");
                    None
                }
            })
            .collect())
    }

    /// Make `session_id` current.
    ///
    /// Requests still pending against the previous current session are
    /// rejected with [`CancelReason::SessionSwitched`] before this returns.
    ///
    /// # Errors
    ///
    /// Any request failure; the current session is unchanged in that case.
    pub async fn switch_session(&self, session_id: &str) -> Result<()> {
        let result = self
            .call(
                method::SESSION_SWITCH,
                Some(json!({ "sessionId": session_id })),
                None,
            )
            .await?;

        let handle = result
            .get("session")
            .cloned()
            .and_then(|raw| serde_json::from_value::<SessionHandle>(raw).ok())
            .filter(|handle| handle.id == session_id)
            .unwrap_or_else(|| SessionHandle::new(session_id));

        let mut state = self.inner.state.lock().await;
        state.ensure_open()?;
        let previous = state.current.replace(handle);
        state.desired_applied = false;
        let rejected = match previous {
            Some(previous) if previous.id != session_id => {
                state.reject_session(&previous.id, CancelReason::SessionSwitched)
            }
            _ => 0,
        };
        info!(session_id, rejected, "client: session switched");
        Ok(())
    }

    /// Delete `session_id`. If it was current, the current session is
    /// cleared and its pending requests are rejected with
    /// [`CancelReason::SessionDeleted`].
    ///
    /// # Errors
    ///
    /// Any request failure.
    pub async fn delete_session(&self, session_id: &str) -> Result<()> {
        self.call(
            method::SESSION_DELETE,
            Some(json!({ "sessionId": session_id })),
            None,
        )
        .await?;

        let mut state = self.inner.state.lock().await;
        let was_current = state
            .current
            .as_ref()
            .is_some_and(|current| current.id == session_id);
        if was_current {
            state.current = None;
            let rejected = state.reject_session(session_id, CancelReason::SessionDeleted);
            info!(session_id, rejected, "client: current session deleted");
        } else {
            debug!(session_id, "client: non-current session deleted");
        }
        Ok(())
    }

    // ── Session-scoped operations ───────────────────────────────────────

    /// Send user input to the current session, creating one first if none
    /// exists. Outstanding desired settings are applied before the prompt.
    ///
    /// # Errors
    ///
    /// Any failure of session creation, settings sync, or the prompt itself.
    pub async fn prompt(&self, content: &str, attachments: Vec<Value>) -> Result<()> {
        let session_id = {
            let _gate = self.inner.session_gate.lock().await;
            let session_id = match self.current_session_id().await {
                Some(id) => id,
                None => self.create_session(None, None).await?.id,
            };
            self.apply_desired(&session_id).await?;
            session_id
        };

        let mut params = json!({
            "sessionId": session_id,
            "content": content,
        });
        if !attachments.is_empty() {
            params["attachments"] = Value::Array(attachments);
        }
        self.call(method::SESSION_PROMPT, Some(params), Some(session_id))
            .await
            .map(drop)
    }

    /// Record `delta` as desired and, if a session is current, send it.
    ///
    /// Without a session this resolves immediately; the recorded settings are
    /// applied once a session exists.
    ///
    /// # Errors
    ///
    /// Any request failure, or [`AppError::Cancelled`] after shutdown.
    pub async fn change_settings(&self, delta: SettingsDelta) -> Result<()> {
        let session_id = {
            let mut state = self.inner.state.lock().await;
            state.ensure_open()?;
            state.desired.merge(&delta);
            match &state.current {
                Some(current) => current.id.clone(),
                None => {
                    state.desired_applied = false;
                    debug!("client: no session, settings recorded for later");
                    return Ok(());
                }
            }
        };

        let params = delta.to_params(&session_id);
        self.call(method::SETTINGS_CHANGE, Some(params), Some(session_id))
            .await
            .map(drop)
    }

    /// Accept the proposed change to `path`. No-op without a session.
    ///
    /// # Errors
    ///
    /// Any request failure.
    pub async fn accept_file_change(&self, path: &str) -> Result<()> {
        self.session_action(method::FILE_ACCEPT, json!({ "path": path }))
            .await
    }

    /// Reject the proposed change to `path`. No-op without a session.
    ///
    /// # Errors
    ///
    /// Any request failure.
    pub async fn reject_file_change(&self, path: &str) -> Result<()> {
        self.session_action(method::FILE_REJECT, json!({ "path": path }))
            .await
    }

    /// Allow the shell command `id`. No-op without a session.
    ///
    /// # Errors
    ///
    /// Any request failure.
    pub async fn confirm_bash(&self, id: &str) -> Result<()> {
        self.session_action(method::BASH_CONFIRM, json!({ "id": id }))
            .await
    }

    /// Skip the shell command `id`. No-op without a session.
    ///
    /// # Errors
    ///
    /// Any request failure.
    pub async fn skip_bash(&self, id: &str) -> Result<()> {
        self.session_action(method::BASH_SKIP, json!({ "id": id }))
            .await
    }

    /// Accept the proposed plan. No-op without a session.
    ///
    /// # Errors
    ///
    /// Any request failure.
    pub async fn confirm_plan(&self) -> Result<()> {
        self.session_action(method::PLAN_CONFIRM, json!({})).await
    }

    /// Interrupt the running turn. No-op without a session.
    ///
    /// # Errors
    ///
    /// Any request failure.
    pub async fn cancel_session(&self) -> Result<()> {
        self.session_action(method::SESSION_CANCEL, json!({})).await
    }

    /// Answer an agent-initiated request with `result`.
    ///
    /// # Errors
    ///
    /// [`AppError::Transport`] when unbound or the write fails,
    /// [`AppError::Cancelled`] after shutdown.
    pub async fn respond(&self, id: &RequestId, result: &Value) -> Result<()> {
        let writer = {
            let state = self.inner.state.lock().await;
            state.ensure_open()?;
            let binding = state
                .binding
                .as_ref()
                .ok_or_else(|| AppError::Transport("no transport bound".into()))?;
            Arc::clone(&binding.writer)
        };
        let line = encode_response(id, result)?;
        let mut writer = writer.lock().await;
        write_line(&mut *writer, line).await
    }

    // ── Internals ───────────────────────────────────────────────────────

    async fn current_session_id(&self) -> Option<String> {
        self.inner
            .state
            .lock()
            .await
            .current
            .as_ref()
            .map(|current| current.id.clone())
    }

    async fn settings_pending(&self) -> bool {
        let state = self.inner.state.lock().await;
        !state.desired_applied && !state.desired.is_empty()
    }

    async fn create_session(
        &self,
        title: Option<&str>,
        context: Option<Value>,
    ) -> Result<SessionHandle> {
        let mut params = Map::new();
        if let Some(title) = title {
            params.insert("title".into(), Value::String(title.to_owned()));
        }
        if let Some(context) = context {
            params.insert("context".into(), context);
        }

        let result = self
            .call(method::SESSION_NEW, Some(Value::Object(params)), None)
            .await?;
        let raw = result
            .get("session")
            .cloned()
            .ok_or_else(|| AppError::Transport("session/new result has no session".into()))?;
        let session: SessionHandle = serde_json::from_value(raw)
            .map_err(|e| AppError::Transport(format!("invalid session: {e}")))?;

        let mut state = self.inner.state.lock().await;
        state.ensure_open()?;
        state.current = Some(session.clone());
        state.desired_applied = false;
        info!(session_id = %session.id, "client: session created");
        Ok(session)
    }

    /// Send the full desired settings once per session.
    async fn apply_desired(&self, session_id: &str) -> Result<()> {
        let desired = {
            let mut state = self.inner.state.lock().await;
            if state.desired_applied || state.desired.is_empty() {
                return Ok(());
            }
            state.desired_applied = true;
            state.desired.clone()
        };

        let result = self
            .call(
                method::SETTINGS_CHANGE,
                Some(desired.to_params(session_id)),
                Some(session_id.to_owned()),
            )
            .await;
        if result.is_err() {
            self.inner.state.lock().await.desired_applied = false;
        }
        result.map(drop)
    }

    async fn session_action(&self, method: &'static str, extra: Value) -> Result<()> {
        let current = {
            let state = self.inner.state.lock().await;
            state.ensure_open()?;
            state.current.as_ref().map(|current| current.id.clone())
        };
        let Some(session_id) = current else {
            debug!(method, "client: no current session, skipping");
            return Ok(());
        };

        let mut params = match extra {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        params.insert("sessionId".into(), Value::String(session_id.clone()));
        self.call(method, Some(Value::Object(params)), Some(session_id))
            .await
            .map(drop)
    }

    /// Issue one request and await its response.
    async fn call(
        &self,
        method: &str,
        params: Option<Value>,
        session_id: Option<String>,
    ) -> Result<Value> {
        let (writer, generation, mut ready) = {
            let state = self.inner.state.lock().await;
            state.ensure_open()?;
            let binding = state
                .binding
                .as_ref()
                .ok_or_else(|| AppError::Transport("no transport bound".into()))?;
            (
                Arc::clone(&binding.writer),
                binding.generation,
                binding.ready.subscribe(),
            )
        };

        if method != method::INITIALIZE {
            // A dropped sender means the binding is gone; the checks below report why.
            let released = ready.wait_for(|ready| *ready).await.is_err();
            if released {
                debug!(method, generation, "client: binding released before handshake");
            }
        }

        // Holding the writer across id allocation and the write keeps ids and
        // lines in call order.
        let mut writer = writer.lock().await;
        let (id, line, response) = {
            let mut state = self.inner.state.lock().await;
            state.ensure_open()?;
            match state.binding.as_ref() {
                Some(binding) if binding.generation == generation => {}
                Some(_) => return Err(AppError::Cancelled(CancelReason::TransportReplaced)),
                None => return Err(AppError::Transport("no transport bound".into())),
            }

            let id = state.next_id;
            let line = encode_request(id, method, params.as_ref())?;
            state.next_id += 1;

            let (responder, response) = oneshot::channel();
            state.pending.insert(
                id,
                PendingRequest {
                    method: method.to_owned(),
                    session_id,
                    responder,
                },
            );
            (id, line, response)
        };

        debug!(id, method, "client: request → agent");
        if let Err(err) = write_line(&mut *writer, line).await {
            drop(writer);
            self.inner.state.lock().await.pending.remove(&id);
            warn!(id, method, %err, "client: request write failed");
            return Err(err);
        }
        drop(writer);

        response.await.unwrap_or_else(|_| {
            Err(AppError::Transport(format!(
                "request {id} dropped without a response"
            )))
        })
    }
}

// ── Read loop ───────────────────────────────────────────────────────────────

async fn run_read_loop(
    inner: Arc<Inner>,
    mut lines: mpsc::Receiver<String>,
    generation: u64,
    cancel: CancellationToken,
) {
    loop {
        let line = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!(generation, "client: read loop cancelled");
                return;
            }
            line = lines.recv() => line,
        };

        let Some(line) = line else {
            transport_closed(&inner, generation).await;
            return;
        };

        match parse_inbound_line(&line) {
            Ok(Some(message)) => dispatch(&inner, message).await,
            Ok(None) => {}
            Err(err) => {
                warn!(
                    generation,
                    error = %err,
                    raw = truncate(&line),
                    "client: dropping malformed line"
                );
            }
        }
    }
}

async fn dispatch(inner: &Inner, message: Inbound) {
    match message {
        Inbound::Response { id, outcome } => {
            let pending = match id.as_number() {
                Some(key) => inner.state.lock().await.pending.remove(&key),
                None => None,
            };
            let Some(pending) = pending else {
                debug!(%id, "client: response for unknown id ignored");
                return;
            };
            let outcome = outcome.map_err(|error| AppError::Protocol(error.message));
            debug!(%id, method = %pending.method, ok = outcome.is_ok(), "client: response matched");
            let _ = pending.responder.send(outcome);
        }
        Inbound::Notification { method, params } => {
            match events::from_notification(&method, params) {
                Ok(Some(event)) => {
                    let _ = inner.events.send(event);
                }
                Ok(None) => debug!(%method, "client: skipping unknown notification"),
                Err(err) => warn!(%method, %err, "client: dropping notification"),
            }
        }
        Inbound::Request { id, method, params } => {
            debug!(%id, %method, "client: agent request");
            let _ = inner.events.send(ClientEvent::AgentRequest { id, method, params });
        }
    }
}

async fn transport_closed(inner: &Inner, generation: u64) {
    let mut state = inner.state.lock().await;
    let is_current = state
        .binding
        .as_ref()
        .is_some_and(|binding| binding.generation == generation);
    if !is_current {
        return;
    }
    state.binding = None;
    let rejected = state.reject_all(|| AppError::Transport("transport closed".into()));
    warn!(generation, rejected, "client: transport closed");
}

fn truncate(line: &str) -> &str {
    match line.char_indices().nth(LOG_LINE_LIMIT) {
        Some((idx, _)) => &line[..idx],
        None => line,
    }
}
