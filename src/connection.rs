//! Supervisor-to-client binding.
//!
//! [`AgentConnection`] starts the agent, binds the first transport to the
//! [`ProtocolClient`] and performs the `initialize` handshake. A binder task
//! then hands every transport the supervisor publishes after a restart to
//! [`ProtocolClient::rebind_with_init`], so the client is never left attached
//! to a dead process and a fresh process always sees `initialize` first.

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::acp::Transport;
use crate::client::{ClientInfo, ProtocolClient, ServerInfo};
use crate::supervisor::{AgentProfile, ProcessSupervisor, SupervisorOptions};
use crate::{AppError, CancelReason, Result};

/// Everything needed to bring a connection up.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Supervisor tunables.
    pub supervisor: SupervisorOptions,
    /// Identity announced in `initialize`.
    pub client_info: ClientInfo,
    /// Capabilities announced in `initialize`.
    pub capabilities: Value,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            supervisor: SupervisorOptions::default(),
            client_info: ClientInfo::default(),
            capabilities: Value::Object(serde_json::Map::new()),
        }
    }
}

/// A supervised agent process with a protocol client bound to it.
#[derive(Debug)]
pub struct AgentConnection {
    supervisor: ProcessSupervisor,
    client: ProtocolClient,
    server_info: ServerInfo,
    binder: JoinHandle<()>,
    cancel: CancellationToken,
}

impl AgentConnection {
    /// Start `profile`, bind the client, and run `initialize`.
    ///
    /// # Errors
    ///
    /// - Any [`ProcessSupervisor::start`] error.
    /// - `AppError::Transport`: the supervisor published no transport.
    /// - Any `initialize` failure; the process is stopped again.
    pub async fn connect(options: ConnectOptions, profile: AgentProfile) -> Result<Self> {
        let supervisor = ProcessSupervisor::new(options.supervisor);
        let client = ProtocolClient::new();
        let mut transports = supervisor
            .take_transports()
            .await
            .ok_or_else(|| AppError::Transport("transport receiver already taken".into()))?;

        supervisor.start(profile).await?;

        let first = transports
            .recv()
            .await
            .ok_or_else(|| AppError::Transport("supervisor published no transport".into()))?;
        client.rebind(first).await?;

        let server_info = match client
            .initialize(&options.client_info, options.capabilities)
            .await
        {
            Ok(info) => info,
            Err(err) => {
                warn!(error = %err, "connection: initialize failed, stopping agent");
                client.shutdown().await;
                supervisor.shutdown().await;
                return Err(err);
            }
        };

        let cancel = CancellationToken::new();
        let binder = tokio::spawn(
            run_binder(client.clone(), transports, cancel.clone())
                .instrument(info_span!("connection_binder")),
        );

        info!(server = %server_info.name, "connection: established");
        Ok(Self {
            supervisor,
            client,
            server_info,
            binder,
            cancel,
        })
    }

    /// The supervisor owning the agent process.
    #[must_use]
    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.supervisor
    }

    /// The protocol client bound to the current transport.
    #[must_use]
    pub fn client(&self) -> &ProtocolClient {
        &self.client
    }

    /// `serverInfo` from the first handshake.
    #[must_use]
    pub fn server_info(&self) -> &ServerInfo {
        &self.server_info
    }

    /// Shut the client down, stop the process, and end the binder.
    pub async fn shutdown(self) {
        self.client.shutdown().await;
        self.cancel.cancel();
        self.supervisor.shutdown().await;
        if let Err(err) = self.binder.await {
            debug!(%err, "connection: binder task ended abnormally");
        }
        info!("connection: shut down");
    }
}

async fn run_binder(
    client: ProtocolClient,
    mut transports: mpsc::UnboundedReceiver<Transport>,
    cancel: CancellationToken,
) {
    let mut queued: Option<Transport> = None;
    loop {
        let transport = match queued.take() {
            Some(transport) => transport,
            None => {
                let next = tokio::select! {
                    () = cancel.cancelled() => break,
                    transport = transports.recv() => transport,
                };
                let Some(transport) = next else { break };
                transport
            }
        };

        // A handshake stuck on a dying process gives way to the next transport.
        tokio::select! {
            () = cancel.cancelled() => break,
            newer = transports.recv() => {
                let Some(newer) = newer else { break };
                debug!("connection: transport superseded during handshake");
                queued = Some(newer);
            }
            outcome = client.rebind_with_init(transport) => match outcome {
                Ok(Some(info)) => info!(server = %info.name, "connection: re-initialized"),
                Ok(None) => debug!("connection: rebound without handshake"),
                Err(AppError::Cancelled(CancelReason::ClientShutdown)) => {
                    warn!("connection: client shut down, stopping binder");
                    break;
                }
                Err(err) => warn!(error = %err, "connection: re-initialize failed"),
            },
        }
    }
    debug!("connection: binder stopped");
}
