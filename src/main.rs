#![forbid(unsafe_code)]

//! `agent-conduit`: terminal front end for a supervised coding agent.
//!
//! Reads commands from stdin, drives the agent through the protocol client,
//! and prints client and supervisor events as JSON lines on stdout. Logs go
//! to stderr.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use futures_util::StreamExt;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use agent_conduit::client::{ProtocolClient, SettingsDelta};
use agent_conduit::connection::AgentConnection;
use agent_conduit::supervisor::ProcessSupervisor;
use agent_conduit::{AppError, GlobalConfig, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "agent-conduit", about = "Supervised stdio client for coding agents", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Profile id to launch; defaults to `default_profile`.
    #[arg(long)]
    profile: Option<String>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

/// One line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    New(Option<String>),
    List,
    Switch(String),
    Delete(String),
    Cancel,
    Model(String),
    Plan(bool),
    Accept(String),
    Reject(String),
    BashOk(String),
    BashSkip(String),
    PlanOk,
    Restart,
    Status,
    Quit,
    Prompt(String),
}

impl Command {
    fn parse(line: &str) -> std::result::Result<Option<Self>, String> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        if !line.starts_with('/') {
            return Ok(Some(Self::Prompt(line.to_owned())));
        }

        let (name, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let rest = rest.trim();
        let arg = |usage: &str| {
            if rest.is_empty() {
                Err(format!("usage: {usage}"))
            } else {
                Ok(rest.to_owned())
            }
        };

        let command = match name {
            "/new" => Self::New((!rest.is_empty()).then(|| rest.to_owned())),
            "/list" => Self::List,
            "/switch" => Self::Switch(arg("/switch <session-id>")?),
            "/delete" => Self::Delete(arg("/delete <session-id>")?),
            "/cancel" => Self::Cancel,
            "/model" => Self::Model(arg("/model <model>")?),
            "/plan" => match rest {
                "on" => Self::Plan(true),
                "off" => Self::Plan(false),
                _ => return Err("usage: /plan on|off".into()),
            },
            "/accept" => Self::Accept(arg("/accept <path>")?),
            "/reject" => Self::Reject(arg("/reject <path>")?),
            "/bash-ok" => Self::BashOk(arg("/bash-ok <id>")?),
            "/bash-skip" => Self::BashSkip(arg("/bash-skip <id>")?),
            "/plan-ok" => Self::PlanOk,
            "/restart" => Self::Restart,
            "/status" => Self::Status,
            "/quit" => Self::Quit,
            other => return Err(format!("unknown command {other}")),
        };
        Ok(Some(command))
    }
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("agent-conduit bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let config = GlobalConfig::load_from_path(&args.config)?;
    let profile = config.profile(args.profile.as_deref())?.clone();
    info!(profile_id = %profile.id, "configuration loaded");

    // ── Connect ─────────────────────────────────────────
    let connection = AgentConnection::connect(config.connect_options(), profile).await?;
    emit(&json!({ "event": "connected", "server": connection.server_info() }));

    let ct = CancellationToken::new();
    let client_events = tokio::spawn(print_events(connection.client().subscribe(), ct.clone()));
    let supervisor_events = tokio::spawn(print_events(
        connection.supervisor().subscribe(),
        ct.clone(),
    ));

    // ── Command loop ────────────────────────────────────
    let mut input = FramedRead::new(tokio::io::stdin(), LinesCodec::new());
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        let line = tokio::select! {
            () = &mut shutdown => {
                info!("shutdown signal received");
                break;
            }
            line = input.next() => line,
        };

        let line = match line {
            Some(Ok(line)) => line,
            Some(Err(err)) => {
                warn!(%err, "unreadable input line");
                continue;
            }
            None => {
                debug!("stdin closed");
                break;
            }
        };

        match Command::parse(&line) {
            Ok(None) => {}
            Ok(Some(Command::Quit)) => break,
            Ok(Some(command)) => {
                let client = connection.client().clone();
                let supervisor = connection.supervisor().clone();
                tokio::spawn(async move {
                    let label = format!("{command:?}");
                    match execute(&client, &supervisor, command).await {
                        Ok(result) => emit(&json!({ "command": label, "result": result })),
                        Err(err) => emit(&json!({ "command": label, "error": err.to_string() })),
                    }
                });
            }
            Err(usage) => emit(&json!({ "error": usage })),
        }
    }

    // ── Graceful shutdown ───────────────────────────────
    ct.cancel();
    connection.shutdown().await;
    for handle in [client_events, supervisor_events] {
        if let Err(err) = handle.await {
            debug!(%err, "event printer ended abnormally");
        }
    }
    info!("agent-conduit shut down");
    Ok(())
}

async fn execute(
    client: &ProtocolClient,
    supervisor: &ProcessSupervisor,
    command: Command,
) -> Result<Value> {
    let done = Ok(Value::Null);
    match command {
        Command::New(title) => Ok(json!(client.new_session(title.as_deref(), None).await?)),
        Command::List => Ok(json!(client.list_sessions().await?)),
        Command::Switch(id) => client.switch_session(&id).await.and(done),
        Command::Delete(id) => client.delete_session(&id).await.and(done),
        Command::Cancel => client.cancel_session().await.and(done),
        Command::Model(model) => client.change_settings(SettingsDelta::model(model)).await.and(done),
        Command::Plan(on) => client.change_settings(SettingsDelta::plan_mode(on)).await.and(done),
        Command::Accept(path) => client.accept_file_change(&path).await.and(done),
        Command::Reject(path) => client.reject_file_change(&path).await.and(done),
        Command::BashOk(id) => client.confirm_bash(&id).await.and(done),
        Command::BashSkip(id) => client.skip_bash(&id).await.and(done),
        Command::PlanOk => client.confirm_plan().await.and(done),
        Command::Restart => supervisor.restart().await.and(done),
        Command::Status => Ok(json!({
            "status": supervisor.status(),
            "session": client.current_session().await,
            "pending": client.pending_count().await,
        })),
        Command::Prompt(text) => client.prompt(&text, Vec::new()).await.and(done),
        Command::Quit => done,
    }
}

async fn print_events<E>(mut events: broadcast::Receiver<E>, cancel: CancellationToken)
where
    E: serde::Serialize + Clone + Send + 'static,
{
    loop {
        let event = tokio::select! {
            () = cancel.cancelled() => break,
            event = events.recv() => event,
        };
        match event {
            Ok(event) => match serde_json::to_value(&event) {
                Ok(value) => emit(&value),
                Err(err) => warn!(%err, "event not serializable"),
            },
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "event printer lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn emit(value: &Value) {
    println!("{value}");
}

/// Wait for ctrl-c or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
