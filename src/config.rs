//! Global configuration parsing and validation.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::client::ClientInfo;
use crate::connection::ConnectOptions;
use crate::supervisor::{AgentProfile, HealthConfig, RestartPolicy, SupervisorOptions};
use crate::{AppError, Result};

/// Identity and capabilities announced in `initialize`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct ClientConfig {
    /// Client name.
    #[serde(default = "default_client_name")]
    pub name: String,
    /// Client version.
    #[serde(default = "default_client_version")]
    pub version: String,
    /// Capabilities object sent verbatim.
    #[serde(default = "default_capabilities")]
    pub capabilities: Value,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            name: default_client_name(),
            version: default_client_version(),
            capabilities: default_capabilities(),
        }
    }
}

fn default_client_name() -> String {
    env!("CARGO_PKG_NAME").into()
}

fn default_client_version() -> String {
    env!("CARGO_PKG_VERSION").into()
}

fn default_capabilities() -> Value {
    Value::Object(serde_json::Map::new())
}

/// Auto-restart budget.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RestartConfig {
    /// Automatic restarts allowed within the reset window.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Backoff before each attempt, saturating at the last entry.
    #[serde(default = "default_backoff_schedule")]
    pub backoff_schedule_ms: Vec<u64>,
    /// Crashes older than this stop counting.
    #[serde(default = "default_reset_after")]
    pub reset_after_ms: u64,
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_schedule_ms: default_backoff_schedule(),
            reset_after_ms: default_reset_after(),
        }
    }
}

fn default_max_retries() -> u32 {
    5
}

fn default_backoff_schedule() -> Vec<u64> {
    vec![1000, 2000, 4000, 8000, 16_000]
}

fn default_reset_after() -> u64 {
    60_000
}

/// Liveness probe timing.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct HealthSection {
    /// Time between probes.
    #[serde(default = "default_health_interval")]
    pub interval_ms: u64,
    /// Failing longer than this marks the process degraded.
    #[serde(default = "default_health_timeout")]
    pub timeout_ms: u64,
}

impl Default for HealthSection {
    fn default() -> Self {
        Self {
            interval_ms: default_health_interval(),
            timeout_ms: default_health_timeout(),
        }
    }
}

fn default_health_interval() -> u64 {
    30_000
}

fn default_health_timeout() -> u64 {
    10_000
}

/// Stop and restart pacing.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct LifecycleConfig {
    /// Wait between SIGTERM and a forced kill.
    #[serde(default = "default_stop_grace")]
    pub stop_grace_ms: u64,
    /// Pause between stop and start on a manual restart.
    #[serde(default = "default_restart_pause")]
    pub restart_pause_ms: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            stop_grace_ms: default_stop_grace(),
            restart_pause_ms: default_restart_pause(),
        }
    }
}

fn default_stop_grace() -> u64 {
    3000
}

fn default_restart_pause() -> u64 {
    500
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Profile used when none is named on the command line.
    #[serde(default)]
    pub default_profile: Option<String>,
    /// `initialize` payload.
    #[serde(default)]
    pub client: ClientConfig,
    /// Auto-restart budget.
    #[serde(default)]
    pub restart: RestartConfig,
    /// Health probe timing.
    #[serde(default)]
    pub health: HealthSection,
    /// Stop and restart pacing.
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    /// Launchable agents.
    #[serde(default)]
    pub profiles: Vec<AgentProfile>,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve a profile by id, falling back to `default_profile` and then to
    /// the only profile defined.
    ///
    /// # Errors
    ///
    /// - `AppError::NotFound`: the requested or default id is unknown.
    /// - `AppError::Config`: no id given and no unambiguous default.
    pub fn profile(&self, id: Option<&str>) -> Result<&AgentProfile> {
        let wanted = id.or(self.default_profile.as_deref());
        match wanted {
            Some(wanted) => self
                .profiles
                .iter()
                .find(|p| p.id == wanted)
                .ok_or_else(|| AppError::NotFound(format!("profile {wanted}"))),
            None => match self.profiles.as_slice() {
                [only] => Ok(only),
                _ => Err(AppError::Config(
                    "several profiles defined; set default_profile or pass --profile".into(),
                )),
            },
        }
    }

    /// Supervisor tunables from the `[restart]`, `[health]` and `[lifecycle]`
    /// sections.
    #[must_use]
    pub fn supervisor_options(&self) -> SupervisorOptions {
        SupervisorOptions {
            restart: RestartPolicy {
                max_retries: self.restart.max_retries,
                backoff_schedule: self
                    .restart
                    .backoff_schedule_ms
                    .iter()
                    .copied()
                    .map(Duration::from_millis)
                    .collect(),
                reset_after: Duration::from_millis(self.restart.reset_after_ms),
            },
            health: HealthConfig {
                interval: Duration::from_millis(self.health.interval_ms),
                timeout: Duration::from_millis(self.health.timeout_ms),
            },
            stop_grace: Duration::from_millis(self.lifecycle.stop_grace_ms),
            restart_pause: Duration::from_millis(self.lifecycle.restart_pause_ms),
        }
    }

    /// Everything [`AgentConnection::connect`](crate::connection::AgentConnection::connect)
    /// needs besides the profile.
    #[must_use]
    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            supervisor: self.supervisor_options(),
            client_info: ClientInfo {
                name: self.client.name.clone(),
                version: self.client.version.clone(),
            },
            capabilities: self.client.capabilities.clone(),
        }
    }

    fn validate(&mut self) -> Result<()> {
        if self.profiles.is_empty() {
            return Err(AppError::Config("at least one [[profiles]] entry is required".into()));
        }

        for (index, profile) in self.profiles.iter_mut().enumerate() {
            if profile.id.trim().is_empty() {
                return Err(AppError::Config(format!("profiles[{index}].id must not be empty")));
            }
            if profile.command.trim().is_empty() {
                return Err(AppError::Config(format!(
                    "profile {} has an empty command",
                    profile.id
                )));
            }
            if profile.name.is_empty() {
                profile.name.clone_from(&profile.id);
            }
        }

        for (index, profile) in self.profiles.iter().enumerate() {
            if self.profiles[..index].iter().any(|p| p.id == profile.id) {
                return Err(AppError::Config(format!("duplicate profile id {}", profile.id)));
            }
        }

        if let Some(default) = &self.default_profile {
            if !self.profiles.iter().any(|p| &p.id == default) {
                return Err(AppError::Config(format!(
                    "default_profile {default} does not match any profile"
                )));
            }
        }

        if self.health.interval_ms == 0 {
            return Err(AppError::Config("health.interval_ms must be greater than zero".into()));
        }

        Ok(())
    }
}
