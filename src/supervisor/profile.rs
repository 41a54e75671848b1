//! Agent launch profiles.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Opening marker of an ambient-environment reference in a profile `env`
/// value, e.g. `"${env:ANTHROPIC_API_KEY}"`.
pub const ENV_MARKER_OPEN: &str = "${env:";

/// How to launch one agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AgentProfile {
    /// Stable identity; two profiles with the same id are the same agent.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Executable.
    pub command: String,
    /// Arguments.
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment overrides, layered over the inherited environment.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl AgentProfile {
    /// Profile running `command` with no arguments or overrides.
    #[must_use]
    pub fn new(id: impl Into<String>, command: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            command: command.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
        }
    }

    /// Builder-style argument list.
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Builder-style single env override.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Overrides with every `${env:NAME}` marker substituted from the
    /// process environment.
    #[must_use]
    pub fn resolved_env(&self) -> Vec<(String, String)> {
        self.env
            .iter()
            .map(|(key, raw)| {
                let value = resolve_env_value(raw, |name| std::env::var(name).ok());
                (key.clone(), value)
            })
            .collect()
    }
}

/// Substitute every `${env:NAME}` marker in `raw` using `lookup`.
///
/// Unset variables become the empty string and are logged at WARN. An
/// unterminated marker is kept literally.
pub fn resolve_env_value<F>(raw: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;

    while let Some(start) = rest.find(ENV_MARKER_OPEN) {
        out.push_str(&rest[..start]);
        let after = &rest[start + ENV_MARKER_OPEN.len()..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };

        let name = &after[..end];
        if let Some(value) = lookup(name) {
            out.push_str(&value);
        } else {
            warn!(variable = name, "profile env references unset variable, using empty string");
        }
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    out
}
