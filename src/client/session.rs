//! Session handle, desired settings, and handshake payloads.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// The client's reference to an agent-side session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionHandle {
    /// Agent-assigned session identifier.
    pub id: String,
    /// Optional display title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Creation timestamp.
    #[serde(default = "Utc::now", deserialize_with = "timestamp")]
    pub created_at: DateTime<Utc>,
    /// Last activity timestamp.
    #[serde(default = "Utc::now", deserialize_with = "timestamp")]
    pub updated_at: DateTime<Utc>,
}

impl SessionHandle {
    /// Handle for `id` with both timestamps set to now.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            title: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial session settings.
///
/// Every `Some` field is a setting the caller wants applied; merging a delta
/// overwrites only the fields it carries.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SettingsDelta {
    /// Model identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Planning mode toggle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_mode: Option<bool>,
    /// Tool permission mode (agent-defined values).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission_mode: Option<String>,
}

impl SettingsDelta {
    /// Delta that only changes the model.
    #[must_use]
    pub fn model(model: impl Into<String>) -> Self {
        Self {
            model: Some(model.into()),
            ..Self::default()
        }
    }

    /// Delta that only toggles plan mode.
    #[must_use]
    pub fn plan_mode(enabled: bool) -> Self {
        Self {
            plan_mode: Some(enabled),
            ..Self::default()
        }
    }

    /// Whether the delta carries no setting at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.model.is_none() && self.plan_mode.is_none() && self.permission_mode.is_none()
    }

    /// Overlay `other` onto `self`.
    pub fn merge(&mut self, other: &Self) {
        if let Some(model) = &other.model {
            self.model = Some(model.clone());
        }
        if let Some(plan_mode) = other.plan_mode {
            self.plan_mode = Some(plan_mode);
        }
        if let Some(mode) = &other.permission_mode {
            self.permission_mode = Some(mode.clone());
        }
    }

    /// `settings/change` params: the delta's fields plus `sessionId`.
    #[must_use]
    pub fn to_params(&self, session_id: &str) -> Value {
        let mut params = match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        params.insert("sessionId".into(), Value::String(session_id.to_owned()));
        Value::Object(params)
    }
}

/// Identity the client announces in `initialize`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientInfo {
    /// Client name.
    pub name: String,
    /// Client version.
    pub version: String,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_owned(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
        }
    }
}

/// `serverInfo` returned by `initialize`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerInfo {
    /// Agent name.
    pub name: String,
    /// Agent version, when reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Any other members the agent sent.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Accept RFC 3339 strings or epoch milliseconds.
fn timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Millis(i64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Millis(ms) => Utc
            .timestamp_millis_opt(ms)
            .single()
            .ok_or_else(|| D::Error::custom(format!("timestamp out of range: {ms}"))),
        Raw::Text(text) => DateTime::parse_from_rfc3339(&text)
            .map(|t| t.with_timezone(&Utc))
            .map_err(D::Error::custom),
    }
}
