use serde::{Deserialize, Serialize};

use super::session::UsageSnapshot;

/// Body of `POST /chat`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(default)]
    pub text: Option<serde_json::Value>,
    #[serde(default)]
    pub session_id: Option<serde_json::Value>,
}

impl ChatRequest {
    /// Non-blank text, if the caller sent any
    pub fn text(&self) -> Option<&str> {
        self.text
            .as_ref()
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
    }

    /// Session key as sent: strings verbatim, numbers stringified, anything else absent
    pub fn session_id(&self) -> Option<String> {
        match self.session_id.as_ref()? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// Where a reply came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplySource {
    Model,
    Facts,
    Paywall,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub reply: String,
    pub paywall: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<ReplySource>,
    #[serde(flatten)]
    pub usage: UsageSnapshot,
}

impl ChatResponse {
    pub fn paywalled(reply: String, usage: UsageSnapshot) -> Self {
        Self {
            reply,
            paywall: true,
            source: None,
            usage,
        }
    }

    pub fn answered(reply: String, source: ReplySource, usage: UsageSnapshot) -> Self {
        Self {
            reply,
            paywall: false,
            source: Some(source),
            usage,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageQuery {
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub ok: bool,
    pub store: String,
    pub store_connected: bool,
    pub fact_lookup: bool,
}
