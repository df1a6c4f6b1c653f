use serde::Serialize;
use std::time::Instant;

use crate::models::{ReplySource, UsageSnapshot};

/// One chat exchange as seen by hooks
#[derive(Debug, Clone, Serialize)]
pub struct ExchangeRecord {
    /// Unique request identifier
    pub request_id: String,
    pub session_id: String,
    /// Request timestamp (Unix epoch seconds)
    pub timestamp: i64,
    /// ISO8601 formatted timestamp
    pub timestamp_iso: String,
    pub user_text: String,
    pub reply: Option<String>,
    pub source: Option<ReplySource>,
    pub usage: Option<UsageSnapshot>,
    pub status_code: u16,
    pub error_message: Option<String>,
    pub duration_ms: u64,
    #[serde(skip)]
    started: Option<Instant>,
}

impl ExchangeRecord {
    pub fn begin(session_id: &str, user_text: &str) -> Self {
        let now = chrono::Utc::now();
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            timestamp: now.timestamp(),
            timestamp_iso: now.to_rfc3339(),
            user_text: user_text.to_string(),
            reply: None,
            source: None,
            usage: None,
            status_code: 0,
            error_message: None,
            duration_ms: 0,
            started: Some(Instant::now()),
        }
    }

    fn elapsed_ms(&self) -> u64 {
        self.started
            .map(|s| s.elapsed().as_millis() as u64)
            .unwrap_or(0)
    }

    pub fn answered(mut self, reply: &str, source: ReplySource, usage: &UsageSnapshot) -> Self {
        self.reply = Some(reply.to_string());
        self.source = Some(source);
        self.usage = Some(usage.clone());
        self.status_code = 200;
        self.duration_ms = self.elapsed_ms();
        self
    }

    pub fn failed(mut self, status_code: u16, message: String) -> Self {
        self.status_code = status_code;
        self.error_message = Some(message);
        self.duration_ms = self.elapsed_ms();
        self
    }

    /// First 16 chars of the session, safe for use as a directory name
    pub fn short_session_id(&self) -> String {
        let short: String = self
            .session_id
            .chars()
            .take(16)
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();

        if short.is_empty() {
            "unknown".to_string()
        } else {
            short
        }
    }
}
