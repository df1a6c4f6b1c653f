pub mod chat;
pub mod session;

pub use chat::{ChatRequest, ChatResponse, HealthResponse, ReplySource, UsageQuery};
pub use session::{day_key, ChatTurn, Role, UsageSnapshot};

/// Session used when the caller does not send one
pub const DEFAULT_SESSION_ID: &str = "default";

/// Resolve the caller's session id, falling back to the shared default
pub fn resolve_session_id(session_id: Option<&str>) -> String {
    session_id
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_SESSION_ID)
        .to_string()
}
