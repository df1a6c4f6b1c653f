use chrono::Duration;
use std::sync::Arc;

use super::KvStore;
use crate::models::{ChatTurn, UsageSnapshot};
use crate::outcome::Outcome;

/// Quota and retention rules for per-session state
#[derive(Debug, Clone)]
pub struct SessionPolicy {
    pub daily_limit: i64,
    pub history_cap: usize,
    pub usage_ttl: Duration,
    pub name_ttl: Duration,
    pub history_ttl: Duration,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            daily_limit: 3,
            history_cap: 12,
            usage_ttl: Duration::hours(48),
            name_ttl: Duration::days(30),
            history_ttl: Duration::days(7),
        }
    }
}

/// Per-session quota counter, display name and rolling history.
///
/// Every call reports an [`Outcome`] so the handler decides how to degrade
/// when the backing store is down.
#[derive(Clone)]
pub struct SessionState {
    store: Arc<dyn KvStore>,
    policy: SessionPolicy,
}

impl SessionState {
    pub fn new(store: Arc<dyn KvStore>, policy: SessionPolicy) -> Self {
        Self { store, policy }
    }

    pub fn backend(&self) -> &'static str {
        self.store.backend()
    }

    pub async fn is_connected(&self) -> bool {
        self.store.ping().await.is_ok()
    }

    fn usage_key(session_id: &str, day: &str) -> String {
        format!("usage:{}:{}", session_id, day)
    }

    fn name_key(session_id: &str) -> String {
        format!("name:{}", session_id)
    }

    fn history_key(session_id: &str) -> String {
        format!("history:{}", session_id)
    }

    /// Snapshot used when the store cannot be read
    pub fn empty_usage(&self, day: &str) -> UsageSnapshot {
        UsageSnapshot::new(0, self.policy.daily_limit, day)
    }

    pub async fn read_usage(&self, session_id: &str, day: &str) -> Outcome<UsageSnapshot> {
        match self.store.get(&Self::usage_key(session_id, day)).await {
            Ok(raw) => {
                let used = raw.and_then(|s| s.parse::<i64>().ok()).unwrap_or(0);
                Outcome::Success(UsageSnapshot::new(used, self.policy.daily_limit, day))
            }
            Err(e) => e.into_outcome(),
        }
    }

    pub async fn increment_usage(&self, session_id: &str, day: &str) -> Outcome<i64> {
        match self
            .store
            .incr(&Self::usage_key(session_id, day), self.policy.usage_ttl)
            .await
        {
            Ok(count) => Outcome::Success(count),
            Err(e) => e.into_outcome(),
        }
    }

    pub async fn read_name(&self, session_id: &str) -> Outcome<Option<String>> {
        match self.store.get(&Self::name_key(session_id)).await {
            Ok(name) => Outcome::Success(name.filter(|n| !n.is_empty())),
            Err(e) => e.into_outcome(),
        }
    }

    pub async fn write_name(&self, session_id: &str, name: &str) -> Outcome<()> {
        match self
            .store
            .set(&Self::name_key(session_id), name, self.policy.name_ttl)
            .await
        {
            Ok(()) => Outcome::Success(()),
            Err(e) => e.into_outcome(),
        }
    }

    pub async fn append_turn(&self, session_id: &str, turn: &ChatTurn) -> Outcome<()> {
        let encoded = match serde_json::to_string(turn) {
            Ok(s) => s,
            Err(e) => return Outcome::Error(e.to_string()),
        };

        match self
            .store
            .push_trim(
                &Self::history_key(session_id),
                &encoded,
                self.policy.history_cap,
                self.policy.history_ttl,
            )
            .await
        {
            Ok(()) => Outcome::Success(()),
            Err(e) => e.into_outcome(),
        }
    }

    pub async fn recent_turns(&self, session_id: &str) -> Outcome<Vec<ChatTurn>> {
        let raw = match self
            .store
            .tail(&Self::history_key(session_id), self.policy.history_cap)
            .await
        {
            Ok(raw) => raw,
            Err(e) => return e.into_outcome(),
        };

        let turns = raw
            .iter()
            .filter_map(|item| match serde_json::from_str::<ChatTurn>(item) {
                Ok(turn) => Some(turn),
                Err(e) => {
                    tracing::warn!("Skipping malformed history entry: {}", e);
                    None
                }
            })
            .collect();

        Outcome::Success(turns)
    }
}
