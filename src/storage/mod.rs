pub mod database;
pub mod memory;
pub mod session_state;

use async_trait::async_trait;
use chrono::Duration;

pub use database::SqliteStore;
pub use memory::MemoryStore;
pub use session_state::{SessionPolicy, SessionState};

use crate::outcome::Outcome;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Backend cannot be reached (pool closed, connection refused, I/O)
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// Backend answered but the operation failed
    #[error("store operation failed: {0}")]
    Backend(String),
    #[error("stored value for {key} is malformed: {reason}")]
    Malformed { key: String, reason: String },
}

impl StoreError {
    pub fn into_outcome<T>(self) -> Outcome<T> {
        match self {
            StoreError::Unavailable(_) => Outcome::Unavailable(self.to_string()),
            _ => Outcome::Error(self.to_string()),
        }
    }
}

/// Key-value store with per-key expiry.
///
/// Only single-key operations are atomic. Implementations open themselves in
/// their constructor and release resources in [`KvStore::close`].
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Backend name for health reporting
    fn backend(&self) -> &'static str;

    async fn ping(&self) -> Result<(), StoreError>;

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Increment a counter, starting from 0 when missing or expired, and refresh its expiry
    async fn incr(&self, key: &str, ttl: Duration) -> Result<i64, StoreError>;

    /// Append to a list, keep only the last `keep` items and refresh its expiry
    async fn push_trim(
        &self,
        key: &str,
        value: &str,
        keep: usize,
        ttl: Duration,
    ) -> Result<(), StoreError>;

    /// Last `n` items of a list in append order
    async fn tail(&self, key: &str, n: usize) -> Result<Vec<String>, StoreError>;

    /// Drop expired keys, returning how many were removed
    async fn purge_expired(&self) -> Result<u64, StoreError>;

    async fn close(&self);
}
