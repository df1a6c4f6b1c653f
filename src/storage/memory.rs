use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{KvStore, StoreError};

#[derive(Debug, Clone)]
enum Value {
    Text(String),
    Counter(i64),
    List(VecDeque<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: DateTime<Utc>,
}

impl Entry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Process-local store; state is lost on restart
#[derive(Clone, Default)]
pub struct MemoryStore {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
}

impl MemoryStore {
    pub fn open() -> Self {
        Self::default()
    }

    fn wrong_type(key: &str, expected: &str) -> StoreError {
        StoreError::Malformed {
            key: key.to_string(),
            reason: format!("expected {}", expected),
        }
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let entries = self.entries.read().await;
        let now = Utc::now();

        match entries.get(key).filter(|e| e.is_live(now)) {
            None => Ok(None),
            Some(Entry { value: Value::Text(s), .. }) => Ok(Some(s.clone())),
            Some(Entry { value: Value::Counter(n), .. }) => Ok(Some(n.to_string())),
            Some(_) => Err(Self::wrong_type(key, "scalar")),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut entries = self.entries.write().await;
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Text(value.to_string()),
                expires_at: Utc::now() + ttl,
            },
        );
        Ok(())
    }

    async fn incr(&self, key: &str, ttl: Duration) -> Result<i64, StoreError> {
        let mut entries = self.entries.write().await;
        let now = Utc::now();

        let current = match entries.get(key).filter(|e| e.is_live(now)) {
            None => 0,
            Some(Entry { value: Value::Counter(n), .. }) => *n,
            Some(Entry { value: Value::Text(s), .. }) => s
                .parse::<i64>()
                .map_err(|_| Self::wrong_type(key, "integer"))?,
            Some(_) => return Err(Self::wrong_type(key, "integer")),
        };

        let next = current + 1;
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Counter(next),
                expires_at: now + ttl,
            },
        );
        Ok(next)
    }

    async fn push_trim(
        &self,
        key: &str,
        value: &str,
        keep: usize,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let mut entries = self.entries.write().await;
        let now = Utc::now();

        let mut list = match entries.remove(key).filter(|e| e.is_live(now)) {
            None => VecDeque::new(),
            Some(Entry { value: Value::List(items), .. }) => items,
            Some(other) => {
                // put it back untouched
                entries.insert(key.to_string(), other);
                return Err(Self::wrong_type(key, "list"));
            }
        };

        list.push_back(value.to_string());
        while list.len() > keep {
            list.pop_front();
        }

        entries.insert(
            key.to_string(),
            Entry {
                value: Value::List(list),
                expires_at: now + ttl,
            },
        );
        Ok(())
    }

    async fn tail(&self, key: &str, n: usize) -> Result<Vec<String>, StoreError> {
        let entries = self.entries.read().await;
        let now = Utc::now();

        match entries.get(key).filter(|e| e.is_live(now)) {
            None => Ok(Vec::new()),
            Some(Entry { value: Value::List(items), .. }) => {
                let skip = items.len().saturating_sub(n);
                Ok(items.iter().skip(skip).cloned().collect())
            }
            Some(_) => Err(Self::wrong_type(key, "list")),
        }
    }

    async fn purge_expired(&self) -> Result<u64, StoreError> {
        let mut entries = self.entries.write().await;
        let now = Utc::now();
        let before = entries.len();
        entries.retain(|_, e| e.is_live(now));
        Ok((before - entries.len()) as u64)
    }

    async fn close(&self) {
        self.entries.write().await.clear();
    }
}
