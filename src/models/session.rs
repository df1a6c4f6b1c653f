use serde::{Deserialize, Serialize};

/// Speaker of a chat turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One message in a session's rolling history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Daily quota view for one session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSnapshot {
    pub used_today: i64,
    pub remaining_today: i64,
    pub limit: i64,
    pub day_key: String,
}

impl UsageSnapshot {
    pub fn new(used: i64, limit: i64, day_key: impl Into<String>) -> Self {
        let used = used.max(0);
        Self {
            used_today: used,
            remaining_today: (limit - used).max(0),
            limit,
            day_key: day_key.into(),
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.used_today >= self.limit
    }
}

/// UTC calendar day used to scope usage counters
pub fn day_key(now: chrono::DateTime<chrono::Utc>) -> String {
    now.format("%Y-%m-%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_remaining_never_negative() {
        let usage = UsageSnapshot::new(5, 3, "2026-10-19");
        assert_eq!(usage.remaining_today, 0);
        assert!(usage.is_exhausted());
    }

    #[test]
    fn test_day_key_is_utc_date() {
        let now = chrono::Utc.with_ymd_and_hms(2026, 1, 2, 23, 59, 0).unwrap();
        assert_eq!(day_key(now), "2026-01-02");
    }

    #[test]
    fn test_usage_serializes_camel_case() {
        let json = serde_json::to_value(UsageSnapshot::new(1, 3, "2026-10-19")).unwrap();
        assert_eq!(json["usedToday"], 1);
        assert_eq!(json["remainingToday"], 2);
        assert_eq!(json["dayKey"], "2026-10-19");
    }
}
