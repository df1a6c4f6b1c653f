use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use super::context::ExchangeRecord;
use super::traits::ExchangeHook;

const DEFAULT_RETENTION_DAYS: u64 = 30;

/// Saves every exchange as a JSON file under a per-session directory
pub struct TranscriptHook {
    /// Base directory for transcript files
    log_dir: PathBuf,
    /// Retention period in days
    retention_days: u64,
}

impl TranscriptHook {
    pub fn new(log_dir: PathBuf) -> Self {
        Self {
            log_dir,
            retention_days: DEFAULT_RETENTION_DAYS,
        }
    }

    pub fn with_retention_days(mut self, days: u64) -> Self {
        self.retention_days = days;
        self
    }

    pub fn default_log_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("pulse")
            .join("transcripts")
    }

    fn session_dir(&self, record: &ExchangeRecord) -> PathBuf {
        self.log_dir.join(record.short_session_id())
    }

    fn generate_filename(record: &ExchangeRecord, sequence: u64) -> String {
        let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
        let short_request_id: String = record.request_id.chars().take(8).collect();
        format!("{}_{}_{}.json", timestamp, short_request_id, sequence)
    }

    async fn write_transcript(&self, record: &ExchangeRecord) {
        let session_dir = self.session_dir(record);

        if let Err(e) = tokio::fs::create_dir_all(&session_dir).await {
            tracing::error!("Failed to create transcript directory {:?}: {}", session_dir, e);
            return;
        }

        // Sequence number from the files already in the session directory
        let sequence = match tokio::fs::read_dir(&session_dir).await {
            Ok(mut entries) => {
                let mut count = 0u64;
                while entries.next_entry().await.ok().flatten().is_some() {
                    count += 1;
                }
                count + 1
            }
            Err(_) => 1,
        };

        let filepath = session_dir.join(Self::generate_filename(record, sequence));

        match serde_json::to_string_pretty(record) {
            Ok(json) => {
                if let Err(e) = tokio::fs::write(&filepath, json).await {
                    tracing::error!("Failed to write transcript {:?}: {}", filepath, e);
                } else {
                    tracing::debug!("Transcript written: {:?}", filepath);
                }
            }
            Err(e) => {
                tracing::error!("Failed to serialize exchange record: {}", e);
            }
        }
    }

    /// Modification time, when the filesystem reports one
    async fn modified_at(path: &Path) -> Option<SystemTime> {
        tokio::fs::metadata(path).await.ok()?.modified().ok()
    }

    /// Remove expired files in one session directory; returns (removed, kept)
    async fn prune_session(dir: &Path, cutoff: SystemTime) -> (u64, u64) {
        let Ok(mut files) = tokio::fs::read_dir(dir).await else {
            return (0, 0);
        };

        let (mut removed, mut kept) = (0u64, 0u64);
        while let Ok(Some(file)) = files.next_entry().await {
            let path = file.path();
            let expired = matches!(Self::modified_at(&path).await, Some(at) if at < cutoff);
            if !expired {
                kept += 1;
                continue;
            }
            match tokio::fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) => {
                    tracing::warn!("Failed to delete old transcript {:?}: {}", path, e);
                    kept += 1;
                }
            }
        }
        (removed, kept)
    }

    /// Delete transcripts older than the retention period and drop emptied session directories
    pub async fn cleanup_old_transcripts(&self) -> u64 {
        let retention = Duration::from_secs(self.retention_days.saturating_mul(86_400));
        let cutoff = SystemTime::now()
            .checked_sub(retention)
            .unwrap_or(SystemTime::UNIX_EPOCH);

        let mut sessions = match tokio::fs::read_dir(&self.log_dir).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::debug!("No transcript directory to clean: {}", e);
                return 0;
            }
        };

        let (mut removed_files, mut removed_dirs) = (0u64, 0u64);
        while let Ok(Some(entry)) = sessions.next_entry().await {
            let dir = entry.path();
            if !dir.is_dir() {
                continue;
            }

            let (removed, kept) = Self::prune_session(&dir, cutoff).await;
            removed_files += removed;
            if removed > 0 && kept == 0 && tokio::fs::remove_dir(&dir).await.is_ok() {
                removed_dirs += 1;
            }
        }

        if removed_files > 0 {
            tracing::info!(
                "Transcript cleanup: {} files, {} sessions emptied (keeping {} days)",
                removed_files,
                removed_dirs,
                self.retention_days
            );
        }

        removed_files
    }
}

#[async_trait]
impl ExchangeHook for TranscriptHook {
    async fn on_exchange(&self, record: &ExchangeRecord) {
        tracing::debug!(
            "TranscriptHook: exchange [{}] source={:?} duration={}ms",
            record.request_id,
            record.source,
            record.duration_ms
        );
        self.write_transcript(record).await;
    }

    async fn on_failure(&self, record: &ExchangeRecord) {
        self.write_transcript(record).await;
    }

    fn name(&self) -> &'static str {
        "TranscriptHook"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ReplySource, UsageSnapshot};

    fn json_files(dir: &std::path::Path) -> Vec<PathBuf> {
        std::fs::read_dir(dir)
            .unwrap()
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.extension().map(|e| e == "json").unwrap_or(false))
            .collect()
    }

    #[tokio::test]
    async fn test_writes_one_file_per_exchange() {
        let dir = tempfile::tempdir().unwrap();
        let hook = TranscriptHook::new(dir.path().to_path_buf());
        let usage = UsageSnapshot::new(1, 3, "2026-10-19");

        let record = ExchangeRecord::begin("session-abc", "hola").answered("Hola.", ReplySource::Model, &usage);
        hook.on_exchange(&record).await;
        hook.on_failure(&ExchangeRecord::begin("session-abc", "x").failed(500, "boom".into())).await;

        let files = json_files(&dir.path().join("session-abc"));
        assert_eq!(files.len(), 2);

        let contents: Vec<serde_json::Value> = files
            .iter()
            .map(|f| serde_json::from_str(&std::fs::read_to_string(f).unwrap()).unwrap())
            .collect();
        assert!(contents.iter().any(|c| c["reply"] == "Hola." && c["source"] == "model"));
        assert!(contents.iter().any(|c| c["error_message"] == "boom"));
    }

    #[tokio::test]
    async fn test_cleanup_removes_expired_transcripts() {
        let dir = tempfile::tempdir().unwrap();
        let hook = TranscriptHook::new(dir.path().to_path_buf()).with_retention_days(1);
        hook.on_exchange(&ExchangeRecord::begin("old", "hi")).await;
        hook.on_exchange(&ExchangeRecord::begin("fresh", "hi")).await;

        let two_days_ago = std::time::SystemTime::now() - std::time::Duration::from_secs(2 * 86_400);
        for file in json_files(&dir.path().join("old")) {
            std::fs::File::options()
                .write(true)
                .open(&file)
                .unwrap()
                .set_modified(two_days_ago)
                .unwrap();
        }

        assert_eq!(hook.cleanup_old_transcripts().await, 1);
        assert!(!dir.path().join("old").exists());
        assert_eq!(json_files(&dir.path().join("fresh")).len(), 1);
    }

    #[tokio::test]
    async fn test_cleanup_keeps_sessions_with_recent_files() {
        let dir = tempfile::tempdir().unwrap();
        let hook = TranscriptHook::new(dir.path().to_path_buf()).with_retention_days(1);
        hook.on_exchange(&ExchangeRecord::begin("mixed", "old")).await;

        let two_days_ago = std::time::SystemTime::now() - std::time::Duration::from_secs(2 * 86_400);
        for file in json_files(&dir.path().join("mixed")) {
            std::fs::File::options()
                .write(true)
                .open(&file)
                .unwrap()
                .set_modified(two_days_ago)
                .unwrap();
        }
        hook.on_exchange(&ExchangeRecord::begin("mixed", "new")).await;

        assert_eq!(hook.cleanup_old_transcripts().await, 1);
        assert_eq!(json_files(&dir.path().join("mixed")).len(), 1);
    }
}
