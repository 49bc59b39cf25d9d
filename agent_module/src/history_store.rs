use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::AgentPaths;
use crate::json_store::{JsonStore, StoreError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRecord {
    pub content_hash: String,
    pub original_filename: String,
    pub stored_path: PathBuf,
    pub downloaded_at: DateTime<Utc>,
    pub message_id: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub sender: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedMessage {
    pub message_id: String,
    pub processed_at: DateTime<Utc>,
    pub attachment_count: usize,
}

/// Downloaded attachments keyed by content hash, plus the set of mail
/// messages whose attachments were all handled.
#[derive(Debug)]
pub struct HistoryStore {
    downloads: JsonStore<DownloadRecord>,
    messages: JsonStore<ProcessedMessage>,
}

impl HistoryStore {
    pub fn load(
        history_path: impl Into<PathBuf>,
        processed_messages_path: impl Into<PathBuf>,
    ) -> Result<Self, StoreError> {
        Ok(Self {
            downloads: JsonStore::load(history_path)?,
            messages: JsonStore::load(processed_messages_path)?,
        })
    }

    pub fn open(paths: &AgentPaths) -> Result<Self, StoreError> {
        Self::load(&paths.history_path, &paths.processed_messages_path)
    }

    pub fn has(&self, content_hash: &str) -> bool {
        self.downloads.contains_key(content_hash)
    }

    pub fn get(&self, content_hash: &str) -> Option<&DownloadRecord> {
        self.downloads.get(content_hash)
    }

    /// Map semantics: a second record for the same hash replaces the first.
    pub fn record(&mut self, record: DownloadRecord) {
        self.downloads.insert(record.content_hash.clone(), record);
    }

    pub fn len(&self) -> usize {
        self.downloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.downloads.is_empty()
    }

    pub fn is_message_processed(&self, message_id: &str) -> bool {
        self.messages.contains_key(message_id)
    }

    pub fn mark_message_processed(&mut self, message_id: &str, attachment_count: usize) {
        self.messages.insert(
            message_id,
            ProcessedMessage {
                message_id: message_id.to_string(),
                processed_at: Utc::now(),
                attachment_count,
            },
        );
    }

    pub fn processed_message_ids(&self) -> impl Iterator<Item = &str> {
        self.messages.iter().map(|(id, _)| id.as_str())
    }

    pub fn history_path(&self) -> &Path {
        self.downloads.path()
    }

    pub fn save(&self) -> Result<(), StoreError> {
        self.downloads.flush()?;
        self.messages.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(hash: &str, name: &str) -> DownloadRecord {
        DownloadRecord {
            content_hash: hash.to_string(),
            original_filename: name.to_string(),
            stored_path: PathBuf::from(format!("downloads/{hash}_{name}")),
            downloaded_at: Utc::now(),
            message_id: "m1".to_string(),
            subject: "Invoice".to_string(),
            sender: "billing@example.com".to_string(),
        }
    }

    #[test]
    fn record_is_idempotent_per_hash() {
        let temp = TempDir::new().unwrap();
        let paths = AgentPaths::new(temp.path());
        let mut history = HistoryStore::open(&paths).unwrap();
        history.record(record("abc", "a.pdf"));
        history.record(record("abc", "renamed.pdf"));
        assert_eq!(history.len(), 1);
        assert_eq!(history.get("abc").unwrap().original_filename, "renamed.pdf");
    }

    #[test]
    fn save_and_reload_round_trips_both_sets() {
        let temp = TempDir::new().unwrap();
        let paths = AgentPaths::new(temp.path());
        let mut history = HistoryStore::open(&paths).unwrap();
        history.record(record("abc", "a.pdf"));
        history.mark_message_processed("m1", 1);
        history.save().unwrap();

        let reloaded = HistoryStore::open(&paths).unwrap();
        assert!(reloaded.has("abc"));
        assert!(!reloaded.has("def"));
        assert!(reloaded.is_message_processed("m1"));
        assert_eq!(reloaded.processed_message_ids().collect::<Vec<_>>(), vec!["m1"]);
    }

    #[test]
    fn malformed_history_is_not_reset() {
        let temp = TempDir::new().unwrap();
        let paths = AgentPaths::new(temp.path());
        std::fs::write(&paths.history_path, "[1, 2").unwrap();

        let err = HistoryStore::open(&paths).unwrap_err();
        assert!(matches!(err, StoreError::Malformed { .. }));
        assert_eq!(std::fs::read_to_string(&paths.history_path).unwrap(), "[1, 2");
    }
}
