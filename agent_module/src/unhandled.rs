use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::json_store::{read_json_file, write_json_atomic, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnhandledReason {
    UnsupportedType,
    BinaryType,
    NoText,
    ExtractionFailed,
    ClassifierFailed,
    NoRoute,
    ActionFailed,
}

impl UnhandledReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnhandledReason::UnsupportedType => "unsupported_type",
            UnhandledReason::BinaryType => "binary_type",
            UnhandledReason::NoText => "no_text",
            UnhandledReason::ExtractionFailed => "extraction_failed",
            UnhandledReason::ClassifierFailed => "classifier_failed",
            UnhandledReason::NoRoute => "no_route",
            UnhandledReason::ActionFailed => "action_failed",
        }
    }
}

impl fmt::Display for UnhandledReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnhandledEntry {
    pub filename: String,
    #[serde(default)]
    pub filetype: String,
    pub reason: UnhandledReason,
    #[serde(default)]
    pub detail: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub sender: String,
    pub recorded_at: DateTime<Utc>,
}

impl UnhandledEntry {
    pub fn new(filename: impl Into<String>, reason: UnhandledReason) -> Self {
        Self {
            filename: filename.into(),
            filetype: String::new(),
            reason,
            detail: String::new(),
            subject: String::new(),
            sender: String::new(),
            recorded_at: Utc::now(),
        }
    }

    pub fn with_filetype(mut self, filetype: impl Into<String>) -> Self {
        self.filetype = filetype.into();
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }

    pub fn with_context(mut self, subject: &str, sender: &str) -> Self {
        self.subject = subject.to_string();
        self.sender = sender.to_string();
        self
    }
}

/// Persisted list of files that could not be classified or routed,
/// de-duplicated by `(filename, reason)`.
#[derive(Debug)]
pub struct UnhandledLog {
    path: PathBuf,
    entries: Vec<UnhandledEntry>,
    dirty: bool,
}

impl UnhandledLog {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let entries = read_json_file(&path)?.unwrap_or_default();
        Ok(Self {
            path,
            entries,
            dirty: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, filename: &str, reason: UnhandledReason) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.filename == filename && entry.reason == reason)
    }

    /// Returns false when an entry with the same filename and reason exists.
    pub fn record(&mut self, entry: UnhandledEntry) -> bool {
        if self.contains(&entry.filename, entry.reason) {
            return false;
        }
        info!(
            "unhandled {} ({}): {}",
            entry.filename, entry.reason, entry.detail
        );
        self.entries.push(entry);
        self.dirty = true;
        true
    }

    pub fn entries(&self) -> &[UnhandledEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Writes only when something was recorded since the last flush.
    pub fn flush(&mut self) -> Result<(), StoreError> {
        if !self.dirty {
            return Ok(());
        }
        write_json_atomic(&self.path, &self.entries)?;
        self.dirty = false;
        Ok(())
    }
}
