use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::json_store::{JsonStore, StoreError};

pub const UNCATEGORIZED: &str = "(uncategorized)";

/// A remembered classification. Every field is optional on read so that
/// hand-written entries such as `{"category": "invoice"}` are accepted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategorizationEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contains_structured_data: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filetype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classified_at: Option<String>,
}

impl CategorizationEntry {
    pub fn category(&self) -> &str {
        self.category.as_deref().unwrap_or(UNCATEGORIZED)
    }
}

/// File key to classification. Entries are never replaced automatically.
#[derive(Debug)]
pub struct CategorizationMemory {
    store: JsonStore<CategorizationEntry>,
}

impl CategorizationMemory {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        Ok(Self {
            store: JsonStore::load(path)?,
        })
    }

    pub fn lookup(&self, file_key: &str) -> Option<&CategorizationEntry> {
        self.store.get(file_key)
    }

    /// Insert and flush. An existing key keeps its entry; returns whether
    /// the entry was added.
    pub fn remember(
        &mut self,
        file_key: &str,
        entry: CategorizationEntry,
    ) -> Result<bool, StoreError> {
        if self.store.contains_key(file_key) {
            return Ok(false);
        }
        self.store.insert(file_key, entry);
        self.store.flush()?;
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn sparse_entries_fall_back_to_uncategorized() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("memory.json");
        std::fs::write(
            &path,
            r#"{"report.pdf": {"category": "invoice"}, "notes.txt": {"summary": "x"}}"#,
        )
        .unwrap();

        let memory = CategorizationMemory::load(&path).unwrap();
        assert_eq!(memory.lookup("report.pdf").unwrap().category(), "invoice");
        assert_eq!(memory.lookup("notes.txt").unwrap().category(), UNCATEGORIZED);
        assert!(memory.lookup("other.pdf").is_none());
    }

    #[test]
    fn remember_never_overwrites() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("memory.json");
        let mut memory = CategorizationMemory::load(&path).unwrap();
        let first = CategorizationEntry {
            category: Some("invoice".to_string()),
            ..CategorizationEntry::default()
        };
        let second = CategorizationEntry {
            category: Some("letter".to_string()),
            ..CategorizationEntry::default()
        };
        assert!(memory.remember("a.pdf", first).unwrap());
        assert!(!memory.remember("a.pdf", second).unwrap());

        let reloaded = CategorizationMemory::load(&path).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.lookup("a.pdf").unwrap().category(), "invoice");
    }
}
