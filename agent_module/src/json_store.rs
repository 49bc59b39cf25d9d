//! Whole-file JSON persistence with an explicit load / flush contract.
//!
//! State files are read fully into memory, mutated in place and written back
//! through a sibling temporary file that is renamed over the target.

use std::collections::btree_map;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed state file {}: {source}", path.display())]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize {}: {source}", path.display())]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// String-keyed map persisted as one JSON object.
#[derive(Debug, Clone)]
pub struct JsonStore<V> {
    path: PathBuf,
    entries: BTreeMap<String, V>,
}

impl<V> JsonStore<V>
where
    V: Serialize + DeserializeOwned,
{
    /// Missing file yields an empty store; unparsable content is `Malformed`.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let entries = read_json_file(&path)?.unwrap_or_default();
        Ok(Self { path, entries })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: V) -> Option<V> {
        self.entries.insert(key.into(), value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, V> {
        self.entries.iter()
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        write_json_atomic(&self.path, &self.entries)
    }
}

/// `Ok(None)` when the file does not exist or holds only whitespace.
pub(crate) fn read_json_file<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    if raw.trim().is_empty() {
        return Ok(None);
    }
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|source| StoreError::Malformed {
            path: path.to_path_buf(),
            source,
        })
}

pub(crate) fn write_json_atomic<T: Serialize + ?Sized>(
    path: &Path,
    value: &T,
) -> Result<(), StoreError> {
    let mut payload = serde_json::to_vec_pretty(value).map_err(|source| StoreError::Serialize {
        path: path.to_path_buf(),
        source,
    })?;
    payload.push(b'\n');

    let io_err = |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
    }
    let tmp_path = temp_sibling(path);
    fs::write(&tmp_path, &payload).map_err(io_err)?;
    fs::rename(&tmp_path, path).map_err(|source| {
        let _ = fs::remove_file(&tmp_path);
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    })
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_loads_empty() {
        let temp = TempDir::new().unwrap();
        let store: JsonStore<u32> = JsonStore::load(temp.path().join("absent.json")).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn flush_then_load_keeps_entries() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("store.json");
        let mut store: JsonStore<u32> = JsonStore::load(&path).unwrap();
        store.insert("a", 1);
        store.insert("b", 2);
        assert_eq!(store.insert("a", 3), Some(1));
        store.flush().unwrap();

        let reloaded: JsonStore<u32> = JsonStore::load(&path).unwrap();
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.get("a"), Some(&3));
        assert!(!temp_sibling(&path).exists());
    }

    #[test]
    fn malformed_file_is_reported_and_left_untouched() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("store.json");
        fs::write(&path, "{ not json").unwrap();

        let err = JsonStore::<u32>::load(&path).unwrap_err();
        assert!(matches!(err, StoreError::Malformed { .. }));
        assert_eq!(fs::read_to_string(&path).unwrap(), "{ not json");
    }

    #[test]
    fn whitespace_file_loads_empty() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("store.json");
        fs::write(&path, "\n").unwrap();
        let store: JsonStore<u32> = JsonStore::load(&path).unwrap();
        assert!(store.is_empty());
    }
}
