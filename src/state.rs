use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::PersistenceError;

/// On-disk shape of `state.json`: `{"published": [ids...]}`.
#[derive(Debug, Deserialize)]
struct StateFile {
    published: BTreeSet<String>,
}

/// Durable set of post ids that have already been handled.
///
/// The set only ever grows. Every change is written through to disk before
/// the call returns, and the write goes through a temporary sibling file that
/// is renamed over the original, so the file on disk always holds a complete
/// set even if the process dies mid-write.
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    published: BTreeSet<String>,
}

impl StateStore {
    /// Load the published set from `path`.
    ///
    /// A missing file yields an empty set, which is persisted right away so
    /// the file exists after the first run.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file exists but cannot be read
    /// - The file exists but does not deserialize
    /// - The initial empty file cannot be written
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let path = path.into();

        if !path.exists() {
            info!(
                "No state file at {}, starting with an empty set",
                path.display()
            );
            let store = Self {
                path,
                published: BTreeSet::new(),
            };
            write_atomically(&store.path, &store.published)?;
            return Ok(store);
        }

        let raw = fs::read_to_string(&path).map_err(|e| PersistenceError::ReadFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let state: StateFile =
            serde_json::from_str(&raw).map_err(|e| PersistenceError::Corrupt {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;

        debug!(
            "Loaded {} published ids from {}",
            state.published.len(),
            path.display()
        );

        Ok(Self {
            path,
            published: state.published,
        })
    }

    /// Record `id` as handled and rewrite the state file.
    ///
    /// The in-memory set only advances once the write has succeeded, so on
    /// failure memory and disk still agree.
    pub fn record_published(&mut self, id: &str) -> Result<(), PersistenceError> {
        if self.published.contains(id) {
            return Ok(());
        }

        let mut next = self.published.clone();
        next.insert(id.to_string());
        write_atomically(&self.path, &next)?;
        self.published = next;
        Ok(())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.published.contains(id)
    }

    pub fn len(&self) -> usize {
        self.published.len()
    }

    pub fn is_empty(&self) -> bool {
        self.published.is_empty()
    }
}

fn write_atomically(path: &Path, published: &BTreeSet<String>) -> Result<(), PersistenceError> {
    let write_failed = |reason: String| PersistenceError::WriteFailed {
        path: path.display().to_string(),
        reason,
    };

    let body = serde_json::to_vec(&StateFileRef { published })
        .map_err(|e| write_failed(e.to_string()))?;

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    let mut file = File::create(&tmp_path).map_err(|e| write_failed(e.to_string()))?;
    file.write_all(&body).map_err(|e| write_failed(e.to_string()))?;
    file.sync_all().map_err(|e| write_failed(e.to_string()))?;
    drop(file);

    fs::rename(&tmp_path, path).map_err(|e| write_failed(e.to_string()))
}

#[derive(Serialize)]
struct StateFileRef<'a> {
    published: &'a BTreeSet<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_is_created_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");

        let store = StateStore::load(&path).unwrap();
        assert!(store.is_empty());
        assert!(path.exists());
        assert_eq!(fs::read_to_string(&path).unwrap(), r#"{"published":[]}"#);
    }

    #[test]
    fn recorded_ids_survive_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");

        let mut store = StateStore::load(&path).unwrap();
        store.record_published("b").unwrap();
        store.record_published("a").unwrap();
        store.record_published("a").unwrap();

        let reloaded = StateStore::load(&path).unwrap();
        assert_eq!(reloaded.len(), 2);
        assert!(reloaded.contains("a"));
        assert!(reloaded.contains("b"));
        assert!(!dir.path().join("state.json.tmp").exists());
    }

    #[test]
    fn reads_the_shared_file_format() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, r#"{"published": ["123_456", "789"]}"#).unwrap();

        let store = StateStore::load(&path).unwrap();
        assert!(store.contains("123_456"));
        assert!(store.contains("789"));
    }

    #[test]
    fn corrupt_file_is_an_error_not_a_reset() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{not json").unwrap();

        let err = StateStore::load(&path).unwrap_err();
        assert!(matches!(err, PersistenceError::Corrupt { .. }));
        assert_eq!(fs::read_to_string(&path).unwrap(), "{not json");
    }

    #[test]
    fn failed_write_leaves_memory_unchanged() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        let mut store = StateStore::load(&path).unwrap();

        // A directory where the temp file should go makes File::create fail.
        fs::create_dir(dir.path().join("state.json.tmp")).unwrap();

        let err = store.record_published("x").unwrap_err();
        assert!(matches!(err, PersistenceError::WriteFailed { .. }));
        assert!(!store.contains("x"));
    }
}
