//! JSON flat-file state store.
//!
//! Each state document is an independent JSON file, read once at startup
//! and rewritten wholesale after each mutation. A missing or corrupt file
//! is not an error; it loads as the document's default value.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Store error types.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// File names for the three persistent stores.
pub const MONITOR_STATS_FILE: &str = "monitor-stats.json";
pub const PERFORMANCE_METRICS_FILE: &str = "performance-metrics.json";
pub const ERROR_STATE_FILE: &str = "error-state.json";

/// Flat-file JSON store rooted at a data directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Create a store rooted at `dir`, creating the directory if needed.
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Load a document, falling back to its default when the file is
    /// missing or its contents fail to parse.
    pub fn load<T: DeserializeOwned + Default>(&self, name: &str) -> T {
        let path = self.path(name);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return T::default(),
            Err(e) => {
                tracing::warn!("Store: failed to read {}: {}", path.display(), e);
                return T::default();
            }
        };

        match serde_json::from_str(&raw) {
            Ok(doc) => doc,
            Err(e) => {
                tracing::warn!("Store: corrupt state in {}: {}", path.display(), e);
                T::default()
            }
        }
    }

    /// Rewrite a document wholesale. Writes to a temp file and renames,
    /// so a crash mid-write leaves the previous version intact.
    pub fn save<T: Serialize>(&self, name: &str, value: &T) -> Result<(), StoreError> {
        let path = self.path(name);
        let tmp = self.path(&format!("{}.tmp", name));
        let raw = serde_json::to_string_pretty(value)?;
        fs::write(&tmp, raw)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Whether a document already exists on disk.
    pub fn exists(&self, name: &str) -> bool {
        self.path(name).exists()
    }

    /// Write an immutable daily report snapshot. Returns false without
    /// touching disk if the report for that day was already written.
    pub fn save_report_once<T: Serialize>(
        &self,
        date_key: &str,
        report: &T,
    ) -> Result<bool, StoreError> {
        let name = format!("report-{}.json", date_key);
        if self.exists(&name) {
            return Ok(false);
        }
        self.save(&name, report)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Doc {
        count: u64,
        label: String,
    }

    #[test]
    fn test_missing_file_loads_default() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        let doc: Doc = store.load("nope.json");
        assert_eq!(doc, Doc::default());
    }

    #[test]
    fn test_corrupt_file_loads_default() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.json"), "{not json").unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        let doc: Doc = store.load("bad.json");
        assert_eq!(doc, Doc::default());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        let doc = Doc { count: 7, label: "ok".to_string() };
        store.save("doc.json", &doc).unwrap();
        let loaded: Doc = store.load("doc.json");
        assert_eq!(loaded, doc);
    }

    #[test]
    fn test_report_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        let first = Doc { count: 1, label: "first".to_string() };
        let second = Doc { count: 2, label: "second".to_string() };

        assert!(store.save_report_once("2024-06-01", &first).unwrap());
        assert!(!store.save_report_once("2024-06-01", &second).unwrap());

        let kept: Doc = store.load("report-2024-06-01.json");
        assert_eq!(kept, first);
    }
}
