// src/core/store.rs
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{CalldocError, Result};
use super::{Fingerprint, FunctionKey};

/// One generated artifact, keyed by the fingerprint it was produced for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedRecord {
    pub file_path: PathBuf,
    pub func_name: String,
    pub fingerprint: Fingerprint,
    pub artifact_text: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl ProcessedRecord {
    pub fn new(key: &FunctionKey, fingerprint: Fingerprint, artifact_text: impl Into<String>) -> Self {
        Self {
            file_path: key.file_path.clone(),
            func_name: key.name.clone(),
            fingerprint,
            artifact_text: artifact_text.into(),
            created_at: Utc::now(),
        }
    }
}

/// Fingerprint-keyed cache of generated artifacts, persisted as JSON Lines
#[derive(Debug, Default)]
pub struct ProcessedStore {
    path: Option<PathBuf>,
    records: IndexMap<Fingerprint, ProcessedRecord>,
    dirty: bool,
}

impl ProcessedStore {
    /// Load the store at `path`; a missing file yields an empty store
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut store = Self {
            path: Some(path.clone()),
            ..Self::default()
        };

        if !path.exists() {
            debug!("No processed store at {}, starting empty", path.display());
            return Ok(store);
        }

        let read_error = |reason: String| CalldocError::StoreRead {
            path: path.clone(),
            reason,
        };
        let file = std::fs::File::open(&path).map_err(|e| read_error(e.to_string()))?;

        for (number, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| read_error(e.to_string()))?;
            if line.trim().is_empty() {
                continue;
            }
            let record: ProcessedRecord = serde_json::from_str(&line)
                .map_err(|e| read_error(format!("line {}: {}", number + 1, e)))?;
            // Duplicates collapse onto the first position, last row wins
            store.records.insert(record.fingerprint.clone(), record);
        }

        info!("📦 Loaded {} processed records from {}", store.records.len(), path.display());
        Ok(store)
    }

    /// A store that is never written to disk
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn exists(&self, fingerprint: &Fingerprint) -> bool {
        self.records.contains_key(fingerprint)
    }

    pub fn get(&self, fingerprint: &Fingerprint) -> Option<&ProcessedRecord> {
        self.records.get(fingerprint)
    }

    /// Insert or replace the record for its fingerprint
    pub fn put(&mut self, record: ProcessedRecord) {
        self.records.insert(record.fingerprint.clone(), record);
        self.dirty = true;
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in first-write order
    pub fn records(&self) -> impl Iterator<Item = &ProcessedRecord> {
        self.records.values()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Atomically rewrite the backing file with every record
    pub fn flush(&mut self) -> Result<()> {
        let Some(path) = self.path.clone() else {
            self.dirty = false;
            return Ok(());
        };
        if !self.dirty {
            return Ok(());
        }

        let write_error = |reason: String| CalldocError::StoreWrite {
            path: path.clone(),
            reason,
        };

        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&parent).map_err(|e| write_error(e.to_string()))?;

        let mut temp = tempfile::NamedTempFile::new_in(&parent).map_err(|e| write_error(e.to_string()))?;
        for record in self.records.values() {
            let line = serde_json::to_string(record).map_err(|e| write_error(e.to_string()))?;
            writeln!(temp, "{}", line).map_err(|e| write_error(e.to_string()))?;
        }
        temp.flush().map_err(|e| write_error(e.to_string()))?;
        temp.persist(&path).map_err(|e| write_error(e.error.to_string()))?;

        debug!("Flushed {} records to {}", self.records.len(), path.display());
        self.dirty = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, fp: &str, text: &str) -> ProcessedRecord {
        ProcessedRecord::new(&FunctionKey::new("a.py", name), Fingerprint::from_hex(fp), text)
    }

    #[test]
    fn missing_file_opens_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProcessedStore::open(dir.path().join("store.jsonl")).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn put_upserts_and_keeps_first_position() {
        let mut store = ProcessedStore::in_memory();
        store.put(record("foo", "f1", "one"));
        store.put(record("bar", "f2", "two"));
        store.put(record("foo", "f1", "uno"));

        assert_eq!(store.len(), 2);
        assert_eq!(store.get(&Fingerprint::from_hex("f1")).unwrap().artifact_text, "uno");
        let order: Vec<_> = store.records().map(|r| r.func_name.as_str()).collect();
        assert_eq!(order, vec!["foo", "bar"]);
    }

    #[test]
    fn flush_then_open_restores_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("store.jsonl");

        let mut store = ProcessedStore::open(&path).unwrap();
        store.put(record("bar", "f2", "Bar docs."));
        store.put(record("foo", "f1", "Foo docs.\n\nArgs:\n    x: value"));
        store.flush().unwrap();
        assert!(!store.is_dirty());

        let reopened = ProcessedStore::open(&path).unwrap();
        assert_eq!(reopened.len(), 2);
        assert!(reopened.exists(&Fingerprint::from_hex("f1")));
        assert_eq!(
            reopened.get(&Fingerprint::from_hex("f1")).unwrap().artifact_text,
            "Foo docs.\n\nArgs:\n    x: value"
        );
        let order: Vec<_> = reopened.records().map(|r| r.func_name.as_str()).collect();
        assert_eq!(order, vec!["bar", "foo"]);
    }

    #[test]
    fn duplicate_rows_collapse_last_wins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.jsonl");
        std::fs::write(
            &path,
            concat!(
                r#"{"file_path":"a.py","func_name":"foo","fingerprint":"f1","artifact_text":"old"}"#,
                "\n",
                r#"{"file_path":"a.py","func_name":"bar","fingerprint":"f2","artifact_text":"bar"}"#,
                "\n\n",
                r#"{"file_path":"a.py","func_name":"foo","fingerprint":"f1","artifact_text":"new"}"#,
                "\n",
            ),
        )
        .unwrap();

        let store = ProcessedStore::open(&path).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.get(&Fingerprint::from_hex("f1")).unwrap().artifact_text, "new");
        assert_eq!(store.records().next().unwrap().func_name, "foo");
    }

    #[test]
    fn malformed_file_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.jsonl");
        std::fs::write(&path, "file_path,func_name,unique_id,docstring\n").unwrap();
        let err = ProcessedStore::open(&path).unwrap_err();
        assert!(matches!(err, CalldocError::StoreRead { .. }));
    }

    #[test]
    fn in_memory_flush_is_a_no_op() {
        let mut store = ProcessedStore::in_memory();
        store.put(record("foo", "f1", "one"));
        store.flush().unwrap();
        assert!(store.path().is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn flush_into_unwritable_location_is_a_write_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "not a directory").unwrap();

        let mut store = ProcessedStore::open(blocker.join("store.jsonl")).unwrap();
        store.put(record("foo", "f1", "one"));
        let err = store.flush().unwrap_err();
        assert!(matches!(err, CalldocError::StoreWrite { .. }));
    }
}
