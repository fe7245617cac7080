//! Durable collection progress.
//!
//! The checkpoint is a single JSON document holding one record per stream
//! plus the time of the last save:
//!
//! ```json
//! {
//!   "streams": {
//!     "commits": { "items_collected": 120, "last_cursor": "9fceb02..." },
//!     "developers": {
//!       "items_collected": 12,
//!       "last_cursor": "octocat",
//!       "processed": { "developers": ["octocat"], "following": ["octocat"] }
//!     }
//!   },
//!   "last_run_at": "2026-10-18T09:30:00Z"
//! }
//! ```
//!
//! Every mutation is written through immediately by replacing the whole file,
//! so an interrupted run loses at most the item that was in flight.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;

/// Errors reading or writing the checkpoint file. Always fatal for a run.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("failed to read checkpoint {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse checkpoint {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to write checkpoint {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Progress of a single stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    /// Items committed so far. Only ever increases.
    #[serde(default)]
    pub items_collected: usize,
    /// Identifier of the last committed item.
    #[serde(default)]
    pub last_cursor: Option<String>,
    /// Named sets of already-processed identifiers.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub processed: BTreeMap<String, BTreeSet<String>>,
}

impl CheckpointRecord {
    #[must_use]
    pub fn is_processed(&self, set: &str, key: &str) -> bool {
        self.processed.get(set).is_some_and(|s| s.contains(key))
    }
}

/// The whole checkpoint document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointState {
    #[serde(default)]
    pub streams: BTreeMap<String, CheckpointRecord>,
    #[serde(default)]
    pub last_run_at: Option<DateTime<Utc>>,
}

/// File-backed checkpoint, owned by the orchestrator.
#[derive(Debug)]
pub struct CheckpointStore {
    path: PathBuf,
    state: CheckpointState,
}

impl CheckpointStore {
    /// Load the checkpoint at `path`, starting empty if the file is absent.
    ///
    /// Nothing is written until the first mutation.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, CheckpointError> {
        let path = path.into();

        let state = match fs::read_to_string(&path) {
            Ok(content) if content.trim().is_empty() => CheckpointState::default(),
            Ok(content) => {
                serde_json::from_str(&content).map_err(|source| CheckpointError::Parse {
                    path: path.clone(),
                    source,
                })?
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No checkpoint found, starting fresh");
                CheckpointState::default()
            }
            Err(source) => {
                return Err(CheckpointError::Read {
                    path: path.clone(),
                    source,
                });
            }
        };

        Ok(Self { path, state })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> &CheckpointState {
        &self.state
    }

    /// Record for `stream`, if one has been written.
    pub fn record(&self, stream: &str) -> Option<&CheckpointRecord> {
        self.state.streams.get(stream)
    }

    #[must_use]
    pub fn items_collected(&self, stream: &str) -> usize {
        self.record(stream).map_or(0, |r| r.items_collected)
    }

    #[must_use]
    pub fn last_cursor(&self, stream: &str) -> Option<&str> {
        self.record(stream).and_then(|r| r.last_cursor.as_deref())
    }

    #[must_use]
    pub fn is_processed(&self, stream: &str, set: &str, key: &str) -> bool {
        self.record(stream).is_some_and(|r| r.is_processed(set, key))
    }

    fn record_mut(&mut self, stream: &str) -> &mut CheckpointRecord {
        self.state.streams.entry(stream.to_string()).or_default()
    }

    /// Commit one item: bump the counter, move the cursor, persist.
    ///
    /// Returns the new item count.
    pub fn advance(
        &mut self,
        stream: &str,
        cursor: impl Into<String>,
    ) -> Result<usize, CheckpointError> {
        self.advance_with(stream, cursor, None)
    }

    /// Like [`advance`](Self::advance), but also adds the cursor to the
    /// processed set `set` in the same write.
    pub fn advance_with(
        &mut self,
        stream: &str,
        cursor: impl Into<String>,
        set: Option<&str>,
    ) -> Result<usize, CheckpointError> {
        let cursor = cursor.into();
        let record = self.record_mut(stream);
        if let Some(set) = set {
            record
                .processed
                .entry(set.to_string())
                .or_default()
                .insert(cursor.clone());
        }
        record.items_collected += 1;
        record.last_cursor = Some(cursor);
        let count = record.items_collected;
        self.save()?;
        Ok(count)
    }

    /// Add `key` to a processed set and persist.
    ///
    /// Returns `false` (and writes nothing) if the key was already present.
    pub fn mark_processed(
        &mut self,
        stream: &str,
        set: &str,
        key: impl Into<String>,
    ) -> Result<bool, CheckpointError> {
        let inserted = self
            .record_mut(stream)
            .processed
            .entry(set.to_string())
            .or_default()
            .insert(key.into());
        if inserted {
            self.save()?;
        }
        Ok(inserted)
    }

    /// Forget progress for one stream, or for all of them.
    pub fn reset(&mut self, stream: Option<&str>) -> Result<(), CheckpointError> {
        match stream {
            Some(stream) => {
                self.state.streams.remove(stream);
            }
            None => self.state.streams.clear(),
        }
        self.save()
    }

    /// Stamp `last_run_at` and replace the file with the in-memory state.
    pub fn save(&mut self) -> Result<(), CheckpointError> {
        self.state.last_run_at = Some(Utc::now());
        write_atomic(&self.path, &self.state).map_err(|source| CheckpointError::Write {
            path: self.path.clone(),
            source,
        })
    }
}

fn write_atomic(path: &Path, state: &CheckpointState) -> io::Result<()> {
    let mut bytes = serde_json::to_vec_pretty(state).map_err(io::Error::other)?;
    bytes.push(b'\n');

    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(&bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_file_starts_empty_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");

        let store = CheckpointStore::load(&path).expect("load");

        assert_eq!(store.items_collected("commits"), 0);
        assert_eq!(store.last_cursor("commits"), None);
        assert!(store.state().last_run_at.is_none());
        assert!(!path.exists());
    }

    #[test]
    fn advance_persists_count_and_cursor() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("checkpoint.json");

        let mut store = CheckpointStore::load(&path).unwrap();
        assert_eq!(store.advance("commits", "aaa").unwrap(), 1);
        assert_eq!(store.advance("commits", "bbb").unwrap(), 2);

        let reloaded = CheckpointStore::load(&path).unwrap();
        assert_eq!(reloaded.items_collected("commits"), 2);
        assert_eq!(reloaded.last_cursor("commits"), Some("bbb"));
        assert!(reloaded.state().last_run_at.is_some());
        assert_eq!(reloaded.items_collected("pull_requests"), 0);
    }

    #[test]
    fn processed_sets_deduplicate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");

        let mut store = CheckpointStore::load(&path).unwrap();
        assert!(store.mark_processed("developers", "developers", "octocat").unwrap());
        assert!(!store.mark_processed("developers", "developers", "octocat").unwrap());
        assert!(store.mark_processed("developers", "following", "octocat").unwrap());

        let reloaded = CheckpointStore::load(&path).unwrap();
        let record = reloaded.record("developers").expect("record");
        assert_eq!(record.processed["developers"].len(), 1);
        assert!(reloaded.is_processed("developers", "following", "octocat"));
        assert!(!reloaded.is_processed("developers", "following", "hubot"));
    }

    #[test]
    fn advance_with_commits_count_and_set_in_one_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");

        let mut store = CheckpointStore::load(&path).unwrap();
        assert_eq!(
            store.advance_with("pull_requests", "42", Some("pull_requests")).unwrap(),
            1
        );

        let reloaded = CheckpointStore::load(&path).unwrap();
        assert_eq!(reloaded.items_collected("pull_requests"), 1);
        assert_eq!(reloaded.last_cursor("pull_requests"), Some("42"));
        assert!(reloaded.is_processed("pull_requests", "pull_requests", "42"));

        // Without a set only the counter and cursor move.
        store.advance_with("pull_requests", "43", None).unwrap();
        let reloaded = CheckpointStore::load(&path).unwrap();
        assert_eq!(reloaded.items_collected("pull_requests"), 2);
        assert!(!reloaded.is_processed("pull_requests", "pull_requests", "43"));
    }

    #[test]
    fn reset_single_stream_keeps_others() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");

        let mut store = CheckpointStore::load(&path).unwrap();
        store.advance("commits", "aaa").unwrap();
        store.advance("pull_requests", "7").unwrap();
        store.reset(Some("commits")).unwrap();

        let reloaded = CheckpointStore::load(&path).unwrap();
        assert_eq!(reloaded.items_collected("commits"), 0);
        assert_eq!(reloaded.items_collected("pull_requests"), 1);

        store.reset(None).unwrap();
        assert!(CheckpointStore::load(&path).unwrap().state().streams.is_empty());
    }

    #[test]
    fn file_format_uses_snake_case_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");

        let mut store = CheckpointStore::load(&path).unwrap();
        store.advance("commits", "abc").unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["streams"]["commits"]["items_collected"], 1);
        assert_eq!(raw["streams"]["commits"]["last_cursor"], "abc");
        assert!(raw["streams"]["commits"].get("processed").is_none());
        assert!(raw["last_run_at"].is_string());
    }

    #[test]
    fn corrupt_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");
        fs::write(&path, "{ not json").unwrap();

        let err = CheckpointStore::load(&path).expect_err("corrupt");
        assert!(matches!(err, CheckpointError::Parse { .. }));
    }

    #[test]
    fn empty_file_loads_as_fresh_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");
        fs::write(&path, "\n").unwrap();

        let store = CheckpointStore::load(&path).unwrap();
        assert!(store.state().streams.is_empty());
    }
}
