//! Album State - JSON persistence of per-directory sync progress
//!
//! Each synced directory carries a reserved state file (by default
//! `nostalgia.json`) recording:
//! - The remote album the directory maps to
//! - Every local file already uploaded and appended, keyed by its path
//!   relative to the directory
//!
//! The whole state is rewritten on every change. Writes go to a temporary
//! sibling first and are renamed into place, and writes issued through one
//! [`AlbumStateStore`] never interleave.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

/// Remote identity of one synced file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRecord {
    /// Remote photo identifier
    pub id: String,
}

/// Persisted state of one directory
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlbumState {
    /// Remote album identifier, once resolved
    #[serde(default)]
    pub id: Option<String>,

    /// Local relative path -> remote record
    #[serde(default)]
    pub synced: BTreeMap<String, SyncRecord>,
}

impl AlbumState {
    /// Whether a local relative path has already been synced
    pub fn is_synced(&self, path: &str) -> bool {
        self.synced.contains_key(path)
    }

    fn parse(contents: &str, path: &Path) -> Result<Self> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }

        serde_json::from_str(contents).with_context(|| {
            format!(
                "Sync state file {:?} is malformed; refusing to continue so that already \
                 uploaded files are not uploaded again. Fix or remove the file manually.",
                path
            )
        })
    }
}

/// Shared, write-serialized handle to one directory's [`AlbumState`]
///
/// Mutations update the in-memory state immediately and then flush the
/// latest snapshot to disk. A flush that starts while another is in flight
/// waits for it, so every mutation is eventually persisted.
#[derive(Debug)]
pub struct AlbumStateStore {
    path: PathBuf,
    state: Mutex<AlbumState>,
    write_lock: tokio::sync::Mutex<()>,
}

impl AlbumStateStore {
    /// Load the state file for `directory`, or start empty when it does not exist
    pub async fn load(directory: &Path, file_name: &str) -> Result<Self> {
        let path = directory.join(file_name);
        debug!(path = %path.display(), "loading local album state");

        let state = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => AlbumState::parse(&contents, &path)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => AlbumState::default(),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read sync state file: {:?}", path))
            }
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Location of the state file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Copy of the current in-memory state
    pub fn snapshot(&self) -> AlbumState {
        self.lock_state().clone()
    }

    /// Remote album id currently recorded
    pub fn album_id(&self) -> Option<String> {
        self.lock_state().id.clone()
    }

    /// Whether a local relative path has already been synced
    pub fn is_synced(&self, path: &str) -> bool {
        self.lock_state().is_synced(path)
    }

    /// Number of synced files
    pub fn synced_count(&self) -> usize {
        self.lock_state().synced.len()
    }

    /// Record the resolved remote album and persist
    pub async fn set_album_id(&self, id: &str) -> Result<()> {
        debug!(path = %self.path.display(), "updating album id in local state");
        self.lock_state().id = Some(id.to_string());
        self.flush().await
    }

    /// Record a file as synced and persist
    ///
    /// Must only be called once the remote append has been confirmed.
    pub async fn record_synced(&self, path: &str, remote_id: &str) -> Result<()> {
        debug!(path = %self.path.display(), file = path, "updating synced list in local state");
        self.lock_state().synced.insert(
            path.to_string(),
            SyncRecord {
                id: remote_id.to_string(),
            },
        );
        self.flush().await
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, AlbumState> {
        // The guarded data is plain values, so a poisoned lock is still consistent
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Write the latest state to disk, serialized against concurrent flushes
    async fn flush(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        // Snapshot after acquiring the write lock so the newest state wins
        let contents = serde_json::to_string(&*self.lock_state())
            .context("Failed to serialize sync state")?;

        let temp_file = self.path.with_extension("json.tmp");
        tokio::fs::write(&temp_file, contents)
            .await
            .with_context(|| format!("Failed to write sync state file: {:?}", temp_file))?;

        // Atomic rename
        tokio::fs::rename(&temp_file, &self.path)
            .await
            .with_context(|| format!("Failed to replace sync state file: {:?}", self.path))?;

        Ok(())
    }
}
