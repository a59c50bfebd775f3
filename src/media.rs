//! Local media discovery
//!
//! Walks a directory tree and returns the media files worth uploading,
//! identified by their path relative to the directory root.

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A local media file found under a synced directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFile {
    /// Path relative to the synced directory, `/`-separated
    pub key: String,
    /// Absolute (or caller-relative) location on disk
    pub path: PathBuf,
    /// Size when the directory was scanned
    pub size: u64,
}

impl MediaFile {
    /// Base file name, used for the remote display name
    pub fn file_name(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or(&self.key)
    }
}

/// Case-insensitive extension allow-list
#[derive(Debug, Clone)]
pub struct MediaFilter {
    extensions: HashSet<String>,
}

impl MediaFilter {
    pub fn new<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            extensions: extensions
                .into_iter()
                .map(|ext| ext.as_ref().trim_start_matches('.').to_ascii_uppercase())
                .collect(),
        }
    }

    /// Whether the file name carries an accepted extension
    pub fn is_media(&self, file_name: &str) -> bool {
        Path::new(file_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| self.extensions.contains(&ext.to_ascii_uppercase()))
            .unwrap_or(false)
    }

    /// Recursively list media files under `root`, skipping empty files
    ///
    /// Results are sorted by key.
    pub async fn scan(&self, root: &Path) -> Result<Vec<MediaFile>> {
        let mut files = Vec::new();
        let mut pending: Vec<(PathBuf, String)> = vec![(root.to_path_buf(), String::new())];

        while let Some((dir, prefix)) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir)
                .await
                .with_context(|| format!("Failed to read directory: {:?}", dir))?;

            while let Some(entry) = entries
                .next_entry()
                .await
                .with_context(|| format!("Failed to read directory entry in: {:?}", dir))?
            {
                let name = entry.file_name().to_string_lossy().into_owned();
                let key = if prefix.is_empty() {
                    name.clone()
                } else {
                    format!("{}/{}", prefix, name)
                };
                let file_type = entry
                    .file_type()
                    .await
                    .with_context(|| format!("Failed to stat: {:?}", entry.path()))?;

                if file_type.is_dir() {
                    pending.push((entry.path(), key));
                } else if file_type.is_file() && self.is_media(&name) {
                    let size = entry
                        .metadata()
                        .await
                        .with_context(|| format!("Failed to stat: {:?}", entry.path()))?
                        .len();
                    if size == 0 {
                        debug!(file = %key, "zero-length file");
                        continue;
                    }
                    files.push(MediaFile {
                        key,
                        path: entry.path(),
                        size,
                    });
                }
            }
        }

        files.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(files)
    }
}

/// Base names shared by more than one of the given files
pub fn colliding_names(files: &[MediaFile]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut collisions: Vec<String> = files
        .iter()
        .map(MediaFile::file_name)
        .filter(|name| !seen.insert(name.to_string()))
        .map(str::to_string)
        .collect();
    collisions.sort();
    collisions.dedup();
    collisions
}
