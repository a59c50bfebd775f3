/// Common test utilities and helpers for Nostalgia tests
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use nostalgia::{Album, AlbumService, Config, RemoteMedia};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::TempDir;
use tokio::io::AsyncReadExt;

/// An upload the fake service received
#[derive(Debug, Clone)]
pub struct ReceivedUpload {
    pub media_id: String,
    pub display_name: String,
    pub size: u64,
}

#[derive(Default)]
struct FakeState {
    albums: Vec<Album>,
    album_items: HashMap<String, Vec<String>>,
    uploads: Vec<ReceivedUpload>,
    created_albums: usize,
    next_id: u64,
    fail_search: bool,
    upload_failures: u32,
    append_failures: u32,
}

/// In-memory photo service with failure injection
#[derive(Default)]
pub struct FakeAlbumService {
    state: Mutex<FakeState>,
}

impl FakeAlbumService {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    /// Pre-create an album, returning its id
    pub fn with_album(self, title: &str) -> Self {
        {
            let mut state = self.state();
            state.next_id += 1;
            let id = format!("album-{}", state.next_id);
            state.albums.push(Album {
                id,
                title: title.to_string(),
            });
        }
        self
    }

    pub fn fail_search(&self) {
        self.state().fail_search = true;
    }

    /// Make the next `n` uploads fail
    pub fn fail_next_uploads(&self, n: u32) {
        self.state().upload_failures = n;
    }

    /// Make the next `n` appends fail
    pub fn fail_next_appends(&self, n: u32) {
        self.state().append_failures = n;
    }

    pub fn albums(&self) -> Vec<Album> {
        self.state().albums.clone()
    }

    pub fn created_albums(&self) -> usize {
        self.state().created_albums
    }

    pub fn uploads(&self) -> Vec<ReceivedUpload> {
        self.state().uploads.clone()
    }

    pub fn album_items(&self, album_id: &str) -> Vec<String> {
        self.state()
            .album_items
            .get(album_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn album_id(&self, title: &str) -> Option<String> {
        self.state()
            .albums
            .iter()
            .find(|a| a.title == title)
            .map(|a| a.id.clone())
    }
}

#[async_trait]
impl AlbumService for FakeAlbumService {
    async fn search_album(&self, title: &str) -> Result<Option<Album>> {
        let state = self.state();
        if state.fail_search {
            return Err(anyhow!("album search unavailable"));
        }
        Ok(state.albums.iter().find(|a| a.title == title).cloned())
    }

    async fn create_album(&self, title: &str) -> Result<Album> {
        let mut state = self.state();
        state.next_id += 1;
        state.created_albums += 1;
        let album = Album {
            id: format!("album-{}", state.next_id),
            title: title.to_string(),
        };
        state.albums.push(album.clone());
        Ok(album)
    }

    async fn upload(
        &self,
        mut file: tokio::fs::File,
        size: u64,
        display_name: &str,
    ) -> Result<RemoteMedia> {
        let mut contents = Vec::new();
        file.read_to_end(&mut contents).await?;
        assert_eq!(contents.len() as u64, size, "size must match streamed bytes");

        let mut state = self.state();
        if state.upload_failures > 0 {
            state.upload_failures -= 1;
            return Err(anyhow!("upload throttled"));
        }

        state.next_id += 1;
        let media_id = format!("photo-{}", state.next_id);
        state.uploads.push(ReceivedUpload {
            media_id: media_id.clone(),
            display_name: display_name.to_string(),
            size,
        });
        Ok(RemoteMedia { id: media_id })
    }

    async fn append(&self, album: &Album, media: &RemoteMedia) -> Result<()> {
        let mut state = self.state();
        if state.append_failures > 0 {
            state.append_failures -= 1;
            return Err(anyhow!("append failed"));
        }
        state
            .album_items
            .entry(album.id.clone())
            .or_default()
            .push(media.id.clone());
        Ok(())
    }

    fn provider_name(&self) -> &'static str {
        "fake"
    }
}

/// Source tree builder backed by a temporary directory
pub struct TestSource {
    pub temp_dir: TempDir,
}

impl TestSource {
    pub fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("Failed to create temp dir"),
        }
    }

    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn dir(&self, name: &str) -> PathBuf {
        self.root().join(name)
    }

    /// Write a file of `size` bytes, creating parent directories
    pub fn file(&self, relative: &str, size: usize) -> PathBuf {
        let path = self.root().join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create parent dir");
        }
        std::fs::write(&path, vec![7u8; size]).expect("Failed to write test file");
        path
    }

    /// Parsed contents of a directory's state file
    pub fn state_json(&self, directory: &str) -> serde_json::Value {
        let contents = std::fs::read_to_string(self.dir(directory).join("nostalgia.json"))
            .expect("Failed to read state file");
        serde_json::from_str(&contents).expect("State file is not JSON")
    }
}

/// Default configuration with a short cooldown for fast tests
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.queue.first_cooldown = "10ms".to_string();
    config
}
