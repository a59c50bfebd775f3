//! Remote album service abstraction
//!
//! The sync engine only needs four capabilities from a photo service. Any of
//! them may fail transiently; the upload queue is what retries them.

use anyhow::Result;
use async_trait::async_trait;

/// A remote named collection of media items
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Album {
    pub id: String,
    pub title: String,
}

/// A media item that exists on the remote service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteMedia {
    pub id: String,
}

/// Photo service operations used by the sync engine
#[async_trait]
pub trait AlbumService: Send + Sync {
    /// Find an album by exact title
    async fn search_album(&self, title: &str) -> Result<Option<Album>>;

    /// Create a new album
    async fn create_album(&self, title: &str) -> Result<Album>;

    /// Upload a file's contents under `display_name`
    async fn upload(
        &self,
        file: tokio::fs::File,
        size: u64,
        display_name: &str,
    ) -> Result<RemoteMedia>;

    /// Add an uploaded media item to an album
    async fn append(&self, album: &Album, media: &RemoteMedia) -> Result<()>;

    /// Service name for display/logging
    fn provider_name(&self) -> &'static str;
}
