//! Google Photos Library API client implementing [`AlbumService`]

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

use crate::config::Config;
use crate::remote::{Album, AlbumService, RemoteMedia};

const ALBUM_PAGE_SIZE: u32 = 50;

/// Google Photos Library API client
pub struct GooglePhotosClient {
    client: Client,
    base_url: String,
    access_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AlbumResource {
    id: String,
    #[serde(default)]
    title: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AlbumList {
    #[serde(default)]
    albums: Vec<AlbumResource>,
    next_page_token: Option<String>,
}

#[derive(Debug, Serialize)]
struct CreateAlbumRequest<'a> {
    album: NewAlbum<'a>,
}

#[derive(Debug, Serialize)]
struct NewAlbum<'a> {
    title: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BatchCreateRequest<'a> {
    new_media_items: Vec<NewMediaItem<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NewMediaItem<'a> {
    simple_media_item: SimpleMediaItem<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SimpleMediaItem<'a> {
    upload_token: &'a str,
    file_name: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchCreateResponse {
    #[serde(default)]
    new_media_item_results: Vec<MediaItemResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MediaItemResult {
    media_item: Option<MediaItemResource>,
    status: Option<ItemStatus>,
}

#[derive(Debug, Deserialize)]
struct MediaItemResource {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ItemStatus {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BatchAddRequest<'a> {
    media_item_ids: Vec<&'a str>,
}

impl GooglePhotosClient {
    /// Create a client from configuration; requires an access token
    pub fn new(config: &Config) -> Result<Self> {
        let access_token = config.access_token().ok_or_else(|| {
            anyhow!(
                "No access token found. Please either:\n\
                 1. Set remote.access_token in the configuration file\n\
                 2. Set the NOSTALGIA_ACCESS_TOKEN environment variable"
            )
        })?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.remote.timeout))
            .user_agent(concat!("nostalgia/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        info!("Using photo library API at {}", config.remote.api_base_url);

        Ok(Self {
            client,
            base_url: config.remote.api_base_url.trim_end_matches('/').to_string(),
            access_token,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> Result<Response> {
        let response = request
            .bearer_auth(&self.access_token)
            .send()
            .await
            .with_context(|| format!("Request failed: {}", what))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("{} failed with HTTP {}: {}", what, status, body));
        }

        Ok(response)
    }

    /// Turn an upload token into a library media item
    async fn create_media_item(&self, upload_token: &str, display_name: &str) -> Result<RemoteMedia> {
        let request = BatchCreateRequest {
            new_media_items: vec![NewMediaItem {
                simple_media_item: SimpleMediaItem {
                    upload_token,
                    file_name: display_name,
                },
            }],
        };

        let response: BatchCreateResponse = self
            .send(
                self.client
                    .post(self.url("/v1/mediaItems:batchCreate"))
                    .json(&request),
                "create media item",
            )
            .await?
            .json()
            .await
            .context("Failed to parse media item creation response")?;

        let result = response
            .new_media_item_results
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("Media item creation returned no result"))?;

        match result.media_item {
            Some(item) => Ok(RemoteMedia { id: item.id }),
            None => Err(anyhow!(
                "Media item creation rejected: {}",
                result.status.map(|s| s.message).unwrap_or_default()
            )),
        }
    }
}

#[async_trait]
impl AlbumService for GooglePhotosClient {
    async fn search_album(&self, title: &str) -> Result<Option<Album>> {
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .get(self.url("/v1/albums"))
                .query(&[("pageSize", ALBUM_PAGE_SIZE.to_string())]);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token)]);
            }

            let page: AlbumList = self
                .send(request, "list albums")
                .await?
                .json()
                .await
                .context("Failed to parse album list")?;

            debug!("found {} albums in page", page.albums.len());

            if let Some(album) = page.albums.into_iter().find(|a| a.title == title) {
                return Ok(Some(Album {
                    id: album.id,
                    title: album.title,
                }));
            }

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => return Ok(None),
            }
        }
    }

    async fn create_album(&self, title: &str) -> Result<Album> {
        let request = CreateAlbumRequest {
            album: NewAlbum { title },
        };

        let album: AlbumResource = self
            .send(
                self.client.post(self.url("/v1/albums")).json(&request),
                "create album",
            )
            .await?
            .json()
            .await
            .context("Failed to parse created album")?;

        Ok(Album {
            id: album.id,
            title: album.title,
        })
    }

    async fn upload(
        &self,
        file: tokio::fs::File,
        size: u64,
        display_name: &str,
    ) -> Result<RemoteMedia> {
        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));

        let upload_token = self
            .send(
                self.client
                    .post(self.url("/v1/uploads"))
                    .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                    .header(reqwest::header::CONTENT_LENGTH, size)
                    .header("X-Goog-Upload-Protocol", "raw")
                    .header("X-Goog-Upload-File-Name", display_name)
                    .body(body),
                "upload bytes",
            )
            .await?
            .text()
            .await
            .context("Failed to read upload token")?;

        self.create_media_item(upload_token.trim(), display_name)
            .await
    }

    async fn append(&self, album: &Album, media: &RemoteMedia) -> Result<()> {
        let request = BatchAddRequest {
            media_item_ids: vec![media.id.as_str()],
        };

        self.send(
            self.client
                .post(self.url(&format!("/v1/albums/{}:batchAddMediaItems", album.id)))
                .json(&request),
            "add media item to album",
        )
        .await?;

        Ok(())
    }

    fn provider_name(&self) -> &'static str {
        "Google Photos"
    }
}
