//! Sync Engine - Orchestrates one-way directory-to-album synchronization
//!
//! Every immediate subdirectory of the source root maps to one remote album
//! with the same title. Directories are processed one after another; inside
//! a directory, files are uploaded concurrently through the [`UploadQueue`].

use crate::config::Config;
use crate::media::{colliding_names, MediaFile, MediaFilter};
use crate::queue::{QueueConfig, UploadJob, UploadQueue};
use crate::remote::{Album, AlbumService};
use crate::state::AlbumStateStore;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Result of syncing one directory
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectorySummary {
    pub directory: String,
    pub album_id: String,
    /// Files skipped because they were already synced
    pub ignored: usize,
    /// Files uploaded and appended during this run
    pub added: usize,
    pub uploaded_bytes: u64,
    /// Files given up on (only with a configured attempt limit)
    pub abandoned: Vec<String>,
}

/// Results from a complete sync run
#[derive(Debug, Clone)]
pub struct SyncSummary {
    pub directories: Vec<DirectorySummary>,
    pub duration: Duration,
}

impl SyncSummary {
    pub fn ignored(&self) -> usize {
        self.directories.iter().map(|d| d.ignored).sum()
    }

    pub fn added(&self) -> usize {
        self.directories.iter().map(|d| d.added).sum()
    }

    pub fn uploaded_bytes(&self) -> u64 {
        self.directories.iter().map(|d| d.uploaded_bytes).sum()
    }
}

/// What a sync of one directory would do
#[derive(Debug, Clone)]
pub struct DirectoryPlan {
    pub directory: String,
    pub to_upload: Vec<MediaFile>,
    pub ignored: usize,
}

impl DirectoryPlan {
    /// Split scanned files into already-synced and still-to-upload
    pub fn build(directory: &str, files: Vec<MediaFile>, store: &AlbumStateStore) -> Self {
        let mut ignored = 0;
        let mut to_upload = Vec::new();

        for file in files {
            if store.is_synced(&file.key) {
                debug!(file = %file.key, "file already present in album, ignoring");
                ignored += 1;
            } else {
                to_upload.push(file);
            }
        }

        Self {
            directory: directory.to_string(),
            to_upload,
            ignored,
        }
    }

    pub fn pending_bytes(&self) -> u64 {
        self.to_upload.iter().map(|f| f.size).sum()
    }
}

/// Everything an upload job needs, shared by all jobs of one directory
struct UploadContext {
    config: Arc<Config>,
    service: Arc<dyn AlbumService>,
    album: Album,
    store: Arc<AlbumStateStore>,
    added: AtomicUsize,
    uploaded_bytes: AtomicU64,
}

impl UploadContext {
    /// Upload one file, add it to the album, then record it
    ///
    /// Safe to repeat: the state entry is only written after the append is
    /// confirmed, so a failed attempt at worst uploads the file again.
    async fn upload_file(&self, file: &MediaFile) -> Result<()> {
        let size = tokio::fs::metadata(&file.path)
            .await
            .with_context(|| format!("Failed to stat: {:?}", file.path))?
            .len();
        let handle = tokio::fs::File::open(&file.path)
            .await
            .with_context(|| format!("Failed to open: {:?}", file.path))?;

        info!(file = %file.key, size, "uploading new file");
        let media = self
            .service
            .upload(handle, size, &self.config.display_name(file.file_name()))
            .await
            .with_context(|| format!("Failed to upload {}", file.key))?;

        info!(file = %file.key, "adding file to album");
        self.service
            .append(&self.album, &media)
            .await
            .with_context(|| format!("Failed to add {} to album", file.key))?;

        self.store.record_synced(&file.key, &media.id).await?;

        self.added.fetch_add(1, Ordering::SeqCst);
        self.uploaded_bytes.fetch_add(size, Ordering::SeqCst);
        Ok(())
    }
}

/// The main sync engine
#[derive(Clone)]
pub struct SyncEngine {
    config: Arc<Config>,
    service: Arc<dyn AlbumService>,
    source_root: PathBuf,
    filter: MediaFilter,
    queue_config: QueueConfig,
}

impl SyncEngine {
    /// Create a new sync engine for the given source root
    pub fn new(
        config: Config,
        service: Arc<dyn AlbumService>,
        source_root: impl Into<PathBuf>,
    ) -> Result<Self> {
        let queue_config = QueueConfig::from_config(&config)?;
        let filter = MediaFilter::new(&config.media.extensions);

        Ok(Self {
            config: Arc::new(config),
            service,
            source_root: source_root.into(),
            filter,
            queue_config,
        })
    }

    /// Sync every subdirectory of the source root, stopping at the first failure
    pub async fn run(&self) -> Result<SyncSummary> {
        let start_time = Instant::now();

        info!(
            source = %self.source_root.display(),
            provider = self.service.provider_name(),
            "Starting synchronization"
        );

        let directories = list_directories(&self.source_root).await?;
        info!("Found {} directories", directories.len());

        let mut summaries = Vec::with_capacity(directories.len());
        for directory in directories {
            let summary = self
                .sync_directory(&directory)
                .await
                .with_context(|| format!("Failed to sync directory \"{}\"", directory))?;
            summaries.push(summary);
        }

        let summary = SyncSummary {
            directories: summaries,
            duration: start_time.elapsed(),
        };

        info!(
            "Sync completed in {:.2}s: {} added, {} ignored, {} bytes uploaded",
            summary.duration.as_secs_f64(),
            summary.added(),
            summary.ignored(),
            summary.uploaded_bytes()
        );

        Ok(summary)
    }

    /// Sync one subdirectory of the source root into its album
    pub async fn sync_directory(&self, directory: &str) -> Result<DirectorySummary> {
        info!(directory, "syncing directory");
        let directory_path = self.source_root.join(directory);

        // Title lookup only; the album id stored locally is written, not consulted
        let album = self.resolve_album(directory).await?;

        let store = Arc::new(
            AlbumStateStore::load(&directory_path, &self.config.state_file_name).await?,
        );
        store.set_album_id(&album.id).await?;

        let files = self.filter.scan(&directory_path).await?;
        info!(directory, count = files.len(), "found media files in directory");

        let plan = DirectoryPlan::build(directory, files, &store);
        for name in colliding_names(&plan.to_upload) {
            warn!(
                directory,
                file_name = %name,
                "several files share this name and will get the same display name"
            );
        }

        let context = Arc::new(UploadContext {
            config: self.config.clone(),
            service: self.service.clone(),
            album: album.clone(),
            store,
            added: AtomicUsize::new(0),
            uploaded_bytes: AtomicU64::new(0),
        });

        let queue = UploadQueue::new(self.queue_config.clone());
        for file in plan.to_upload {
            let context = context.clone();
            let key = file.key.clone();
            queue.add_job(UploadJob::new(key, move || {
                let context = context.clone();
                let file = file.clone();
                async move { context.upload_file(&file).await }
            }));
        }

        info!(directory, count = queue.len(), "starting uploads");
        let stats = queue.run().await?;

        let summary = DirectorySummary {
            directory: directory.to_string(),
            album_id: album.id,
            ignored: plan.ignored,
            added: context.added.load(Ordering::SeqCst),
            uploaded_bytes: context.uploaded_bytes.load(Ordering::SeqCst),
            abandoned: stats.abandoned,
        };

        info!(
            directory,
            ignored = summary.ignored,
            added = summary.added,
            uploaded_bytes = summary.uploaded_bytes,
            failed_attempts = stats.failed_attempts,
            cooldowns = stats.cooldowns.len(),
            "directory synced"
        );

        Ok(summary)
    }

    /// Find the album titled after the directory, creating it when absent
    async fn resolve_album(&self, title: &str) -> Result<Album> {
        let existing = self
            .service
            .search_album(title)
            .await
            .with_context(|| format!("Failed to search album \"{}\"", title))?;

        match existing {
            Some(album) => {
                info!(album = %album.id, "album already present, using it");
                Ok(album)
            }
            None => {
                info!("album doesn't exist, creating new one");
                self.service
                    .create_album(title)
                    .await
                    .with_context(|| format!("Failed to create album \"{}\"", title))
            }
        }
    }

    /// Preview what a sync would upload, without contacting the remote service
    pub async fn dry_run(config: &Config, source_root: &Path) -> Result<Vec<DirectoryPlan>> {
        info!("Running dry-run sync analysis");

        let filter = MediaFilter::new(&config.media.extensions);
        let mut plans = Vec::new();

        for directory in list_directories(source_root).await? {
            let directory_path = source_root.join(&directory);
            let store = AlbumStateStore::load(&directory_path, &config.state_file_name).await?;
            let files = filter.scan(&directory_path).await?;
            plans.push(DirectoryPlan::build(&directory, files, &store));
        }

        Ok(plans)
    }
}

/// Names of the immediate subdirectories of `root`, sorted
pub async fn list_directories(root: &Path) -> Result<Vec<String>> {
    let mut entries = tokio::fs::read_dir(root)
        .await
        .with_context(|| format!("Failed to read source directory: {:?}", root))?;

    let mut directories = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .with_context(|| format!("Failed to read source directory: {:?}", root))?
    {
        let file_type = entry
            .file_type()
            .await
            .with_context(|| format!("Failed to stat: {:?}", entry.path()))?;
        if file_type.is_dir() {
            directories.push(entry.file_name().to_string_lossy().into_owned());
        }
    }

    directories.sort();
    Ok(directories)
}
