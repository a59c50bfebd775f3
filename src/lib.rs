//! Nostalgia - One-Way Media Directory to Photo Album Synchronization
//!
//! Nostalgia uploads every media file below a source root into remote photo
//! albums, one album per immediate subdirectory. Progress is recorded next to
//! the media in a small JSON state file, so repeated runs only upload what is
//! new.
//!
//! ## Core Features
//!
//! - **Resumable**: per-directory state is persisted after every upload
//! - **Concurrent uploads**: bounded parallelism with automatic retry
//! - **Backoff**: sustained failures pause new uploads with a growing cooldown
//!
//! ## Modules
//!
//! - [`config`]: Configuration management and parsing
//! - [`state`]: Per-directory sync state persistence
//! - [`queue`]: Upload queue with retry and cooldown
//! - [`sync`]: Directory orchestration and the top-level driver
//! - [`photos`]: Google Photos Library API client

pub mod config;
pub mod exit;
pub mod media;
pub mod photos;
pub mod queue;
pub mod remote;
pub mod state;
pub mod sync;

pub use config::Config;
pub use exit::ExitStatus;
pub use photos::GooglePhotosClient;
pub use queue::{QueueConfig, QueueStats, UploadJob, UploadQueue};
pub use remote::{Album, AlbumService, RemoteMedia};
pub use state::{AlbumState, AlbumStateStore, SyncRecord};
pub use sync::{DirectoryPlan, DirectorySummary, SyncEngine, SyncSummary};
