use anyhow::{Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::media::MediaFilter;

/// Main configuration structure for Nostalgia
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    /// Application name used as the display-name prefix of uploaded files
    #[serde(default = "default_app_name")]
    pub app_name: String,

    /// Reserved file name holding per-directory sync state
    #[serde(default = "default_state_file_name")]
    pub state_file_name: String,

    /// Local media discovery settings
    #[serde(default)]
    pub media: MediaConfig,

    /// Upload queue behavior
    #[serde(default)]
    pub queue: QueueSettings,

    /// Remote photo service settings
    #[serde(default)]
    pub remote: RemoteConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Local media discovery configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MediaConfig {
    /// Accepted file extensions, compared case-insensitively
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
}

/// Upload queue configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct QueueSettings {
    /// Maximum number of uploads running at once
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Consecutive failures tolerated before pausing new uploads
    #[serde(default = "default_max_consecutive_errors")]
    pub max_consecutive_errors: u32,

    /// Length of the first cooldown pause
    #[serde(default = "default_first_cooldown")]
    pub first_cooldown: String, // "10s"

    /// Give up on a file after this many attempts (retry forever when unset)
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

/// Remote photo service configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RemoteConfig {
    /// Base URL of the photo library API
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// OAuth access token (falls back to NOSTALGIA_ACCESS_TOKEN)
    #[serde(default)]
    pub access_token: Option<String>,

    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

/// Logging configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String, // "info"
}

// Default value functions
fn default_app_name() -> String {
    "Nostalgia".to_string()
}
fn default_state_file_name() -> String {
    "nostalgia.json".to_string()
}
fn default_extensions() -> Vec<String> {
    // https://developers.google.com/photos/library/guides/upload-media#file-types-sizes
    [
        "BMP", "GIF", "HEIC", "ICO", "JPG", "PNG", "TIFF", "WEBP", "RAW", "3GP", "3G2", "ASF",
        "AVI", "DIVX", "M2T", "M2TS", "M4V", "MKV", "MMV", "MOD", "MOV", "MP4", "MPG", "MTS",
        "TOD", "WMV",
    ]
    .iter()
    .map(|ext| ext.to_string())
    .collect()
}
fn default_concurrency() -> usize {
    5
}
fn default_max_consecutive_errors() -> u32 {
    10
}
fn default_first_cooldown() -> String {
    "10s".to_string()
}
fn default_api_base_url() -> String {
    "https://photoslibrary.googleapis.com".to_string()
}
fn default_timeout() -> u64 {
    300
}
fn default_log_level() -> String {
    "info".to_string()
}

// Default implementations
impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            extensions: default_extensions(),
        }
    }
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_consecutive_errors: default_max_consecutive_errors(),
            first_cooldown: default_first_cooldown(),
            max_attempts: None,
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            access_token: None,
            timeout: default_timeout(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Parse duration strings like "10s", "5m", "1h" or a raw number of seconds
pub fn parse_duration(duration_str: &str) -> Result<Duration> {
    let duration_str = duration_str.trim().to_lowercase();

    let secs = if let Some(value) = duration_str.strip_suffix("ms") {
        return value
            .parse::<u64>()
            .map(Duration::from_millis)
            .context("Invalid milliseconds value");
    } else if let Some(value) = duration_str.strip_suffix('s') {
        value.parse::<u64>().context("Invalid seconds value")?
    } else if let Some(value) = duration_str.strip_suffix('m') {
        let minutes = value.parse::<u64>().context("Invalid minutes value")?;
        minutes
            .checked_mul(60)
            .ok_or_else(|| anyhow::anyhow!("Duration too large: {}", duration_str))?
    } else if let Some(value) = duration_str.strip_suffix('h') {
        let hours = value.parse::<u64>().context("Invalid hours value")?;
        hours
            .checked_mul(3600)
            .ok_or_else(|| anyhow::anyhow!("Duration too large: {}", duration_str))?
    } else {
        duration_str
            .parse::<u64>()
            .context("Invalid duration format. Use format like '10s', '5m', '1h'")?
    };

    Ok(Duration::from_secs(secs))
}

impl Config {
    /// Load configuration from the default location or create a default config
    pub fn load_or_default() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load(&config_path)
        } else {
            let config = Self::default();

            if let Some(parent) = config_path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
            }

            config.save(&config_path)?;

            tracing::info!("Created default configuration at: {:?}", config_path);
            Ok(config)
        }
    }

    /// Load configuration from a specific file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let mut config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        config.expand_values()?;
        config.validate()?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self).context("Failed to serialize configuration")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;

        Ok(())
    }

    /// Get the default configuration file path (XDG compliant)
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = config_dir().context("Failed to get user config directory")?;

        Ok(config_dir.join("nostalgia").join("config.yml"))
    }

    /// Expand environment variables in values that may reference them
    pub fn expand_values(&mut self) -> Result<()> {
        self.remote.api_base_url = shellexpand::full(&self.remote.api_base_url)
            .context("Failed to expand api_base_url")?
            .into_owned();

        if let Some(token) = &self.remote.access_token {
            self.remote.access_token = Some(
                shellexpand::full(token)
                    .context("Failed to expand access_token")?
                    .into_owned(),
            );
        }

        Ok(())
    }

    /// Reject settings the upload queue cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.queue.concurrency == 0 {
            anyhow::bail!("queue.concurrency must be at least 1");
        }
        if self.queue.max_attempts == Some(0) {
            anyhow::bail!("queue.max_attempts must be at least 1 when set");
        }
        if self.state_file_name.is_empty() {
            anyhow::bail!("state_file_name must not be empty");
        }
        if self.state_file_name.contains(['/', '\\']) {
            anyhow::bail!(
                "state_file_name must be a plain file name: {}",
                self.state_file_name
            );
        }
        if MediaFilter::new(&self.media.extensions).is_media(&self.state_file_name) {
            anyhow::bail!(
                "state_file_name {} has a media extension and would be uploaded",
                self.state_file_name
            );
        }
        self.first_cooldown()?;
        Ok(())
    }

    /// First cooldown pause as a Duration
    pub fn first_cooldown(&self) -> Result<Duration> {
        parse_duration(&self.queue.first_cooldown)
            .with_context(|| format!("Invalid queue.first_cooldown: {}", self.queue.first_cooldown))
    }

    /// Access token from the config file, falling back to the environment
    pub fn access_token(&self) -> Option<String> {
        self.remote
            .access_token
            .clone()
            .filter(|token| !token.is_empty())
            .or_else(|| std::env::var("NOSTALGIA_ACCESS_TOKEN").ok())
            .filter(|token| !token.is_empty())
    }

    /// Display name under which a file is uploaded
    pub fn display_name(&self, file_name: &str) -> String {
        format!("({} App) {}", self.app_name, file_name)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app_name: default_app_name(),
            state_file_name: default_state_file_name(),
            media: MediaConfig::default(),
            queue: QueueSettings::default(),
            remote: RemoteConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}
