use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use crate::status::Submitter;

/// Configuration for the media relay daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Path to the ffmpeg binary used for the transform stage
    pub ffmpeg_bin: PathBuf,
    /// Path to the ffprobe binary used for stream inspection
    pub ffprobe_bin: PathBuf,
    /// Path to the yt-dlp binary used to acquire sources
    pub ytdlp_bin: PathBuf,
    /// Directory the file sink delivers finished payloads into
    pub output_dir: PathBuf,
    /// Directory for progress sockets (defaults to the OS temp dir)
    pub socket_dir: Option<PathBuf>,
    /// Budget for one job, counted from the moment it becomes active
    pub job_timeout_secs: u64,
    /// Upper bound for the metadata probe
    pub probe_timeout_secs: u64,
    /// Size of the stream prefix handed to the metadata probe
    pub max_probe_bytes: u64,
    /// Minimum spacing between user-visible progress updates
    pub progress_update_interval_ms: u64,
    /// Maximum payload size accepted by the sink (0 = unlimited)
    pub max_upload_bytes: u64,
    /// Users allowed to submit requests
    pub allowed_user_ids: Vec<i64>,
    /// Admin users; always allowed
    pub admin_user_ids: Vec<i64>,
    /// Groups allowed to submit requests
    pub allowed_group_ids: Vec<i64>,
    /// Accept direct requests from any user
    pub allow_all_users: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

impl RelayConfig {
    /// Create a default configuration with sensible values
    pub fn default_config() -> Self {
        Self {
            ffmpeg_bin: PathBuf::from("ffmpeg"),
            ffprobe_bin: PathBuf::from("ffprobe"),
            ytdlp_bin: PathBuf::from("yt-dlp"),
            output_dir: PathBuf::from("./relay-out"),
            socket_dir: None,
            job_timeout_secs: 5 * 60,
            probe_timeout_secs: 10,
            max_probe_bytes: 20 * 1024 * 1024, // 20MiB
            progress_update_interval_ms: 1000,
            max_upload_bytes: 0,
            allowed_user_ids: Vec::new(),
            admin_user_ids: Vec::new(),
            allowed_group_ids: Vec::new(),
            allow_all_users: true,
        }
    }

    /// Load configuration from a file, or return defaults if path is None or file doesn't exist
    pub fn load_config(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default_config();

        if let Some(config_path) = path {
            if config_path.exists() {
                let content = std::fs::read_to_string(config_path)
                    .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

                // `.toml` files are TOML, anything else is JSON
                if config_path.extension().and_then(|s| s.to_str()) == Some("toml") {
                    config = toml::from_str(&content)
                        .with_context(|| format!("Failed to parse TOML config: {}", config_path.display()))?;
                } else {
                    config = serde_json::from_str(&content)
                        .with_context(|| format!("Failed to parse JSON config: {}", config_path.display()))?;
                }
            }
        }

        Ok(config)
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn progress_update_interval(&self) -> Duration {
        Duration::from_millis(self.progress_update_interval_ms)
    }

    /// Directory progress sockets are created in
    pub fn socket_dir(&self) -> PathBuf {
        self.socket_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    /// Check whether a submitter may enqueue requests.
    ///
    /// Group requests are checked against the group list only; direct requests
    /// against the user and admin lists, unless `allow_all_users` is set.
    pub fn is_allowed(&self, submitter: &Submitter) -> bool {
        match submitter {
            Submitter::Group { chat_id, .. } => self.allowed_group_ids.contains(chat_id),
            Submitter::User { user_id, .. } => {
                self.allow_all_users
                    || self.allowed_user_ids.contains(user_id)
                    || self.admin_user_ids.contains(user_id)
            }
        }
    }
}
