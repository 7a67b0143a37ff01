//! Engine configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::defaults;

pub const ENV_INSTALL_DIR: &str = "TOFU_ENGINE_INSTALL_DIR";
pub const ENV_RELEASES_URL: &str = "TOFU_ENGINE_RELEASES_URL";
pub const ENV_DOWNLOAD_URL: &str = "TOFU_ENGINE_DOWNLOAD_URL";

/// Settings shared by every call of one engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Install root used when metadata does not name one
    pub install_dir: PathBuf,
    /// JSON release listing queried to resolve `latest`
    pub releases_api_url: String,
    /// Base URL that release archives are fetched from
    pub download_base_url: String,
    pub request_timeout_secs: u64,
    pub download_timeout_secs: u64,
    pub output_chunk_size: usize,
    pub channel_capacity: usize,
    pub termination_grace_millis: u64,
}

impl EngineConfig {
    /// Defaults with the optional `TOFU_ENGINE_*` environment overrides applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(dir) = non_empty_env(ENV_INSTALL_DIR) {
            config.install_dir = PathBuf::from(dir);
        }
        if let Some(url) = non_empty_env(ENV_RELEASES_URL) {
            config.releases_api_url = url;
        }
        if let Some(url) = non_empty_env(ENV_DOWNLOAD_URL) {
            config.download_base_url = url;
        }

        config
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    pub fn termination_grace(&self) -> Duration {
        Duration::from_millis(self.termination_grace_millis)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            install_dir: default_install_dir(),
            releases_api_url: defaults::RELEASES_API_URL.to_string(),
            download_base_url: defaults::DOWNLOAD_BASE_URL.to_string(),
            request_timeout_secs: defaults::REQUEST_TIMEOUT_SECS,
            download_timeout_secs: defaults::DOWNLOAD_TIMEOUT_SECS,
            output_chunk_size: defaults::OUTPUT_CHUNK_SIZE,
            channel_capacity: defaults::RESPONSE_CHANNEL_CAPACITY,
            termination_grace_millis: defaults::TERMINATION_GRACE_MILLIS,
        }
    }
}

/// Per-user cache location for managed installs.
pub fn default_install_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(defaults::CACHE_DIR_NAME)
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
