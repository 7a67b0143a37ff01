//! Tool binary acquisition.
//!
//! Managed installs live under `<install_dir>/tofu_<version>/<os>_<arch>/`.
//! A platform directory is staged privately and published with a single
//! rename, so readers see either nothing or a complete install.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use reqwest::{Client, StatusCode};
use semver::Version;
use serde::Deserialize;
use tar::Archive;
use thiserror::Error;

use crate::config::EngineConfig;
use crate::defaults::{TOOL_DIR_PREFIX, TOOL_EXECUTABLE};
use crate::version::resolver::{ToolVersion, VersionSelector};

const STAGING_PREFIX: &str = ".staging-";

/// Errors that can occur while acquiring a binary.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("exec: {0:?}: executable file not found in $PATH")]
    NotOnPath(String),

    #[error("{0}")]
    Listing(String),

    #[error("No such version: {0}")]
    NoSuchVersion(String),

    #[error("unable to fetch OpenTofu {version}: {message}")]
    Transfer { version: String, message: String },

    #[error("unable to install OpenTofu {version}: {message}")]
    Install { version: String, message: String },
}

pub type Result<T> = std::result::Result<T, FetchError>;

/// Release naming of an operating system and CPU architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Platform {
    pub os: &'static str,
    pub arch: &'static str,
}

impl Platform {
    pub fn current() -> Self {
        let os = match std::env::consts::OS {
            "macos" => "darwin",
            other => other,
        };
        let arch = match std::env::consts::ARCH {
            "x86_64" => "amd64",
            "aarch64" => "arm64",
            "x86" => "386",
            other => other,
        };
        Self { os, arch }
    }

    /// `<os>_<arch>`, as used in archive names and install paths.
    pub fn dir_name(&self) -> String {
        format!("{}_{}", self.os, self.arch)
    }
}

/// A binary ready to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledBinary {
    /// `None` for a system binary found on PATH
    pub version: Option<Version>,
    pub executable: PathBuf,
}

#[derive(Debug, Deserialize)]
struct ReleaseListing {
    versions: Vec<ReleaseEntry>,
}

#[derive(Debug, Deserialize)]
struct ReleaseEntry {
    id: String,
}

/// Tool binary fetcher.
///
/// Handles PATH lookup, release resolution, downloading and installing.
pub struct ToolFetcher {
    client: Client,
    releases_api_url: String,
    download_base_url: String,
    request_timeout: std::time::Duration,
    platform: Platform,
}

impl ToolFetcher {
    pub fn new(config: &EngineConfig) -> Self {
        let client = Client::builder()
            .timeout(config.download_timeout())
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            releases_api_url: config.releases_api_url.clone(),
            download_base_url: config.download_base_url.trim_end_matches('/').to_string(),
            request_timeout: config.request_timeout(),
            platform: Platform::current(),
        }
    }

    /// Override the platform used for archive names and install paths.
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Ensure the selected binary exists locally and return it.
    pub async fn acquire(&self, selector: &VersionSelector) -> Result<InstalledBinary> {
        match selector {
            VersionSelector::UseSystemBinary => Ok(InstalledBinary {
                version: None,
                executable: lookup_on_path(TOOL_EXECUTABLE)?,
            }),
            VersionSelector::UseManagedBinary {
                version,
                install_dir,
            } => {
                let version = match version {
                    ToolVersion::Latest => self.resolve_latest().await?,
                    ToolVersion::Exact(v) => v.clone(),
                };
                self.acquire_version(&version, install_dir).await
            }
        }
    }

    /// Install `version` under `install_dir` unless already present.
    pub async fn acquire_version(
        &self,
        version: &Version,
        install_dir: &Path,
    ) -> Result<InstalledBinary> {
        let install_error = |e: io::Error| FetchError::Install {
            version: version.to_string(),
            message: e.to_string(),
        };

        let install_dir = absolute(install_dir).map_err(install_error)?;
        let executable = binary_path(&install_dir, version, &self.platform);

        let cached = executable.clone();
        let cache_hit = tokio::task::spawn_blocking(move || is_executable(&cached))
            .await
            .unwrap_or(false);
        if cache_hit {
            log::debug!("Using cached OpenTofu {} at {:?}", version, executable);
            return Ok(InstalledBinary {
                version: Some(version.clone()),
                executable,
            });
        }

        tokio::fs::create_dir_all(&install_dir)
            .await
            .map_err(install_error)?;

        let content = self.download_archive(version).await?;

        let platform = self.platform;
        let target_version = version.clone();
        let executable = tokio::task::spawn_blocking(move || {
            extract_and_install(content.as_ref(), &install_dir, &target_version, &platform)
        })
        .await
        .map_err(|e| FetchError::Install {
            version: version.to_string(),
            message: e.to_string(),
        })??;

        log::info!("Installed OpenTofu {} at {:?}", version, executable);
        Ok(InstalledBinary {
            version: Some(version.clone()),
            executable,
        })
    }

    /// Query the release listing for the highest released version.
    ///
    /// Always performs a request; results are not cached.
    pub async fn resolve_latest(&self) -> Result<Version> {
        let response = self
            .client
            .get(&self.releases_api_url)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| FetchError::Listing(format!("failed to fetch release listing: {}", e)))?;

        if !response.status().is_success() {
            return Err(FetchError::Listing(format!(
                "release listing returned {}",
                response.status()
            )));
        }

        let listing = response
            .json::<ReleaseListing>()
            .await
            .map_err(|e| FetchError::Listing(format!("invalid release listing: {}", e)))?;

        let ids: Vec<&str> = listing.versions.iter().map(|v| v.id.as_str()).collect();
        let latest = select_latest(&ids)
            .ok_or_else(|| FetchError::Listing("release listing has no versions".into()))?;

        log::info!("Resolved latest OpenTofu version to {}", latest);
        Ok(latest)
    }

    /// Versions with a complete install for this platform, ascending.
    pub fn installed_versions(&self, install_dir: &Path) -> Vec<Version> {
        let Ok(entries) = fs::read_dir(install_dir) else {
            return Vec::new();
        };

        let prefix = format!("{}_", TOOL_DIR_PREFIX);
        let mut versions: Vec<Version> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().into_string().ok()?;
                Version::parse(name.strip_prefix(&prefix)?).ok()
            })
            .filter(|v| is_executable(&binary_path(install_dir, v, &self.platform)))
            .collect();

        versions.sort();
        versions
    }

    fn archive_url(&self, version: &Version) -> String {
        format!(
            "{}/v{}/{}_{}_{}.tar.gz",
            self.download_base_url,
            version,
            TOOL_DIR_PREFIX,
            version,
            self.platform.dir_name()
        )
    }

    async fn download_archive(
        &self,
        version: &Version,
    ) -> Result<impl AsRef<[u8]> + Send + 'static> {
        let url = self.archive_url(version);
        let transfer_error = |message: String| FetchError::Transfer {
            version: version.to_string(),
            message,
        };

        log::info!("Downloading OpenTofu {} from {}", version, url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| transfer_error(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(FetchError::NoSuchVersion(version.to_string()));
        }
        if !status.is_success() {
            return Err(transfer_error(format!("server returned {}", status)));
        }

        response
            .bytes()
            .await
            .map_err(|e| transfer_error(e.to_string()))
    }
}

/// Find `name` on PATH.
pub fn lookup_on_path(name: &str) -> Result<PathBuf> {
    which::which(name).map_err(|_| FetchError::NotOnPath(name.to_string()))
}

/// Final executable location for a managed install.
pub fn binary_path(install_dir: &Path, version: &Version, platform: &Platform) -> PathBuf {
    install_dir
        .join(format!("{}_{}", TOOL_DIR_PREFIX, version))
        .join(platform.dir_name())
        .join(TOOL_EXECUTABLE)
}

/// Highest stable version among `ids`, or the highest prerelease if no
/// stable version exists. Unparsable ids are skipped.
pub fn select_latest(ids: &[&str]) -> Option<Version> {
    let parsed: Vec<Version> = ids
        .iter()
        .filter_map(|id| Version::parse(id.strip_prefix('v').unwrap_or(id)).ok())
        .collect();

    parsed
        .iter()
        .filter(|v| v.pre.is_empty())
        .max()
        .or_else(|| parsed.iter().max())
        .cloned()
}

fn absolute(path: &Path) -> io::Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

fn is_executable(path: &Path) -> bool {
    let Ok(meta) = fs::metadata(path) else {
        return false;
    };
    if !meta.is_file() {
        return false;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        meta.permissions().mode() & 0o111 != 0
    }

    #[cfg(not(unix))]
    {
        true
    }
}

fn extract_and_install(
    content: &[u8],
    install_dir: &Path,
    version: &Version,
    platform: &Platform,
) -> Result<PathBuf> {
    let install_error = |message: String| FetchError::Install {
        version: version.to_string(),
        message,
    };
    let io_error = |e: io::Error| install_error(e.to_string());

    // Staging lives beside the final location so the publish is a same-filesystem rename.
    let staging = tempfile::Builder::new()
        .prefix(STAGING_PREFIX)
        .tempdir_in(install_dir)
        .map_err(io_error)?;
    let staged_dir = staging.path().join(platform.dir_name());
    fs::create_dir(&staged_dir).map_err(io_error)?;

    let decoder = GzDecoder::new(content);
    let mut archive = Archive::new(decoder);

    for entry in archive.entries().map_err(io_error)? {
        let mut entry = entry.map_err(io_error)?;
        let path = entry.path().map_err(io_error)?.into_owned();

        if path.is_absolute()
            || path
                .components()
                .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
        {
            return Err(install_error(format!(
                "unsafe path in archive: {}",
                path.display()
            )));
        }

        let dest = staged_dir.join(&path);
        let entry_type = entry.header().entry_type();

        if entry_type.is_dir() {
            fs::create_dir_all(&dest).map_err(io_error)?;
            continue;
        }
        if !entry_type.is_file() {
            log::debug!("Skipping non-regular archive entry {}", path.display());
            continue;
        }

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(io_error)?;
        }
        let mut file = fs::File::create(&dest).map_err(io_error)?;
        io::copy(&mut entry, &mut file).map_err(io_error)?;
        file.sync_all().map_err(io_error)?;
    }

    let staged_binary = staged_dir.join(TOOL_EXECUTABLE);
    if !staged_binary.is_file() {
        return Err(install_error(format!(
            "archive did not contain {}",
            TOOL_EXECUTABLE
        )));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&staged_binary, fs::Permissions::from_mode(0o755))
            .map_err(io_error)?;
    }

    let version_dir = install_dir.join(format!("{}_{}", TOOL_DIR_PREFIX, version));
    fs::create_dir_all(&version_dir).map_err(io_error)?;

    let final_dir = version_dir.join(platform.dir_name());
    let final_binary = final_dir.join(TOOL_EXECUTABLE);

    if let Err(e) = fs::rename(&staged_dir, &final_dir) {
        if is_executable(&final_binary) {
            log::debug!(
                "OpenTofu {} was installed concurrently; discarding staged copy",
                version
            );
        } else if final_dir.exists() {
            // Incomplete leftover from an older layout: move it aside, then publish.
            let stale = staging.path().join("stale");
            fs::rename(&final_dir, &stale).map_err(io_error)?;
            fs::rename(&staged_dir, &final_dir).map_err(io_error)?;
        } else {
            return Err(io_error(e));
        }
    }

    Ok(final_binary)
}
