//! Version resolution.
//!
//! Turns session metadata into a [`VersionSelector`]. Resolution is pure:
//! nothing here touches the network or the filesystem.

use std::fmt;
use std::path::PathBuf;

use semver::Version;
use serde::{Deserialize, Serialize};

use crate::defaults::{
    META_LEGACY_INSTALL_DIR, META_LEGACY_VERSION, META_TOOL_INSTALL_DIR, META_TOOL_VERSION,
};
use crate::error::{Error, Result};
use crate::version::metadata::Metadata;

const LATEST: &str = "latest";

/// A requested tool version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ToolVersion {
    /// Highest stable release at acquisition time
    Latest,
    Exact(Version),
}

impl ToolVersion {
    /// Parse `latest` or a semantic version with an optional leading `v`.
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        if trimmed.eq_ignore_ascii_case(LATEST) {
            return Ok(Self::Latest);
        }

        let bare = trimmed.strip_prefix('v').unwrap_or(trimmed);
        Version::parse(bare)
            .map(Self::Exact)
            .map_err(|e| Error::InvalidVersion {
                version: input.to_string(),
                reason: e.to_string(),
            })
    }

    pub fn is_latest(&self) -> bool {
        matches!(self, Self::Latest)
    }
}

impl fmt::Display for ToolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Latest => f.write_str(LATEST),
            Self::Exact(v) => write!(f, "{}", v),
        }
    }
}

impl TryFrom<String> for ToolVersion {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<ToolVersion> for String {
    fn from(value: ToolVersion) -> Self {
        value.to_string()
    }
}

/// Which binary a session runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionSelector {
    /// Whatever `tofu` is first on PATH
    UseSystemBinary,
    /// A managed install of `version` under `install_dir`
    UseManagedBinary {
        version: ToolVersion,
        install_dir: PathBuf,
    },
}

/// Resolves metadata into a [`VersionSelector`].
#[derive(Debug, Clone)]
pub struct VersionResolver {
    default_install_dir: PathBuf,
}

impl VersionResolver {
    pub fn new(default_install_dir: impl Into<PathBuf>) -> Self {
        Self {
            default_install_dir: default_install_dir.into(),
        }
    }

    /// Resolve session metadata.
    ///
    /// `tool_version` takes precedence over the legacy `tofu_version` key;
    /// the same holds for the install directory keys.
    pub fn resolve(&self, metadata: &Metadata) -> Result<VersionSelector> {
        let Some(raw) = metadata.first_text(&[META_TOOL_VERSION, META_LEGACY_VERSION])? else {
            return Ok(VersionSelector::UseSystemBinary);
        };

        let version = ToolVersion::parse(&raw)?;

        let install_dir = metadata
            .first_text(&[META_TOOL_INSTALL_DIR, META_LEGACY_INSTALL_DIR])?
            .map(PathBuf::from)
            .unwrap_or_else(|| self.default_install_dir.clone());

        Ok(VersionSelector::UseManagedBinary {
            version,
            install_dir,
        })
    }
}
