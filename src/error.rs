//! Error types for the engine.

use thiserror::Error;

use crate::engine::lifecycle::EnginePhase;

/// Engine error type.
#[derive(Error, Debug)]
pub enum Error {
    /// `tool_version` metadata is neither `latest` nor a semantic version
    #[error("invalid OpenTofu version {version:?}: {reason}")]
    InvalidVersion { version: String, reason: String },

    /// A recognized metadata key carried a value of the wrong type
    #[error("metadata key {key:?} must hold {expected}, got {found}")]
    InvalidMetadata {
        key: String,
        expected: &'static str,
        found: &'static str,
    },

    /// System binary mode and the executable is not on PATH
    #[error("exec: {0:?}: executable file not found in $PATH")]
    ExecutableNotFound(String),

    /// The release listing could not be reached or understood
    #[error("failed to resolve latest OpenTofu version: {0}")]
    VersionResolution(String),

    /// Archive download or installation failed
    #[error("failed to download OpenTofu: {0}")]
    Download(String),

    /// Child process could not be started
    #[error("failed to start {command}: {message}")]
    ProcessSpawn { command: String, message: String },

    /// Reading child output failed
    #[error("failed to read process output: {0}")]
    StreamIo(String),

    /// Call not valid in the current lifecycle phase
    #[error("engine is {0}")]
    InvalidState(EnginePhase),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<crate::engine::fetch::FetchError> for Error {
    fn from(err: crate::engine::fetch::FetchError) -> Self {
        use crate::engine::fetch::FetchError;

        match err {
            FetchError::NotOnPath(name) => Error::ExecutableNotFound(name),
            FetchError::Listing(message) => Error::VersionResolution(message),
            other => Error::Download(other.to_string()),
        }
    }
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
