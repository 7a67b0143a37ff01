//! tofu-engine - streaming execution engine for OpenTofu.
//!
//! An orchestrator drives the engine through three calls. Initialize picks
//! and installs a tool version, Run executes it and streams output back,
//! and Shutdown ends the session.

pub mod defaults;
pub mod config;
pub mod error;

pub mod engine;
pub mod protocol;
pub mod version;

pub use config::EngineConfig;
pub use error::{Error, Result};

pub use engine::fetch::{binary_path, select_latest, FetchError, InstalledBinary, Platform, ToolFetcher};
pub use engine::lifecycle::{EnginePhase, ToolEngine};
pub use engine::runner::{ProcessRunner, RunOutcome};

pub use protocol::{
    response_channel, Channel, InitRequest, LogLevel, ResponseSender, ResponseStream,
    RunRequest, StreamMessage, Transcript,
};

pub use version::{MetaValue, Metadata, ToolVersion, VersionResolver, VersionSelector};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
