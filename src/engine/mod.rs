//! Engine management for the managed tool.
//!
//! This module provides:
//! - Binary acquisition and installation (`fetch`)
//! - Session lifecycle and protocol handling (`lifecycle`)
//! - Subprocess execution (`runner`) and output draining (`multiplex`)
//! - Child termination (`multiprocess`)

pub mod fetch;
pub mod lifecycle;
pub mod multiplex;
pub mod multiprocess;
pub mod runner;

pub use fetch::{FetchError, InstalledBinary, Platform, ToolFetcher};
pub use lifecycle::{EnginePhase, ToolEngine};
pub use runner::{ProcessRunner, RunOutcome};
