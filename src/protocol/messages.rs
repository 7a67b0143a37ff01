//! Request and response message types of the engine protocol.
//!
//! Messages derive `serde` so that a transport can put them on the wire
//! without a parallel set of types.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::version::metadata::Metadata;

/// Severity of a log line sent to the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Which child pipe an output chunk was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Stdout,
    Stderr,
}

/// One unit of a response stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamMessage {
    Log { level: LogLevel, content: String },
    Output { channel: Channel, content: Vec<u8> },
    /// Always the final message of a Run or Shutdown response
    ExitResult { code: i32 },
}

impl StreamMessage {
    pub fn log(level: LogLevel, content: impl Into<String>) -> Self {
        Self::Log {
            level,
            content: content.into(),
        }
    }

    pub fn info(content: impl Into<String>) -> Self {
        Self::log(LogLevel::Info, content)
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self::log(LogLevel::Error, content)
    }

    pub fn stdout(content: impl Into<Vec<u8>>) -> Self {
        Self::Output {
            channel: Channel::Stdout,
            content: content.into(),
        }
    }

    pub fn stderr(content: impl Into<Vec<u8>>) -> Self {
        Self::Output {
            channel: Channel::Stderr,
            content: content.into(),
        }
    }

    pub fn exit(code: i32) -> Self {
        Self::ExitResult { code }
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::ExitResult { code } => Some(*code),
            _ => None,
        }
    }

    pub fn is_exit(&self) -> bool {
        matches!(self, Self::ExitResult { .. })
    }
}

/// Initialize call payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InitRequest {
    #[serde(default)]
    pub metadata: Metadata,
}

/// Run call payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunRequest {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Empty means the engine's own working directory
    #[serde(default)]
    pub working_dir: String,
    /// Merged over the inherited environment; overlay wins
    #[serde(default)]
    pub env_vars: HashMap<String, String>,
}

impl RunRequest {
    pub fn new<I, S>(command: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into(),
            args: args.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = dir.into();
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.insert(key.into(), value.into());
        self
    }
}
