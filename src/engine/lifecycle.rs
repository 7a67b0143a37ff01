//! Engine session lifecycle.
//!
//! Provides the `ToolEngine` which implements the three protocol calls:
//! - Initialize: resolve and acquire the tool binary
//! - Run: execute the binary and stream its output
//! - Shutdown: end the session
//!
//! Each call answers on its own response stream. Session state is guarded
//! by a short-lived lock that is never held across a suspension point.

use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::defaults::{ABNORMAL_EXIT_CODE, TOOL_DISPLAY_NAME, TOOL_EXECUTABLE};
use crate::engine::fetch::{lookup_on_path, InstalledBinary, ToolFetcher};
use crate::engine::runner::{ProcessRunner, RunOutcome};
use crate::error::{Error, Result};
use crate::protocol::messages::{InitRequest, RunRequest, StreamMessage};
use crate::protocol::stream::{response_channel, ResponseSender, ResponseStream};
use crate::version::metadata::Metadata;
use crate::version::resolver::{VersionResolver, VersionSelector};

/// Lifecycle phase of an engine session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnginePhase {
    Uninitialized,
    Initialized,
    ShuttingDown,
    Terminated,
}

impl fmt::Display for EnginePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::Initialized => "initialized",
            Self::ShuttingDown => "shutting down",
            Self::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
struct Session {
    phase: EnginePhase,
    selector: Option<VersionSelector>,
    binary: Option<InstalledBinary>,
    /// Error text of the last failed Initialize
    init_failure: Option<String>,
}

impl Session {
    fn new() -> Self {
        Self {
            phase: EnginePhase::Uninitialized,
            selector: None,
            binary: None,
            init_failure: None,
        }
    }
}

enum RunTarget {
    Resolved(PathBuf),
    /// No Initialize yet: look the command up on PATH
    Fallback,
    Rejected(String),
}

struct EngineInner {
    config: EngineConfig,
    resolver: VersionResolver,
    fetcher: ToolFetcher,
    runner: ProcessRunner,
    session: RwLock<Session>,
}

/// The execution engine behind the Initialize/Run/Shutdown protocol.
///
/// Cheap to clone; clones share one session. The streaming entry points
/// (`initialize`, `run`, `shutdown`) spawn onto the current tokio runtime.
#[derive(Clone)]
pub struct ToolEngine {
    inner: Arc<EngineInner>,
}

impl ToolEngine {
    pub fn new(config: EngineConfig) -> Self {
        let fetcher = ToolFetcher::new(&config);
        Self::with_fetcher(config, fetcher)
    }

    /// Create with a preconfigured fetcher.
    pub fn with_fetcher(config: EngineConfig, fetcher: ToolFetcher) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                resolver: VersionResolver::new(config.install_dir.clone()),
                runner: ProcessRunner::new(&config),
                fetcher,
                config,
                session: RwLock::new(Session::new()),
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn phase(&self) -> EnginePhase {
        self.session().phase
    }

    /// Selector chosen by the last successful Initialize.
    pub fn selector(&self) -> Option<VersionSelector> {
        self.session().selector.clone()
    }

    /// Executable acquired by the last successful Initialize.
    pub fn executable(&self) -> Option<PathBuf> {
        self.session()
            .binary
            .as_ref()
            .map(|b| b.executable.clone())
    }

    /// Initialize call: `Log` lines, plus `ExitResult{1}` on failure.
    pub fn initialize(&self, request: InitRequest) -> ResponseStream {
        let (sink, stream) = response_channel(self.inner.config.channel_capacity);
        let engine = self.clone();
        tokio::spawn(async move { engine.initialize_into(request, &sink).await });
        stream
    }

    /// Run call: `Output` chunks then exactly one `ExitResult`.
    pub fn run(&self, request: RunRequest) -> ResponseStream {
        let (sink, stream) = response_channel(self.inner.config.channel_capacity);
        let engine = self.clone();
        tokio::spawn(async move { engine.run_into(request, &sink).await });
        stream
    }

    /// Shutdown call: one `Log` line then `ExitResult{0}`.
    pub fn shutdown(&self) -> ResponseStream {
        let (sink, stream) = response_channel(self.inner.config.channel_capacity);
        let engine = self.clone();
        tokio::spawn(async move { engine.shutdown_into(&sink).await });
        stream
    }

    /// Initialize, writing responses to a caller-provided sink.
    pub async fn initialize_into(&self, request: InitRequest, sink: &ResponseSender) {
        sink.send(StreamMessage::info(format!(
            "{} Initialization started",
            TOOL_DISPLAY_NAME
        )))
        .await;

        let phase = self.phase();
        if is_closing(phase) {
            let err = Error::InvalidState(phase);
            log::warn!("Rejecting Initialize: {}", err);
            fail_initialize(sink, err.to_string()).await;
            return;
        }

        let prepared = self.prepare(&request.metadata).await;

        // Shutdown may have completed while the binary was being acquired.
        let installed = {
            let mut session = self.session_mut();
            match prepared {
                _ if is_closing(session.phase) => Err(Error::InvalidState(session.phase)),
                Ok((selector, binary)) => {
                    log::info!("{} ready at {:?}", TOOL_DISPLAY_NAME, binary.executable);
                    session.phase = EnginePhase::Initialized;
                    session.selector = Some(selector);
                    session.binary = Some(binary);
                    session.init_failure = None;
                    Ok(())
                }
                Err(err) => {
                    log::error!("{} initialization failed: {}", TOOL_DISPLAY_NAME, err);
                    // The previous binary must not outlive a failed Initialize.
                    session.phase = EnginePhase::Uninitialized;
                    session.selector = None;
                    session.binary = None;
                    session.init_failure = Some(err.to_string());
                    Err(err)
                }
            }
        };

        match installed {
            Ok(()) => {
                sink.send(StreamMessage::info(format!(
                    "{} Initialization completed",
                    TOOL_DISPLAY_NAME
                )))
                .await;
            }
            Err(err) => fail_initialize(sink, err.to_string()).await,
        }
    }

    /// Run, writing responses to a caller-provided sink.
    pub async fn run_into(&self, request: RunRequest, sink: &ResponseSender) -> RunOutcome {
        let executable = match self.run_target() {
            RunTarget::Resolved(path) => path,
            RunTarget::Fallback => {
                let name = if request.command.trim().is_empty() {
                    TOOL_EXECUTABLE
                } else {
                    request.command.as_str()
                };
                match lookup_on_path(name) {
                    Ok(path) => path,
                    Err(e) => return reject(sink, Error::from(e).to_string()).await,
                }
            }
            RunTarget::Rejected(reason) => return reject(sink, reason).await,
        };

        log::debug!("Run {:?} {:?}", executable, request.args);
        self.inner.runner.run(&executable, &request, sink).await
    }

    /// Shutdown, writing responses to a caller-provided sink.
    pub async fn shutdown_into(&self, sink: &ResponseSender) {
        self.session_mut().phase = EnginePhase::ShuttingDown;
        log::info!("{} engine shutting down", TOOL_DISPLAY_NAME);

        {
            let mut session = self.session_mut();
            session.phase = EnginePhase::Terminated;
            session.binary = None;
        }

        sink.send(StreamMessage::info(format!(
            "{} Shutdown completed",
            TOOL_DISPLAY_NAME
        )))
        .await;
        sink.send(StreamMessage::exit(0)).await;
    }

    async fn prepare(&self, metadata: &Metadata) -> Result<(VersionSelector, InstalledBinary)> {
        let selector = self.inner.resolver.resolve(metadata)?;
        log::debug!("Resolved selector {:?}", selector);

        let binary = self.inner.fetcher.acquire(&selector).await?;
        Ok((selector, binary))
    }

    fn run_target(&self) -> RunTarget {
        let session = self.session();
        match session.phase {
            EnginePhase::Initialized => match &session.binary {
                Some(binary) => RunTarget::Resolved(binary.executable.clone()),
                None => RunTarget::Rejected(Error::InvalidState(session.phase).to_string()),
            },
            EnginePhase::Uninitialized => match &session.init_failure {
                Some(failure) => {
                    RunTarget::Rejected(format!("engine initialization failed: {}", failure))
                }
                None => RunTarget::Fallback,
            },
            phase => RunTarget::Rejected(Error::InvalidState(phase).to_string()),
        }
    }

    fn session(&self) -> RwLockReadGuard<'_, Session> {
        self.inner
            .session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn session_mut(&self) -> RwLockWriteGuard<'_, Session> {
        self.inner
            .session
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn is_closing(phase: EnginePhase) -> bool {
    matches!(phase, EnginePhase::ShuttingDown | EnginePhase::Terminated)
}

async fn fail_initialize(sink: &ResponseSender, message: String) {
    sink.send(StreamMessage::error(message)).await;
    sink.send(StreamMessage::exit(ABNORMAL_EXIT_CODE)).await;
}

async fn reject(sink: &ResponseSender, reason: String) -> RunOutcome {
    log::warn!("Rejecting Run: {}", reason);
    sink.send(StreamMessage::stderr(format!("{}\n", reason))).await;
    if sink.send(StreamMessage::exit(ABNORMAL_EXIT_CODE)).await {
        RunOutcome::Exited(ABNORMAL_EXIT_CODE)
    } else {
        RunOutcome::Cancelled
    }
}
