//! Subprocess execution with streamed output.

use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::Command;

use crate::config::EngineConfig;
use crate::defaults::{ABNORMAL_EXIT_CODE, SIGNAL_EXIT_BASE};
use crate::engine::multiplex::OutputDrains;
use crate::engine::multiprocess::terminate_child;
use crate::error::Error;
use crate::protocol::messages::{RunRequest, StreamMessage};
use crate::protocol::stream::ResponseSender;

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// `ExitResult` was sent with this code
    Exited(i32),
    /// The consumer dropped the stream; the child was terminated
    Cancelled,
}

/// Runs one executable per call and streams its output.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    chunk_size: usize,
    termination_grace: Duration,
}

impl ProcessRunner {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            chunk_size: config.output_chunk_size,
            termination_grace: config.termination_grace(),
        }
    }

    /// Execute `executable` with the request's arguments, directory and
    /// environment overlay.
    ///
    /// Every path that is not cancelled ends with exactly one `ExitResult`.
    /// Spawn failures are reported on stderr with a nonzero code rather
    /// than as an error.
    pub async fn run(
        &self,
        executable: &Path,
        request: &RunRequest,
        sink: &ResponseSender,
    ) -> RunOutcome {
        let mut command = Command::new(executable);
        command
            .args(&request.args)
            .envs(&request.env_vars)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if !request.working_dir.is_empty() {
            command.current_dir(&request.working_dir);
        }

        log::debug!(
            "Spawning {:?} with {} args in {:?}",
            executable,
            request.args.len(),
            request.working_dir
        );

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                let err = spawn_error(executable, request, &e);
                log::warn!("{}", err);
                return finish(sink, Some(err.to_string()), ABNORMAL_EXIT_CODE).await;
            }
        };
        let pid = child.id().unwrap_or_default();

        let mut drains = OutputDrains::spawn(
            child.stdout.take(),
            child.stderr.take(),
            sink.clone(),
            self.chunk_size,
        );

        let waited = tokio::select! {
            status = child.wait() => status,
            _ = sink.closed() => {
                log::info!("Response stream closed; terminating process {}", pid);
                drains.abort();
                terminate_child(&mut child, self.termination_grace).await;
                return RunOutcome::Cancelled;
            }
        };

        // Output still buffered in the pipes is delivered before the exit result.
        let (stdout, stderr) = tokio::select! {
            reports = drains.join() => reports,
            _ = sink.closed() => {
                drains.abort();
                return RunOutcome::Cancelled;
            }
        };
        for report in [&stdout, &stderr] {
            if let Some(err) = &report.error {
                log::debug!("Process {} output incomplete: {}", pid, err);
            }
        }
        if stdout.consumer_gone || stderr.consumer_gone {
            return RunOutcome::Cancelled;
        }

        let (code, note) = match waited {
            Ok(status) => exit_code(status),
            Err(e) => (
                ABNORMAL_EXIT_CODE,
                Some(Error::StreamIo(format!("failed to wait for process: {}", e)).to_string()),
            ),
        };

        log::debug!(
            "Process {} exited with {} ({} stdout bytes in {} chunks, {} stderr bytes in {} chunks)",
            pid,
            code,
            stdout.bytes,
            stdout.chunks,
            stderr.bytes,
            stderr.chunks
        );
        finish(sink, note, code).await
    }
}

async fn finish(sink: &ResponseSender, note: Option<String>, code: i32) -> RunOutcome {
    if let Some(note) = note {
        if !sink.send(StreamMessage::stderr(format!("{}\n", note))).await {
            return RunOutcome::Cancelled;
        }
    }
    if sink.send(StreamMessage::exit(code)).await {
        RunOutcome::Exited(code)
    } else {
        RunOutcome::Cancelled
    }
}

fn spawn_error(executable: &Path, request: &RunRequest, err: &std::io::Error) -> Error {
    let dir = Path::new(&request.working_dir);
    let message = if !request.working_dir.is_empty() && !dir.is_dir() {
        format!("invalid working directory {:?}: {}", request.working_dir, err)
    } else {
        err.to_string()
    };

    Error::ProcessSpawn {
        command: executable.display().to_string(),
        message,
    }
}

/// Exit code for the orchestrator, plus a note when the status is abnormal.
fn exit_code(status: ExitStatus) -> (i32, Option<String>) {
    if let Some(code) = status.code() {
        return (code, None);
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return (
                SIGNAL_EXIT_BASE + signal,
                Some(format!("process terminated by signal {}", signal)),
            );
        }
    }

    (
        ABNORMAL_EXIT_CODE,
        Some("process ended without an exit status".to_string()),
    )
}
