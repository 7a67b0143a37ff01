//! Concurrent draining of a child's stdout and stderr.
//!
//! Each pipe gets its own task so a child blocked writing one stream can
//! never stall the other. Chunks are forwarded in read order per channel;
//! the bounded response channel provides backpressure instead of dropping.

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;

use crate::error::Error;
use crate::protocol::messages::{Channel, StreamMessage};
use crate::protocol::stream::ResponseSender;

/// What one drain task observed.
#[derive(Debug, Default)]
pub struct DrainReport {
    pub bytes: u64,
    pub chunks: u64,
    /// The consumer went away before end-of-data
    pub consumer_gone: bool,
    pub error: Option<String>,
}

/// Handles to the two drain tasks of one process.
pub struct OutputDrains {
    stdout: JoinHandle<DrainReport>,
    stderr: JoinHandle<DrainReport>,
}

impl OutputDrains {
    /// Start draining both pipes into `sink`.
    ///
    /// A missing pipe is treated as already at end-of-data.
    pub fn spawn<O, E>(
        stdout: Option<O>,
        stderr: Option<E>,
        sink: ResponseSender,
        chunk_size: usize,
    ) -> Self
    where
        O: AsyncRead + Unpin + Send + 'static,
        E: AsyncRead + Unpin + Send + 'static,
    {
        let chunk_size = chunk_size.max(1);
        let stdout_sink = sink.clone();

        let stdout = tokio::spawn(async move {
            match stdout {
                Some(reader) => drain(reader, Channel::Stdout, stdout_sink, chunk_size).await,
                None => DrainReport::default(),
            }
        });
        let stderr = tokio::spawn(async move {
            match stderr {
                Some(reader) => drain(reader, Channel::Stderr, sink, chunk_size).await,
                None => DrainReport::default(),
            }
        });

        Self { stdout, stderr }
    }

    /// Wait for both pipes to reach end-of-data.
    ///
    /// Must not be called again after it has completed.
    pub async fn join(&mut self) -> (DrainReport, DrainReport) {
        let (stdout, stderr) = tokio::join!(&mut self.stdout, &mut self.stderr);
        (flatten(Channel::Stdout, stdout), flatten(Channel::Stderr, stderr))
    }

    /// Stop forwarding immediately.
    pub fn abort(&self) {
        self.stdout.abort();
        self.stderr.abort();
    }
}

fn flatten(
    channel: Channel,
    joined: Result<DrainReport, tokio::task::JoinError>,
) -> DrainReport {
    joined.unwrap_or_else(|e| DrainReport {
        error: Some(format!("{:?} drain task failed: {}", channel, e)),
        ..Default::default()
    })
}

async fn drain<R>(
    mut reader: R,
    channel: Channel,
    sink: ResponseSender,
    chunk_size: usize,
) -> DrainReport
where
    R: AsyncRead + Unpin,
{
    let mut report = DrainReport::default();
    let mut buf = vec![0u8; chunk_size];

    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let message = StreamMessage::Output {
                    channel,
                    content: buf[..n].to_vec(),
                };
                if !sink.send(message).await {
                    report.consumer_gone = true;
                    break;
                }
                report.bytes += n as u64;
                report.chunks += 1;
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                let err = Error::StreamIo(format!("{:?}: {}", channel, e));
                log::warn!("{}", err);
                report.error = Some(err.to_string());
                break;
            }
        }
    }

    report
}
