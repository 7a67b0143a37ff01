//! Per-call response streams.
//!
//! Every protocol call gets its own bounded channel. The producing side is a
//! cloneable [`ResponseSender`]; the caller holds the [`ResponseStream`] and
//! cancels the call by dropping it.

use tokio::sync::mpsc;

use crate::protocol::messages::{Channel, LogLevel, StreamMessage};

/// Create a connected sender/stream pair.
pub fn response_channel(capacity: usize) -> (ResponseSender, ResponseStream) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (ResponseSender { tx }, ResponseStream { rx })
}

/// Producer half of a response stream.
#[derive(Debug, Clone)]
pub struct ResponseSender {
    tx: mpsc::Sender<StreamMessage>,
}

impl ResponseSender {
    /// Send a message, waiting for buffer space.
    ///
    /// Returns `false` once the consumer has gone away.
    pub async fn send(&self, message: StreamMessage) -> bool {
        self.tx.send(message).await.is_ok()
    }

    /// Resolves when the consumer drops its stream.
    pub async fn closed(&self) {
        self.tx.closed().await
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer half of a response stream.
#[derive(Debug)]
pub struct ResponseStream {
    rx: mpsc::Receiver<StreamMessage>,
}

impl ResponseStream {
    /// Next message, or `None` once the call has finished.
    pub async fn recv(&mut self) -> Option<StreamMessage> {
        self.rx.recv().await
    }

    /// Drain the stream to completion.
    pub async fn collect(mut self) -> Transcript {
        let mut messages = Vec::new();
        while let Some(message) = self.rx.recv().await {
            messages.push(message);
        }
        Transcript { messages }
    }
}

/// All messages of a finished call, with accessors for the common views.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    pub messages: Vec<StreamMessage>,
}

impl Transcript {
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Concatenated bytes of one output channel.
    pub fn output(&self, channel: Channel) -> Vec<u8> {
        let mut out = Vec::new();
        for message in &self.messages {
            if let StreamMessage::Output { channel: c, content } = message {
                if *c == channel {
                    out.extend_from_slice(content);
                }
            }
        }
        out
    }

    pub fn stdout(&self) -> String {
        String::from_utf8_lossy(&self.output(Channel::Stdout)).into_owned()
    }

    pub fn stderr(&self) -> String {
        String::from_utf8_lossy(&self.output(Channel::Stderr)).into_owned()
    }

    /// Log lines at or above `level`.
    pub fn logs(&self, level: LogLevel) -> Vec<&str> {
        self.messages
            .iter()
            .filter_map(|m| match m {
                StreamMessage::Log { level: l, content } if *l >= level => {
                    Some(content.as_str())
                }
                _ => None,
            })
            .collect()
    }

    /// Code of the terminal `ExitResult`, if the call produced one.
    pub fn exit_code(&self) -> Option<i32> {
        self.messages.last().and_then(StreamMessage::exit_code)
    }
}
