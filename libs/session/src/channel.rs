//! Byte channel to the remote interactive shell

use crate::error::ShellError;
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Quiet window after which a drain considers the channel empty
const DRAIN_WINDOW: Duration = Duration::from_millis(10);

/// Upper bound of one drain, a shell that never goes quiet must not stall the caller
const DRAIN_DEADLINE: Duration = Duration::from_millis(100);

/// Duplex byte stream bound to a remote interactive shell
#[async_trait]
pub trait ByteChannel: Send {
    async fn write(&mut self, data: &[u8]) -> Result<(), ShellError>;

    /// Wait for the next chunk sent by the shell. `None` once the stream has ended.
    ///
    /// Must be cancel safe: callers poll it under a timeout.
    async fn read(&mut self) -> Option<Vec<u8>>;

    async fn close(&mut self);
}

/// Result of waiting for a single byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReadOutcome {
    Byte(u8),
    /// Nothing arrived within the poll interval
    Idle,
    Eof,
}

/// Byte-at-a-time reader and line writer on top of a `ByteChannel`
pub(crate) struct ShellStream {
    channel: Box<dyn ByteChannel>,
    pending: VecDeque<u8>,
    ended: bool,
}

impl ShellStream {
    pub(crate) fn new(channel: Box<dyn ByteChannel>) -> Self {
        Self {
            channel,
            pending: VecDeque::new(),
            ended: false,
        }
    }

    pub(crate) async fn send_line(&mut self, line: &str) -> Result<(), ShellError> {
        let mut data = Vec::with_capacity(line.len() + 1);
        data.extend_from_slice(line.as_bytes());
        data.push(b'\n');
        self.channel.write(&data).await
    }

    pub(crate) async fn send_secret(&mut self, secret: &SecretString) -> Result<(), ShellError> {
        let exposed = secret.expose_secret();
        let mut data = Vec::with_capacity(exposed.len() + 1);
        data.extend_from_slice(exposed.as_bytes());
        data.push(b'\n');
        let result = self.channel.write(&data).await;
        data.fill(0);
        result
    }

    /// Number of bytes that can be read without waiting
    #[cfg(test)]
    pub(crate) fn available(&self) -> usize {
        self.pending.len()
    }

    /// Next byte from the shell, waiting at most `poll` for one to arrive
    pub(crate) async fn next_byte(&mut self, poll: Duration) -> ReadOutcome {
        if let Some(byte) = self.pending.pop_front() {
            return ReadOutcome::Byte(byte);
        }
        if self.ended {
            return ReadOutcome::Eof;
        }

        match tokio::time::timeout(poll, self.channel.read()).await {
            Ok(Some(chunk)) => {
                self.pending.extend(chunk);
                match self.pending.pop_front() {
                    Some(byte) => ReadOutcome::Byte(byte),
                    None => ReadOutcome::Idle,
                }
            }
            Ok(None) => {
                self.ended = true;
                ReadOutcome::Eof
            }
            Err(_) => ReadOutcome::Idle,
        }
    }

    /// Read and discard everything the shell has sent so far, for at most
    /// `DRAIN_DEADLINE`. Returns the number of discarded bytes.
    pub(crate) async fn drain(&mut self) -> usize {
        let mut discarded = self.pending.len();
        self.pending.clear();

        let deadline = Instant::now() + DRAIN_DEADLINE;
        while !self.ended {
            let window = deadline
                .saturating_duration_since(Instant::now())
                .min(DRAIN_WINDOW);
            if window.is_zero() {
                debug!(discarded, "Shell kept sending output, drain cut short");
                break;
            }
            match tokio::time::timeout(window, self.channel.read()).await {
                Ok(Some(chunk)) => discarded += chunk.len(),
                Ok(None) => self.ended = true,
                Err(_) => break,
            }
        }

        if discarded > 0 {
            trace!(discarded, "Drained leftover shell output");
        }
        discarded
    }

    pub(crate) async fn close(&mut self) {
        self.pending.clear();
        self.channel.close().await;
        self.ended = true;
    }
}
