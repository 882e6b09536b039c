//! Command framing over the interactive shell stream
//!
//! A command is sent as one line. The shell first echoes that line back, then
//! prints the command output, then (for marked commands) the end-of-command
//! record `GS RS <exit code> US`. `FrameDecoder` turns that byte stream into
//! events; `run_command` drives the decoder, the output scanner and the
//! watchdogs until the command is complete.

use crate::channel::{ReadOutcome, ShellStream};
use crate::command::Limits;
use crate::error::ShellError;
use crate::marker::{CR, GROUP_MARKER, LF, RECORD_MARKER, UNIT_MARKER};
use crate::scanner::{OutputScanner, PROMPT_FAILURE, PROMPT_SUCCESS, ScanStep};
use crate::watchdog::WatchdogPair;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, trace};

/// How long the read loop waits for a byte before re-checking the watchdogs
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Pause between a watchdog firing and the session being closed
const TIMEOUT_GRACE: Duration = Duration::from_millis(10);

#[derive(Debug, Error, PartialEq, Eq)]
pub(crate) enum FrameError {
    #[error("invalid end-of-command record, it does not contain an exit code")]
    MissingExitCode,

    #[error("invalid end-of-command record, not a valid exit code: {0}")]
    InvalidExitCode(String),
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Frame {
    /// Byte consumed by the framing itself
    Skip,
    /// The shell's echo of the command line is complete; carries the local echo
    Echo(String),
    Output(u8),
    /// A withheld group marker turned out to be real output, followed by this byte
    Released(u8),
    Exit(i32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineStart {
    Pending,
    SawCr,
    Done,
}

/// Byte-level state machine of one command's output
pub(crate) struct FrameDecoder {
    echo_len: usize,
    local_echo: Option<String>,
    received: usize,
    line_start: LineStart,
    group_received: bool,
    exit_digits: Option<Vec<u8>>,
}

impl FrameDecoder {
    /// `sent_line` is exactly what was written to the shell (without the newline),
    /// `display_line` is what the local echo shows
    pub(crate) fn new(sent_line: &str, display_line: &str) -> Self {
        Self {
            echo_len: sent_line.len(),
            local_echo: Some(format!("{}\n", display_line)),
            received: 0,
            line_start: LineStart::Pending,
            group_received: false,
            exit_digits: None,
        }
    }

    pub(crate) fn group_received(&self) -> bool {
        self.group_received
    }

    pub(crate) fn feed(&mut self, byte: u8) -> Result<Frame, FrameError> {
        if let Some(digits) = self.exit_digits.as_mut() {
            if byte != UNIT_MARKER {
                digits.push(byte);
                return Ok(Frame::Skip);
            }
            let text = String::from_utf8_lossy(digits).trim().to_string();
            self.exit_digits = None;
            if text.is_empty() {
                return Err(FrameError::MissingExitCode);
            }
            return text
                .parse::<i32>()
                .map(Frame::Exit)
                .map_err(|_| FrameError::InvalidExitCode(text));
        }

        // the shell echoes what was typed; skip it and show our own copy instead
        if self.received < self.echo_len {
            self.received += 1;
            if self.received < self.echo_len {
                return Ok(Frame::Skip);
            }
            return Ok(Frame::Echo(self.local_echo.take().unwrap_or_default()));
        }

        match (self.line_start, byte) {
            (LineStart::Pending, CR) => {
                self.line_start = LineStart::SawCr;
                return Ok(Frame::Skip);
            }
            (LineStart::Pending | LineStart::SawCr, LF) => {
                self.line_start = LineStart::Done;
                return Ok(Frame::Skip);
            }
            _ => self.line_start = LineStart::Done,
        }

        if byte == GROUP_MARKER {
            if self.group_received {
                // the previously withheld marker was ordinary output
                return Ok(Frame::Output(GROUP_MARKER));
            }
            self.group_received = true;
            return Ok(Frame::Skip);
        }

        if self.group_received {
            self.group_received = false;
            if byte == RECORD_MARKER {
                self.exit_digits = Some(Vec::new());
                return Ok(Frame::Skip);
            }
            return Ok(Frame::Released(byte));
        }

        Ok(Frame::Output(byte))
    }
}

/// What to do with the rest of the shell's reply once the scanner decided the outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AfterVerdict {
    /// Keep reading until the command's own end-of-command record, a
    /// successful verdict is confirmed only by a zero exit code
    AwaitRecord,
    /// No record will come, wait this long and discard whatever arrived
    Settle(Duration),
}

/// One command as the framer sees it
pub(crate) struct FrameJob<'a> {
    /// Line written to the shell
    pub(crate) sent_line: &'a str,
    /// Command line used for the local echo and in error messages
    pub(crate) display_line: &'a str,
    pub(crate) limits: Limits,
    pub(crate) after_verdict: AfterVerdict,
}

/// Run one command on the shell and return its status.
///
/// The status is the exit code from the end-of-command record, or the status
/// decided by the scanner. A fired watchdog yields `ShellError::Timeout`; the
/// caller is responsible for closing the session in that case.
pub(crate) async fn run_command(
    stream: &mut ShellStream,
    job: FrameJob<'_>,
    scanner: &mut dyn OutputScanner,
) -> Result<i32, ShellError> {
    stream.drain().await;
    stream.send_line(job.sent_line).await?;
    trace!(command = %job.display_line, "Sent command to remote shell");

    let result = {
        let watchdogs = WatchdogPair::start(job.display_line, job.limits);
        read_until_complete(stream, &job, scanner, &watchdogs).await
    };

    match &result {
        Err(ShellError::Timeout { .. }) => tokio::time::sleep(TIMEOUT_GRACE).await,
        _ => {
            stream.drain().await;
        }
    }
    result
}

async fn read_until_complete(
    stream: &mut ShellStream,
    job: &FrameJob<'_>,
    scanner: &mut dyn OutputScanner,
    watchdogs: &WatchdogPair,
) -> Result<i32, ShellError> {
    let mut decoder = FrameDecoder::new(job.sent_line, job.display_line);
    let mut verdict: Option<i32> = None;

    loop {
        if let Some(trip) = watchdogs.tripped() {
            scanner.on_notice(&trip.message);
            return Err(ShellError::Timeout {
                kind: trip.kind,
                command: job.display_line.to_string(),
                limit: trip.limit,
            });
        }

        let byte = match stream.next_byte(POLL_INTERVAL).await {
            ReadOutcome::Byte(byte) => byte,
            ReadOutcome::Idle => continue,
            ReadOutcome::Eof => {
                debug!(
                    command = %job.display_line,
                    group_received = decoder.group_received(),
                    "Shell stream ended before the command completed"
                );
                return Err(ShellError::protocol(
                    job.display_line,
                    "end-of-command marker not received before the channel closed",
                ));
            }
        };
        watchdogs.touch();

        let frame = decoder
            .feed(byte)
            .map_err(|e| ShellError::protocol(job.display_line, e.to_string()))?;

        if let Some(status) = verdict {
            match frame {
                Frame::Exit(0) => return Ok(status),
                Frame::Exit(exit_code) => {
                    debug!(command = %job.display_line, exit_code, "Command failed after a successful verdict");
                    return Ok(PROMPT_FAILURE);
                }
                _ => continue,
            }
        }

        let step = match frame {
            Frame::Skip => continue,
            Frame::Echo(echo) => {
                scanner.on_echo(&echo)?;
                continue;
            }
            Frame::Exit(exit_code) => {
                scanner.on_echo("\n")?;
                debug!(command = %job.display_line, exit_code, "Command completed");
                return Ok(exit_code);
            }
            Frame::Output(byte) => scanner.on_output(byte)?,
            Frame::Released(byte) => match scanner.on_output(GROUP_MARKER)? {
                ScanStep::Continue => scanner.on_output(byte)?,
                step => step,
            },
        };

        match step {
            ScanStep::Continue => {}
            ScanStep::Respond(secret) => {
                stream.drain().await;
                stream.send_secret(&secret).await?;
                debug!(command = %job.display_line, "Answered password prompt");
            }
            ScanStep::Finish(status) => {
                debug!(command = %job.display_line, status, "Command outcome decided by output");
                match job.after_verdict {
                    AfterVerdict::AwaitRecord if status == PROMPT_SUCCESS => verdict = Some(status),
                    AfterVerdict::AwaitRecord => return Ok(status),
                    AfterVerdict::Settle(delay) => {
                        tokio::time::sleep(delay).await;
                        return Ok(status);
                    }
                }
            }
        }
    }
}
