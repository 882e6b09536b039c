//! Command descriptor

use std::fmt;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Default maximum execution time of a command (2 hours)
pub const DEFAULT_MAX_EXECUTION_TIME: Duration = Duration::from_secs(120 * 60);

/// Default maximum time a command may stay silent (15 minutes)
pub const DEFAULT_MAX_INACTIVITY_TIME: Duration = Duration::from_secs(15 * 60);

/// Destination for the output of a command
pub type OutputSink = Box<dyn Write + Send>;

/// Time bounds enforced by the watchdogs while a command runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_execution_time: Duration,
    pub max_inactivity_time: Duration,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_execution_time: DEFAULT_MAX_EXECUTION_TIME,
            max_inactivity_time: DEFAULT_MAX_INACTIVITY_TIME,
        }
    }
}

/// One command line to run on a session, together with its output options
///
/// Built fresh for every call and consumed by `ShellSession::exec`.
pub struct ShellCommand {
    command_line: String,
    limits: Limits,
    output: Option<OutputSink>,
    echo_to_console: bool,
}

impl ShellCommand {
    /// Command with default limits that echoes its output to the console
    pub fn new(command_line: impl Into<String>) -> Self {
        Self {
            command_line: command_line.into(),
            limits: Limits::default(),
            output: None,
            echo_to_console: true,
        }
    }

    pub fn builder(command_line: impl Into<String>) -> ShellCommandBuilder {
        ShellCommandBuilder {
            command: Self::new(command_line),
        }
    }

    pub fn command_line(&self) -> &str {
        &self.command_line
    }

    pub fn limits(&self) -> Limits {
        self.limits
    }

    pub fn max_execution_time(&self) -> Duration {
        self.limits.max_execution_time
    }

    pub fn max_inactivity_time(&self) -> Duration {
        self.limits.max_inactivity_time
    }

    pub fn echo_to_console(&self) -> bool {
        self.echo_to_console
    }

    pub(crate) fn take_output(&mut self) -> Option<OutputSink> {
        self.output.take()
    }
}

impl fmt::Debug for ShellCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShellCommand")
            .field("command_line", &self.command_line)
            .field("limits", &self.limits)
            .field("has_output", &self.output.is_some())
            .field("echo_to_console", &self.echo_to_console)
            .finish()
    }
}

impl From<&str> for ShellCommand {
    fn from(command_line: &str) -> Self {
        ShellCommand::new(command_line)
    }
}

impl From<String> for ShellCommand {
    fn from(command_line: String) -> Self {
        ShellCommand::new(command_line)
    }
}

pub struct ShellCommandBuilder {
    command: ShellCommand,
}

impl ShellCommandBuilder {
    /// Maximum time the command may take. When exceeded the whole session is closed.
    pub fn max_execution_time(mut self, limit: Duration) -> Self {
        self.command.limits.max_execution_time = limit;
        self
    }

    /// Maximum time the command may go without writing anything.
    /// Raise it for commands that are silent for a long time.
    pub fn max_inactivity_time(mut self, limit: Duration) -> Self {
        self.command.limits.max_inactivity_time = limit;
        self
    }

    pub fn max_execution_time_ms(self, millis: u64) -> Self {
        self.max_execution_time(Duration::from_millis(millis))
    }

    pub fn max_inactivity_time_ms(self, millis: u64) -> Self {
        self.max_inactivity_time(Duration::from_millis(millis))
    }

    /// Also copy the command output into `sink`
    pub fn output(mut self, sink: impl Write + Send + 'static) -> Self {
        self.command.output = Some(Box::new(sink));
        self
    }

    pub fn echo_to_console(mut self, echo: bool) -> Self {
        self.command.echo_to_console = echo;
        self
    }

    pub fn build(self) -> ShellCommand {
        self.command
    }
}

/// In-memory output sink that can be read back after the command returned
#[derive(Clone, Default)]
pub struct CapturedOutput {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl CapturedOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.buffer
            .lock()
            .map(|buffer| buffer.clone())
            .unwrap_or_default()
    }

    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.bytes()).into_owned()
    }
}

impl Write for CapturedOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut buffer = self
            .buffer
            .lock()
            .map_err(|_| io::Error::other("captured output lock poisoned"))?;
        buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let command = ShellCommand::new("ls -l /tmp");
        assert_eq!(command.command_line(), "ls -l /tmp");
        assert_eq!(command.max_execution_time(), Duration::from_millis(7_200_000));
        assert_eq!(command.max_inactivity_time(), Duration::from_millis(900_000));
        assert!(command.echo_to_console());
    }

    #[test]
    fn test_builder_overrides() {
        let captured = CapturedOutput::new();
        let mut command = ShellCommand::builder("make")
            .max_execution_time_ms(5000)
            .max_inactivity_time(Duration::from_secs(2))
            .output(captured.clone())
            .echo_to_console(false)
            .build();

        assert_eq!(command.max_execution_time(), Duration::from_secs(5));
        assert_eq!(command.max_inactivity_time(), Duration::from_secs(2));
        assert!(!command.echo_to_console());
        assert!(command.take_output().is_some());
        assert!(command.take_output().is_none());
    }

    #[test]
    fn test_captured_output_is_shared_between_clones() {
        let captured = CapturedOutput::new();
        let mut writer = captured.clone();
        writer.write_all(b"hello ").unwrap();
        writer.write_all(b"world").unwrap();
        assert_eq!(captured.to_string_lossy(), "hello world");
    }
}
