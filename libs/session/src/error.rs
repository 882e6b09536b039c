//! Shell Session Errors

use crate::utils::friendly_duration;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Which watchdog terminated a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    /// No byte was received for longer than the inactivity limit
    Inactivity,
    /// The command ran longer than the execution limit
    Execution,
}

impl fmt::Display for TimeoutKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeoutKind::Inactivity => write!(f, "inactivity"),
            TimeoutKind::Execution => write!(f, "execution"),
        }
    }
}

/// Errors that can occur while connecting a session or running commands on it
#[derive(Debug, Error)]
pub enum ShellError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Protocol error while running '{command}': {reason}")]
    Protocol { command: String, reason: String },

    #[error("{}", timeout_message(.kind, .command, .limit))]
    Timeout {
        kind: TimeoutKind,
        command: String,
        limit: Duration,
    },

    #[error("Session is not connected. Call `connect` first")]
    NotConnected,

    #[error("Command '{command}' prompted for '{prompt}' but no password provider is configured")]
    MissingCredential { command: String, prompt: String },

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Invalid session configuration: {0}")]
    Config(String),

    #[error("Command '{command}' failed with exit code {exit_code}: {detail}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        detail: String,
    },

    #[error("Transfer error: {0}")]
    Transfer(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ShellError {
    pub(crate) fn protocol(command: &str, reason: impl Into<String>) -> Self {
        ShellError::Protocol {
            command: command.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether this failure leaves the session closed when raised from `exec`
    pub fn closes_session(&self) -> bool {
        matches!(
            self,
            ShellError::Timeout { .. }
                | ShellError::Authentication(_)
                | ShellError::MissingCredential { .. }
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ShellError::Timeout { .. })
    }
}

/// Human readable timeout description, also written to the command output when a watchdog fires
pub(crate) fn timeout_message(kind: &TimeoutKind, command: &str, limit: &Duration) -> String {
    match kind {
        TimeoutKind::Inactivity => format!(
            "Inactivity timeout: command '{}' did not write anything to the console in the last {}",
            command,
            friendly_duration(*limit)
        ),
        TimeoutKind::Execution => format!(
            "Max execution timeout: command '{}' did not complete in {}",
            command,
            friendly_duration(*limit)
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_messages_use_their_own_limit() {
        let inactivity = ShellError::Timeout {
            kind: TimeoutKind::Inactivity,
            command: "sleep 100".to_string(),
            limit: Duration::from_secs(15 * 60),
        };
        assert_eq!(
            inactivity.to_string(),
            "Inactivity timeout: command 'sleep 100' did not write anything to the console in the last 15 minutes"
        );

        let execution = ShellError::Timeout {
            kind: TimeoutKind::Execution,
            command: "sleep 100".to_string(),
            limit: Duration::from_secs(2 * 60 * 60),
        };
        assert_eq!(
            execution.to_string(),
            "Max execution timeout: command 'sleep 100' did not complete in 2 hours"
        );
    }

    #[test]
    fn test_closes_session() {
        assert!(
            ShellError::Timeout {
                kind: TimeoutKind::Execution,
                command: "x".into(),
                limit: Duration::from_secs(1),
            }
            .closes_session()
        );
        assert!(ShellError::Authentication("sudo".into()).closes_session());
        assert!(!ShellError::NotConnected.closes_session());
        assert!(!ShellError::protocol("ls", "marker not received").closes_session());
    }

    #[test]
    fn test_protocol_error_mentions_command() {
        let err = ShellError::protocol("ls -l /tmp", "exit code missing");
        assert!(err.to_string().contains("ls -l /tmp"));
        assert!(err.to_string().contains("exit code missing"));
    }
}
