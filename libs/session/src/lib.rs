//! Interactive remote shell sessions
//!
//! Runs commands one at a time on a single long-lived SSH shell and recovers
//! each command's output and exit status from the unstructured byte stream.
//!
//! # Architecture
//!
//! - `ShellSession`: session state machine, dispatches plain, `sudo`, `su` and `exit` commands
//! - `framer`: writes a command with its end-of-command marker and decodes the reply
//! - `scanner`: output consumers (pass-through sink, password prompt automaton)
//! - `watchdog`: execution-time and inactivity limits of one command
//! - `Transport`: connection layer, `SshTransport` uses `russh`
//! - `RemoteShell`: convenience helpers on top of a session

mod channel;
mod command;
mod credentials;
mod error;
mod framer;
mod helper;
mod marker;
mod scanner;
mod session;
mod transport;
mod utils;
mod watchdog;

#[cfg(test)]
mod testing;

pub use channel::ByteChannel;
pub use command::{
    CapturedOutput, DEFAULT_MAX_EXECUTION_TIME, DEFAULT_MAX_INACTIVITY_TIME, Limits, OutputSink,
    ShellCommand, ShellCommandBuilder,
};
pub use credentials::{AuthMethod, PasswordProvider, SharedPasswordProvider};
pub use error::{ShellError, TimeoutKind};
pub use helper::{ExecOptions, ExecResult, RemoteShell, SwitchUser};
pub use marker::{
    COMMAND_SUFFIX, GROUP_MARKER, RECORD_MARKER, UNIT_MARKER, end_record, with_end_marker,
    without_end_marker,
};
pub use scanner::{PROMPT_FAILURE, PROMPT_SUCCESS};
pub use session::{DEFAULT_SETTLE_DELAY, DEFAULT_SSH_PORT, ShellSession, ShellSessionBuilder};
pub use transport::{SessionTarget, SshTransport, Transport};
pub use utils::{canonicalize_key_path, default_key_file, friendly_duration};
