//! Convenience layer over `ShellSession`
//!
//! `RemoteShell` optionally switches to another user right after connecting,
//! prefixes commands with `sudo` when the effective user needs it, and offers a
//! few file helpers that turn a non-zero exit status into an error.

use crate::command::{CapturedOutput, ShellCommand};
use crate::error::ShellError;
use crate::session::ShellSession;
use std::borrow::Cow;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Per-call options of `RemoteShell::execute`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecOptions {
    /// Capture the output instead of echoing it to the console
    pub capture_output: bool,
    pub max_execution_time: Option<Duration>,
    pub max_inactivity_time: Option<Duration>,
}

impl ExecOptions {
    pub fn captured() -> Self {
        Self {
            capture_output: true,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecResult {
    pub exit_code: i32,
    /// Captured output, `None` unless capture was requested
    pub output: Option<String>,
}

impl ExecResult {
    pub fn is_failed(&self) -> bool {
        self.exit_code != 0
    }

    /// Last non-empty line of the captured output, usually the error message of a failed command
    pub fn output_last_line(&self) -> &str {
        self.output
            .as_deref()
            .unwrap_or_default()
            .lines()
            .map(str::trim)
            .rfind(|line| !line.is_empty())
            .unwrap_or_default()
    }
}

/// User to switch to right after connecting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchUser {
    pub username: String,
    /// Commands run as the switched user need `sudo`
    pub requires_sudo: bool,
}

pub struct RemoteShell {
    session: ShellSession,
    login_requires_sudo: bool,
    switch_user: Option<SwitchUser>,
    use_sudo: bool,
}

impl RemoteShell {
    pub fn new(session: ShellSession) -> Self {
        Self {
            session,
            login_requires_sudo: false,
            switch_user: None,
            use_sudo: false,
        }
    }

    /// Commands run as the login user need `sudo`
    pub fn login_requires_sudo(mut self, requires_sudo: bool) -> Self {
        self.login_requires_sudo = requires_sudo;
        self
    }

    pub fn switch_user(mut self, switch_user: SwitchUser) -> Self {
        self.switch_user = Some(switch_user);
        self
    }

    pub fn session(&mut self) -> &mut ShellSession {
        &mut self.session
    }

    pub fn is_open(&self) -> bool {
        self.session.is_open()
    }

    pub async fn connect(&mut self) -> Result<(), ShellError> {
        if self.session.is_open() {
            return Ok(());
        }
        self.session.connect().await?;
        self.use_sudo = self.login_requires_sudo;

        if let Some(switch_user) = self.switch_user.clone() {
            info!(user = %switch_user.username, "Switching user");
            let command = if self.login_requires_sudo {
                format!("sudo su - {}", switch_user.username)
            } else {
                format!("su - {}", switch_user.username)
            };
            self.session.exec(command).await?;
            self.use_sudo = switch_user.requires_sudo;
        }
        Ok(())
    }

    pub async fn disconnect(&mut self) {
        self.session.close().await;
    }

    pub async fn execute(
        &mut self,
        command: &str,
        options: ExecOptions,
    ) -> Result<ExecResult, ShellError> {
        let command_line = self.command_line(command);
        let mut builder = ShellCommand::builder(command_line.as_ref());
        if let Some(limit) = options.max_execution_time {
            builder = builder.max_execution_time(limit);
        }
        if let Some(limit) = options.max_inactivity_time {
            builder = builder.max_inactivity_time(limit);
        }

        let captured = options.capture_output.then(CapturedOutput::new);
        if let Some(sink) = captured.as_ref() {
            builder = builder.output(sink.clone()).echo_to_console(false);
        }

        let exit_code = self.session.exec(builder.build()).await?;
        debug!(command = %command_line, exit_code, "Executed command");
        Ok(ExecResult {
            exit_code,
            output: captured.map(|sink| sink.to_string_lossy()),
        })
    }

    pub async fn upload(&mut self, local_path: &Path, remote_path: &str) -> Result<(), ShellError> {
        self.session.upload(local_path, remote_path).await
    }

    pub async fn download(&mut self, remote_path: &str, local_path: &Path) -> Result<(), ShellError> {
        self.session.download(remote_path, local_path).await
    }

    pub async fn read_file(&mut self, remote_path: &str) -> Result<String, ShellError> {
        let command = format!("cat {}", quote(remote_path)?);
        self.checked_output(&command).await
    }

    pub async fn tail(&mut self, remote_path: &str, lines: usize) -> Result<String, ShellError> {
        let command = format!("tail -n {} {}", lines, quote(remote_path)?);
        self.checked_output(&command).await
    }

    pub async fn grep(&mut self, pattern: &str, remote_path: &str) -> Result<String, ShellError> {
        let command = format!("grep {} {}", quote(pattern)?, quote(remote_path)?);
        self.checked_output(&command).await
    }

    /// Last line of the file matching `pattern`
    pub async fn grep_last(&mut self, pattern: &str, remote_path: &str) -> Result<String, ShellError> {
        let command = format!("tac {} | grep -m 1 {}", quote(remote_path)?, quote(pattern)?);
        self.checked_output(&command).await
    }

    pub async fn create_dir(&mut self, remote_path: &str) -> Result<(), ShellError> {
        let command = format!("mkdir -p {}", quote(remote_path)?);
        self.checked_output(&command).await.map(|_| ())
    }

    pub async fn remove_file(&mut self, remote_path: &str) -> Result<(), ShellError> {
        let command = format!("rm {}", quote(remote_path)?);
        self.checked_output(&command).await.map(|_| ())
    }

    pub async fn remove_dir(&mut self, remote_path: &str, recursive: bool) -> Result<(), ShellError> {
        let command = if recursive {
            format!("rm -rf {}", quote(remote_path)?)
        } else {
            format!("rmdir {}", quote(remote_path)?)
        };
        self.checked_output(&command).await.map(|_| ())
    }

    pub async fn file_exists(&mut self, remote_path: &str) -> Result<bool, ShellError> {
        let command = format!("ls -d {}", quote(remote_path)?);
        let result = self.execute(&command, ExecOptions::captured()).await?;
        if !result.is_failed() {
            return Ok(true);
        }
        if result.output_last_line().contains("No such file or directory") {
            return Ok(false);
        }
        Err(failed(&command, &result))
    }

    /// Create a world-writable scratch directory under `/tmp` and return its path
    pub async fn create_temp_dir(&mut self) -> Result<String, ShellError> {
        let dir = format!(
            "/tmp/remote_session_{}",
            chrono::Local::now().format("%Y%m%d%H%M%S%3f")
        );
        self.create_dir(&dir).await?;
        let command = format!("chmod 777 {}", dir);
        self.checked_output(&command).await?;
        Ok(dir)
    }

    fn command_line<'a>(&self, command: &'a str) -> Cow<'a, str> {
        let command = command.trim();
        if self.use_sudo && !command.starts_with("sudo") {
            Cow::Owned(format!("sudo {}", command))
        } else {
            Cow::Borrowed(command)
        }
    }

    async fn checked_output(&mut self, command: &str) -> Result<String, ShellError> {
        let result = self.execute(command, ExecOptions::captured()).await?;
        if result.is_failed() {
            return Err(failed(command, &result));
        }
        Ok(result.output.unwrap_or_default())
    }
}

fn failed(command: &str, result: &ExecResult) -> ShellError {
    ShellError::CommandFailed {
        command: command.to_string(),
        exit_code: result.exit_code,
        detail: result.output_last_line().to_string(),
    }
}

fn quote(argument: &str) -> Result<Cow<'_, str>, ShellError> {
    shlex::try_quote(argument)
        .map_err(|e| ShellError::InvalidCommand(format!("cannot quote '{}': {}", argument, e)))
}
