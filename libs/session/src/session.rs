//! Interactive shell session
//!
//! A `ShellSession` owns one interactive shell on the remote host and runs
//! commands on it one at a time. Commands starting with `sudo ` trigger a
//! one-off password verification per session, `su ...` and `exit` are handled
//! by prompt automata instead of the end-of-command marker.

use crate::channel::ShellStream;
use crate::command::{Limits, ShellCommand};
use crate::credentials::{AuthMethod, SharedPasswordProvider};
use crate::error::ShellError;
use crate::framer::{AfterVerdict, FrameJob, run_command};
use crate::marker::with_end_marker;
use crate::scanner::{PROMPT_SUCCESS, PassThrough, PromptResponder, ResponseMatcher};
use crate::transport::{SessionTarget, SshTransport, Transport};
use secrecy::SecretString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Time given to a freshly opened shell to print its banner and prompt
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(1);

pub const DEFAULT_SSH_PORT: u16 = 22;

const SUDO_CHECK_COMMAND: &str = "sudo echo OK";
const SUDO_PROMPT: &str = "[sudo] password for ";
const SUDO_SUCCESS_RESPONSE: &str = "OK";

const SWITCH_USER_PROMPT: &str = "Password:";
const SWITCH_USER_FAILURE_RESPONSE: &str = "su:";

const EXIT_RESPONSE: &str = "logout";

enum SessionState {
    Closed,
    Open(ShellStream),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CommandAction {
    Plain,
    SwitchUser,
    Exit,
}

/// How a command line is dispatched, derived from its text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CommandKind {
    sudo: bool,
    action: CommandAction,
}

impl CommandKind {
    fn classify(command_line: &str) -> Self {
        let (sudo, rest) = match command_line.strip_prefix("sudo ") {
            Some(rest) => (true, rest.trim_start()),
            None => (false, command_line),
        };
        let action = if rest.starts_with("su ") {
            CommandAction::SwitchUser
        } else if rest.starts_with("exit") {
            CommandAction::Exit
        } else {
            CommandAction::Plain
        };
        Self { sudo, action }
    }
}

/// A long-lived interactive shell on a remote host
pub struct ShellSession {
    target: SessionTarget,
    auth: AuthMethod,
    sudo_password: Option<SharedPasswordProvider>,
    switch_user_password: Option<SharedPasswordProvider>,
    settle_delay: Duration,
    transport: Box<dyn Transport>,
    state: SessionState,
    sudo_verified: bool,
}

impl ShellSession {
    pub fn builder() -> ShellSessionBuilder {
        ShellSessionBuilder::default()
    }

    pub fn target(&self) -> &SessionTarget {
        &self.target
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, SessionState::Open(_))
    }

    /// Connect, authenticate and open the interactive shell. Does nothing if already open.
    pub async fn connect(&mut self) -> Result<(), ShellError> {
        if self.is_open() {
            debug!(target = %self.target, "Session already open");
            return Ok(());
        }

        info!(target = %self.target, auth = ?self.auth, "Opening shell session");
        if let Err(e) = self.transport.connect(&self.target, &self.auth).await {
            self.transport.close_all().await;
            return Err(e);
        }
        let channel = match self.transport.open_shell().await {
            Ok(channel) => channel,
            Err(e) => {
                self.transport.close_all().await;
                return Err(e);
            }
        };

        let mut stream = ShellStream::new(channel);
        tokio::time::sleep(self.settle_delay).await;
        stream.drain().await;

        self.state = SessionState::Open(stream);
        self.sudo_verified = false;
        info!(target = %self.target, "Ready to accept shell commands");
        Ok(())
    }

    /// Close the shell and the connection. Does nothing if already closed.
    pub async fn close(&mut self) {
        match std::mem::replace(&mut self.state, SessionState::Closed) {
            SessionState::Closed => debug!(target = %self.target, "Session is not open"),
            SessionState::Open(mut stream) => {
                stream.close().await;
                self.transport.close_all().await;
                info!(target = %self.target, "Session closed");
            }
        }
        self.sudo_verified = false;
    }

    /// Run one command and return its exit status.
    ///
    /// `su ...` and `exit` return 0 once the switch (or the return from it) is
    /// confirmed. Timeouts and authentication failures close the session.
    pub async fn exec(&mut self, command: impl Into<ShellCommand>) -> Result<i32, ShellError> {
        let mut command = command.into();
        let command_line = command.command_line().trim().to_string();
        if command_line.is_empty() {
            return Err(ShellError::InvalidCommand(
                "command line must not be empty".to_string(),
            ));
        }
        if !self.is_open() {
            return Err(ShellError::NotConnected);
        }

        let kind = CommandKind::classify(&command_line);
        debug!(command = %command_line, ?kind, "Executing command");

        let result = self.dispatch(kind, &command_line, &mut command).await;
        match &result {
            Ok(status) => debug!(command = %command_line, status, "Status code"),
            Err(e) if e.closes_session() => {
                warn!(command = %command_line, error = %e, "Closing session after failure");
                self.close().await;
            }
            Err(_) => {}
        }
        result
    }

    pub async fn upload(&mut self, local_path: &Path, remote_path: &str) -> Result<(), ShellError> {
        self.stream()?;
        self.transport.upload(local_path, remote_path).await
    }

    pub async fn download(&mut self, remote_path: &str, local_path: &Path) -> Result<(), ShellError> {
        self.stream()?;
        self.transport.download(remote_path, local_path).await
    }

    fn stream(&mut self) -> Result<&mut ShellStream, ShellError> {
        match &mut self.state {
            SessionState::Open(stream) => Ok(stream),
            SessionState::Closed => Err(ShellError::NotConnected),
        }
    }

    async fn dispatch(
        &mut self,
        kind: CommandKind,
        command_line: &str,
        command: &mut ShellCommand,
    ) -> Result<i32, ShellError> {
        let limits = command.limits();

        if kind.sudo && !self.sudo_verified {
            self.verify_sudo(limits).await?;
            self.sudo_verified = true;
        }

        match kind.action {
            CommandAction::SwitchUser => self.switch_user(command_line, limits).await,
            CommandAction::Exit => self.exit_nested_shell(command_line, limits).await,
            CommandAction::Plain => {
                let mut scanner = PassThrough::new(command.echo_to_console(), command.take_output());
                let sent = with_end_marker(command_line);
                run_command(
                    self.stream()?,
                    FrameJob {
                        sent_line: &sent,
                        display_line: command_line,
                        limits,
                        after_verdict: AfterVerdict::AwaitRecord,
                    },
                    &mut scanner,
                )
                .await
            }
        }
    }

    async fn verify_sudo(&mut self, limits: Limits) -> Result<(), ShellError> {
        debug!("Verifying sudo access");
        let mut scanner = PromptResponder::new(
            SUDO_CHECK_COMMAND,
            SUDO_PROMPT,
            self.sudo_password.clone(),
            Some(SUDO_SUCCESS_RESPONSE),
            None,
        );
        let sent = with_end_marker(SUDO_CHECK_COMMAND);
        let status = run_command(
            self.stream()?,
            FrameJob {
                sent_line: &sent,
                display_line: SUDO_CHECK_COMMAND,
                limits,
                after_verdict: AfterVerdict::AwaitRecord,
            },
            &mut scanner,
        )
        .await?;

        if status != PROMPT_SUCCESS {
            return Err(ShellError::Authentication(
                "sudo verification failed, the password was rejected".to_string(),
            ));
        }
        Ok(())
    }

    async fn switch_user(&mut self, command_line: &str, limits: Limits) -> Result<i32, ShellError> {
        let mut scanner = PromptResponder::new(
            command_line,
            SWITCH_USER_PROMPT,
            self.switch_user_password.clone(),
            None,
            Some(SWITCH_USER_FAILURE_RESPONSE),
        );
        // the new shell prints its prompt after the verdict
        let settle_delay = self.settle_delay;
        let status = run_command(
            self.stream()?,
            FrameJob {
                sent_line: command_line,
                display_line: command_line,
                limits,
                after_verdict: AfterVerdict::Settle(settle_delay),
            },
            &mut scanner,
        )
        .await?;

        if status != PROMPT_SUCCESS {
            return Err(ShellError::Authentication(format!(
                "switch user command '{}' failed, authentication failure",
                command_line
            )));
        }
        info!(command = %command_line, "Switched user");
        Ok(PROMPT_SUCCESS)
    }

    async fn exit_nested_shell(
        &mut self,
        command_line: &str,
        limits: Limits,
    ) -> Result<i32, ShellError> {
        let mut scanner = ResponseMatcher::new(EXIT_RESPONSE);
        let settle_delay = self.settle_delay;
        let status = run_command(
            self.stream()?,
            FrameJob {
                sent_line: command_line,
                display_line: command_line,
                limits,
                after_verdict: AfterVerdict::Settle(settle_delay),
            },
            &mut scanner,
        )
        .await?;

        if status != PROMPT_SUCCESS {
            return Err(ShellError::protocol(
                command_line,
                format!("shell did not confirm with '{}'", EXIT_RESPONSE),
            ));
        }
        Ok(PROMPT_SUCCESS)
    }
}

/// Builder for `ShellSession`
pub struct ShellSessionBuilder {
    host: Option<String>,
    port: u16,
    username: Option<String>,
    auth: AuthMethod,
    sudo_password: Option<SharedPasswordProvider>,
    switch_user_password: Option<SharedPasswordProvider>,
    settle_delay: Duration,
    transport: Option<Box<dyn Transport>>,
}

impl Default for ShellSessionBuilder {
    fn default() -> Self {
        Self {
            host: None,
            port: DEFAULT_SSH_PORT,
            username: None,
            auth: AuthMethod::DefaultKey,
            sudo_password: None,
            switch_user_password: None,
            settle_delay: DEFAULT_SETTLE_DELAY,
            transport: None,
        }
    }
}

impl ShellSessionBuilder {
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Log in with a password. Also answers `sudo` prompts unless a sudo provider is set.
    pub fn password(mut self, password: SecretString) -> Self {
        self.auth = AuthMethod::Password(password);
        self
    }

    /// Log in with an in-memory private key
    pub fn private_key(mut self, key: SecretString) -> Self {
        self.auth = AuthMethod::PrivateKey(key);
        self
    }

    pub fn private_key_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.auth = AuthMethod::PrivateKeyFile(path.into());
        self
    }

    pub fn auth(mut self, auth: AuthMethod) -> Self {
        self.auth = auth;
        self
    }

    pub fn sudo_password_provider(mut self, provider: SharedPasswordProvider) -> Self {
        self.sudo_password = Some(provider);
        self
    }

    pub fn switch_user_password_provider(mut self, provider: SharedPasswordProvider) -> Self {
        self.switch_user_password = Some(provider);
        self
    }

    /// Quiet period after opening the shell and after `su` or `exit`, before
    /// leftover output is discarded
    pub fn settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Replace the SSH transport
    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Box::new(transport));
        self
    }

    pub fn build(self) -> Result<ShellSession, ShellError> {
        let host = self
            .host
            .filter(|host| !host.trim().is_empty())
            .ok_or_else(|| ShellError::Config("host is required".to_string()))?;
        let username = self
            .username
            .filter(|username| !username.trim().is_empty())
            .ok_or_else(|| ShellError::Config("username is required".to_string()))?;

        let sudo_password = self.sudo_password.or_else(|| {
            self.auth
                .password()
                .map(|password| Arc::new(password.clone()) as SharedPasswordProvider)
        });

        Ok(ShellSession {
            target: SessionTarget {
                host,
                port: self.port,
                username,
            },
            auth: self.auth,
            sudo_password,
            switch_user_password: self.switch_user_password,
            settle_delay: self.settle_delay,
            transport: self
                .transport
                .unwrap_or_else(|| Box::new(SshTransport::new())),
            state: SessionState::Closed,
            sudo_verified: false,
        })
    }
}
