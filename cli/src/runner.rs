//! Runs a batch of commands on one remote shell.

use shellwright_session::{
    ExecOptions, RemoteShell, ShellError, ShellSession, ShellSessionBuilder, SwitchUser,
};
use std::path::Path;
use tracing::{debug, info};

use crate::config::AppConfig;
use crate::credentials::Credentials;

/// Outcome of a batch
#[derive(Debug, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Every command ran, carries the status of the last one
    Completed(i32),
    /// A command exited with a non-zero status, later commands were skipped
    Stopped { command: String, exit_code: i32 },
}

impl BatchOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            BatchOutcome::Completed(exit_code) => *exit_code,
            BatchOutcome::Stopped { exit_code, .. } => *exit_code,
        }
    }
}

/// Build the session for the resolved configuration.
pub fn session_builder(config: &AppConfig, credentials: Credentials) -> ShellSessionBuilder {
    let mut builder = ShellSession::builder()
        .host(&config.host)
        .port(config.port)
        .username(&config.username)
        .settle_delay(config.settle_delay);

    builder = match (credentials.login, config.private_key_path.as_ref()) {
        (Some(password), _) => builder.password(password),
        (None, Some(key_path)) => builder.private_key_file(key_path),
        (None, None) => builder,
    };
    if let Some(provider) = credentials.sudo {
        builder = builder.sudo_password_provider(provider);
    }
    if let Some(provider) = credentials.switch_user {
        builder = builder.switch_user_password_provider(provider);
    }
    builder
}

/// Wrap a session with the sudo and switch-user settings of the configuration.
pub fn remote_shell(config: &AppConfig, session: ShellSession) -> RemoteShell {
    let mut shell = RemoteShell::new(session).login_requires_sudo(config.sudo);
    if let Some(username) = &config.switch_user {
        shell = shell.switch_user(SwitchUser {
            username: username.clone(),
            requires_sudo: config.switch_user_sudo,
        });
    }
    shell
}

/// Collect the commands to run: arguments first, then the script lines.
/// Blank lines and `#` comments in the script are skipped.
pub fn collect_commands(arguments: &[String], script: Option<&str>) -> Vec<String> {
    let mut commands: Vec<String> = arguments
        .iter()
        .map(|command| command.trim().to_string())
        .filter(|command| !command.is_empty())
        .collect();
    if let Some(script) = script {
        commands.extend(
            script
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#'))
                .map(str::to_string),
        );
    }
    commands
}

pub async fn read_script(path: &Path) -> Result<String, String> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|e| format!("Failed to read script {}: {}", path.display(), e))
}

/// Connect, run `commands` in order and always close the session again.
pub async fn run_batch(
    shell: &mut RemoteShell,
    commands: &[String],
    config: &AppConfig,
    quiet: bool,
) -> Result<BatchOutcome, ShellError> {
    let result = run_connected(shell, commands, config, quiet).await;
    shell.disconnect().await;
    result
}

async fn run_connected(
    shell: &mut RemoteShell,
    commands: &[String],
    config: &AppConfig,
    quiet: bool,
) -> Result<BatchOutcome, ShellError> {
    shell.connect().await?;
    info!(host = %config.host, commands = commands.len(), "Running commands");

    let options = ExecOptions {
        capture_output: quiet,
        max_execution_time: Some(config.limits.max_execution_time),
        max_inactivity_time: Some(config.limits.max_inactivity_time),
    };

    let mut last_exit_code = 0;
    for command in commands {
        let result = shell.execute(command, options).await?;
        debug!(command = %command, exit_code = result.exit_code, "Command finished");
        if result.is_failed() {
            return Ok(BatchOutcome::Stopped {
                command: command.clone(),
                exit_code: result.exit_code,
            });
        }
        last_exit_code = result.exit_code;
    }
    Ok(BatchOutcome::Completed(last_exit_code))
}
