//! SSH transport backed by `russh`
//!
//! The session only needs three things from the transport: an authenticated connection,
//! an interactive shell channel with a PTY, and a way to tear everything down again.
//! File transfer rides on an SFTP subsystem channel of the same connection.

use crate::channel::ByteChannel;
use crate::credentials::AuthMethod;
use crate::error::ShellError;
use crate::utils::{canonicalize_key_path, default_key_file};
use async_trait::async_trait;
use russh::client::{self, Handler};
use russh_sftp::client::SftpSession;
use secrecy::ExposeSecret;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(7);
const AUTH_TIMEOUT: Duration = Duration::from_secs(7);
const CHANNEL_TIMEOUT: Duration = Duration::from_secs(9);

const PTY_TERM: &str = "xterm";
const PTY_COLS: u32 = 80;
const PTY_ROWS: u32 = 24;

/// Where to connect and as whom
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTarget {
    pub host: String,
    pub port: u16,
    pub username: String,
}

impl fmt::Display for SessionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.username, self.host, self.port)
    }
}

/// Connection layer consumed by `ShellSession`
#[async_trait]
pub trait Transport: Send {
    /// Connect and authenticate
    async fn connect(&mut self, target: &SessionTarget, auth: &AuthMethod)
    -> Result<(), ShellError>;

    /// Open an interactive shell with a PTY on the connected transport
    async fn open_shell(&mut self) -> Result<Box<dyn ByteChannel>, ShellError>;

    async fn upload(&mut self, local_path: &Path, remote_path: &str) -> Result<(), ShellError>;

    async fn download(&mut self, remote_path: &str, local_path: &Path) -> Result<(), ShellError>;

    /// Close the connection. Never fails.
    async fn close_all(&mut self);
}

struct SshClientHandler;

impl Handler for SshClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh::keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        // Host keys are not verified against known_hosts
        Ok(true)
    }
}

/// `Transport` over a real SSH connection
#[derive(Default)]
pub struct SshTransport {
    handle: Option<client::Handle<SshClientHandler>>,
}

impl SshTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&self) -> Result<&client::Handle<SshClientHandler>, ShellError> {
        self.handle.as_ref().ok_or(ShellError::NotConnected)
    }

    async fn authenticate(
        handle: &mut client::Handle<SshClientHandler>,
        username: &str,
        auth: &AuthMethod,
    ) -> Result<(), ShellError> {
        let auth_result = match auth {
            AuthMethod::Password(password) => {
                debug!("Authenticating with password");
                handle
                    .authenticate_password(username, password.expose_secret())
                    .await
            }
            key_auth => {
                debug!("Authenticating with public key");
                let keypair = match key_auth {
                    AuthMethod::PrivateKey(pem) => {
                        russh::keys::decode_secret_key(pem.expose_secret(), None).map_err(|e| {
                            ShellError::Authentication(format!("Invalid private key: {}", e))
                        })?
                    }
                    AuthMethod::PrivateKeyFile(path) => {
                        let path = canonicalize_key_path(&path.to_string_lossy())?;
                        Self::load_key(&path)?
                    }
                    _ => Self::load_key(&default_key_file()?)?,
                };
                handle
                    .authenticate_publickey(
                        username,
                        russh::keys::PrivateKeyWithHashAlg::new(
                            Arc::new(keypair),
                            Some(russh::keys::HashAlg::Sha256),
                        ),
                    )
                    .await
            }
        }
        .map_err(|e| ShellError::Authentication(e.to_string()))?;

        match auth_result {
            client::AuthResult::Success => Ok(()),
            _ => Err(ShellError::Authentication(format!(
                "{} rejected the credentials",
                username
            ))),
        }
    }

    fn load_key(path: &Path) -> Result<russh::keys::PrivateKey, ShellError> {
        russh::keys::load_secret_key(path, None).map_err(|e| {
            ShellError::Authentication(format!(
                "Failed to load private key from {}: {}",
                path.display(),
                e
            ))
        })
    }

    async fn open_sftp(&self) -> Result<SftpSession, ShellError> {
        let channel = self
            .handle()?
            .channel_open_session()
            .await
            .map_err(|e| ShellError::Transfer(format!("Failed to open SFTP channel: {}", e)))?;

        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|e| ShellError::Transfer(format!("Failed to request SFTP subsystem: {}", e)))?;

        SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| ShellError::Transfer(format!("Failed to create SFTP session: {}", e)))
    }
}

#[async_trait]
impl Transport for SshTransport {
    async fn connect(
        &mut self,
        target: &SessionTarget,
        auth: &AuthMethod,
    ) -> Result<(), ShellError> {
        info!(target = %target, "Connecting");

        let config = client::Config::default();
        let mut handle = tokio::time::timeout(
            CONNECT_TIMEOUT,
            client::connect(
                Arc::new(config),
                (target.host.as_str(), target.port),
                SshClientHandler,
            ),
        )
        .await
        .map_err(|_| ShellError::Connection(format!("Timed out connecting to {}", target)))?
        .map_err(|e| ShellError::Connection(format!("{}: {}", target, e)))?;

        tokio::time::timeout(
            AUTH_TIMEOUT,
            Self::authenticate(&mut handle, &target.username, auth),
        )
        .await
        .map_err(|_| ShellError::Authentication(format!("Timed out authenticating {}", target)))??;

        self.handle = Some(handle);
        Ok(())
    }

    async fn open_shell(&mut self) -> Result<Box<dyn ByteChannel>, ShellError> {
        let handle = self.handle()?;

        let open = async {
            let channel = handle
                .channel_open_session()
                .await
                .map_err(|e| ShellError::Channel(format!("Failed to open channel: {}", e)))?;

            channel
                .request_pty(true, PTY_TERM, PTY_COLS, PTY_ROWS, 0, 0, &[])
                .await
                .map_err(|e| ShellError::Channel(format!("Failed to request PTY: {}", e)))?;

            channel
                .request_shell(true)
                .await
                .map_err(|e| ShellError::Channel(format!("Failed to request shell: {}", e)))?;

            Ok::<_, ShellError>(channel)
        };

        let channel = tokio::time::timeout(CHANNEL_TIMEOUT, open)
            .await
            .map_err(|_| ShellError::Channel("Timed out opening the shell channel".to_string()))??;

        debug!("Shell channel opened");
        Ok(Box::new(RusshChannel {
            channel,
            ended: false,
        }))
    }

    async fn upload(&mut self, local_path: &Path, remote_path: &str) -> Result<(), ShellError> {
        let data = tokio::fs::read(local_path).await?;
        let sftp = self.open_sftp().await?;

        let mut file = sftp.create(remote_path).await.map_err(|e| {
            ShellError::Transfer(format!("Failed to create {}: {}", remote_path, e))
        })?;
        file.write_all(&data).await.map_err(|e| {
            ShellError::Transfer(format!("Failed to write {}: {}", remote_path, e))
        })?;
        file.shutdown().await.map_err(|e| {
            ShellError::Transfer(format!("Failed to close {}: {}", remote_path, e))
        })?;

        debug!(local = %local_path.display(), remote = %remote_path, bytes = data.len(), "Uploaded file");
        Ok(())
    }

    async fn download(&mut self, remote_path: &str, local_path: &Path) -> Result<(), ShellError> {
        let sftp = self.open_sftp().await?;
        let data = sftp
            .read(remote_path)
            .await
            .map_err(|e| ShellError::Transfer(format!("Failed to read {}: {}", remote_path, e)))?;
        tokio::fs::write(local_path, &data).await?;

        debug!(remote = %remote_path, local = %local_path.display(), bytes = data.len(), "Downloaded file");
        Ok(())
    }

    async fn close_all(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle
                .disconnect(russh::Disconnect::ByApplication, "", "en")
                .await;
            debug!("SSH connection closed");
        }
    }
}

/// Interactive shell channel of a russh connection
struct RusshChannel {
    channel: russh::Channel<client::Msg>,
    ended: bool,
}

#[async_trait]
impl ByteChannel for RusshChannel {
    async fn write(&mut self, data: &[u8]) -> Result<(), ShellError> {
        self.channel
            .data(data)
            .await
            .map_err(|e| ShellError::Channel(format!("Failed to write to shell: {}", e)))
    }

    async fn read(&mut self) -> Option<Vec<u8>> {
        if self.ended {
            return None;
        }
        loop {
            match self.channel.wait().await {
                Some(russh::ChannelMsg::Data { data }) => return Some(data.to_vec()),
                Some(russh::ChannelMsg::ExtendedData { data, .. }) => return Some(data.to_vec()),
                Some(russh::ChannelMsg::Eof) | Some(russh::ChannelMsg::Close) | None => {
                    self.ended = true;
                    return None;
                }
                Some(_) => continue,
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.channel.eof().await;
        let _ = self.channel.close().await;
        self.ended = true;
    }
}
