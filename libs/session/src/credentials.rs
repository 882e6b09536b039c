//! Credentials for login and privilege elevation

use secrecy::SecretString;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Produces a secret on demand, e.g. the answer to a `sudo` or `su` password prompt
pub trait PasswordProvider: Send + Sync {
    fn password(&self) -> Option<SecretString>;
}

impl PasswordProvider for SecretString {
    fn password(&self) -> Option<SecretString> {
        Some(self.clone())
    }
}

impl<F> PasswordProvider for F
where
    F: Fn() -> Option<SecretString> + Send + Sync,
{
    fn password(&self) -> Option<SecretString> {
        self()
    }
}

pub type SharedPasswordProvider = Arc<dyn PasswordProvider>;

/// How the transport authenticates the login user
#[derive(Clone)]
pub enum AuthMethod {
    Password(SecretString),
    /// OpenSSH/PEM encoded private key held in memory
    PrivateKey(SecretString),
    PrivateKeyFile(PathBuf),
    /// First key found in `~/.ssh`
    DefaultKey,
}

impl AuthMethod {
    pub fn password(&self) -> Option<&SecretString> {
        match self {
            AuthMethod::Password(password) => Some(password),
            _ => None,
        }
    }
}

impl fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMethod::Password(_) => write!(f, "Password(..)"),
            AuthMethod::PrivateKey(_) => write!(f, "PrivateKey(..)"),
            AuthMethod::PrivateKeyFile(path) => write!(f, "PrivateKeyFile({})", path.display()),
            AuthMethod::DefaultKey => write!(f, "DefaultKey"),
        }
    }
}
