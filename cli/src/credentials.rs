//! Passwords for login, `sudo` and `su`, read from the environment or asked for interactively.

use secrecy::SecretString;
use shellwright_session::SharedPasswordProvider;
use std::sync::Arc;
use tokio::runtime::{Handle, RuntimeFlavor};

pub const PASSWORD_ENV: &str = "SHELLWRIGHT_PASSWORD";
pub const SUDO_PASSWORD_ENV: &str = "SHELLWRIGHT_SUDO_PASSWORD";
pub const SU_PASSWORD_ENV: &str = "SHELLWRIGHT_SU_PASSWORD";

#[derive(Default)]
pub struct Credentials {
    /// Login password, key authentication is used when absent
    pub login: Option<SecretString>,
    pub sudo: Option<SharedPasswordProvider>,
    pub switch_user: Option<SharedPasswordProvider>,
}

impl Credentials {
    /// Collect credentials. `ask_login_password` prompts for the login password
    /// when it is not in the environment. Missing sudo and su passwords are asked
    /// for only when the remote shell actually prompts.
    pub fn resolve(ask_login_password: bool, target: &str) -> Result<Self, String> {
        let login = match from_env(PASSWORD_ENV) {
            Some(password) => Some(password),
            None if ask_login_password => Some(
                rpassword::prompt_password(format!("Password for {}: ", target))
                    .map(SecretString::from)
                    .map_err(|e| format!("Failed to read password: {}", e))?,
            ),
            None => None,
        };

        let sudo = from_env(SUDO_PASSWORD_ENV)
            .map(|password| Arc::new(password) as SharedPasswordProvider)
            .or_else(|| match login {
                // the session answers sudo prompts with the login password
                Some(_) => None,
                None => Some(prompting("[sudo] password: ")),
            });
        let switch_user = Some(
            from_env(SU_PASSWORD_ENV)
                .map(|password| Arc::new(password) as SharedPasswordProvider)
                .unwrap_or_else(|| prompting("su password: ")),
        );

        Ok(Credentials {
            login,
            sudo,
            switch_user,
        })
    }
}

fn from_env(name: &str) -> Option<SecretString> {
    std::env::var(name)
        .ok()
        .filter(|value| !value.is_empty())
        .map(SecretString::from)
}

/// Provider that asks on the terminal once the remote shell shows its prompt.
/// It is called from inside the session's read loop.
fn prompting(prompt: &'static str) -> SharedPasswordProvider {
    Arc::new(move || -> Option<SecretString> {
        off_worker(|| {
            rpassword::prompt_password(prompt)
                .ok()
                .map(SecretString::from)
        })
    })
}

/// Run blocking terminal input without stalling the other tasks of a multi-threaded runtime
fn off_worker<T>(read: impl FnOnce() -> T) -> T {
    match Handle::try_current().map(|handle| handle.runtime_flavor()) {
        Ok(RuntimeFlavor::MultiThread) => tokio::task::block_in_place(read),
        _ => read(),
    }
}
