//! Host profile configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Connection and execution settings for one remote host.
///
/// ```toml
/// [profiles.web]
/// host = "web-1.internal"
/// username = "deploy"
/// private_key_path = "~/.ssh/deploy_ed25519"
/// max_execution_time = "30m"
/// max_inactivity_time = "5m"
/// sudo = true
/// ```
///
/// Values missing from a profile are taken from the `all` profile.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct ProfileConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    /// Private key file, absolute, relative to `~/.ssh/` or starting with `~/`
    pub private_key_path: Option<String>,
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub max_execution_time: Option<Duration>,
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub max_inactivity_time: Option<Duration>,
    /// Wait after opening the shell before the first command
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub settle_delay: Option<Duration>,
    /// Prefix commands with `sudo`
    pub sudo: Option<bool>,
    /// Switch to this user with `su -` right after connecting
    pub switch_user: Option<String>,
    /// Prefix commands with `sudo` once switched to `switch_user`
    pub switch_user_sudo: Option<bool>,
}

impl ProfileConfig {
    /// Fill unset fields from `fallback` (usually the `all` profile).
    pub(crate) fn merge(self, fallback: Option<&ProfileConfig>) -> Self {
        let Some(fallback) = fallback else {
            return self;
        };
        ProfileConfig {
            host: self.host.or_else(|| fallback.host.clone()),
            port: self.port.or(fallback.port),
            username: self.username.or_else(|| fallback.username.clone()),
            private_key_path: self
                .private_key_path
                .or_else(|| fallback.private_key_path.clone()),
            max_execution_time: self.max_execution_time.or(fallback.max_execution_time),
            max_inactivity_time: self.max_inactivity_time.or(fallback.max_inactivity_time),
            settle_delay: self.settle_delay.or(fallback.settle_delay),
            sudo: self.sudo.or(fallback.sudo),
            switch_user: self.switch_user.or_else(|| fallback.switch_user.clone()),
            switch_user_sudo: self.switch_user_sudo.or(fallback.switch_user_sudo),
        }
    }
}
