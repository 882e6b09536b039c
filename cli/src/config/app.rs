//! Resolved application configuration.

use config::ConfigError;
use shellwright_session::{DEFAULT_SETTLE_DELAY, DEFAULT_SSH_PORT, Limits};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::file::ConfigFile;
use super::profile::ProfileConfig;
use super::{ALL_PROFILE, DEFAULT_PROFILE, SHELLWRIGHT_CONFIG_PATH};

/// Everything needed to open a session, built from the config file and command-line flags.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppConfig {
    pub profile_name: String,
    pub config_path: PathBuf,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub private_key_path: Option<String>,
    pub limits: Limits,
    pub settle_delay: Duration,
    pub sudo: bool,
    pub switch_user: Option<String>,
    pub switch_user_sudo: bool,
}

impl AppConfig {
    /// Load a profile and apply `overrides` on top of it.
    ///
    /// The default profile may be absent from the file, in which case the
    /// overrides alone must name the host and user.
    pub fn load<P: AsRef<Path>>(
        profile_name: &str,
        custom_config_path: Option<P>,
        overrides: ProfileConfig,
    ) -> Result<Self, ConfigError> {
        Self::validate_profile_name(profile_name)?;

        let config_path = Self::get_config_path(custom_config_path);
        let config_file = ConfigFile::load(&config_path)?;
        let profile = match config_file.resolved_profile_config(profile_name) {
            Ok(profile) => profile,
            Err(_) if profile_name == DEFAULT_PROFILE => ProfileConfig::default()
                .merge(config_file.profile_config(ALL_PROFILE)),
            Err(e) => return Err(e),
        };

        Self::build(profile_name, config_path, overrides.merge(Some(&profile)))
    }

    /// Store `overrides` into the named profile of the config file, keeping the values they do not set.
    pub fn save_profile<P: AsRef<Path>>(
        profile_name: &str,
        custom_config_path: Option<P>,
        overrides: ProfileConfig,
    ) -> Result<PathBuf, ConfigError> {
        Self::validate_profile_name(profile_name)?;

        let config_path = Self::get_config_path(custom_config_path);
        let mut config_file = ConfigFile::load(&config_path)?;
        let profile = overrides.merge(config_file.profile_config(profile_name));
        config_file.profiles.insert(profile_name.to_string(), profile);
        config_file.save_to(&config_path)?;
        Ok(config_path)
    }

    pub fn list_available_profiles<P: AsRef<Path>>(
        custom_config_path: Option<P>,
    ) -> Result<Vec<String>, ConfigError> {
        let config_path = Self::get_config_path(custom_config_path);
        Ok(ConfigFile::load(&config_path)?.profile_names())
    }

    /// Get the config file path, using custom path or default.
    pub fn get_config_path<P: AsRef<Path>>(path: Option<P>) -> PathBuf {
        match path {
            Some(p) => p.as_ref().to_path_buf(),
            None => dirs::home_dir()
                .unwrap_or_default()
                .join(SHELLWRIGHT_CONFIG_PATH),
        }
    }

    fn build(
        profile_name: &str,
        config_path: PathBuf,
        profile: ProfileConfig,
    ) -> Result<Self, ConfigError> {
        let host = profile.host.filter(|host| !host.is_empty()).ok_or_else(|| {
            ConfigError::Message(format!(
                "No host configured, pass --host or set `host` in profile '{}'",
                profile_name
            ))
        })?;
        let username = profile
            .username
            .filter(|username| !username.is_empty())
            .ok_or_else(|| {
                ConfigError::Message(format!(
                    "No username configured, pass --user or set `username` in profile '{}'",
                    profile_name
                ))
            })?;

        let defaults = Limits::default();
        Ok(AppConfig {
            profile_name: profile_name.to_string(),
            config_path,
            host,
            port: profile.port.unwrap_or(DEFAULT_SSH_PORT),
            username,
            private_key_path: profile.private_key_path,
            limits: Limits {
                max_execution_time: profile
                    .max_execution_time
                    .unwrap_or(defaults.max_execution_time),
                max_inactivity_time: profile
                    .max_inactivity_time
                    .unwrap_or(defaults.max_inactivity_time),
            },
            settle_delay: profile.settle_delay.unwrap_or(DEFAULT_SETTLE_DELAY),
            sudo: profile.sudo.unwrap_or(false),
            switch_user: profile.switch_user.filter(|user| !user.is_empty()),
            switch_user_sudo: profile.switch_user_sudo.unwrap_or(false),
        })
    }

    fn validate_profile_name(profile_name: &str) -> Result<(), ConfigError> {
        if profile_name == ALL_PROFILE {
            Err(ConfigError::Message(
                "Cannot use 'all' as a profile name. It's reserved for defaults.".into(),
            ))
        } else {
            Ok(())
        }
    }
}
