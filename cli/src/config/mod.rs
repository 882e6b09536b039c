//! Configuration management for the shellwright CLI.
//!
//! Host profiles are read from `~/.shellwright/config.toml`. Command-line flags
//! override profile values, and every profile inherits unset values from the
//! `all` profile.

mod app;
mod file;
mod profile;


pub use app::AppConfig;
pub use file::ConfigFile;
pub use profile::ProfileConfig;

pub const SHELLWRIGHT_CONFIG_PATH: &str = ".shellwright/config.toml";
pub const DEFAULT_PROFILE: &str = "default";
/// Meta-profile providing defaults for every other profile
pub const ALL_PROFILE: &str = "all";
