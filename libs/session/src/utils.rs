use crate::error::ShellError;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Render a duration the way it is shown in timeout messages, e.g. "1 hour 30 minutes"
pub fn friendly_duration(duration: Duration) -> String {
    let total_ms = duration.as_millis();
    let parts = [
        (total_ms / 86_400_000, "day"),
        ((total_ms / 3_600_000) % 24, "hour"),
        ((total_ms / 60_000) % 60, "minute"),
        ((total_ms / 1000) % 60, "second"),
        (total_ms % 1000, "millisecond"),
    ];

    let rendered: Vec<String> = parts
        .iter()
        .filter(|(value, _)| *value > 0)
        .map(|(value, unit)| {
            if *value == 1 {
                format!("{} {}", value, unit)
            } else {
                format!("{} {}s", value, unit)
            }
        })
        .collect();

    if rendered.is_empty() {
        "0 milliseconds".to_string()
    } else {
        rendered.join(" ")
    }
}

/// Find the first private key in `~/.ssh`, in order of preference
pub fn default_key_file() -> Result<PathBuf, ShellError> {
    let home_dir = dirs::home_dir()
        .ok_or_else(|| ShellError::Config("Home directory not found".to_string()))?;
    let ssh_dir = home_dir.join(".ssh");

    if !ssh_dir.is_dir() {
        return Err(ShellError::Config(format!(
            "SSH directory not found: {}",
            ssh_dir.display()
        )));
    }

    for key_name in ["id_ed25519", "id_rsa", "id_ecdsa"] {
        let private_key = ssh_dir.join(key_name);
        if private_key.is_file() {
            return Ok(private_key);
        }
    }

    Err(ShellError::Config(format!(
        "No SSH private key found in {}",
        ssh_dir.display()
    )))
}

/// Resolve a private key path. Absolute paths are used as given; anything else is
/// looked up in the working directory, then under the home directory (`~/...`) or in `~/.ssh/`.
pub fn canonicalize_key_path(path: &str) -> Result<PathBuf, ShellError> {
    let given = Path::new(path);
    let mut candidates = vec![given.to_path_buf()];
    if !given.is_absolute()
        && let Some(home_dir) = dirs::home_dir()
    {
        candidates.push(match path.strip_prefix("~/") {
            Some(in_home) => home_dir.join(in_home),
            None => home_dir.join(".ssh").join(given),
        });
    }

    candidates
        .iter()
        .find_map(|candidate| fs::canonicalize(candidate).ok())
        .ok_or_else(|| {
            let tried: Vec<String> = candidates
                .iter()
                .map(|candidate| candidate.display().to_string())
                .collect();
            ShellError::Config(format!(
                "Private key '{}' not found, tried {}",
                path,
                tried.join(", ")
            ))
        })
}
