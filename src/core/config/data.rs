use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Model used when neither the config file nor a saved conversation names one.
pub const DEFAULT_MODEL: &str = "llama3";

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq, Eq)]
pub struct Config {
    /// Model for new conversations (e.g., "llama3", "mistral")
    pub default_model: Option<String>,
    /// Model server address handed to the transport when a conversation has
    /// no host of its own (e.g., "http://localhost:11434")
    pub default_host: Option<String>,
}

impl Config {
    /// The configured default model, or [`DEFAULT_MODEL`] when unset or blank.
    pub fn default_model(&self) -> &str {
        self.default_model
            .as_deref()
            .map(str::trim)
            .filter(|model| !model.is_empty())
            .unwrap_or(DEFAULT_MODEL)
    }

    pub fn default_host(&self) -> Option<&str> {
        self.default_host
            .as_deref()
            .map(str::trim)
            .filter(|host| !host.is_empty())
    }
}

/// Get a user-friendly display string for a path
/// Converts absolute paths to use ~ notation on Unix-like systems when possible
///
/// # Examples
/// - Unix: `/home/user/.local/share/parley` → `~/.local/share/parley`
/// - macOS: `/Users/user/Library/Application Support/...` → `~/Library/Application Support/...`
pub fn path_display<P: AsRef<Path>>(path: P) -> String {
    let path = path.as_ref();

    #[cfg(unix)]
    {
        if let Some(home) = std::env::var_os("HOME") {
            let home_path = PathBuf::from(home);
            if let Ok(relative) = path.strip_prefix(&home_path) {
                return format!("~/{}", relative.display());
            }
        }
    }

    path.display().to_string()
}
