//! Client configuration.
//!
//! Resolution order, later wins: built-in defaults, TOML file, environment
//! (`EMOTION_CHAT_SERVER`, `EMOTION_CHAT_DATA_DIR`), command-line flags.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::client::HttpClientConfig;
use crate::error::ChatError;

pub const ENV_SERVER: &str = "EMOTION_CHAT_SERVER";
pub const ENV_DATA_DIR: &str = "EMOTION_CHAT_DATA_DIR";
pub const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub server_url: String,
    pub data_dir: PathBuf,
    /// Sessions kept in the archive.
    pub history_limit: usize,
    /// Minimum gap between two submissions.
    pub throttle_ms: u64,
    /// Completed exchanges between feedback prompts; 0 disables.
    pub feedback_every: usize,
    pub feedback_flush_secs: u64,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub log_level: String,
    pub default_relationship: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:5000".to_string(),
            data_dir: default_data_dir(),
            history_limit: 10,
            throttle_ms: 1000,
            feedback_every: 3,
            feedback_flush_secs: 60,
            connect_timeout_secs: 3,
            request_timeout_secs: 10,
            log_level: "warn".to_string(),
            default_relationship: "neutral".to_string(),
        }
    }
}

/// `$HOME/.emotion-chat`, or `./.emotion-chat` when there is no home.
pub fn default_data_dir() -> PathBuf {
    std::env::var_os("HOME")
        .filter(|h| !h.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".emotion-chat")
}

impl ClientConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ChatError> {
        toml::from_str(s).map_err(|e| ChatError::Config(e.to_string()))
    }

    /// Read a TOML file. A missing file is an error here; see [`ClientConfig::load`].
    pub fn from_file(path: &Path) -> Result<Self, ChatError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ChatError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Load configuration.
    ///
    /// With an explicit `path` the file must exist. Otherwise
    /// `<data_dir>/config.toml` is read when present, where `data_dir` is
    /// `data_dir_override` (the `--data-dir` flag), else the environment,
    /// else the default. The override also wins over any `data_dir` in the
    /// file.
    pub fn load(path: Option<&Path>, data_dir_override: Option<&Path>) -> Result<Self, ChatError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => {
                let dir = data_dir_override
                    .map(Path::to_path_buf)
                    .or_else(|| std::env::var_os(ENV_DATA_DIR).map(PathBuf::from))
                    .unwrap_or_else(default_data_dir);
                let candidate = dir.join(CONFIG_FILE_NAME);
                if candidate.is_file() {
                    debug!(path = %candidate.display(), "loading config");
                    Self::from_file(&candidate)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env(|k| std::env::var(k).ok());
        if let Some(dir) = data_dir_override {
            config.data_dir = dir.to_path_buf();
        }
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through `lookup` (injected for tests).
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(server) = lookup(ENV_SERVER).filter(|s| !s.trim().is_empty()) {
            self.server_url = server;
        }
        if let Some(dir) = lookup(ENV_DATA_DIR).filter(|s| !s.trim().is_empty()) {
            self.data_dir = PathBuf::from(dir);
        }
    }

    pub fn validate(&self) -> Result<(), ChatError> {
        if !(self.server_url.starts_with("http://") || self.server_url.starts_with("https://")) {
            return Err(ChatError::Config(format!(
                "server_url must be an http(s) URL, got {:?}",
                self.server_url
            )));
        }
        if self.history_limit == 0 {
            return Err(ChatError::Config("history_limit must be at least 1".into()));
        }
        Ok(())
    }

    pub fn http_config(&self) -> HttpClientConfig {
        HttpClientConfig::new(&self.server_url)
            .connect_timeout(Duration::from_secs(self.connect_timeout_secs))
            .request_timeout(Duration::from_secs(self.request_timeout_secs))
    }

    pub fn throttle_window(&self) -> Duration {
        Duration::from_millis(self.throttle_ms)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.feedback_flush_secs.max(1))
    }
}
