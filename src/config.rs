//! Configuration for the analyst service
//!
//! Settings layer in three steps: built-in defaults, then an optional local
//! TOML file, then environment variables. The server endpoint specifically is
//! resolved from the `SERVER_URL` environment variable first, the config file
//! second, and a hardcoded fallback last.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{AnalystError, Result};

/// Hardcoded endpoint fallback when neither the environment nor the config
/// file supplies one.
pub const DEFAULT_SERVER_URL: &str = "https://api.openai.com/v1";

/// Default path of the local config file consulted by [`AnalystConfig::load`].
pub const CONFIG_FILE: &str = "analyst.toml";

/// Service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalystConfig {
    /// Model used for both the analyst conversation and the policy oracle
    pub model: String,

    /// Path to the SQLite database holding the clinical dataset and audit log
    pub db_path: PathBuf,

    /// Path to the study protocol document
    pub protocol_path: PathBuf,

    /// Server endpoint from the config file, if any; see [`resolve_server_url`]
    ///
    /// [`resolve_server_url`]: AnalystConfig::resolve_server_url
    pub server_url: Option<String>,

    /// Timeout applied to every model call, in seconds
    pub api_timeout_secs: u64,

    /// Number of audit entries returned by the read surface
    pub audit_limit: usize,

    /// Maximum model/tool dispatch turns per question
    pub max_turns: usize,

    /// Enable debug logging
    pub debug_mode: bool,
}

impl Default for AnalystConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            db_path: PathBuf::from("clinical.db"),
            protocol_path: PathBuf::from("protocol/study_protocol.md"),
            server_url: None,
            api_timeout_secs: 30,
            audit_limit: 100,
            max_turns: 10,
            debug_mode: false,
        }
    }
}

impl AnalystConfig {
    /// Load configuration: defaults, overlaid by `analyst.toml` when present,
    /// overlaid by environment variables.
    pub fn load() -> Self {
        let mut config = match Self::from_file(CONFIG_FILE) {
            Ok(c) => c,
            Err(_) => Self::default(),
        };
        config.apply_env();
        config
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        toml::from_str(&contents).map_err(|e| AnalystError::ConfigError(e.to_string()))
    }

    /// Apply environment variable overrides
    pub fn apply_env(&mut self) {
        if let Ok(model) = std::env::var("ANALYST_MODEL") {
            self.model = model;
        }

        if let Ok(db) = std::env::var("ANALYST_DB") {
            self.db_path = PathBuf::from(db);
        }

        if let Ok(protocol) = std::env::var("ANALYST_PROTOCOL") {
            self.protocol_path = PathBuf::from(protocol);
        }

        if let Ok(timeout) = std::env::var("ANALYST_TIMEOUT_SECS") {
            if let Ok(secs) = timeout.parse::<u64>() {
                self.api_timeout_secs = secs;
            }
        }

        if let Ok(debug) = std::env::var("ANALYST_DEBUG") {
            self.debug_mode = debug.to_lowercase() == "true" || debug == "1";
        }
    }

    /// Resolve the server endpoint: `SERVER_URL` environment variable first,
    /// then the config file value, then the hardcoded fallback.
    pub fn resolve_server_url(&self) -> String {
        std::env::var("SERVER_URL")
            .ok()
            .or_else(|| self.server_url.clone())
            .unwrap_or_else(|| DEFAULT_SERVER_URL.to_string())
    }

    /// Timeout applied to every model call
    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api_timeout_secs)
    }
}
