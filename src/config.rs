//! Loader Configuration
//!
//! Handles parsing and management of nlreq.toml configuration files.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Name of the configuration file searched for by [`NlreqConfig::find_and_load`]
pub const CONFIG_FILE_NAME: &str = "nlreq.toml";

/// Environment variable holding the initial search path
pub const DEFAULT_ENV_VAR: &str = "NLLIB";

/// Symbol every native extension must export
pub const NATIVE_ENTRY_SYMBOL: &str = "nl_ext_init";

/// File name prefix for temporary compiled artifacts
pub const DEFAULT_TEMP_PREFIX: &str = "nlreq.";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config file not found: {0}")]
    NotFound(String),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Root configuration structure matching nlreq.toml.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct NlreqConfig {
    /// Module loader settings
    #[serde(default)]
    pub loader: LoaderConfig,
}

impl NlreqConfig {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        let config: NlreqConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from the current directory or parents.
    pub fn load_from_cwd() -> ConfigResult<Self> {
        let cwd = std::env::current_dir().map_err(ConfigError::Io)?;
        Self::find_and_load(&cwd)
    }

    /// Find and load configuration by searching up from the given directory.
    pub fn find_and_load(start_dir: &Path) -> ConfigResult<Self> {
        let mut dir = start_dir.to_path_buf();
        loop {
            let config_path = dir.join(CONFIG_FILE_NAME);
            if config_path.exists() {
                return Self::load(&config_path);
            }
            if !dir.pop() {
                return Ok(Self::default());
            }
        }
    }

    /// Save configuration to a file.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// `[loader]` table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoaderConfig {
    /// Environment variable the search path is seeded from
    #[serde(default = "default_env_var")]
    pub env_var: String,

    /// Directories appended after the environment entries
    #[serde(default)]
    pub search_paths: Vec<String>,

    /// Entry point looked up in native extensions
    #[serde(default = "default_entry_symbol")]
    pub native_entry_symbol: String,

    /// Prefix for temporary compiled artifacts
    #[serde(default = "default_temp_prefix")]
    pub temp_prefix: String,

    /// Directory for temporary artifacts (system temp dir when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_dir: Option<PathBuf>,

    /// Forget a failed `require` so a later call tries again
    #[serde(default = "default_true")]
    pub retry_failed: bool,
}

impl LoaderConfig {
    /// Directory temporary artifacts are written to
    pub fn temp_dir(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

fn default_env_var() -> String {
    DEFAULT_ENV_VAR.to_string()
}

fn default_entry_symbol() -> String {
    NATIVE_ENTRY_SYMBOL.to_string()
}

fn default_temp_prefix() -> String {
    DEFAULT_TEMP_PREFIX.to_string()
}

fn default_true() -> bool {
    true
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            env_var: default_env_var(),
            search_paths: Vec::new(),
            native_entry_symbol: default_entry_symbol(),
            temp_prefix: default_temp_prefix(),
            temp_dir: None,
            retry_failed: true,
        }
    }
}
