// Configuration File Support
//
// Configuration for the envseal CLI: key material, the Vault connection, the
// exec re-evaluation policy and logging.
// Supports TOML format with environment variable overrides.
// Configuration files are loaded from XDG config directory: ~/.config/envseal/config.toml

use crate::aes::AesKey;
use crate::exec::{ExecConfig, OnEnvChange};
use crate::vault::KvVersion;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub logging: LoggingConfig,

    /// Inline AES secrets
    pub aes: AesConfig,

    /// Vault connection
    pub vault: VaultConfig,

    /// Process supervision
    pub exec: ExecSection,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json, pretty, compact)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            format: "compact".to_string(),
        }
    }
}

impl LoggingConfig {
    /// Convert log level string to tracing::Level
    pub fn log_level(&self) -> Result<tracing::Level> {
        self.level
            .to_lowercase()
            .parse()
            .map_err(|e| anyhow::anyhow!("Failed to parse log level: {}", e))
    }
}

/// Inline AES secret configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct AesConfig {
    /// Base64-encoded 32-byte key; the AES family is skipped when unset
    pub key: Option<String>,
}

/// Vault configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VaultConfig {
    /// Server address, e.g. https://vault.example.com:8200; the Vault family
    /// is skipped when unset
    pub address: Option<String>,

    /// Token sent as X-Vault-Token
    pub token: Option<String>,

    /// Enterprise namespace sent as X-Vault-Namespace
    pub namespace: Option<String>,

    /// Request timeout in seconds
    pub timeout_secs: u64,

    /// KV engine version used when writing to a path with no secret yet
    pub kv_version: KvVersion,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            address: None,
            token: None,
            namespace: None,
            timeout_secs: 30,
            kv_version: KvVersion::V2,
        }
    }
}

/// Exec configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExecSection {
    /// What to do when the environment changes (nothing, stop, restart)
    pub on_env_change: String,

    /// How often to re-evaluate the environment, in milliseconds
    pub reevaluation_interval_ms: u64,
}

impl Default for ExecSection {
    fn default() -> Self {
        Self {
            on_env_change: "nothing".to_string(),
            reevaluation_interval_ms: 0,
        }
    }
}

impl Config {
    /// Load configuration from the default XDG config directory
    ///
    /// # Returns
    ///
    /// * `Result<Config>` - The loaded configuration with defaults applied
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    /// If the config file does not exist, returns default configuration.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// * `Result<Config>` - The loaded configuration, with environment
    ///   overrides applied whether or not the file exists
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed, or if
    /// the merged configuration does not validate.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let config = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file from {:?}", path))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file from {:?}", path))?;
            tracing::debug!("Loaded configuration from {:?}", path);
            config
        } else {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            Self::default()
        };

        let config = config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path
    ///
    /// Returns `~/.config/envseal/config.toml` on Linux
    pub fn config_path() -> PathBuf {
        if let Some(proj_dirs) = directories::ProjectDirs::from("com", "envseal", "envseal") {
            proj_dirs.config_dir().join("config.toml")
        } else {
            // Fallback if XDG dirs cannot be determined
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home)
                .join(".config")
                .join("envseal")
                .join("config.toml")
        }
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Environment variables take precedence over config file values:
    /// - AES_KEY
    /// - VAULT_ADDR
    /// - VAULT_TOKEN
    /// - VAULT_NAMESPACE
    /// - ENVSEAL_LOG_LEVEL
    /// - ENVSEAL_LOG_FORMAT
    fn apply_env_overrides(self) -> Self {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    fn apply_overrides<F>(mut self, var: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| var(name).filter(|value| !value.is_empty());

        if let Some(key) = var("AES_KEY") {
            self.aes.key = Some(key);
        }

        if let Some(address) = var("VAULT_ADDR") {
            self.vault.address = Some(address);
        }
        if let Some(token) = var("VAULT_TOKEN") {
            self.vault.token = Some(token);
        }
        if let Some(namespace) = var("VAULT_NAMESPACE") {
            self.vault.namespace = Some(namespace);
        }

        if let Some(level) = var("ENVSEAL_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = var("ENVSEAL_LOG_FORMAT") {
            self.logging.format = format;
        }

        self
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        // Validate logging level
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                self.logging.level
            ),
        }

        // Validate logging format
        match self.logging.format.to_lowercase().as_str() {
            "json" | "pretty" | "compact" => {}
            _ => anyhow::bail!(
                "Invalid log format: {}. Must be one of: json, pretty, compact",
                self.logging.format
            ),
        }

        // Validate Vault configuration
        if self.vault.timeout_secs == 0 {
            anyhow::bail!("Vault timeout must be > 0");
        }

        // Validate exec configuration
        let on_env_change = self.on_env_change()?;
        if on_env_change != OnEnvChange::DoNothing && self.exec.reevaluation_interval_ms == 0 {
            anyhow::bail!(
                "Exec policy '{}' requires a reevaluation interval > 0",
                self.exec.on_env_change
            );
        }

        Ok(())
    }

    /// Parse the configured AES key, if any
    pub fn aes_key(&self) -> Result<Option<AesKey>> {
        self.aes
            .key
            .as_deref()
            .map(AesKey::from_base64)
            .transpose()
            .context("Invalid AES key")
    }

    fn on_env_change(&self) -> Result<OnEnvChange> {
        match self.exec.on_env_change.to_lowercase().as_str() {
            "nothing" => Ok(OnEnvChange::DoNothing),
            "stop" => Ok(OnEnvChange::Stop),
            "restart" => Ok(OnEnvChange::Restart),
            _ => anyhow::bail!(
                "Invalid exec policy: {}. Must be one of: nothing, stop, restart",
                self.exec.on_env_change
            ),
        }
    }

    /// The exec policy described by the `[exec]` section
    pub fn exec_config(&self) -> Result<ExecConfig> {
        Ok(ExecConfig {
            on_env_change: self.on_env_change()?,
            reevaluation_interval: Duration::from_millis(self.exec.reevaluation_interval_ms),
        })
    }
}
