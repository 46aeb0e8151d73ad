//! Configuration management for libscuttle

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{ConfigError, Result};
use crate::handshake::NetworkKey;
use crate::identity::Identity;
use crate::logging::{LogFormat, LoggingConfig};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Base64 network key shared by every peer of the network
    pub key: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            key: NetworkKey::MAIN.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityConfig {
    pub secret_path: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            secret_path: "~/.ssb/secret".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_format")]
    pub format: String,
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            format: default_log_format(),
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from the default location
    ///
    /// A missing file yields the default configuration.
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        if !config_path.exists() {
            tracing::debug!(
                "No config at {}, using defaults",
                config_path.display()
            );
            return Ok(Self::default_config());
        }
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let config: Config = toml::from_str(&content).map_err(ConfigError::ParseError)?;
        config.validate()?;
        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            network: NetworkConfig::default(),
            identity: IdentityConfig::default(),
            logging: LoggingSection::default(),
        }
    }

    fn validate(&self) -> Result<()> {
        self.network_key()?;
        self.log_format()?;
        if self.identity.secret_path.trim().is_empty() {
            return Err(ConfigError::MissingField("identity.secret_path".to_string()).into());
        }
        Ok(())
    }

    /// The configured network key
    pub fn network_key(&self) -> Result<NetworkKey> {
        NetworkKey::from_base64(&self.network.key).map_err(|e| {
            ConfigError::InvalidValue {
                field: "network.key".to_string(),
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Secret file path with `~` and environment variables expanded
    pub fn secret_path(&self) -> Result<PathBuf> {
        let expanded = shellexpand::full(&self.identity.secret_path).map_err(|e| {
            ConfigError::InvalidValue {
                field: "identity.secret_path".to_string(),
                reason: e.to_string(),
            }
        })?;
        Ok(PathBuf::from(expanded.into_owned()))
    }

    /// Load the identity from the configured secret file
    pub fn load_identity(&self) -> Result<Identity> {
        Identity::from_secret_file(&self.secret_path()?)
    }

    pub fn log_format(&self) -> Result<LogFormat> {
        self.logging.format.parse::<LogFormat>().map_err(|reason| {
            ConfigError::InvalidValue {
                field: "logging.format".to_string(),
                reason,
            }
            .into()
        })
    }

    /// Logging settings described by this configuration
    pub fn logging_config(&self) -> Result<LoggingConfig> {
        Ok(LoggingConfig::new(
            self.log_format()?,
            self.logging.level.clone(),
            false,
        ))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}

/// Resolve the configuration file path under the XDG config directory
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("SCUTTLE_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("scuttle").join("config.toml"))
}
