//! Application configuration management

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::ConfigError;

/// Longest accepted `guard.pending_ttl_secs` (one year)
pub const MAX_PENDING_TTL_SECS: u64 = 365 * 24 * 60 * 60;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Proxy settings
    pub proxy: ProxyConfig,

    /// Guard (decision engine) settings
    pub guard: GuardConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Directory holding the persisted registry (platform data dir if unset)
    pub data_dir: Option<PathBuf>,

    /// Registry auto-save interval in seconds (0 to disable)
    pub auto_save_interval: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Proxy listen address
    pub listen_addr: String,

    /// Default proxy port
    pub default_port: u16,

    /// Request size limit in bytes
    pub max_request_size: usize,

    /// Response size limit in bytes
    pub max_response_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    /// Enforce the password-strength chain on login submissions
    pub password_policy: bool,

    /// Prefix put in front of the target host on redirect pages
    pub redirect_prefix: String,

    /// Popular password blacklist (embedded list if unset)
    pub popular_passwords_path: Option<PathBuf>,

    /// Directory with page templates overriding the embedded ones
    pub template_dir: Option<PathBuf>,

    /// Seconds a captured login waits for the operator's decision
    pub pending_ttl_secs: u64,

    /// Maximum number of captured logins kept at once
    pub pending_capacity: usize,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            auto_save_interval: 300,
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1".to_string(),
            default_port: 8080,
            max_request_size: 10 * 1024 * 1024,  // 10MB
            max_response_size: 50 * 1024 * 1024, // 50MB
        }
    }
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            password_policy: true,
            redirect_prefix: "https://".to_string(),
            popular_passwords_path: None,
            template_dir: None,
            pending_ttl_secs: 15 * 60,
            pending_capacity: 256,
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load(path: Option<&str>) -> Result<Self> {
        let config_path = match path {
            Some(p) => PathBuf::from(p),
            None => Self::default_config_path()?,
        };

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read config from {:?}", config_path))?;

            let config = Self::from_toml(&contents)?;

            tracing::info!("Loaded configuration from {:?}", config_path);
            Ok(config)
        } else {
            tracing::info!("No configuration file found, using defaults");
            Ok(Self::default())
        }
    }

    /// Parse configuration from TOML text
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Check values that would make the proxy unusable
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.proxy.default_port == 0 {
            return Err(ConfigError::ValidationError {
                field: "proxy.default_port".into(),
                reason: "port cannot be 0".into(),
            });
        }

        if self.proxy.max_request_size == 0 {
            return Err(ConfigError::ValidationError {
                field: "proxy.max_request_size".into(),
                reason: "must be greater than 0".into(),
            });
        }

        if self.guard.pending_capacity == 0 {
            return Err(ConfigError::ValidationError {
                field: "guard.pending_capacity".into(),
                reason: "must be greater than 0".into(),
            });
        }

        if self.guard.pending_ttl_secs > MAX_PENDING_TTL_SECS {
            return Err(ConfigError::ValidationError {
                field: "guard.pending_ttl_secs".into(),
                reason: format!("must be at most {}", MAX_PENDING_TTL_SECS),
            });
        }

        if !self.guard.redirect_prefix.is_empty() && !self.guard.redirect_prefix.ends_with("://") {
            return Err(ConfigError::ValidationError {
                field: "guard.redirect_prefix".into(),
                reason: "must end with '://', e.g. 'https://'".into(),
            });
        }

        Ok(())
    }

    /// Path of the persisted registry file
    pub fn registry_path(&self) -> Result<PathBuf> {
        let dir = match &self.general.data_dir {
            Some(dir) => dir.clone(),
            None => Self::data_dir()?,
        };
        Ok(dir.join("registry.json"))
    }

    /// Get default configuration file path
    fn default_config_path() -> Result<PathBuf> {
        let dirs = directories::ProjectDirs::from("io", "typoguard", "typoguard")
            .context("Failed to determine config directory")?;

        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Get data directory path
    pub fn data_dir() -> Result<PathBuf> {
        let dirs = directories::ProjectDirs::from("io", "typoguard", "typoguard")
            .context("Failed to determine data directory")?;

        Ok(dirs.data_dir().to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert!(config.guard.password_policy);
        assert_eq!(config.guard.redirect_prefix, "https://");
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            [guard]
            password_policy = false
            "#,
        )
        .unwrap();

        assert!(!config.guard.password_policy);
        assert_eq!(config.proxy.default_port, 8080);
        assert_eq!(config.guard.pending_capacity, 256);
    }

    #[test]
    fn test_invalid_prefix_rejected() {
        let mut config = Config::default();
        config.guard.redirect_prefix = "https".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError { .. })
        ));
    }

    #[test]
    fn test_oversized_pending_ttl_rejected() {
        let mut config = Config::default();
        config.guard.pending_ttl_secs = u64::MAX;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError { field, .. }) if field == "guard.pending_ttl_secs"
        ));

        config.guard.pending_ttl_secs = MAX_PENDING_TTL_SECS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_registry_path_uses_data_dir() {
        let mut config = Config::default();
        config.general.data_dir = Some(PathBuf::from("/tmp/guard"));
        assert_eq!(
            config.registry_path().unwrap(),
            PathBuf::from("/tmp/guard/registry.json")
        );
    }
}
