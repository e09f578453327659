//! Custom error types for Typoguard
//!
//! Core guard operations return [`GuardError`]; the binary edge converts
//! into `anyhow` with context. None of these errors is fatal to a running
//! proxy: the decision engine logs them and lets the request through.

use thiserror::Error;

/// Main error type for guard operations
#[derive(Error, Debug)]
pub enum GuardError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Malformed request data
    #[error("Request error: {0}")]
    Request(#[from] RequestError),

    /// Page template errors
    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    /// Trust registry errors
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Proxy server errors
    #[error("Proxy error: {0}")]
    Proxy(#[from] ProxyError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Invalid configuration value: {field} - {reason}")]
    ValidationError { field: String, reason: String },
}

/// Malformed-input errors raised while reading a proxied request
#[derive(Error, Debug)]
pub enum RequestError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("No host in {0}")]
    MissingHost(String),

    #[error("Invalid {header} header: {value}")]
    InvalidHeader { header: String, value: String },

    #[error("Undecodable form body: {0}")]
    InvalidForm(String),
}

/// Template errors
#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("Template not found: {0}")]
    NotFound(String),

    #[error("Failed to read template {path}: {source}")]
    ReadError {
        path: String,
        source: std::io::Error,
    },
}

/// Trust registry errors
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Redirect target is not a known host: {0}")]
    UnknownTarget(String),

    #[error("Host is already trusted and cannot be a typo: {0}")]
    TrustedTypoHost(String),

    #[error("Unknown pending login token: {0}")]
    UnknownToken(String),

    #[error("Malformed control command: {0}")]
    MalformedCommand(String),

    #[error("Failed to load registry from {path}: {reason}")]
    LoadError { path: String, reason: String },

    #[error("Failed to save registry to {path}: {reason}")]
    SaveError { path: String, reason: String },
}

/// Proxy server errors
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("Failed to start proxy on port {port}: {reason}")]
    StartError { port: u16, reason: String },

    #[error("Invalid proxy request: {0}")]
    InvalidRequest(String),

    #[error("Request body too large: {size} bytes (max: {max})")]
    BodyTooLarge { size: usize, max: usize },

    #[error("Connection to target failed: {target}")]
    TargetConnectionError { target: String },
}

impl GuardError {
    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            GuardError::Config(e) => format!("Configuration problem: {}", e.user_hint()),
            GuardError::Request(e) => format!("Request problem: {}", e.user_hint()),
            GuardError::Template(e) => format!("Template problem: {}", e.user_hint()),
            GuardError::Registry(e) => format!("Registry problem: {}", e.user_hint()),
            GuardError::Proxy(e) => format!("Proxy issue: {}", e.user_hint()),
            GuardError::Io(e) => format!("File system issue: {}", e),
        }
    }
}

/// Trait for providing user-friendly hints
pub trait UserHint {
    fn user_hint(&self) -> String;
}

impl UserHint for ConfigError {
    fn user_hint(&self) -> String {
        match self {
            ConfigError::ParseError(_) => {
                "The configuration file has invalid syntax. Check for TOML formatting errors.".into()
            }
            ConfigError::ValidationError { field, reason } => {
                format!("Invalid value for '{}': {}", field, reason)
            }
        }
    }
}

impl UserHint for RequestError {
    fn user_hint(&self) -> String {
        match self {
            RequestError::InvalidUrl(url) => {
                format!("'{}' is not a valid URL. The request was passed through unchecked.", url)
            }
            _ => self.to_string(),
        }
    }
}

impl UserHint for TemplateError {
    fn user_hint(&self) -> String {
        match self {
            TemplateError::NotFound(name) => {
                format!("Page template '{}' is missing. Warning pages will be empty.", name)
            }
            TemplateError::ReadError { path, .. } => {
                format!("Could not read '{}'. Check the template directory permissions.", path)
            }
        }
    }
}

impl UserHint for RegistryError {
    fn user_hint(&self) -> String {
        match self {
            RegistryError::UnknownTarget(host) => {
                format!("'{}' must be visited (or confirmed) before typos can redirect to it.", host)
            }
            RegistryError::TrustedTypoHost(host) => {
                format!("'{}' is a trusted site, so it cannot redirect elsewhere.", host)
            }
            RegistryError::LoadError { path, .. } => {
                format!("Could not load '{}'. Starting with an empty registry.", path)
            }
            _ => self.to_string(),
        }
    }
}

impl UserHint for ProxyError {
    fn user_hint(&self) -> String {
        match self {
            ProxyError::StartError { port, .. } => {
                format!("Could not start proxy on port {}. It may already be in use.", port)
            }
            _ => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_message_wraps_hint() {
        let err = GuardError::from(RegistryError::UnknownTarget("example.com".into()));
        let msg = err.user_message();
        assert!(msg.starts_with("Registry problem:"));
        assert!(msg.contains("example.com"));
    }

    #[test]
    fn test_display_from_conversion() {
        let err: GuardError = RequestError::MissingHost("Origin".into()).into();
        assert_eq!(err.to_string(), "Request error: No host in Origin");
    }
}
