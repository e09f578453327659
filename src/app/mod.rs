//! Application configuration

mod config;

pub use config::{Config, GuardConfig, ProxyConfig, MAX_PENDING_TTL_SECS};
