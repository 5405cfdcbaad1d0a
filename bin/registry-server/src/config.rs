//! Server configuration loaded from the environment

use registry_core::{RegistryConfig, RegistryError};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

pub const LISTEN_ADDR_VAR: &str = "REGISTRY_LISTEN_ADDR";
pub const EXPIRE_SECS_VAR: &str = "REGISTRY_EXPIRE_SECS";
pub const CLEAN_INTERVAL_MS_VAR: &str = "REGISTRY_CLEAN_INTERVAL_MS";

const DEFAULT_PORT: u16 = 8089;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub registry: RegistryConfig,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from a variable lookup, falling back to defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = RegistryConfig::default();

        let listen_addr = parse_var::<SocketAddr>(&lookup, LISTEN_ADDR_VAR)?
            .unwrap_or_else(|| ([0, 0, 0, 0], DEFAULT_PORT).into());
        let expire_time = parse_var::<u64>(&lookup, EXPIRE_SECS_VAR)?
            .map_or(defaults.expire_time, Duration::from_secs);
        let clean_interval = parse_var::<u64>(&lookup, CLEAN_INTERVAL_MS_VAR)?
            .map_or(defaults.clean_interval, Duration::from_millis);

        Ok(Self {
            listen_addr,
            registry: RegistryConfig::new(expire_time, clean_interval)?,
        })
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(key) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { key, value }),
    }
}
