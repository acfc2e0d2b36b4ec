// src/config.rs
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::rabbitmq::ConnectionParams;

pub const CONFIG_FILE_NAME: &str = "broker.json";

// Configuration structures
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BrokerConfig {
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub exchange: ExchangeConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default = "default_password")]
    pub password: String,
    #[serde(default = "default_vhost")]
    pub vhost: String,
    #[serde(default = "default_heartbeat")]
    pub heartbeat_seconds: u16,
    #[serde(default = "default_timeout")]
    pub connection_timeout_ms: u64,
    #[serde(default = "default_read_timeout")]
    pub read_timeout_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeConfig {
    #[serde(default = "default_exchange")]
    pub name: String,
}

// Default values
fn default_host() -> String { "localhost".to_string() }
fn default_port() -> u16 { 5672 }
fn default_user() -> String { "guest".to_string() }
fn default_password() -> String { "guest".to_string() }
fn default_vhost() -> String { "/".to_string() }
fn default_heartbeat() -> u16 { 30 }
fn default_timeout() -> u64 { 5000 }
fn default_read_timeout() -> u64 { 3 }
fn default_exchange() -> String { "events".to_string() }

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            user: default_user(),
            password: default_password(),
            vhost: default_vhost(),
            heartbeat_seconds: default_heartbeat(),
            connection_timeout_ms: default_timeout(),
            read_timeout_seconds: default_read_timeout(),
        }
    }
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self { name: default_exchange() }
    }
}

impl BrokerConfig {
    pub fn connection_params(&self) -> ConnectionParams {
        let c = &self.connection;
        ConnectionParams {
            host: c.host.clone(),
            port: c.port,
            user: c.user.clone(),
            password: c.password.clone(),
            vhost: c.vhost.clone(),
            heartbeat: Duration::from_secs(c.heartbeat_seconds as u64),
            connection_timeout: Duration::from_millis(c.connection_timeout_ms),
            read_timeout: Duration::from_secs(c.read_timeout_seconds),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.connection.host.is_empty() {
            return Err(anyhow!("Configuration error: connection.host cannot be empty"));
        }
        if self.connection.port == 0 {
            return Err(anyhow!("Configuration error: connection.port cannot be 0"));
        }
        if self.exchange.name.is_empty() {
            return Err(anyhow!("Configuration error: exchange.name cannot be empty"));
        }
        Ok(())
    }
}

// Configuration loading and management functions
pub fn find_config_file() -> Result<PathBuf> {
    let current = Path::new(CONFIG_FILE_NAME).to_path_buf();
    let nested = Path::new("config").join(CONFIG_FILE_NAME);
    let locations = [("Current directory", current), ("Config directory", nested)];

    for (location_name, path) in locations {
        if path.exists() {
            debug!("Found config file in {}: {}", location_name, path.display());
            return Ok(path);
        }
    }

    if let Some(home_dir) = home::home_dir() {
        let home_config = home_dir.join(format!(".{}", CONFIG_FILE_NAME));
        if home_config.exists() {
            debug!("Found config file in home directory: {}", home_config.display());
            return Ok(home_config);
        }
    }

    Err(anyhow!(
        "Could not find {} in the current directory, ./config, or the home directory",
        CONFIG_FILE_NAME
    ))
}

pub fn load_config_from(path: &Path) -> Result<BrokerConfig> {
    let content = fs::read_to_string(path)
        .context(format!("Failed to read config file at {}", path.display()))?;

    let config: BrokerConfig = serde_json::from_str(&content)
        .context("Configuration file contains invalid JSON")?;

    config.validate()?;
    Ok(config)
}

pub fn create_default_config_file(path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(&BrokerConfig::default())
        .context("Failed to serialize default configuration")?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)
                .context(format!("Failed to create directory at {}", parent.display()))?;
        }
    }

    fs::write(path, json)
        .context(format!("Failed to write configuration to {}", path.display()))?;

    info!("Created default configuration file at: {}", path.display());
    Ok(())
}
