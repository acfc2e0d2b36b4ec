use anyhow::{Context, Result};
use dotenv::dotenv;
use std::env;

use crate::config::BrokerConfig;

pub const AMQP_HOST: &str = "AMQP_HOST";
pub const AMQP_PORT: &str = "AMQP_PORT";
pub const AMQP_USER: &str = "AMQP_USER";
pub const AMQP_PASSWORD: &str = "AMQP_PASSWORD";
pub const AMQP_VHOST: &str = "AMQP_VHOST";
pub const AMQP_EXCHANGE: &str = "AMQP_EXCHANGE";
pub const AMQP_READ_TIMEOUT_SECONDS: &str = "AMQP_READ_TIMEOUT_SECONDS";

/// Loads `.env` if present, then overlays `AMQP_*` variables onto `config`.
pub fn apply_env_overrides(config: &mut BrokerConfig) -> Result<()> {
    dotenv().ok();
    apply_overrides_from(config, |key| env::var(key).ok())
}

pub fn apply_overrides_from<F>(config: &mut BrokerConfig, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    let connection = &mut config.connection;

    if let Some(host) = lookup(AMQP_HOST) {
        connection.host = host;
    }
    if let Some(port) = lookup(AMQP_PORT) {
        connection.port = port
            .parse()
            .context(format!("{} must be a port number, got {:?}", AMQP_PORT, port))?;
    }
    if let Some(user) = lookup(AMQP_USER) {
        connection.user = user;
    }
    if let Some(password) = lookup(AMQP_PASSWORD) {
        connection.password = password;
    }
    if let Some(vhost) = lookup(AMQP_VHOST) {
        connection.vhost = vhost;
    }
    if let Some(seconds) = lookup(AMQP_READ_TIMEOUT_SECONDS) {
        connection.read_timeout_seconds = seconds.parse().context(format!(
            "{} must be a whole number of seconds, got {:?}",
            AMQP_READ_TIMEOUT_SECONDS, seconds
        ))?;
    }
    if let Some(exchange) = lookup(AMQP_EXCHANGE) {
        config.exchange.name = exchange;
    }

    config.validate()
}
