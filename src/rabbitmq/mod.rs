// src/rabbitmq/mod.rs
// Topic-exchange client on top of lapin

pub mod errors;
pub mod amqp_client;
pub mod channel_manager;
pub mod broker_client;

// Re-export specific items to simplify imports elsewhere
pub use amqp_client::{AmqpConnector, AmqpSession, ConnectionParams, Durability, ExchangeType};
pub use broker_client::{routing_key, BrokerClient, DEFAULT_BINDING, MIN_WAIT};
pub use channel_manager::{LapinConnector, LapinSession};
pub use errors::{BrokerError, Result};
