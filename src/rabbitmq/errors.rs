// src/rabbitmq/errors.rs

use lapin::Error as LapinError;
use serde_json::Error as SerdeError;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("RabbitMQ connection error: {0}")]
    ConnectionError(String),

    #[error("Channel connection is closed.")]
    ChannelClosed,

    #[error("Connection blocked by the broker")]
    ConnectionBlocked,

    #[error("No frame received within {0:?}")]
    Timeout(Duration),

    #[error("No data available on the channel")]
    NoData,

    #[error("RabbitMQ channel error: {0}")]
    ChannelError(String),

    #[error("RabbitMQ publish error: {0}")]
    PublishError(String),

    #[error("RabbitMQ consume error: {0}")]
    ConsumeError(String),

    #[error("RabbitMQ acknowledge error: {0}")]
    AckError(String),

    #[error("Message serialization error: {0}")]
    Serialization(#[from] SerdeError),

    #[error(transparent)]
    Amqp(#[from] LapinError),
}

// Custom Result type for broker operations
pub type Result<T> = std::result::Result<T, BrokerError>;

impl BrokerError {
    /// True for the conditions a consume loop treats as "nothing happened yet".
    pub fn is_idle(&self) -> bool {
        matches!(self, BrokerError::Timeout(_) | BrokerError::NoData)
    }

    pub(crate) fn connection(context: &str, error: LapinError) -> Self {
        BrokerError::ConnectionError(format!("{}: {}", context, error))
    }

    pub(crate) fn channel(context: &str, error: LapinError) -> Self {
        BrokerError::ChannelError(format!("{}: {}", context, error))
    }
}
