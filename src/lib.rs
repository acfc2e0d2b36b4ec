pub mod config;
pub mod env;
pub mod message;
pub mod rabbitmq;

pub use message::{HandlerError, IncomingMessage, MessageHandler};
pub use rabbitmq::{BrokerClient, BrokerError};
