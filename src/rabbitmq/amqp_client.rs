// src/rabbitmq/amqp_client.rs

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

use super::errors::Result;
use crate::message::MessageHandler;

/// Everything needed to open a connection; carries no live resources.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub vhost: String,
    pub heartbeat: Duration,
    pub connection_timeout: Duration,
    pub read_timeout: Duration,
}

impl ConnectionParams {
    pub fn new(host: &str, port: u16, user: &str, password: &str) -> Self {
        Self {
            host: host.to_string(),
            port,
            user: user.to_string(),
            password: password.to_string(),
            vhost: "/".to_string(),
            heartbeat: Duration::from_secs(30),
            connection_timeout: Duration::from_millis(5000),
            read_timeout: Duration::from_secs(3),
        }
    }

    /// `host:port` as used in log lines.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// Keep the password out of logs.
impl fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionParams")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"***")
            .field("vhost", &self.vhost)
            .field("heartbeat", &self.heartbeat)
            .field("connection_timeout", &self.connection_timeout)
            .field("read_timeout", &self.read_timeout)
            .finish()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExchangeType {
    Direct,
    Fanout,
    Topic,
    Headers,
}

impl ExchangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeType::Direct => "direct",
            ExchangeType::Fanout => "fanout",
            ExchangeType::Topic => "topic",
            ExchangeType::Headers => "headers",
        }
    }
}

impl From<ExchangeType> for lapin::ExchangeKind {
    fn from(kind: ExchangeType) -> Self {
        match kind {
            ExchangeType::Direct => lapin::ExchangeKind::Direct,
            ExchangeType::Fanout => lapin::ExchangeKind::Fanout,
            ExchangeType::Topic => lapin::ExchangeKind::Topic,
            ExchangeType::Headers => lapin::ExchangeKind::Headers,
        }
    }
}

/// Lifetime flags shared by exchange and queue declarations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Durability {
    pub durable: bool,
    pub auto_delete: bool,
}

impl Durability {
    /// Survives broker restarts and is never removed automatically.
    pub const PERSISTENT: Durability = Durability {
        durable: true,
        auto_delete: false,
    };
}

/// Opens sessions against a broker.
#[async_trait]
pub trait AmqpConnector: Send + Sync {
    type Session: AmqpSession;

    /// Connects, negotiates, and opens a single channel.
    async fn connect(&self, params: &ConnectionParams) -> Result<Self::Session>;
}

/// One connection plus the one channel opened on it.
#[async_trait]
pub trait AmqpSession: Send {
    async fn exchange_declare(
        &mut self,
        exchange: &str,
        kind: ExchangeType,
        durability: Durability,
    ) -> Result<()>;

    async fn queue_declare(&mut self, queue: &str, durability: Durability) -> Result<()>;

    async fn queue_bind(&mut self, queue: &str, exchange: &str, routing_key: &str) -> Result<()>;

    /// Sends without waiting for a publisher confirm.
    async fn basic_publish(
        &mut self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
        content_type: Option<&str>,
    ) -> Result<()>;

    /// Registers `handler` as a consumer of `queue`; returns the consumer tag.
    async fn basic_consume(
        &mut self,
        queue: &str,
        handler: Box<dyn MessageHandler>,
    ) -> Result<String>;

    /// Waits up to `timeout` for the next delivery and dispatches it.
    /// Fails with `Timeout` when nothing arrived in time.
    async fn wait(&mut self, timeout: Duration) -> Result<()>;

    fn is_consuming(&self) -> bool;

    fn is_connected(&self) -> bool;

    fn is_blocked(&self) -> bool;

    fn read_timeout(&self) -> Duration;

    /// Closes the channel, then the connection. Parts already gone are skipped.
    async fn close(&mut self) -> Result<()>;
}
