// src/rabbitmq/broker_client.rs

use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::amqp_client::{AmqpConnector, AmqpSession, ConnectionParams, Durability, ExchangeType};
use super::channel_manager::LapinConnector;
use super::errors::{BrokerError, Result};
use crate::config::BrokerConfig;
use crate::message::MessageHandler;

/// Binding pattern used when a queue is bound without explicit routing keys.
pub const DEFAULT_BINDING: &str = "#";

/// Lower bound for a single wait inside [`BrokerClient::listen_while`].
pub const MIN_WAIT: Duration = Duration::from_secs(1);

/// Joins routing key segments with `.`; no segments gives the empty key.
pub fn routing_key(parts: &[&str]) -> String {
    parts.join(".")
}

/// Publishes to and consumes from a single durable topic exchange.
///
/// Nothing touches the network until [`start`](Self::start). The session is
/// closed by [`close`](Self::close), or on drop if still open.
pub struct BrokerClient<C: AmqpConnector = LapinConnector> {
    params: ConnectionParams,
    exchange: String,
    connector: C,
    session: Option<C::Session>,
}

impl BrokerClient<LapinConnector> {
    pub fn new(host: &str, port: u16, user: &str, password: &str, exchange: &str) -> Self {
        Self::with_connector(
            LapinConnector::new(),
            ConnectionParams::new(host, port, user, password),
            exchange,
        )
    }

    pub fn from_config(config: &BrokerConfig) -> Self {
        Self::with_connector(
            LapinConnector::new(),
            config.connection_params(),
            &config.exchange.name,
        )
    }
}

impl<C: AmqpConnector> BrokerClient<C> {
    pub fn with_connector(connector: C, params: ConnectionParams, exchange: &str) -> Self {
        Self {
            params,
            exchange: exchange.to_string(),
            connector,
            session: None,
        }
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    pub fn params(&self) -> &ConnectionParams {
        &self.params
    }

    pub fn is_started(&self) -> bool {
        self.session.is_some()
    }

    /// The open session, if [`start`](Self::start) has succeeded.
    pub fn session(&self) -> Option<&C::Session> {
        self.session.as_ref()
    }

    /// Connects and declares the exchange. No-op while a session is held.
    pub async fn start(&mut self) -> Result<()> {
        if self.session.is_some() {
            return Ok(());
        }

        let mut session = self.connector.connect(&self.params).await?;
        if let Err(e) = session
            .exchange_declare(&self.exchange, ExchangeType::Topic, Durability::PERSISTENT)
            .await
        {
            if let Err(close_err) = session.close().await {
                warn!(exchange = %self.exchange, "Failed to close session after declare error: {}", close_err);
            }
            return Err(e);
        }

        info!(
            address = %self.params.address(),
            exchange = %self.exchange,
            kind = ExchangeType::Topic.as_str(),
            "Broker session started"
        );
        self.session = Some(session);
        Ok(())
    }

    /// Closes the channel and then the connection. Safe to call when nothing is open.
    pub async fn close(&mut self) -> Result<()> {
        match self.session.take() {
            Some(mut session) => {
                info!(exchange = %self.exchange, "Closing broker session");
                session.close().await
            }
            None => Ok(()),
        }
    }

    /// Fails unless a session is open, connected, and not flow-blocked.
    pub fn check_connection(&self) -> Result<()> {
        let session = self.session.as_ref().ok_or(BrokerError::ChannelClosed)?;
        if !session.is_connected() {
            return Err(BrokerError::ChannelClosed);
        }
        if session.is_blocked() {
            return Err(BrokerError::ConnectionBlocked);
        }
        Ok(())
    }

    fn ready_session(&mut self) -> Result<&mut C::Session> {
        self.check_connection()?;
        self.session.as_mut().ok_or(BrokerError::ChannelClosed)
    }

    /// Publishes `data` under the routing key built from `routing_parts`.
    pub async fn publish(&mut self, data: impl AsRef<[u8]>, routing_parts: &[&str]) -> Result<()> {
        self.send(data.as_ref(), routing_parts, None).await
    }

    /// Like [`publish`](Self::publish) with a JSON-encoded body.
    pub async fn publish_json<T: Serialize>(
        &mut self,
        value: &T,
        routing_parts: &[&str],
    ) -> Result<()> {
        let body = serde_json::to_vec(value)?;
        self.send(&body, routing_parts, Some("application/json"))
            .await
    }

    async fn send(
        &mut self,
        body: &[u8],
        routing_parts: &[&str],
        content_type: Option<&str>,
    ) -> Result<()> {
        let key = routing_key(routing_parts);
        let exchange = self.exchange.clone();
        let session = self.ready_session()?;

        session
            .basic_publish(&exchange, &key, body, content_type)
            .await?;

        debug!(exchange = %exchange, routing_key = %key, bytes = body.len(), "Published message");
        Ok(())
    }

    /// Declares `queue`, binds it once per routing key, and registers `handler`
    /// as its consumer. An empty `routing_keys` binds [`DEFAULT_BINDING`].
    ///
    /// Deliveries are only dispatched while [`listen`](Self::listen) runs.
    pub async fn queue_bind<H>(
        &mut self,
        handler: H,
        queue: &str,
        routing_keys: &[&str],
    ) -> Result<String>
    where
        H: MessageHandler + 'static,
    {
        let exchange = self.exchange.clone();
        let session = self.ready_session()?;

        session.queue_declare(queue, Durability::PERSISTENT).await?;

        let keys: &[&str] = if routing_keys.is_empty() {
            &[DEFAULT_BINDING]
        } else {
            routing_keys
        };
        for key in keys {
            session.queue_bind(queue, &exchange, key).await?;
            info!(queue = %queue, exchange = %exchange, routing_key = %key, "Queue bound");
        }

        session.basic_consume(queue, Box::new(handler)).await
    }

    /// Binds `queue` to everything published on the exchange.
    pub async fn queue<H>(&mut self, handler: H, queue: &str) -> Result<String>
    where
        H: MessageHandler + 'static,
    {
        self.queue_bind(handler, queue, &[]).await
    }

    /// Consumes until no consumer is left.
    pub async fn listen(&mut self) -> Result<()> {
        self.listen_while(|| true).await
    }

    /// Consumes while `keep_going` returns true and a consumer is registered.
    ///
    /// `keep_going` is polled before every wait; each wait lasts at most
    /// `max(read_timeout, 1s)`. Timeouts and empty reads just loop again.
    pub async fn listen_while<P>(&mut self, mut keep_going: P) -> Result<()>
    where
        P: FnMut() -> bool,
    {
        let session = self.ready_session()?;
        let timeout = session.read_timeout().max(MIN_WAIT);

        while keep_going() && session.is_consuming() {
            match session.wait(timeout).await {
                Ok(()) => {}
                Err(e) if e.is_idle() => {
                    debug!("Wait returned without a delivery: {}", e);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }
}

impl<C: AmqpConnector> Drop for BrokerClient<C> {
    fn drop(&mut self) {
        if self.session.is_none() {
            return;
        }
        if let Err(e) = futures::executor::block_on(self.close()) {
            warn!(exchange = %self.exchange, "Failed to close broker session on drop: {}", e);
        }
    }
}
