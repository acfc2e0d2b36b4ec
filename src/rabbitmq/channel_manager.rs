// src/rabbitmq/channel_manager.rs
// lapin-backed implementation of the connector/session traits.

use async_trait::async_trait;
use futures::future::select_all;
use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
    ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::uri::{AMQPAuthority, AMQPQueryString, AMQPUri, AMQPUserInfo};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::amqp_client::{AmqpConnector, AmqpSession, ConnectionParams, Durability, ExchangeType};
use super::errors::{BrokerError, Result};
use crate::message::{IncomingMessage, MessageHandler};

/// Opens real broker connections through lapin.
#[derive(Clone, Default)]
pub struct LapinConnector {
    properties: ConnectionProperties,
}

impl LapinConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_properties(properties: ConnectionProperties) -> Self {
        Self { properties }
    }
}

fn amqp_uri(params: &ConnectionParams) -> AMQPUri {
    AMQPUri {
        authority: AMQPAuthority {
            userinfo: AMQPUserInfo {
                username: params.user.clone(),
                password: params.password.clone(),
            },
            host: params.host.clone(),
            port: params.port,
        },
        vhost: params.vhost.clone(),
        query: AMQPQueryString {
            heartbeat: Some(params.heartbeat.as_secs().min(u16::MAX as u64) as u16),
            connection_timeout: Some(params.connection_timeout.as_millis() as u64),
            ..AMQPQueryString::default()
        },
        ..AMQPUri::default()
    }
}

#[async_trait]
impl AmqpConnector for LapinConnector {
    type Session = LapinSession;

    async fn connect(&self, params: &ConnectionParams) -> Result<LapinSession> {
        info!(address = %params.address(), vhost = %params.vhost, "Connecting to RabbitMQ");

        let connection = Connection::connect_uri(amqp_uri(params), self.properties.clone())
            .await
            .map_err(|e| BrokerError::connection("Failed to connect", e))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| BrokerError::connection("Failed to create channel", e))?;

        debug!(channel_id = channel.id(), "Channel opened");

        Ok(LapinSession {
            connection,
            channel,
            consumers: Vec::new(),
            read_timeout: params.read_timeout,
        })
    }
}

struct ConsumerSlot {
    tag: String,
    queue: String,
    consumer: Consumer,
    handler: Box<dyn MessageHandler>,
    active: bool,
}

/// A lapin connection with the single channel the client works on.
pub struct LapinSession {
    connection: Connection,
    channel: Channel,
    consumers: Vec<ConsumerSlot>,
    read_timeout: Duration,
}

impl LapinSession {
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    async fn dispatch(
        &mut self,
        index: usize,
        next: Option<lapin::Result<Delivery>>,
    ) -> Result<()> {
        let slot = &mut self.consumers[index];

        let delivery = match next {
            None => {
                info!(queue = %slot.queue, consumer_tag = %slot.tag, "Consumer cancelled");
                slot.active = false;
                return Ok(());
            }
            Some(Err(e)) => return Err(BrokerError::Amqp(e)),
            Some(Ok(delivery)) => delivery,
        };

        let message = IncomingMessage::from(&delivery);
        debug!(
            queue = %slot.queue,
            routing_key = %message.routing_key,
            delivery_tag = message.delivery_tag,
            "Dispatching delivery"
        );

        match slot.handler.handle(&message) {
            Ok(()) => delivery
                .ack(BasicAckOptions::default())
                .await
                .map(|_| ())
                .map_err(|e| BrokerError::AckError(e.to_string())),
            Err(e) => {
                error!(queue = %slot.queue, "Error processing message: {}", e);
                delivery
                    .nack(BasicNackOptions {
                        requeue: true,
                        ..BasicNackOptions::default()
                    })
                    .await
                    .map(|_| ())
                    .map_err(|e| BrokerError::AckError(e.to_string()))
            }
        }
    }
}

/// Bare bodies go out with default properties; typed bodies also get a
/// message id and a timestamp.
fn publish_properties(content_type: Option<&str>) -> BasicProperties {
    match content_type {
        None => BasicProperties::default(),
        Some(content_type) => BasicProperties::default()
            .with_content_type(content_type.into())
            .with_message_id(Uuid::new_v4().to_string().into())
            .with_timestamp(chrono::Utc::now().timestamp() as u64),
    }
}

#[async_trait]
impl AmqpSession for LapinSession {
    async fn exchange_declare(
        &mut self,
        exchange: &str,
        kind: ExchangeType,
        durability: Durability,
    ) -> Result<()> {
        self.channel
            .exchange_declare(
                exchange,
                kind.into(),
                ExchangeDeclareOptions {
                    durable: durability.durable,
                    auto_delete: durability.auto_delete,
                    ..ExchangeDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::channel("Failed to declare exchange", e))
    }

    async fn queue_declare(&mut self, queue: &str, durability: Durability) -> Result<()> {
        let declared = self
            .channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: durability.durable,
                    auto_delete: durability.auto_delete,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::channel("Failed to declare queue", e))?;

        debug!(queue = %queue, messages = declared.message_count(), "Queue declared");
        Ok(())
    }

    async fn queue_bind(&mut self, queue: &str, exchange: &str, routing_key: &str) -> Result<()> {
        self.channel
            .queue_bind(
                queue,
                exchange,
                routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::channel("Failed to bind queue", e))
    }

    async fn basic_publish(
        &mut self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
        content_type: Option<&str>,
    ) -> Result<()> {
        let properties = publish_properties(content_type);

        // No publisher confirm is awaited.
        self.channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                body,
                properties,
            )
            .await
            .map(|_| ())
            .map_err(|e| BrokerError::PublishError(e.to_string()))
    }

    async fn basic_consume(
        &mut self,
        queue: &str,
        handler: Box<dyn MessageHandler>,
    ) -> Result<String> {
        let tag = format!("consumer-{}", Uuid::new_v4());
        let consumer = self
            .channel
            .basic_consume(
                queue,
                &tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::ConsumeError(e.to_string()))?;

        info!(queue = %queue, consumer_tag = %tag, "Registered consumer");
        self.consumers.push(ConsumerSlot {
            tag: tag.clone(),
            queue: queue.to_string(),
            consumer,
            handler,
            active: true,
        });
        Ok(tag)
    }

    async fn wait(&mut self, timeout: Duration) -> Result<()> {
        if !self.is_consuming() {
            return Err(BrokerError::NoData);
        }

        let (index, next) = {
            let pending: Vec<_> = self
                .consumers
                .iter_mut()
                .enumerate()
                .filter(|(_, slot)| slot.active)
                .map(|(index, slot)| Box::pin(async move { (index, slot.consumer.next().await) }))
                .collect();

            match tokio::time::timeout(timeout, select_all(pending)).await {
                Ok(((index, next), _, _)) => (index, next),
                Err(_) => return Err(BrokerError::Timeout(timeout)),
            }
        };

        self.dispatch(index, next).await
    }

    fn is_consuming(&self) -> bool {
        self.consumers.iter().any(|slot| slot.active)
    }

    fn is_connected(&self) -> bool {
        self.connection.status().connected() && self.channel.status().connected()
    }

    fn is_blocked(&self) -> bool {
        self.connection.status().blocked()
    }

    fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    async fn close(&mut self) -> Result<()> {
        for slot in &mut self.consumers {
            slot.active = false;
        }

        let channel = &self.channel;
        let connection = &self.connection;
        close_in_order(
            async move {
                if !channel.status().connected() {
                    warn!("Channel already closed, skipping");
                    return Ok(());
                }
                channel
                    .close(200, "Closing channel")
                    .await
                    .map_err(|e| BrokerError::channel("Failed to close channel", e))
            },
            async move {
                if !connection.status().connected() {
                    return Ok(());
                }
                connection
                    .close(200, "Closing connection")
                    .await
                    .map_err(|e| BrokerError::connection("Failed to close connection", e))
            },
        )
        .await?;

        info!("RabbitMQ session closed");
        Ok(())
    }
}

/// Runs the channel step, then the connection step regardless of the first
/// outcome. Reports the first failure.
async fn close_in_order<A, B>(channel_step: A, connection_step: B) -> Result<()>
where
    A: Future<Output = Result<()>>,
    B: Future<Output = Result<()>>,
{
    let channel_result = channel_step.await;
    if let Err(e) = &channel_result {
        warn!("Closing the connection after a channel close failure: {}", e);
    }
    let connection_result = connection_step.await;
    channel_result.and(connection_result)
}
