use chrono::{DateTime, TimeZone, Utc};
use lapin::message::Delivery;
use serde::de::DeserializeOwned;
use std::str::Utf8Error;

/// Error type returned by message handlers. A failing handler gets its
/// delivery requeued.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// A message delivered to a consumer, detached from the underlying channel.
#[derive(Clone, Debug, PartialEq)]
pub struct IncomingMessage {
    pub body: Vec<u8>,
    pub exchange: String,
    pub routing_key: String,
    pub delivery_tag: u64,
    pub redelivered: bool,
    pub content_type: Option<String>,
    pub message_id: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl IncomingMessage {
    /// Creates a bare message, mostly useful when driving handlers directly.
    pub fn new(routing_key: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        IncomingMessage {
            body: body.into(),
            exchange: String::new(),
            routing_key: routing_key.into(),
            delivery_tag: 0,
            redelivered: false,
            content_type: None,
            message_id: None,
            timestamp: None,
        }
    }

    pub fn body_str(&self) -> Result<&str, Utf8Error> {
        std::str::from_utf8(&self.body)
    }

    /// Decodes the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    pub fn is_json(&self) -> bool {
        self.content_type.as_deref() == Some("application/json")
    }
}

impl From<&Delivery> for IncomingMessage {
    fn from(delivery: &Delivery) -> Self {
        let properties = &delivery.properties;
        IncomingMessage {
            body: delivery.data.clone(),
            exchange: delivery.exchange.as_str().to_string(),
            routing_key: delivery.routing_key.as_str().to_string(),
            delivery_tag: delivery.delivery_tag,
            redelivered: delivery.redelivered,
            content_type: properties.content_type().as_ref().map(|s| s.as_str().to_string()),
            message_id: properties.message_id().as_ref().map(|s| s.as_str().to_string()),
            timestamp: (*properties.timestamp())
                .and_then(|secs| Utc.timestamp_opt(secs as i64, 0).single()),
        }
    }
}

/// Callback registered against a queue; invoked once per delivery.
pub trait MessageHandler: Send + Sync {
    fn handle(&self, message: &IncomingMessage) -> Result<(), HandlerError>;
}

impl<F> MessageHandler for F
where
    F: Fn(&IncomingMessage) -> Result<(), HandlerError> + Send + Sync,
{
    fn handle(&self, message: &IncomingMessage) -> Result<(), HandlerError> {
        self(message)
    }
}
