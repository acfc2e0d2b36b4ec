use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

use topic_broker::rabbitmq::{BrokerClient, BrokerError, ConnectionParams, Durability, ExchangeType};
use topic_broker::{HandlerError, IncomingMessage};

use crate::in_memory::{topic_matches, InMemoryBroker};

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct OrderCreated {
    order_id: String,
    total: f64,
}

fn client(broker: &InMemoryBroker) -> BrokerClient<InMemoryBroker> {
    BrokerClient::with_connector(
        broker.clone(),
        ConnectionParams::new("localhost", 5672, "guest", "guest"),
        "shop",
    )
}

/// Collects routing keys and bodies seen by a handler.
fn recorder() -> (
    Arc<Mutex<Vec<(String, String)>>>,
    impl Fn(&IncomingMessage) -> Result<(), HandlerError> + Send + Sync + 'static,
) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let handler = move |message: &IncomingMessage| -> Result<(), HandlerError> {
        sink.lock()
            .unwrap()
            .push((message.routing_key.clone(), message.body_str()?.to_string()));
        Ok(())
    };
    (seen, handler)
}

#[test]
fn test_topic_patterns() {
    assert!(topic_matches("#", "order.created"));
    assert!(topic_matches("#", ""));
    assert!(topic_matches("order.*", "order.created"));
    assert!(!topic_matches("order.*", "order.created.eu"));
    assert!(topic_matches("order.#", "order.created.eu"));
    assert!(topic_matches("*.created", "user.created"));
    assert!(!topic_matches("order.created", "order.paid"));
}

#[tokio::test]
async fn test_start_declares_durable_topic_exchange_once() {
    let broker = InMemoryBroker::default();
    let mut client = client(&broker);

    client.start().await.unwrap();
    client.start().await.unwrap();

    let state = broker.state.lock().unwrap();
    assert_eq!(state.connections, 1);
    assert_eq!(
        state.exchanges.get("shop"),
        Some(&(ExchangeType::Topic, Durability::PERSISTENT))
    );
}

#[tokio::test]
async fn test_refused_connection_surfaces_as_connection_error() {
    let broker = InMemoryBroker::default();
    broker.state.lock().unwrap().refuse_connections = true;
    let mut client = client(&broker);

    match client.start().await {
        Err(BrokerError::ConnectionError(msg)) => assert!(msg.contains("localhost:5672")),
        other => panic!("expected a connection error, got {:?}", other.map(|_| ())),
    }
    assert!(!client.is_started());
}

#[tokio::test]
async fn test_failed_exchange_declare_closes_session() {
    let broker = InMemoryBroker::default();
    broker
        .state
        .lock()
        .unwrap()
        .exchanges
        .insert("shop".to_string(), (ExchangeType::Fanout, Durability::PERSISTENT));

    {
        let mut client = client(&broker);
        let err = client.start().await.unwrap_err();
        assert!(matches!(err, BrokerError::ChannelError(_)));
        assert!(!client.is_started());
        assert_eq!(broker.state.lock().unwrap().closed_sessions, 1);
    }

    let state = broker.state.lock().unwrap();
    assert_eq!(state.connections, 1);
    assert_eq!(state.closed_sessions, 1);
}

#[tokio::test]
async fn test_published_messages_reach_matching_queues_only() {
    let broker = InMemoryBroker::default();
    let mut client = client(&broker);
    client.start().await.unwrap();

    let (orders_seen, orders_handler) = recorder();
    let (users_seen, users_handler) = recorder();
    client
        .queue_bind(orders_handler, "orders", &["order.*"])
        .await
        .unwrap();
    client
        .queue_bind(users_handler, "users", &["user.#"])
        .await
        .unwrap();

    client.publish("o-1", &["order", "created"]).await.unwrap();
    client.publish("u-1", &["user", "signup", "eu"]).await.unwrap();
    client.publish("ignored", &["invoice", "sent"]).await.unwrap();

    let mut remaining = 2;
    client
        .listen_while(|| {
            remaining -= 1;
            remaining >= 0
        })
        .await
        .unwrap();

    assert_eq!(
        *orders_seen.lock().unwrap(),
        vec![("order.created".to_string(), "o-1".to_string())]
    );
    assert_eq!(
        *users_seen.lock().unwrap(),
        vec![("user.signup.eu".to_string(), "u-1".to_string())]
    );
    assert_eq!(broker.state.lock().unwrap().acked, 2);
}

#[tokio::test]
async fn test_default_queue_receives_everything() {
    let broker = InMemoryBroker::default();
    let mut client = client(&broker);
    client.start().await.unwrap();

    let (seen, handler) = recorder();
    client.queue(handler, "audit").await.unwrap();
    client.publish("a", &["order", "created"]).await.unwrap();
    client.publish("b", &[]).await.unwrap();

    let mut polls = 0;
    client
        .listen_while(|| {
            polls += 1;
            polls <= 3
        })
        .await
        .unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[1], (String::new(), "b".to_string()));

    let state = broker.state.lock().unwrap();
    assert_eq!(
        state.bindings,
        vec![("audit".to_string(), "shop".to_string(), "#".to_string())]
    );
}

#[tokio::test]
async fn test_json_roundtrip_through_queue() {
    let broker = InMemoryBroker::default();
    let mut client = client(&broker);
    client.start().await.unwrap();

    let received = Arc::new(Mutex::new(None));
    let slot = received.clone();
    client
        .queue_bind(
            move |message: &IncomingMessage| -> Result<(), HandlerError> {
                assert!(message.is_json());
                *slot.lock().unwrap() = Some(message.json::<OrderCreated>()?);
                Ok(())
            },
            "orders",
            &["order.created"],
        )
        .await
        .unwrap();

    let order = OrderCreated {
        order_id: "A-42".to_string(),
        total: 99.5,
    };
    client
        .publish_json(&order, &["order", "created"])
        .await
        .unwrap();

    let mut once = true;
    client
        .listen_while(|| std::mem::replace(&mut once, false))
        .await
        .unwrap();

    assert_eq!(received.lock().unwrap().take(), Some(order));
}

#[tokio::test]
async fn test_failing_handler_requeues_without_stopping_listen() {
    let broker = InMemoryBroker::default();
    let mut client = client(&broker);
    client.start().await.unwrap();

    let attempts = Arc::new(Mutex::new(Vec::new()));
    let log = attempts.clone();
    client
        .queue(
            move |message: &IncomingMessage| -> Result<(), HandlerError> {
                log.lock().unwrap().push(message.redelivered);
                if !message.redelivered {
                    return Err("transient failure".into());
                }
                Ok(())
            },
            "work",
        )
        .await
        .unwrap();
    client.publish("job", &["job", "run"]).await.unwrap();

    let mut polls = 0;
    client
        .listen_while(|| {
            polls += 1;
            polls <= 3
        })
        .await
        .unwrap();

    assert_eq!(*attempts.lock().unwrap(), vec![false, true]);
    let state = broker.state.lock().unwrap();
    assert_eq!(state.requeued, 1);
    assert_eq!(state.acked, 1);
    drop(state);
    assert_eq!(broker.queued("work"), 0);
}

#[tokio::test]
async fn test_blocked_broker_rejects_operations() {
    let broker = InMemoryBroker::default();
    let mut client = client(&broker);
    client.start().await.unwrap();
    broker.state.lock().unwrap().blocked = true;

    let (_, handler) = recorder();
    assert!(matches!(
        client.publish("x", &["a"]).await,
        Err(BrokerError::ConnectionBlocked)
    ));
    assert!(matches!(
        client.queue(handler, "audit").await,
        Err(BrokerError::ConnectionBlocked)
    ));
    assert!(matches!(
        client.listen().await,
        Err(BrokerError::ConnectionBlocked)
    ));

    broker.state.lock().unwrap().blocked = false;
    client.publish("x", &["a"]).await.unwrap();
}

#[tokio::test]
async fn test_operations_after_close_fail_and_restart_reconnects() {
    let broker = InMemoryBroker::default();
    let mut client = client(&broker);
    client.start().await.unwrap();
    client.close().await.unwrap();

    assert!(matches!(
        client.publish("x", &["a"]).await,
        Err(BrokerError::ChannelClosed)
    ));

    client.start().await.unwrap();
    client.publish("x", &["a"]).await.unwrap();

    let state = broker.state.lock().unwrap();
    assert_eq!(state.connections, 2);
    assert_eq!(state.closed_sessions, 1);
}

#[tokio::test]
async fn test_dropping_client_closes_session() {
    let broker = InMemoryBroker::default();
    {
        let mut client = client(&broker);
        client.start().await.unwrap();
        let (_, handler) = recorder();
        client.queue(handler, "audit").await.unwrap();
    }
    assert_eq!(broker.state.lock().unwrap().closed_sessions, 1);
}
