// Live broker checks. Run with `cargo test -- --ignored` against a local RabbitMQ.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use topic_broker::config::BrokerConfig;
use topic_broker::env::apply_env_overrides;
use topic_broker::rabbitmq::BrokerClient;
use topic_broker::{HandlerError, IncomingMessage};

fn live_config() -> BrokerConfig {
    let mut config = BrokerConfig::default();
    config.exchange.name = format!("topic_broker_test_{}", uuid::Uuid::new_v4());
    apply_env_overrides(&mut config).expect("invalid AMQP_* environment");
    config
}

#[tokio::test]
#[ignore] // Ignore by default as it requires a running RabbitMQ instance
async fn test_connection_establishes() {
    let mut client = BrokerClient::from_config(&live_config());

    client.start().await.expect("broker should accept the connection");
    assert!(client.check_connection().is_ok());

    client.close().await.unwrap();
    assert!(!client.is_started());
}

#[tokio::test]
#[ignore] // Ignore by default as it requires a running RabbitMQ instance
async fn test_publish_and_consume_roundtrip() {
    let mut client = BrokerClient::from_config(&live_config());
    client.start().await.unwrap();

    let queue = format!("topic_broker_test_{}", uuid::Uuid::new_v4());
    let received = Arc::new(AtomicBool::new(false));
    let flag = received.clone();
    client
        .queue_bind(
            move |message: &IncomingMessage| -> Result<(), HandlerError> {
                assert_eq!(message.body, b"ping");
                flag.store(true, Ordering::SeqCst);
                Ok(())
            },
            &queue,
            &["test.*"],
        )
        .await
        .unwrap();

    client.publish("ping", &["test", "ping"]).await.unwrap();

    let mut polls = 0;
    client
        .listen_while(|| {
            polls += 1;
            polls <= 5 && !received.load(Ordering::SeqCst)
        })
        .await
        .unwrap();

    assert!(received.load(Ordering::SeqCst));
    client.close().await.unwrap();
}
