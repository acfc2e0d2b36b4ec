use anyhow::{anyhow, Context, Result};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use topic_broker::config::{self, BrokerConfig};
use topic_broker::env::apply_env_overrides;
use topic_broker::{BrokerClient, HandlerError, IncomingMessage};

const USAGE: &str = "usage:
  topic-broker publish <routing.key> <body>
  topic-broker listen <queue> [pattern...]
  topic-broker init-config [path]";

fn load_settings() -> Result<BrokerConfig> {
    let mut config = match config::find_config_file() {
        Ok(path) => config::load_config_from(&path)?,
        Err(e) => {
            debug!("{}; using built-in defaults", e);
            BrokerConfig::default()
        }
    };
    apply_env_overrides(&mut config)?;
    Ok(config)
}

async fn publish(client: &mut BrokerClient, args: &[String]) -> Result<()> {
    let (key, body) = match args {
        [key, body] => (key, body),
        _ => return Err(anyhow!(USAGE)),
    };
    let parts: Vec<&str> = key.split('.').collect();

    client.publish(body, &parts).await?;
    info!(routing_key = %key, "Message published");
    Ok(())
}

async fn listen(client: &mut BrokerClient, args: &[String]) -> Result<()> {
    let (queue, patterns) = args.split_first().ok_or_else(|| anyhow!(USAGE))?;
    let patterns: Vec<&str> = patterns.iter().map(String::as_str).collect();

    let print = |message: &IncomingMessage| -> Result<(), HandlerError> {
        println!("[{}] {}", message.routing_key, message.body_str()?);
        Ok(())
    };
    client.queue_bind(print, queue, &patterns).await?;

    let running = Arc::new(AtomicBool::new(true));
    let flag = running.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
            flag.store(false, Ordering::SeqCst);
        }
    });

    info!(queue = %queue, "Listening. Press Ctrl+C to exit.");
    client
        .listen_while(|| running.load(Ordering::SeqCst))
        .await?;
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (command, rest) = args.split_first().ok_or_else(|| anyhow!(USAGE))?;

    if command == "init-config" {
        let path = rest
            .first()
            .map(String::as_str)
            .unwrap_or(config::CONFIG_FILE_NAME);
        return config::create_default_config_file(Path::new(path));
    }

    let config = load_settings()?;
    let mut client = BrokerClient::from_config(&config);
    client
        .start()
        .await
        .context(format!("Failed to start session on {}", config.connection_params().address()))?;

    let outcome = match command.as_str() {
        "publish" => publish(&mut client, rest).await,
        "listen" => listen(&mut client, rest).await,
        _ => Err(anyhow!(USAGE)),
    };

    let closed = client.close().await;
    finish(outcome, closed)
}

/// The command's own failure takes precedence over a failed close.
fn finish(outcome: Result<()>, closed: topic_broker::rabbitmq::Result<()>) -> Result<()> {
    match (outcome, closed) {
        (Err(e), Err(close_err)) => {
            warn!("Failed to close broker client: {}", close_err);
            Err(e)
        }
        (Err(e), Ok(())) => Err(e),
        (Ok(()), closed) => closed.context("Failed to close broker client"),
    }
}
