//! wsp-webhook server - WhatsApp Cloud API webhook receiver.
//!
//! This binary provides a thin, fast web server that:
//! - Answers the subscription verification handshake
//! - Verifies `X-Hub-Signature-256` on every event delivery
//! - Acknowledges immediately and hands raw payloads to the sink
//!
//! Startup fails when `VERIFY_TOKEN` or `APP_SECRET` is missing.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::{net::TcpListener, signal};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use wsp::{router, AmqpSink, AppState, Config, Dispatcher, LogSink, Sink};

#[tokio::main]
async fn main() -> Result<()> {
    // Variables already in the environment win over .env
    let dotenv = dotenvy::dotenv().ok();

    // Initialize structured JSON logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    info!(dotenv_loaded = dotenv.is_some(), "web_server_starting");

    let config = Config::from_env().context("Invalid configuration")?;
    info!(
        port = config.port,
        webhook_path = %config.webhook_path,
        max_body_bytes = config.max_body_bytes,
        dispatch_queue_capacity = config.dispatch_queue_capacity,
        dispatch_concurrency = config.dispatch_concurrency,
        amqp_configured = config.cloudamqp_url.is_some(),
        "config_loaded"
    );

    let sink: Arc<dyn Sink> = match &config.cloudamqp_url {
        Some(url) => Arc::new(AmqpSink::new(url.clone(), config.sink_queue.clone())),
        None => Arc::new(LogSink),
    };
    info!(sink = sink.name(), "sink_selected");

    let (dispatcher, worker) = Dispatcher::start(
        sink,
        config.dispatch_queue_capacity,
        config.dispatch_concurrency,
    );

    let port = config.port;
    let shutdown_grace = config.shutdown_grace;
    let app = router(AppState::new(config, dispatcher));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!(address = %addr, "web_server_listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // Give accepted deliveries a bounded chance to reach the sink
    worker.shutdown(shutdown_grace).await;

    info!("web_server_shutdown_complete");

    Ok(())
}

/// Create a future that completes when a shutdown signal is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }

    info!("web_server_shutting_down");
}
