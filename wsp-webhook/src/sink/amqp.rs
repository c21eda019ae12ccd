//! RabbitMQ sink for validated payloads.
//!
//! Publishes the raw body bytes, untouched, to a durable queue. The message
//! ID is the body's SHA-256 digest so consumers can deduplicate redeliveries
//! without parsing the payload.

use std::sync::Arc;

use async_trait::async_trait;
use lapin::{
    options::{BasicPublishOptions, ConfirmSelectOptions, QueueDeclareOptions},
    publisher_confirm::Confirmation,
    types::FieldTable,
    BasicProperties, Channel, Connection, ConnectionProperties,
};
use tokio::sync::RwLock;
use tracing::{info, warn};

use super::{Sink, SinkError};
use crate::dispatch::Delivery;

/// RabbitMQ sink with lazy connection management.
///
/// The connection is opened on first delivery and reopened whenever the
/// channel is found disconnected.
#[derive(Clone)]
pub struct AmqpSink {
    inner: Arc<AmqpSinkInner>,
}

struct AmqpSinkInner {
    url: String,
    queue: String,
    connection: RwLock<Option<Connection>>,
    channel: RwLock<Option<Channel>>,
}

impl AmqpSink {
    /// Create a sink publishing to `queue` on the broker at `url`.
    pub fn new(url: impl Into<String>, queue: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(AmqpSinkInner {
                url: url.into(),
                queue: queue.into(),
                connection: RwLock::new(None),
                channel: RwLock::new(None),
            }),
        }
    }

    /// Queue name payloads are published to.
    pub fn queue(&self) -> &str {
        &self.inner.queue
    }

    /// Ensure we have a valid connection and channel.
    async fn ensure_connected(&self) -> Result<Channel, SinkError> {
        {
            let channel = self.inner.channel.read().await;
            if let Some(ch) = channel.as_ref() {
                if ch.status().connected() {
                    return Ok(ch.clone());
                }
            }
        }

        let mut connection = self.inner.connection.write().await;
        let mut channel = self.inner.channel.write().await;

        // Another task may have reconnected while we waited for the locks
        if let Some(ch) = channel.as_ref() {
            if ch.status().connected() {
                return Ok(ch.clone());
            }
        }

        info!("amqp_sink_connecting");

        let conn = Connection::connect(&self.inner.url, ConnectionProperties::default())
            .await
            .map_err(|e| SinkError::Connect(e.to_string()))?;

        let ch = conn
            .create_channel()
            .await
            .map_err(|e| SinkError::Connect(e.to_string()))?;

        ch.confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| SinkError::Connect(e.to_string()))?;

        ch.queue_declare(
            &self.inner.queue,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(|e| SinkError::Connect(e.to_string()))?;

        info!(queue = %self.inner.queue, "amqp_sink_connected");

        *connection = Some(conn);
        *channel = Some(ch.clone());

        Ok(ch)
    }
}

#[async_trait]
impl Sink for AmqpSink {
    fn name(&self) -> &'static str {
        "amqp"
    }

    async fn deliver(&self, delivery: &Delivery) -> Result<(), SinkError> {
        let channel = self.ensure_connected().await?;

        let confirmation = channel
            .basic_publish(
                "",
                &self.inner.queue,
                BasicPublishOptions::default(),
                delivery.body(),
                BasicProperties::default()
                    .with_delivery_mode(2) // Persistent
                    .with_content_type("application/json".into())
                    .with_message_id(delivery.digest().into()),
            )
            .await
            .map_err(|e| SinkError::Publish(e.to_string()))?
            .await
            .map_err(|e| SinkError::Publish(e.to_string()))?;

        if let Confirmation::Nack(_) = confirmation {
            return Err(SinkError::Rejected(format!(
                "broker nacked message {}",
                delivery.digest()
            )));
        }

        info!(
            queue = %self.inner.queue,
            digest = %delivery.digest(),
            body_length = delivery.len(),
            "amqp_sink_published"
        );

        Ok(())
    }

    async fn close(&self) {
        let mut connection = self.inner.connection.write().await;
        let mut channel = self.inner.channel.write().await;

        if let Some(ch) = channel.take() {
            if let Err(e) = ch.close(200, "Normal shutdown").await {
                warn!(error = %e, "amqp_sink_channel_close_error");
            }
        }

        if let Some(conn) = connection.take() {
            if let Err(e) = conn.close(200, "Normal shutdown").await {
                warn!(error = %e, "amqp_sink_connection_close_error");
            }
        }

        info!("amqp_sink_closed");
    }
}
