//! Downstream sinks for validated event payloads.
//!
//! A sink receives the raw, already-authenticated body bytes after the HTTP
//! acknowledgment has been produced. Sinks are expected to be idempotent per
//! message: the platform redelivers events it believes were lost, and the
//! webhook core does not track delivery IDs.
//!
//! ## Architecture
//!
//! ```text
//! Platform → Web Server → Dispatcher → Sink (RabbitMQ | log)
//! ```

pub mod amqp;
pub mod log;

use async_trait::async_trait;
use thiserror::Error;

use crate::dispatch::Delivery;

pub use amqp::AmqpSink;
pub use log::LogSink;

/// Errors a sink reports back to the dispatcher.
///
/// These never reach the HTTP caller; the dispatcher logs them.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink connection failed: {0}")]
    Connect(String),

    #[error("sink publish failed: {0}")]
    Publish(String),

    #[error("sink rejected delivery: {0}")]
    Rejected(String),
}

/// Consumer of validated payloads.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Short name used in log fields.
    fn name(&self) -> &'static str;

    /// Hand one delivery to the downstream system.
    async fn deliver(&self, delivery: &Delivery) -> Result<(), SinkError>;

    /// Release any held resources. Called once on shutdown.
    async fn close(&self) {}
}
