//! Sink that only records delivery metadata.
//!
//! Selected when no broker is configured. Payload bytes are never written to
//! the log, only their length and content digest.

use async_trait::async_trait;
use tracing::info;

use super::{Sink, SinkError};
use crate::dispatch::Delivery;

#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl Sink for LogSink {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn deliver(&self, delivery: &Delivery) -> Result<(), SinkError> {
        info!(
            digest = %delivery.digest(),
            body_length = delivery.len(),
            queued_ms = delivery.received_at().elapsed().as_millis() as u64,
            "log_sink_delivered"
        );
        Ok(())
    }
}
