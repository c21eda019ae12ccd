//! wsp-webhook - Receiver for the WhatsApp Cloud API webhook protocol.
//!
//! This library provides the pieces behind the `wsp-webhook` binary:
//! - `web`: verification handshake, signature check and acknowledgment
//! - `dispatch`: non-blocking handoff of validated payloads
//! - `sink`: downstream consumers (RabbitMQ, log)
//!
//! ## Architecture
//!
//! ```text
//! Platform → GET/POST /api/wsp/webhook → Dispatcher → Sink
//! ```

pub mod config;
pub mod dispatch;
pub mod sink;
pub mod web;

// Re-export commonly used types
pub use config::{Config, ConfigError};
pub use dispatch::{Delivery, DispatchWorker, Dispatcher};
pub use sink::{AmqpSink, LogSink, Sink, SinkError};
pub use web::{router, AppState};
