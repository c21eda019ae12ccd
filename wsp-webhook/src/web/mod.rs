//! Web server module for the webhook endpoint.
//!
//! A single path, dispatched by method:
//! - `GET`: subscription verification handshake
//! - `POST`: signed event delivery, acknowledged before any downstream work
//!
//! Validated payloads leave through the [`Dispatcher`](crate::dispatch::Dispatcher).

pub mod handlers;
pub mod signature;
pub mod verify;

pub use handlers::{health, receive_event, router, verify_webhook, AppState, HealthResponse};
pub use signature::{sign_hub_payload, verify_hub_signature, SIGNATURE_HEADER};
pub use verify::{verify_subscription, VerifyParams};
