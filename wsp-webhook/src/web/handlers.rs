//! Webhook endpoint handlers.
//!
//! The event handler does as little as possible before answering:
//! 1. Read the raw body
//! 2. Verify the `X-Hub-Signature-256` HMAC over exactly those bytes
//! 3. Acknowledge with `200 ok` and hand the body to the dispatcher
//!
//! The platform retries deliveries that are not acknowledged quickly, so
//! nothing downstream is awaited here.

use std::sync::Arc;

use axum::{
    body::{self, Body},
    extract::{RawQuery, State},
    http::{HeaderMap, Method, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use secrecy::ExposeSecret;
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::dispatch::{Delivery, Dispatcher};
use crate::web::signature::{verify_hub_signature, SIGNATURE_HEADER};
use crate::web::verify::{verify_subscription, VerifyParams};
use crate::Config;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub dispatcher: Dispatcher,
}

impl AppState {
    pub fn new(config: Config, dispatcher: Dispatcher) -> Self {
        Self {
            config: Arc::new(config),
            dispatcher,
        }
    }
}

/// Build the router: health check plus the method-dispatched webhook path.
///
/// Methods other than GET and POST on the webhook path answer 405. axum
/// routes HEAD to GET handlers, so [`verify_webhook`] refuses it itself.
pub fn router(state: AppState) -> Router {
    let webhook_path = state.config.webhook_path.clone();

    Router::new()
        .route("/health", get(health))
        .route(&webhook_path, get(verify_webhook).post(receive_event))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// =============================================================================
// Health Check
// =============================================================================

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

// =============================================================================
// Subscription Verification (GET)
// =============================================================================

/// Answer the subscription handshake.
///
/// Echoes `hub.challenge` on success. Every failure gets the same bare 403.
pub async fn verify_webhook(
    State(state): State<AppState>,
    method: Method,
    RawQuery(query): RawQuery,
) -> impl IntoResponse {
    if method != Method::GET {
        return (StatusCode::METHOD_NOT_ALLOWED, String::new());
    }

    let params = VerifyParams::from_query(query.as_deref());

    match verify_subscription(state.config.verify_token.expose_secret(), &params) {
        Some(challenge) => {
            info!(challenge_length = challenge.len(), "webhook_verified");
            (StatusCode::OK, challenge.to_owned())
        }
        None => {
            warn!(
                has_mode = params.mode.is_some(),
                has_token = params.verify_token.is_some(),
                "webhook_verification_rejected"
            );
            (StatusCode::FORBIDDEN, "Forbidden".to_owned())
        }
    }
}

// =============================================================================
// Event Delivery (POST)
// =============================================================================

/// Receive a signed event delivery.
///
/// 400 on an unreadable body, 401 on any signature problem, otherwise
/// `200 ok` followed by a non-blocking submission to the dispatcher.
pub async fn receive_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Body,
) -> impl IntoResponse {
    let body = match body::to_bytes(body, state.config.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, "event_body_unreadable");
            return (StatusCode::BAD_REQUEST, "Bad Request");
        }
    };

    // Absent and non-ASCII headers both verify as empty, which always fails.
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if !verify_hub_signature(state.config.app_secret.expose_secret(), &body, signature) {
        warn!(body_length = body.len(), "event_signature_invalid");
        return (StatusCode::UNAUTHORIZED, "invalid signature");
    }

    let delivery = Delivery::new(body);
    info!(
        digest = %delivery.digest(),
        body_length = delivery.len(),
        "event_accepted"
    );

    // Non-blocking try_send; the response is written once we return.
    state.dispatcher.submit(delivery);
    (StatusCode::OK, "ok")
}
