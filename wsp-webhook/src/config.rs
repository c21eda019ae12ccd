//! Configuration module for environment variable parsing.
//!
//! Secrets are required and fail startup when absent. Everything else falls
//! back to a default, logging a warning when a value cannot be parsed.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;
use thiserror::Error;
use tracing::warn;

/// Default endpoint path for the webhook.
pub const DEFAULT_WEBHOOK_PATH: &str = "/api/wsp/webhook";

/// Default AMQP queue receiving validated payloads.
pub const DEFAULT_SINK_QUEUE: &str = "wsp_inbound";

/// Errors that prevent the process from serving traffic.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    MissingVar(&'static str),
}

/// Application configuration loaded from environment variables.
///
/// Built once at startup and shared read-only for the process lifetime.
#[derive(Debug)]
pub struct Config {
    /// Token the platform echoes back during the subscription handshake
    pub verify_token: SecretString,

    /// Shared secret keying the `X-Hub-Signature-256` HMAC
    pub app_secret: SecretString,

    /// Port for the web server to listen on
    pub port: u16,

    /// Path the webhook endpoint is mounted on
    pub webhook_path: String,

    /// Largest request body accepted before answering 400
    pub max_body_bytes: usize,

    /// Capacity of the bounded dispatch queue
    pub dispatch_queue_capacity: usize,

    /// Maximum number of sink deliveries running at once
    pub dispatch_concurrency: usize,

    /// How long shutdown waits for in-flight deliveries
    pub shutdown_grace: Duration,

    /// RabbitMQ connection URL; `None` selects the logging sink
    pub cloudamqp_url: Option<String>,

    /// Queue name validated payloads are published to
    pub sink_queue: String,
}

impl Config {
    /// Build a configuration from explicit secrets, defaults everywhere else.
    pub fn new(verify_token: impl Into<String>, app_secret: impl Into<String>) -> Self {
        Config {
            verify_token: SecretString::new(verify_token.into()),
            app_secret: SecretString::new(app_secret.into()),
            port: 8080,
            webhook_path: DEFAULT_WEBHOOK_PATH.to_string(),
            max_body_bytes: 1024 * 1024,
            dispatch_queue_capacity: 1024,
            dispatch_concurrency: 16,
            shutdown_grace: Duration::from_millis(5000),
            cloudamqp_url: None,
            sink_queue: DEFAULT_SINK_QUEUE.to_string(),
        }
    }

    /// Load configuration from environment variables.
    ///
    /// `VERIFY_TOKEN` and `APP_SECRET` (or their `WSP_` prefixed aliases)
    /// must be set and non-empty.
    pub fn from_env() -> Result<Self, ConfigError> {
        let verify_token = required("VERIFY_TOKEN", "WSP_VERIFY_TOKEN")?;
        let app_secret = required("APP_SECRET", "WSP_APP_SECRET")?;

        let mut config = Config::new(verify_token, app_secret);

        config.port = parse_or("PORT", config.port);
        config.webhook_path = env::var("WEBHOOK_PATH")
            .ok()
            .filter(|p| p.starts_with('/'))
            .unwrap_or(config.webhook_path);
        config.max_body_bytes = parse_or("MAX_BODY_BYTES", config.max_body_bytes);
        config.dispatch_queue_capacity =
            parse_or("DISPATCH_QUEUE_CAPACITY", config.dispatch_queue_capacity).max(1);
        config.dispatch_concurrency =
            parse_or("DISPATCH_CONCURRENCY", config.dispatch_concurrency).max(1);
        config.shutdown_grace = Duration::from_millis(parse_or("SHUTDOWN_GRACE_MS", 5000u64));
        config.cloudamqp_url = non_empty("CLOUDAMQP_URL");
        config.sink_queue = non_empty("SINK_QUEUE").unwrap_or(config.sink_queue);

        Ok(config)
    }
}

/// Read a required secret, accepting a legacy alias name.
fn required(name: &'static str, alias: &str) -> Result<String, ConfigError> {
    non_empty(name)
        .or_else(|| non_empty(alias))
        .ok_or(ConfigError::MissingVar(name))
}

fn non_empty(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Parse a numeric variable, keeping the default on absence or garbage.
fn parse_or<T: FromStr + Copy>(name: &str, default: T) -> T {
    let raw = match env::var(name) {
        Ok(v) => v,
        Err(_) => return default,
    };

    match raw.trim().parse() {
        Ok(v) => v,
        Err(_) => {
            warn!(env_var = name, value = %raw, "Invalid numeric value, using default");
            default
        }
    }
}
