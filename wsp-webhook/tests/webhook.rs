use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use bytes::Bytes;
use tokio::sync::Semaphore;
use tower::util::ServiceExt;

use wsp::web::sign_hub_payload;
use wsp::{router, AppState, Config, Delivery, DispatchWorker, Dispatcher, Sink, SinkError};

const VERIFY_TOKEN: &str = "RIGHT";
const APP_SECRET: &str = "s3cr3t";
const WEBHOOK: &str = "/api/wsp/webhook";
const GOLDEN_BODY: &[u8] = br#"{"x":1}"#;
const GOLDEN_SIGNATURE: &str =
    "sha256=bfaa083bff11eb9b41f37ed32cd1ca7355ab7033bad1212c922e9ab8840bfc21";

/// Sink that records bodies and optionally holds every delivery until the
/// test opens the gate.
#[derive(Default)]
struct RecordingSink {
    received: Mutex<Vec<Bytes>>,
    gate: Option<Semaphore>,
    fail: bool,
}

impl RecordingSink {
    fn gated() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Default::default()
        }
    }

    fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    fn open_gate(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(Semaphore::MAX_PERMITS / 2);
        }
    }

    fn received(&self) -> Vec<Bytes> {
        self.received.lock().unwrap().clone()
    }

    async fn wait_for(&self, count: usize) -> Vec<Bytes> {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let received = self.received();
            if received.len() >= count || Instant::now() > deadline {
                return received;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[async_trait]
impl Sink for RecordingSink {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn deliver(&self, delivery: &Delivery) -> Result<(), SinkError> {
        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await.unwrap();
        }
        if self.fail {
            return Err(SinkError::Publish("downstream unavailable".to_string()));
        }
        self.received
            .lock()
            .unwrap()
            .push(Bytes::copy_from_slice(delivery.body()));
        Ok(())
    }
}

fn app_with(sink: Arc<RecordingSink>, config: Config) -> (Router, DispatchWorker) {
    let (dispatcher, worker) = Dispatcher::start(sink, 64, 4);
    (router(AppState::new(config, dispatcher)), worker)
}

fn app(sink: Arc<RecordingSink>) -> (Router, DispatchWorker) {
    app_with(sink, Config::new(VERIFY_TOKEN, APP_SECRET))
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, String) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8(body.to_vec()).unwrap())
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post(body: &'static [u8], signature: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("POST").uri(WEBHOOK);
    if let Some(signature) = signature {
        builder = builder.header("X-Hub-Signature-256", signature);
    }
    builder.body(Body::from(body)).unwrap()
}

// =============================================================================
// Subscription verification
// =============================================================================

#[tokio::test]
async fn verification_echoes_challenge() {
    let (app, _worker) = app(Arc::new(RecordingSink::default()));

    let (status, body) = send(
        &app,
        get("/api/wsp/webhook?hub.mode=subscribe&hub.verify_token=RIGHT&hub.challenge=abc123"),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "abc123");
}

#[tokio::test]
async fn verification_with_wrong_token_is_forbidden() {
    let (app, _worker) = app(Arc::new(RecordingSink::default()));

    let (status, body) = send(
        &app,
        get("/api/wsp/webhook?hub.mode=subscribe&hub.verify_token=WRONG&hub.challenge=abc123"),
    )
    .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_ne!(body, "abc123");
}

#[tokio::test]
async fn verification_with_other_mode_is_forbidden() {
    let (app, _worker) = app(Arc::new(RecordingSink::default()));

    let (status, body) = send(
        &app,
        get("/api/wsp/webhook?hub.mode=unsubscribe&hub.verify_token=RIGHT&hub.challenge=abc123"),
    )
    .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(!body.contains("abc123"));
}

#[tokio::test]
async fn verification_failures_look_identical() {
    let (app, _worker) = app(Arc::new(RecordingSink::default()));

    let wrong_token = send(
        &app,
        get("/api/wsp/webhook?hub.mode=subscribe&hub.verify_token=WRONG&hub.challenge=c"),
    )
    .await;
    let wrong_mode = send(
        &app,
        get("/api/wsp/webhook?hub.mode=nope&hub.verify_token=RIGHT&hub.challenge=c"),
    )
    .await;
    let no_params = send(&app, get(WEBHOOK)).await;

    assert_eq!(wrong_token, wrong_mode);
    assert_eq!(wrong_mode, no_params);
}

#[tokio::test]
async fn verification_echoes_special_and_empty_challenges() {
    let (app, _worker) = app(Arc::new(RecordingSink::default()));

    let cases = [
        ("", ""),
        ("a%20b%26c%3Dd", "a b&c=d"),
        ("%C3%BCml%C3%A4ut", "ümläut"),
        ("%3Cscript%3E", "<script>"),
    ];

    for (encoded, expected) in cases {
        let uri = format!(
            "{}?hub.mode=subscribe&hub.verify_token=RIGHT&hub.challenge={}",
            WEBHOOK, encoded
        );
        let (status, body) = send(&app, get(&uri)).await;
        assert_eq!(status, StatusCode::OK, "challenge {:?}", encoded);
        assert_eq!(body, expected);
    }
}

#[tokio::test]
async fn verification_is_idempotent() {
    let (app, _worker) = app(Arc::new(RecordingSink::default()));
    let uri = "/api/wsp/webhook?hub.mode=subscribe&hub.verify_token=RIGHT&hub.challenge=42";

    assert_eq!(send(&app, get(uri)).await, (StatusCode::OK, "42".to_string()));
    assert_eq!(send(&app, get(uri)).await, (StatusCode::OK, "42".to_string()));
}

// =============================================================================
// Event delivery
// =============================================================================

#[tokio::test]
async fn golden_delivery_is_acknowledged_and_dispatched() {
    let sink = Arc::new(RecordingSink::default());
    let (app, worker) = app(sink.clone());

    let (status, body) = send(&app, post(GOLDEN_BODY, Some(GOLDEN_SIGNATURE))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "ok");

    let received = sink.wait_for(1).await;
    assert_eq!(received, vec![Bytes::from_static(GOLDEN_BODY)]);

    worker.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn uppercase_signature_is_accepted() {
    let sink = Arc::new(RecordingSink::default());
    let (app, _worker) = app(sink.clone());
    let upper = format!(
        "sha256={}",
        GOLDEN_SIGNATURE["sha256=".len()..].to_ascii_uppercase()
    );

    let (status, body) = send(&app, post(GOLDEN_BODY, Some(upper.as_str()))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "ok");
    assert_eq!(sink.wait_for(1).await.len(), 1);
}

#[tokio::test]
async fn bad_signatures_are_unauthorized_and_not_dispatched() {
    let sink = Arc::new(RecordingSink::default());
    let (app, worker) = app(sink.clone());

    let bare = &GOLDEN_SIGNATURE["sha256=".len()..];
    let wrong_secret = sign_hub_payload("other", GOLDEN_BODY);
    let mut flipped = GOLDEN_SIGNATURE.to_string();
    flipped.replace_range(flipped.len() - 1.., "0");

    let requests = vec![
        post(GOLDEN_BODY, None),
        post(GOLDEN_BODY, Some(bare)),
        post(GOLDEN_BODY, Some(wrong_secret.as_str())),
        post(GOLDEN_BODY, Some(flipped.as_str())),
        post(br#"{"x":2}"#, Some(GOLDEN_SIGNATURE)),
        post(GOLDEN_BODY, Some("sha256=")),
    ];

    let mut responses = Vec::new();
    for request in requests {
        responses.push(send(&app, request).await);
    }

    for response in &responses {
        assert_eq!(response.0, StatusCode::UNAUTHORIZED);
    }
    // Same answer whatever the reason
    assert!(responses.windows(2).all(|w| w[0] == w[1]));

    worker.shutdown(Duration::from_secs(1)).await;
    assert!(sink.received().is_empty());
}

#[tokio::test]
async fn unconfigured_secret_rejects_everything() {
    let sink = Arc::new(RecordingSink::default());
    let (app, worker) = app_with(sink.clone(), Config::new(VERIFY_TOKEN, ""));
    let signature = sign_hub_payload("", GOLDEN_BODY);

    let (status, _) = send(&app, post(GOLDEN_BODY, Some(signature.as_str()))).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    worker.shutdown(Duration::from_secs(1)).await;
    assert!(sink.received().is_empty());
}

#[tokio::test]
async fn oversized_body_is_bad_request() {
    let sink = Arc::new(RecordingSink::default());
    let mut config = Config::new(VERIFY_TOKEN, APP_SECRET);
    config.max_body_bytes = 4;
    let (app, worker) = app_with(sink.clone(), config);

    let (status, _) = send(&app, post(GOLDEN_BODY, Some(GOLDEN_SIGNATURE))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    worker.shutdown(Duration::from_secs(1)).await;
    assert!(sink.received().is_empty());
}

#[tokio::test]
async fn failing_body_stream_is_bad_request() {
    let sink = Arc::new(RecordingSink::default());
    let (app, _worker) = app(sink.clone());

    let stream = futures::stream::iter(vec![
        Ok(Bytes::from_static(b"{\"x\"")),
        Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
    ]);
    let request = Request::builder()
        .method("POST")
        .uri(WEBHOOK)
        .header("X-Hub-Signature-256", GOLDEN_SIGNATURE)
        .body(Body::from_stream(stream))
        .unwrap();

    let (status, _) = send(&app, request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn slow_sink_does_not_delay_acknowledgment() {
    let sink = Arc::new(RecordingSink::gated());
    let (app, worker) = app(sink.clone());

    let started = Instant::now();
    let response = tokio::time::timeout(
        Duration::from_secs(2),
        send(&app, post(GOLDEN_BODY, Some(GOLDEN_SIGNATURE))),
    )
    .await
    .expect("acknowledgment waited on the sink");

    assert_eq!(response, (StatusCode::OK, "ok".to_string()));
    assert!(started.elapsed() < Duration::from_secs(2));
    // The sink is still blocked, so nothing has been delivered yet.
    assert!(sink.received().is_empty());

    sink.open_gate();
    assert_eq!(sink.wait_for(1).await.len(), 1);
    worker.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn sink_failure_does_not_change_status() {
    let sink = Arc::new(RecordingSink::failing());
    let (app, worker) = app(sink.clone());

    let first = send(&app, post(GOLDEN_BODY, Some(GOLDEN_SIGNATURE))).await;
    worker.shutdown(Duration::from_secs(1)).await;

    assert_eq!(first, (StatusCode::OK, "ok".to_string()));
}

#[tokio::test]
async fn replayed_delivery_is_acknowledged_twice() {
    let sink = Arc::new(RecordingSink::default());
    let (app, worker) = app(sink.clone());

    let first = send(&app, post(GOLDEN_BODY, Some(GOLDEN_SIGNATURE))).await;
    let second = send(&app, post(GOLDEN_BODY, Some(GOLDEN_SIGNATURE))).await;

    assert_eq!(first, (StatusCode::OK, "ok".to_string()));
    assert_eq!(second, first);
    assert_eq!(sink.wait_for(2).await.len(), 2);

    worker.shutdown(Duration::from_secs(1)).await;
}

// =============================================================================
// Routing
// =============================================================================

#[tokio::test]
async fn other_methods_are_not_allowed() {
    let (app, _worker) = app(Arc::new(RecordingSink::default()));

    for method in ["PUT", "DELETE", "PATCH", "HEAD"] {
        let request = Request::builder()
            .method(method)
            .uri(WEBHOOK)
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&app, request).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED, "method {}", method);
    }
}

#[tokio::test]
async fn head_with_valid_handshake_is_not_allowed() {
    let (app, _worker) = app(Arc::new(RecordingSink::default()));

    let request = Request::builder()
        .method("HEAD")
        .uri("/api/wsp/webhook?hub.mode=subscribe&hub.verify_token=RIGHT&hub.challenge=x")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, request).await;

    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    assert!(body.is_empty());
}

#[tokio::test]
async fn custom_webhook_path_is_honored() {
    let mut config = Config::new(VERIFY_TOKEN, APP_SECRET);
    config.webhook_path = "/hooks/wsp".to_string();
    let (app, _worker) = app_with(Arc::new(RecordingSink::default()), config);

    let (status, body) = send(
        &app,
        get("/hooks/wsp?hub.mode=subscribe&hub.verify_token=RIGHT&hub.challenge=x"),
    )
    .await;
    assert_eq!((status, body.as_str()), (StatusCode::OK, "x"));

    let (status, _) = send(&app, get(WEBHOOK)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn health_reports_ok() {
    let (app, _worker) = app(Arc::new(RecordingSink::default()));

    let (status, body) = send(&app, get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, r#"{"status":"ok"}"#);
}
