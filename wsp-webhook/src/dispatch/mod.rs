//! Fire-and-forget handoff of validated payloads to a [`Sink`].
//!
//! The web handler submits a [`Delivery`] after building its acknowledgment.
//! Submission never blocks and never fails from the caller's point of view.
//! A background worker drains the bounded queue and runs every delivery in
//! its own task, so a slow, failing or panicking sink call cannot affect the
//! HTTP response or any other delivery.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use sha2::{Digest, Sha256};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{oneshot, Semaphore};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{error, info, warn};

use crate::sink::Sink;

/// One validated payload on its way to the sink.
#[derive(Debug, Clone)]
pub struct Delivery {
    body: Bytes,
    digest: String,
    received_at: Instant,
}

impl Delivery {
    /// Wrap raw body bytes exactly as they were read off the wire.
    pub fn new(body: Bytes) -> Self {
        let digest = hex::encode(Sha256::digest(&body));
        Self {
            body,
            digest,
            received_at: Instant::now(),
        }
    }

    /// The raw payload bytes.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Lowercase hex SHA-256 of the body, usable as an idempotency key.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    /// When the delivery was accepted by the web handler.
    pub fn received_at(&self) -> Instant {
        self.received_at
    }
}

/// Cloneable submission handle shared with the web handlers.
#[derive(Clone)]
pub struct Dispatcher {
    tx: mpsc::Sender<Delivery>,
    overflow: Arc<Semaphore>,
}

/// Owner of the background worker, used for shutdown.
pub struct DispatchWorker {
    handle: JoinHandle<()>,
    stop: oneshot::Sender<()>,
    sink: Arc<dyn Sink>,
}

impl Dispatcher {
    /// Start the background worker.
    ///
    /// `capacity` bounds the queue between handlers and worker and, again, the
    /// number of deliveries parked waiting for room in it. `concurrency`
    /// bounds how many sink calls run at once. Must be called from within a
    /// Tokio runtime.
    pub fn start(
        sink: Arc<dyn Sink>,
        capacity: usize,
        concurrency: usize,
    ) -> (Dispatcher, DispatchWorker) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let (stop_tx, stop_rx) = oneshot::channel();
        let limit = Arc::new(Semaphore::new(concurrency.max(1)));

        info!(
            sink = sink.name(),
            capacity = capacity,
            concurrency = concurrency,
            "dispatcher_started"
        );

        let handle = tokio::spawn(run_worker(rx, Arc::clone(&sink), limit, stop_rx));

        (
            Dispatcher {
                tx,
                overflow: Arc::new(Semaphore::new(capacity.max(1))),
            },
            DispatchWorker {
                handle,
                stop: stop_tx,
                sink,
            },
        )
    }

    /// Queue a delivery without waiting.
    ///
    /// When the queue is full the delivery is parked on a detached task that
    /// waits for room, so the caller still returns immediately. Parked tasks
    /// are capped at the queue capacity; past that the delivery is dropped
    /// and the platform's redelivery has to cover it.
    pub fn submit(&self, delivery: Delivery) {
        match self.tx.try_send(delivery) {
            Ok(()) => {}
            Err(TrySendError::Full(delivery)) => {
                let permit = match Arc::clone(&self.overflow).try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(_) => {
                        error!(
                            digest = %delivery.digest(),
                            body_length = delivery.len(),
                            "dispatch_overflow_dropped"
                        );
                        return;
                    }
                };

                warn!(digest = %delivery.digest(), "dispatch_queue_full");
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    if let Err(e) = tx.send(delivery).await {
                        warn!(digest = %e.0.digest(), "dispatch_dropped_after_close");
                    }
                });
            }
            Err(TrySendError::Closed(delivery)) => {
                warn!(digest = %delivery.digest(), "dispatch_dropped_after_close");
            }
        }
    }

    /// Deliveries currently parked waiting for queue room.
    pub fn parked(&self) -> usize {
        self.tx.max_capacity() - self.overflow.available_permits()
    }
}

impl DispatchWorker {
    /// Stop accepting work and wait up to `grace` for queued and in-flight
    /// deliveries. Whatever is still running afterwards is abandoned. The
    /// sink is closed last.
    pub async fn shutdown(self, grace: Duration) {
        let DispatchWorker {
            mut handle,
            stop,
            sink,
        } = self;

        // The worker may already be gone; either way it is stopping.
        let _ = stop.send(());

        match tokio::time::timeout(grace, &mut handle).await {
            Ok(Ok(())) => info!("dispatcher_drained"),
            Ok(Err(e)) => error!(error = %e, "dispatcher_worker_failed"),
            Err(_) => {
                warn!(grace_ms = grace.as_millis() as u64, "dispatcher_drain_timeout");
                handle.abort();
            }
        }

        sink.close().await;
    }
}

async fn run_worker(
    mut rx: mpsc::Receiver<Delivery>,
    sink: Arc<dyn Sink>,
    limit: Arc<Semaphore>,
    mut stop: oneshot::Receiver<()>,
) {
    let mut in_flight = JoinSet::new();

    loop {
        tokio::select! {
            _ = &mut stop => {
                info!("dispatcher_stopping");
                rx.close();
                break;
            }
            next = rx.recv() => match next {
                Some(delivery) => spawn_delivery(&mut in_flight, &sink, &limit, delivery).await,
                None => break,
            },
            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                log_join(joined);
            }
        }
    }

    // Deliveries already queued before the close still go out.
    while let Some(delivery) = rx.recv().await {
        spawn_delivery(&mut in_flight, &sink, &limit, delivery).await;
    }

    while let Some(joined) = in_flight.join_next().await {
        log_join(joined);
    }
}

async fn spawn_delivery(
    in_flight: &mut JoinSet<()>,
    sink: &Arc<dyn Sink>,
    limit: &Arc<Semaphore>,
    delivery: Delivery,
) {
    let permit = match Arc::clone(limit).acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => return,
    };
    let sink = Arc::clone(sink);

    in_flight.spawn(async move {
        let _permit = permit;
        let started = Instant::now();

        match sink.deliver(&delivery).await {
            Ok(()) => info!(
                sink = sink.name(),
                digest = %delivery.digest(),
                body_length = delivery.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "dispatch_delivered"
            ),
            Err(e) => error!(
                sink = sink.name(),
                digest = %delivery.digest(),
                error = %e,
                "dispatch_failed"
            ),
        }
    });
}

fn log_join(joined: Result<(), JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            error!(error = %e, "dispatch_task_panicked");
        } else {
            warn!(error = %e, "dispatch_task_cancelled");
        }
    }
}
