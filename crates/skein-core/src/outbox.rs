//! Outbox for content that must reach always-on peers.
//!
//! Requests are persisted in the `cafe_requests` table, so they survive a
//! restart. `flush` only signals the worker; the worker replicates each
//! pending address and deletes the request once the network accepted it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use skein_net::ContentNetwork;
use skein_store::{CafeRequest, CafeRequestKind};

use crate::config::OutboxConfig;
use crate::error::CoreError;
use crate::services::{lock_db, SharedDatabase};

/// Queue of content addresses awaiting replication.
pub trait Outbox: Send + Sync {
    /// Persist a request. Returns `false` when the same (address, kind) is
    /// already queued.
    fn enqueue(&self, address: &str, kind: CafeRequestKind) -> Result<bool, CoreError>;

    /// Ask the worker to process the queue. Never blocks.
    fn flush(&self);
}

enum Signal {
    Flush,
    Shutdown,
}

/// [`Outbox`] backed by the datastore and a background worker task.
pub struct CafeOutbox {
    db: SharedDatabase,
    signal_tx: mpsc::Sender<Signal>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl CafeOutbox {
    /// Start the worker. Pending requests from a previous run are picked up
    /// on the first flush.
    pub fn spawn(
        db: SharedDatabase,
        network: Arc<dyn ContentNetwork>,
        config: OutboxConfig,
    ) -> Arc<Self> {
        let (signal_tx, signal_rx) = mpsc::channel(config.capacity.max(1));
        let worker = Worker {
            db: db.clone(),
            network,
            config,
            retry_at: HashMap::new(),
        };
        let handle = tokio::spawn(worker.run(signal_rx));

        Arc::new(Self {
            db,
            signal_tx,
            worker: Mutex::new(Some(handle)),
        })
    }

    pub fn pending(&self) -> Result<u64, CoreError> {
        Ok(lock_db(&self.db).count_cafe_requests()?)
    }

    /// Let the worker make a final pass over the queue, then stop it.
    pub async fn shutdown(&self) {
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        let Some(handle) = handle else {
            return;
        };
        if self.signal_tx.send(Signal::Shutdown).await.is_err() {
            debug!("outbox worker already gone");
        }
        if let Err(e) = handle.await {
            warn!(error = %e, "outbox worker ended abnormally");
        }
    }
}

impl Outbox for CafeOutbox {
    fn enqueue(&self, address: &str, kind: CafeRequestKind) -> Result<bool, CoreError> {
        let added = lock_db(&self.db).enqueue_cafe_request(address, kind)?;
        if added {
            debug!(address = %address, kind = kind.as_str(), "cafe request queued");
        }
        Ok(added)
    }

    fn flush(&self) {
        match self.signal_tx.try_send(Signal::Flush) {
            Ok(()) => {}
            // a flush is already pending and will see this request
            Err(mpsc::error::TrySendError::Full(_)) => {}
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("outbox worker stopped, flush dropped");
            }
        }
    }
}

struct Worker {
    db: SharedDatabase,
    network: Arc<dyn ContentNetwork>,
    config: OutboxConfig,
    /// Earliest next attempt for requests that failed.
    retry_at: HashMap<Uuid, Instant>,
}

impl Worker {
    async fn run(mut self, mut signal_rx: mpsc::Receiver<Signal>) {
        loop {
            let wake = self.retry_at.values().min().copied();
            let signal = match wake {
                Some(at) => tokio::select! {
                    s = signal_rx.recv() => s,
                    _ = tokio::time::sleep_until(at) => Some(Signal::Flush),
                },
                None => signal_rx.recv().await,
            };

            match signal {
                Some(Signal::Flush) => self.process(false).await,
                Some(Signal::Shutdown) | None => {
                    // drain whatever flushes were queued before stopping
                    signal_rx.close();
                    while signal_rx.recv().await.is_some() {}
                    self.process(true).await;
                    info!("outbox worker stopped");
                    return;
                }
            }
        }
    }

    async fn process(&mut self, ignore_backoff: bool) {
        let requests = match lock_db(&self.db).list_cafe_requests(self.config.batch_size) {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "failed to list cafe requests");
                return;
            }
        };

        let now = Instant::now();
        for request in requests {
            if !ignore_backoff {
                if let Some(at) = self.retry_at.get(&request.id) {
                    if *at > now {
                        continue;
                    }
                }
            }
            self.handle(request).await;
        }
    }

    async fn handle(&mut self, request: CafeRequest) {
        let result = match request.kind {
            CafeRequestKind::Store => self.network.replicate(&request.target).await,
            CafeRequestKind::Unstore => self.network.unpin(&request.target).await,
        };

        let db = lock_db(&self.db);
        match result {
            Ok(()) => {
                self.retry_at.remove(&request.id);
                if let Err(e) = db.delete_cafe_request(&request.id) {
                    warn!(error = %e, "failed to delete cafe request");
                }
                debug!(address = %request.target, kind = request.kind.as_str(), "cafe request done");
            }
            Err(e) => {
                let attempts = request.attempts + 1;
                if attempts > self.config.max_retries {
                    warn!(
                        address = %request.target,
                        attempts,
                        error = %e,
                        "giving up on cafe request"
                    );
                    self.retry_at.remove(&request.id);
                    if let Err(e) = db.delete_cafe_request(&request.id) {
                        warn!(error = %e, "failed to delete cafe request");
                    }
                    return;
                }

                if let Err(e) = db.bump_cafe_request_attempts(&request.id) {
                    warn!(error = %e, "failed to record cafe request attempt");
                }
                let delay = backoff(&self.config, attempts);
                self.retry_at.insert(request.id, Instant::now() + delay);
                warn!(
                    address = %request.target,
                    attempts,
                    retry_in = ?delay,
                    error = %e,
                    "cafe request failed"
                );
            }
        }
    }
}

/// Delay before attempt `attempts + 1`.
fn backoff(config: &OutboxConfig, attempts: u32) -> Duration {
    let factor = 1u32 << attempts.saturating_sub(1).min(16);
    config
        .base_backoff
        .saturating_mul(factor)
        .min(config.max_backoff)
}
