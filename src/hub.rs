//! Hub: the consumer broadcast set and relay counters.
//!
//! DESIGN
//! ======
//! One `Hub` per server, created at startup and closed on shutdown. It is a
//! cheap `Clone` handle over shared state so several hubs can coexist in
//! tests.
//!
//! Each consumer connection registers a bounded queue. `broadcast`
//! serializes a frame once and `try_send`s the same text to every queue, so
//! a slow consumer only ever loses its own copy: it never blocks producers or
//! other consumers. Delivery is at-most-once with no replay for late joiners.
//! Queues whose receiver is gone are pruned on the next broadcast.
//!
//! Producer connections hold a `ProducerGuard` so the live count stays
//! correct however the connection task exits. They also wait on `closed()`
//! so shutdown reaches them even though they own no hub queue.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use axum::extract::ws::Utf8Bytes;
use serde::Serialize;
use tokio::sync::{RwLock, mpsc, watch};
use tracing::{debug, info};
use uuid::Uuid;

use crate::credentials::CameraInfo;
use crate::frame::Frame;

#[derive(Debug, thiserror::Error)]
#[error("hub is closed")]
pub struct HubClosed;

/// Per-broadcast delivery report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    pub dropped: usize,
}

/// Snapshot of hub counters, served by `/api/stats`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HubStats {
    pub producers: usize,
    pub consumers: usize,
    pub frames_relayed: u64,
    pub deliveries_dropped: u64,
}

struct HubInner {
    consumers: RwLock<HashMap<Uuid, mpsc::Sender<Utf8Bytes>>>,
    producers: AtomicUsize,
    frames_relayed: AtomicU64,
    deliveries_dropped: AtomicU64,
    closed: watch::Sender<bool>,
    queue_capacity: usize,
}

#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

impl Hub {
    /// Create a hub whose consumer queues hold `queue_capacity` frames.
    #[must_use]
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            inner: Arc::new(HubInner {
                consumers: RwLock::new(HashMap::new()),
                producers: AtomicUsize::new(0),
                frames_relayed: AtomicU64::new(0),
                deliveries_dropped: AtomicU64::new(0),
                closed: watch::Sender::new(false),
                queue_capacity: queue_capacity.max(1),
            }),
        }
    }

    // =========================================================================
    // CONSUMERS
    // =========================================================================

    /// Add a consumer to the broadcast set and return its outbound queue.
    ///
    /// # Errors
    ///
    /// Returns `HubClosed` after `close` has been called.
    pub async fn register_consumer(&self, session_id: Uuid) -> Result<mpsc::Receiver<Utf8Bytes>, HubClosed> {
        let (tx, rx) = mpsc::channel(self.inner.queue_capacity);
        let mut consumers = self.inner.consumers.write().await;
        if self.is_closed() {
            return Err(HubClosed);
        }
        consumers.insert(session_id, tx);
        debug!(%session_id, consumers = consumers.len(), "hub: consumer registered");
        Ok(rx)
    }

    /// Remove a consumer. Returns `false` if it was already gone.
    pub async fn remove_consumer(&self, session_id: Uuid) -> bool {
        let mut consumers = self.inner.consumers.write().await;
        let removed = consumers.remove(&session_id).is_some();
        if removed {
            debug!(%session_id, consumers = consumers.len(), "hub: consumer removed");
        }
        removed
    }

    pub async fn consumer_count(&self) -> usize {
        self.inner.consumers.read().await.len()
    }

    // =========================================================================
    // PRODUCERS
    // =========================================================================

    /// Count a producer connection for as long as the guard lives.
    ///
    /// # Errors
    ///
    /// Returns `HubClosed` after `close` has been called.
    pub fn producer_connected(&self) -> Result<ProducerGuard, HubClosed> {
        if self.is_closed() {
            return Err(HubClosed);
        }
        self.inner.producers.fetch_add(1, Ordering::Relaxed);
        Ok(ProducerGuard { inner: Arc::clone(&self.inner) })
    }

    // =========================================================================
    // BROADCAST
    // =========================================================================

    /// Serialize `frame` once and hand it to every registered consumer.
    ///
    /// # Errors
    ///
    /// Returns the serialization error if the envelope cannot be encoded; no
    /// consumer receives anything in that case.
    pub async fn broadcast(&self, frame: Frame, camera: Option<&CameraInfo>) -> Result<Delivery, serde_json::Error> {
        let fram_id = frame.fram_id().to_owned();
        let text: Utf8Bytes = serde_json::to_string(&frame.into_envelope(camera))?.into();

        let mut report = Delivery::default();
        let mut gone = Vec::new();
        {
            let consumers = self.inner.consumers.read().await;
            for (session_id, tx) in consumers.iter() {
                match tx.try_send(text.clone()) {
                    Ok(()) => report.delivered += 1,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        debug!(%session_id, %fram_id, "hub: consumer queue full, frame dropped");
                        report.dropped += 1;
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        report.dropped += 1;
                        gone.push(*session_id);
                    }
                }
            }
        }

        if !gone.is_empty() {
            let mut consumers = self.inner.consumers.write().await;
            for session_id in &gone {
                consumers.remove(session_id);
            }
        }

        self.inner.frames_relayed.fetch_add(1, Ordering::Relaxed);
        self.inner
            .deliveries_dropped
            .fetch_add(report.dropped as u64, Ordering::Relaxed);
        Ok(report)
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.inner.closed.borrow()
    }

    /// Resolve once `close` has been called.
    pub async fn closed(&self) {
        let mut rx = self.inner.closed.subscribe();
        // The sender lives in `HubInner`, so this only returns once closed.
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Refuse new connections, drop every consumer queue and wake every
    /// `closed()` waiter. Consumer tasks see their queue end; producer tasks
    /// see the signal. Both close their sockets with 1001.
    pub async fn close(&self) {
        let mut consumers = self.inner.consumers.write().await;
        self.inner.closed.send_replace(true);
        let drained = consumers.len();
        consumers.clear();
        info!(drained, "hub: closed");
    }

    pub async fn stats(&self) -> HubStats {
        HubStats {
            producers: self.inner.producers.load(Ordering::Relaxed),
            consumers: self.consumer_count().await,
            frames_relayed: self.inner.frames_relayed.load(Ordering::Relaxed),
            deliveries_dropped: self.inner.deliveries_dropped.load(Ordering::Relaxed),
        }
    }
}

/// Decrements the live producer count on drop.
pub struct ProducerGuard {
    inner: Arc<HubInner>,
}

impl Drop for ProducerGuard {
    fn drop(&mut self) {
        self.inner.producers.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
#[path = "hub_test.rs"]
mod tests;
