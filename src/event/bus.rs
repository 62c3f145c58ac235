//! Event Bus - fan-out of classified events to subscribers
//!
//! Every subscriber owns a bounded queue. Publishing never blocks: a full
//! queue drops the envelope for that subscriber and logs it.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};

use super::envelope::{Envelope, EventKind};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BusError {
    #[error("subscriber '{0}' is already registered for an overlapping interest")]
    DuplicateSubscription(String),

    #[error("queue capacity must be greater than zero")]
    ZeroCapacity,
}

/// Set of event kinds a subscriber wants
#[derive(Debug, Clone)]
pub enum Interest {
    Any,
    Kinds(HashSet<EventKind>),
}

impl Interest {
    pub fn kinds(kinds: &[EventKind]) -> Self {
        Interest::Kinds(kinds.iter().copied().collect())
    }

    pub fn matches(&self, kind: EventKind) -> bool {
        match self {
            Interest::Any => true,
            Interest::Kinds(set) => set.contains(&kind),
        }
    }

    fn overlaps(&self, other: &Interest) -> bool {
        match (self, other) {
            (Interest::Any, _) | (_, Interest::Any) => true,
            (Interest::Kinds(a), Interest::Kinds(b)) => !a.is_disjoint(b),
        }
    }
}

struct Subscriber {
    name: String,
    interest: Interest,
    tx: mpsc::Sender<Arc<Envelope>>,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

/// Receiving half handed to a consumer task
pub struct Subscription {
    name: String,
    rx: mpsc::Receiver<Arc<Envelope>>,
}

impl Subscription {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait for the next envelope. `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<Arc<Envelope>> {
        self.rx.recv().await
    }

    #[cfg(test)]
    pub fn try_recv(&mut self) -> Option<Arc<Envelope>> {
        self.rx.try_recv().ok()
    }
}

/// Outcome of a single publish
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub dropped: usize,
}

/// Per subscriber counters
#[derive(Debug, Clone, Serialize)]
pub struct SubscriberStats {
    pub name: String,
    pub delivered: u64,
    pub dropped: u64,
}

/// Central register/emit primitive.
///
/// The registry is only written while the pipeline is being wired; after
/// startup `publish` takes an uncontended read lock.
pub struct EventBus {
    subscribers: RwLock<Vec<Subscriber>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
        }
    }

    /// Register a consumer with its own bounded delivery queue
    pub fn subscribe(
        &self,
        name: &str,
        interest: Interest,
        capacity: usize,
    ) -> Result<Subscription, BusError> {
        if capacity == 0 {
            return Err(BusError::ZeroCapacity);
        }

        let mut subscribers = self.subscribers.write();
        if subscribers
            .iter()
            .any(|s| s.name == name && s.interest.overlaps(&interest))
        {
            return Err(BusError::DuplicateSubscription(name.to_string()));
        }

        let (tx, rx) = mpsc::channel(capacity);
        subscribers.push(Subscriber {
            name: name.to_string(),
            interest,
            tx,
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        });

        tracing::debug!(subscriber = name, capacity, "Bus subscriber registered");

        Ok(Subscription {
            name: name.to_string(),
            rx,
        })
    }

    /// Offer an envelope to every interested subscriber without blocking
    pub fn publish(&self, envelope: Envelope) -> PublishReport {
        let kind = envelope.kind();
        let envelope = Arc::new(envelope);
        let mut report = PublishReport::default();

        for sub in self.subscribers.read().iter() {
            if !sub.interest.matches(kind) {
                continue;
            }

            match sub.tx.try_send(Arc::clone(&envelope)) {
                Ok(()) => {
                    sub.delivered.fetch_add(1, Ordering::Relaxed);
                    report.delivered += 1;
                }
                Err(TrySendError::Full(_)) => {
                    sub.dropped.fetch_add(1, Ordering::Relaxed);
                    report.dropped += 1;
                    tracing::warn!(
                        subscriber = %sub.name,
                        kind = %kind,
                        server = %envelope.origin.name,
                        "Subscriber queue full, dropping event"
                    );
                }
                Err(TrySendError::Closed(_)) => {
                    sub.dropped.fetch_add(1, Ordering::Relaxed);
                    report.dropped += 1;
                    tracing::debug!(subscriber = %sub.name, kind = %kind, "Subscriber gone, dropping event");
                }
            }
        }

        report
    }

    pub fn stats(&self) -> Vec<SubscriberStats> {
        self.subscribers
            .read()
            .iter()
            .map(|s| SubscriberStats {
                name: s.name.clone(),
                delivered: s.delivered.load(Ordering::Relaxed),
                dropped: s.dropped.load(Ordering::Relaxed),
            })
            .collect()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
