//! Log ingestion
//!
//! Each upstream server gets its own ingestion task, created on its first
//! batch. The task classifies lines in order, keeps timestamps monotonic for
//! that server and publishes the resulting envelopes on the bus.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::event::{Classifier, EventBus, EventKind, ServerRef};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IngestError {
    #[error("ingestion queue for server '{0}' is full")]
    QueueFull(String),

    #[error("ingestion for server '{0}' has stopped")]
    Closed(String),
}

/// Raw lines from one server, in log order
#[derive(Debug, Clone)]
pub struct LogBatch {
    pub server: ServerRef,
    pub lines: Vec<String>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestReport {
    pub emitted: usize,
    pub failed: usize,
    pub unknown: usize,
    pub ignored: usize,
}

/// Append-only file collecting lines the classifier could not handle
pub struct UnhandledSink {
    file: Mutex<File>,
}

impl UnhandledSink {
    pub fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { file: Mutex::new(file) })
    }

    pub fn write(&self, server: &ServerRef, line: &str) {
        let mut file = self.file.lock();
        if let Err(e) = writeln!(file, "{}", line) {
            tracing::error!(server = %server.name, error = %e, "Failed to write unhandled log line");
        }
    }
}

/// Single-server ingestion state
pub struct Ingestor {
    classifier: Arc<dyn Classifier>,
    bus: Arc<EventBus>,
    unhandled: Option<Arc<UnhandledSink>>,
    last_seen: Option<DateTime<Utc>>,
}

impl Ingestor {
    pub fn new(
        classifier: Arc<dyn Classifier>,
        bus: Arc<EventBus>,
        unhandled: Option<Arc<UnhandledSink>>,
    ) -> Self {
        Self {
            classifier,
            bus,
            unhandled,
            last_seen: None,
        }
    }

    pub fn ingest(&mut self, batch: &LogBatch) -> IngestReport {
        let mut report = IngestReport::default();

        for line in &batch.lines {
            let classified = self.classifier.classify(line, &batch.server);
            let mut envelope = classified.envelope;

            if let Some(reason) = classified.failure {
                // Published as its Unknown envelope; the timestamp may be unusable
                tracing::debug!(server = %batch.server.name, reason = %reason, "Failed to classify log line");
                report.failed += 1;
                self.write_unhandled(&batch.server, line);
                if let Some(last) = self.last_seen {
                    envelope.occurred_at = last;
                }
            } else {
                match envelope.kind() {
                    EventKind::Ignored => {
                        report.ignored += 1;
                        continue;
                    }
                    EventKind::Unknown => {
                        report.unknown += 1;
                        self.write_unhandled(&batch.server, line);
                    }
                    _ => {}
                }

                // Servers occasionally log out of order around map changes
                if let Some(last) = self.last_seen {
                    if envelope.occurred_at < last {
                        envelope.occurred_at = last;
                    }
                }
                self.last_seen = Some(envelope.occurred_at);
            }

            self.bus.publish(envelope);
            report.emitted += 1;
        }

        tracing::debug!(
            server = %batch.server.name,
            ok = report.emitted,
            failed = report.failed,
            unknown = report.unknown,
            ignored = report.ignored,
            "Completed emitting logfile events"
        );

        report
    }

    fn write_unhandled(&self, server: &ServerRef, line: &str) {
        if let Some(sink) = &self.unhandled {
            sink.write(server, line);
        }
    }
}

async fn run_ingestor(
    mut ingestor: Ingestor,
    server: ServerRef,
    mut rx: mpsc::Receiver<LogBatch>,
    cancel: CancellationToken,
) {
    tracing::info!(server = %server.name, "Log ingestion started");

    loop {
        let batch = tokio::select! {
            _ = cancel.cancelled() => break,
            next = rx.recv() => match next {
                Some(batch) => batch,
                None => break,
            },
        };
        ingestor.ingest(&batch);
    }

    tracing::debug!(server = %server.name, "Log ingestion stopped");
}

/// Hands batches to per-server ingestion tasks
#[derive(Clone)]
pub struct LogRouter {
    inner: Arc<RouterInner>,
}

struct RouterInner {
    routes: Mutex<HashMap<i64, mpsc::Sender<LogBatch>>>,
    classifier: Arc<dyn Classifier>,
    bus: Arc<EventBus>,
    unhandled: Option<Arc<UnhandledSink>>,
    capacity: usize,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl LogRouter {
    pub fn new(
        classifier: Arc<dyn Classifier>,
        bus: Arc<EventBus>,
        unhandled: Option<Arc<UnhandledSink>>,
        capacity: usize,
        cancel: CancellationToken,
        tracker: TaskTracker,
    ) -> Self {
        Self {
            inner: Arc::new(RouterInner {
                routes: Mutex::new(HashMap::new()),
                classifier,
                bus,
                unhandled,
                capacity: capacity.max(1),
                cancel,
                tracker,
            }),
        }
    }

    /// Queue a batch for its server without waiting
    pub fn submit(&self, batch: LogBatch) -> Result<(), IngestError> {
        let tx = {
            let mut routes = self.inner.routes.lock();
            routes
                .entry(batch.server.id)
                .or_insert_with(|| self.spawn_route(&batch.server))
                .clone()
        };

        let server = batch.server.name.clone();
        tx.try_send(batch).map_err(|e| match e {
            TrySendError::Full(_) => {
                tracing::warn!(server = %server, "Ingestion queue full, rejecting batch");
                IngestError::QueueFull(server)
            }
            TrySendError::Closed(_) => IngestError::Closed(server),
        })
    }

    /// Number of servers with an ingestion task
    pub fn route_count(&self) -> usize {
        self.inner.routes.lock().len()
    }

    fn spawn_route(&self, server: &ServerRef) -> mpsc::Sender<LogBatch> {
        let inner = &self.inner;
        let (tx, rx) = mpsc::channel(inner.capacity);
        let ingestor = Ingestor::new(
            Arc::clone(&inner.classifier),
            Arc::clone(&inner.bus),
            inner.unhandled.clone(),
        );
        inner
            .tracker
            .spawn(run_ingestor(ingestor, server.clone(), rx, inner.cancel.clone()));
        tx
    }
}
