//! Pipeline wiring and lifecycle
//!
//! ```text
//!  HTTP /api/v1/log ──► LogRouter ──► Ingestor (per server) ──► EventBus
//!                                                                 │
//!        ┌──────────────────┬───────────────────┬─────────────────┤
//!        ▼                  ▼                   ▼                 ▼
//!  WarningEngine     MatchSummarizer      chat history     connection history
//!        │                  │
//!        ├── WorkerPool ◄───┤   (dispatch, match save, psay, filter counts)
//!        ▼                  ▼
//!             NotificationSink ──► ChatPlatform
//! ```

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::event::{BusError, EventBus, EventKind, Interest, LogClassifier};
use crate::history::HistoryWriter;
use crate::ingest::{LogRouter, UnhandledSink};
use crate::matches::MatchSummarizer;
use crate::notify::{run_notifier, ChatPlatform, DiscordWebhook, LogPlatform, NotificationSink, NotifyError};
use crate::pool::WorkerPool;
use crate::rcon::{RconControl, ServerControl};
use crate::store::{with_deadline, Store, StoreError};
use crate::warning::{FilterSet, WarningEffects, WarningEngine};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("event bus: {0}")]
    Bus(#[from] BusError),

    #[error("loading filters: {0}")]
    Store(#[from] StoreError),

    #[error("chat platform: {0}")]
    Notify(#[from] NotifyError),

    #[error("unhandled log file: {0}")]
    Io(#[from] std::io::Error),
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub router: LogRouter,
    pub bus: Arc<EventBus>,
    pub config: Config,
}

/// Running pipeline
pub struct Pipeline {
    pub state: AppState,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl Pipeline {
    /// Subscribe every consumer and spawn its task
    pub async fn start(config: &Config, store: Arc<dyn Store>) -> Result<Self, StartupError> {
        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();
        let timeout = config.store_timeout;
        let bus = Arc::new(EventBus::new());

        let pool = WorkerPool::spawn(
            config.worker_pool_size,
            config.worker_queue_capacity,
            cancel.clone(),
            &tracker,
        );

        let platform: Arc<dyn ChatPlatform> =
            if config.discord_mod_log_webhook.is_some() || config.discord_match_log_webhook.is_some() {
                Arc::new(DiscordWebhook::new(
                    config.discord_mod_log_webhook.clone(),
                    config.discord_match_log_webhook.clone(),
                    timeout,
                )?)
            } else {
                tracing::warn!("No discord webhooks configured, notifications go to the log only");
                Arc::new(LogPlatform)
            };
        let (sink, notifications) = NotificationSink::new(config.notify_queue_capacity);
        tracker.spawn(run_notifier(notifications, platform, cancel.clone()));

        let control: Arc<dyn ServerControl> = Arc::new(RconControl::new(Arc::clone(&store), timeout));
        let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&store), Arc::clone(&control), timeout));

        let capacity = config.bus_queue_capacity;

        if config.filter_enabled {
            let records = with_deadline(timeout, store.get_filters()).await?;
            let filters = FilterSet::from_records(records);
            tracing::info!(count = filters.len(), "Loaded filter list");

            let subscription =
                bus.subscribe("warnings", Interest::kinds(&[EventKind::Say, EventKind::SayTeam]), capacity)?;
            let engine = WarningEngine::new(
                filters,
                config.warning_settings(),
                WarningEffects {
                    store: Arc::clone(&store),
                    control: Arc::clone(&control),
                    dispatcher,
                    pool: pool.clone(),
                    sink: sink.clone(),
                },
            );
            tracker.spawn(engine.run(subscription, cancel.clone()));
        } else {
            tracing::warn!("Word filters disabled, warning engine not started");
        }

        let subscription = bus.subscribe("matches", Interest::Any, capacity)?;
        let summarizer = MatchSummarizer::new(
            Arc::clone(&store),
            pool,
            sink,
            config.external_url.clone(),
            timeout,
        );
        tracker.spawn(summarizer.run(subscription, cancel.clone()));

        let subscription =
            bus.subscribe("chat_history", Interest::kinds(&[EventKind::Say, EventKind::SayTeam]), capacity)?;
        tracker.spawn(HistoryWriter::new(Arc::clone(&store), timeout).run(subscription, cancel.clone()));

        let subscription = bus.subscribe("connection_history", Interest::kinds(&[EventKind::Connected]), capacity)?;
        tracker.spawn(HistoryWriter::new(Arc::clone(&store), timeout).run(subscription, cancel.clone()));

        let unhandled = match &config.unhandled_log_path {
            Some(path) => {
                tracing::info!(path = %path.display(), "Writing unhandled log lines");
                Some(Arc::new(UnhandledSink::open(path)?))
            }
            None => None,
        };

        let router = LogRouter::new(
            Arc::new(LogClassifier::new()),
            Arc::clone(&bus),
            unhandled,
            config.ingest_queue_capacity,
            cancel.clone(),
            tracker.clone(),
        );

        Ok(Self {
            state: AppState {
                store,
                router,
                bus,
                config: config.clone(),
            },
            cancel,
            tracker,
        })
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancel every task and wait for them, up to `grace`
    pub async fn shutdown(self, grace: Duration) {
        self.cancel.cancel();
        self.tracker.close();

        if tokio::time::timeout(grace, self.tracker.wait()).await.is_err() {
            tracing::warn!(remaining = self.tracker.len(), "Shutdown grace elapsed with tasks still running");
        } else {
            tracing::info!("Pipeline stopped");
        }
    }
}
