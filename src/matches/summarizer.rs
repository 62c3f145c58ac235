//! Match summarizer task
//!
//! Keeps at most one live [`MatchAggregate`] per server. A map load opens a
//! match, a log stop or game over seals it; the sealed match is saved on the
//! worker pool and announced only after the save succeeds.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::aggregate::{MatchAggregate, SealedMatch};
use crate::event::{Envelope, EventKind, Payload, Subscription};
use crate::notify::{Channel, Color, Embed, Notification, NotificationSink};
use crate::pool::WorkerPool;
use crate::store::{with_deadline, Store};

/// What an event did to the live matches
#[derive(Debug)]
pub enum Transition {
    /// No live match for the server and the event does not open one
    Discarded,
    Created(Uuid),
    Applied,
    Sealed(SealedMatch),
}

/// Live matches keyed by server id
#[derive(Default)]
pub struct MatchBook {
    live: HashMap<i64, MatchAggregate>,
}

impl MatchBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&mut self, event: &Envelope, now: DateTime<Utc>) -> Transition {
        let server_id = event.origin.id;

        let Some(aggregate) = self.live.get_mut(&server_id) else {
            return match (event.kind(), &event.payload) {
                (EventKind::MapLoad, Payload::MapLoad { map }) => {
                    let aggregate = MatchAggregate::new(event.origin.clone(), map.clone(), now);
                    let match_id = aggregate.match_id();
                    tracing::info!(server = %event.origin.name, map = %map, %match_id, "New match created");
                    self.live.insert(server_id, aggregate);
                    Transition::Created(match_id)
                }
                _ => Transition::Discarded,
            };
        };

        // Apply before any side effect triggers
        if let Err(e) = aggregate.apply(event) {
            tracing::error!(server = %event.origin.name, kind = %event.kind(), error = %e, "Error applying event");
        }

        if event.kind().is_terminal() {
            if let Some(aggregate) = self.live.remove(&server_id) {
                return Transition::Sealed(aggregate.seal(now));
            }
        }

        Transition::Applied
    }

    pub fn is_live(&self, server_id: i64) -> bool {
        self.live.contains_key(&server_id)
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }
}

pub struct MatchSummarizer {
    book: MatchBook,
    store: Arc<dyn Store>,
    pool: WorkerPool,
    sink: NotificationSink,
    external_url: String,
    call_timeout: StdDuration,
}

impl MatchSummarizer {
    pub fn new(
        store: Arc<dyn Store>,
        pool: WorkerPool,
        sink: NotificationSink,
        external_url: String,
        call_timeout: StdDuration,
    ) -> Self {
        Self {
            book: MatchBook::new(),
            store,
            pool,
            sink,
            external_url,
            call_timeout,
        }
    }

    pub fn book(&self) -> &MatchBook {
        &self.book
    }

    pub async fn run(mut self, mut subscription: Subscription, cancel: CancellationToken) {
        tracing::info!("Match summarizer started");

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                next = subscription.recv() => match next {
                    Some(event) => event,
                    None => break,
                },
            };
            self.handle(&event, Utc::now());
        }

        tracing::debug!(live = self.book.len(), "Match summarizer stopped");
    }

    pub fn handle(&mut self, event: &Envelope, now: DateTime<Utc>) -> Transition {
        let transition = self.book.handle(event, now);
        if let Transition::Sealed(sealed) = &transition {
            self.submit_save(sealed.clone());
        }
        transition
    }

    fn submit_save(&self, sealed: SealedMatch) {
        let store = Arc::clone(&self.store);
        let sink = self.sink.clone();
        let external_url = self.external_url.clone();
        let timeout = self.call_timeout;
        let match_id = sealed.match_id;

        let submitted = self.pool.submit("match_save", async move {
            if let Err(e) = with_deadline(timeout, store.save_match(&sealed)).await {
                tracing::error!(server = %sealed.server.name, %match_id, error = %e, "Failed to save match");
                return;
            }
            tracing::info!(
                server = %sealed.server.name,
                %match_id,
                map = %sealed.map_name,
                rounds = sealed.rounds.len(),
                "Match saved"
            );
            let embed = summary_embed(&sealed, Utc::now(), &external_url);
            sink.offer(Notification::embed(Channel::MatchLog, embed));
        });

        if let Err(e) = submitted {
            tracing::error!(%match_id, error = %e, "Failed to submit match save, match lost");
        }
    }
}

/// Discord summary of a finished match
pub fn summary_embed(sealed: &SealedMatch, now: DateTime<Utc>, external_url: &str) -> Embed {
    let mut embed = Embed::new(
        &format!("Match #{} - {} - {}", sealed.match_id, sealed.server.name, sealed.map_name),
        Color::Green,
    )
    .description("Match results")
    .url(format!("{}/log/{}", external_url, sealed.match_id));

    for team in &sealed.team_sums {
        let name = team.team.as_str();
        embed.add_field_inline(&format!("{} Kills", name), &team.kills.to_string());
        embed.add_field_inline(&format!("{} Damage", name), &team.damage.to_string());
        embed.add_field_inline(
            &format!("{} Ubers/Drops", name),
            &format!("{}/{}", team.charges, team.drops),
        );
    }

    embed.add_field_inline("Red Score", &sealed.red_score().to_string());
    embed.add_field_inline("Blu Score", &sealed.blu_score().to_string());

    let minutes = sealed.elapsed(now).num_milliseconds() as f64 / 60_000.0;
    embed.add_field_inline("Duration", &format!("{:.2} Minutes", minutes));

    embed
}
