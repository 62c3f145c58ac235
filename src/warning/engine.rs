//! Warning engine task
//!
//! Consumes chat events, checks them against the word filters and keeps the
//! per-player warning records. The sweep ticker runs in the same task, so
//! arrival and expiry never interleave.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::filter::{FilterMatch, FilterSet};
use super::tracker::{WarnOutcome, Warning, WarningTracker};
use crate::dispatch::{BanAction, BanRequest, Dispatcher, Reason};
use crate::event::{Envelope, EventKind, PlayerRef, ServerRef, Subscription};
use crate::notify::{Channel, Color, Embed, Notification, NotificationSink};
use crate::pool::WorkerPool;
use crate::rcon::ServerControl;
use crate::store::{with_deadline, Store};

const WARNING_NOTE: &str = "Automatic warning ban";

#[derive(Debug, Clone)]
pub struct WarningSettings {
    pub limit: usize,
    pub timeout: Duration,
    pub sweep_interval: StdDuration,
    pub exceeded_action: BanAction,
    /// `None` is permanent
    pub exceeded_duration: Option<Duration>,
    /// Recorded as the author of automatic actions
    pub authority: crate::event::SteamId,
    pub external_url: String,
    pub call_timeout: StdDuration,
}

/// Side-effect handles used by the engine
#[derive(Clone)]
pub struct WarningEffects {
    pub store: Arc<dyn Store>,
    pub control: Arc<dyn ServerControl>,
    pub dispatcher: Arc<Dispatcher>,
    pub pool: WorkerPool,
    pub sink: NotificationSink,
}

pub struct WarningEngine {
    tracker: WarningTracker,
    filters: FilterSet,
    settings: WarningSettings,
    effects: WarningEffects,
}

impl WarningEngine {
    pub fn new(filters: FilterSet, settings: WarningSettings, effects: WarningEffects) -> Self {
        Self {
            tracker: WarningTracker::new(settings.limit, settings.timeout),
            filters,
            settings,
            effects,
        }
    }

    pub fn tracker(&self) -> &WarningTracker {
        &self.tracker
    }

    pub async fn run(mut self, mut subscription: Subscription, cancel: CancellationToken) {
        let mut sweep = tokio::time::interval(self.settings.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            filters = self.filters.len(),
            limit = self.settings.limit,
            action = %self.settings.exceeded_action,
            "Warning engine started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sweep.tick() => {
                    let removed = self.sweep(Utc::now());
                    if removed > 0 {
                        tracing::debug!(removed, tracked = self.tracker.len(), "Expired warnings removed");
                    }
                }
                next = subscription.recv() => match next {
                    Some(event) => {
                        self.handle(&event, Utc::now());
                    }
                    None => break,
                },
            }
        }

        tracing::debug!("Warning engine stopped");
    }

    pub fn sweep(&mut self, now: DateTime<Utc>) -> usize {
        self.tracker.sweep(now)
    }

    /// Process one event. Returns the outcome when it produced a warning.
    pub fn handle(&mut self, event: &Envelope, now: DateTime<Utc>) -> Option<WarnOutcome> {
        if !matches!(event.kind(), EventKind::Say | EventKind::SayTeam) {
            return None;
        }
        let actor = event.actor.as_ref()?;
        if !actor.steam_id.is_valid() {
            return None;
        }
        let message = event.message()?;
        let found = self.filters.find_match(message)?;

        tracing::info!(
            steam_id = %actor.steam_id,
            matched = %found.matched,
            message,
            filter_id = found.filter_id,
            "User triggered word filter"
        );

        let warning = Warning {
            reason: Reason::Language,
            message: message.to_string(),
            matched: found.matched.clone(),
            filter_id: found.filter_id,
            pattern: found.pattern.clone(),
            created_at: now,
        };

        self.bump_trigger_count(found.filter_id);

        let outcome = self.tracker.record(actor.steam_id, warning);
        let count = match &outcome {
            WarnOutcome::Warned { count } => *count,
            WarnOutcome::Escalated { warnings } => warnings.len(),
        };

        let mut embed = Embed::new(
            &format!("Language Warning (#{}/{})", count, self.settings.limit),
            Color::Orange,
        )
        .url(format!("{}/profiles/{}", self.settings.external_url, actor.steam_id));
        embed.add_field("Matched", &found.matched);
        embed.add_field("Message", message);

        match &outcome {
            WarnOutcome::Warned { count } => {
                self.send_warning(&event.origin, actor, *count);
            }
            WarnOutcome::Escalated { .. } => {
                tracing::info!(steam_id = %actor.steam_id, count, "Warn limit exceeded");

                let request = BanRequest {
                    target: actor.steam_id,
                    authority: self.settings.authority,
                    reason: Reason::Language,
                    note: WARNING_NOTE.to_string(),
                    action: self.settings.exceeded_action,
                    duration: self.settings.exceeded_duration,
                    origin: Some(event.origin.clone()),
                    requested_at: now,
                };

                embed.add_field("Name", &actor.name);
                let (expires_in, expires_at) = match request.expires_at() {
                    Some(at) => (fmt_duration(at - now), at.format("%Y-%m-%d %H:%M").to_string()),
                    None => ("Permanent".to_string(), "Permanent".to_string()),
                };
                embed.add_field("Expires In", &expires_in);
                embed.add_field("Expires At", &expires_at);

                self.escalate(request);
            }
        }

        add_filter_fields(&mut embed, &found, actor, &event.origin);
        self.effects.sink.offer(Notification::embed(Channel::ModLog, embed));

        Some(outcome)
    }

    fn bump_trigger_count(&self, filter_id: i64) {
        let store = Arc::clone(&self.effects.store);
        let timeout = self.settings.call_timeout;

        let submitted = self.effects.pool.submit("filter_trigger_count", async move {
            if let Err(e) = with_deadline(timeout, store.increment_filter_trigger_count(filter_id)).await {
                tracing::error!(filter_id, error = %e, "Failed to update filter trigger count");
            }
        });
        if let Err(e) = submitted {
            tracing::error!(error = %e, "Failed to submit job");
        }
    }

    fn send_warning(&self, origin: &ServerRef, actor: &PlayerRef, count: usize) {
        let control = Arc::clone(&self.effects.control);
        let timeout = self.settings.call_timeout;
        let origin = origin.clone();
        let target = actor.steam_id;
        let message = warning_message(count);

        let submitted = self.effects.pool.submit("warning_psay", async move {
            let result = tokio::time::timeout(timeout, control.psay(&origin, target, &message)).await;
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!(steam_id = %target, error = %e, "Failed to send user warning psay message"),
                Err(_) => tracing::error!(steam_id = %target, "Timed out sending user warning psay message"),
            }
        });
        if let Err(e) = submitted {
            tracing::error!(error = %e, "Failed to submit job");
        }
    }

    fn escalate(&self, request: BanRequest) {
        let dispatcher = Arc::clone(&self.effects.dispatcher);

        // Never dropped under load: the player's record is already cleared
        let submitted = self.effects.pool.submit_or_spawn("warning_action", async move {
            match dispatcher.dispatch(&request).await {
                Ok(outcome) => tracing::info!(
                    steam_id = %request.target,
                    action = %request.action,
                    ?outcome,
                    "Warning action dispatched"
                ),
                Err(e) => tracing::error!(
                    steam_id = %request.target,
                    action = %request.action,
                    error = %e,
                    "Failed to apply warning action"
                ),
            }
        });
        if let Err(e) = submitted {
            tracing::error!(error = %e, "Failed to submit job");
        }
    }
}

pub fn warning_message(count: usize) -> String {
    format!(
        "[WARN #{}] Please refrain from using slurs/toxicity (see: rules & MOTD). \
         Further offenses will result in mutes/bans",
        count
    )
}

fn add_filter_fields(embed: &mut Embed, found: &FilterMatch, actor: &PlayerRef, origin: &ServerRef) {
    embed.add_field("Pattern", &found.pattern);
    embed.add_steam_id_fields(actor.steam_id);
    embed.add_field_inline("Filter ID", &found.filter_id.to_string());
    embed.add_field_inline("Server", &origin.name);
}

/// Coarse human readable duration, e.g. `6d 23h`
fn fmt_duration(d: Duration) -> String {
    let days = d.num_days();
    let hours = d.num_hours() % 24;
    let minutes = d.num_minutes() % 60;

    match (days, hours) {
        (0, 0) => format!("{}m", minutes),
        (0, h) => format!("{}h {}m", h, minutes),
        (d, h) => format!("{}d {}h", d, h),
    }
}

#[cfg(test)]
mod tests;
