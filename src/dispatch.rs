//! Ban/action dispatcher
//!
//! Turns a [`BanRequest`] into a persisted ban or gag plus the matching live
//! server command. Persistence is idempotent per target, reason and
//! one-minute bucket.

use std::fmt;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, DurationRound, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::event::{ServerRef, SteamId};
use crate::rcon::{ControlError, ServerControl};
use crate::store::{with_deadline, BanRecord, Store, StoreError};

/// Width of the duplicate-suppression window
pub const BAN_BUCKET_SECS: i64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BanAction {
    Ban,
    Kick,
    Gag,
}

impl BanAction {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ban" => Some(BanAction::Ban),
            "kick" => Some(BanAction::Kick),
            "gag" => Some(BanAction::Gag),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BanAction::Ban => "ban",
            BanAction::Kick => "kick",
            BanAction::Gag => "gag",
        }
    }
}

impl fmt::Display for BanAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reason {
    Language,
}

impl Reason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Reason::Language => "language",
        }
    }

    /// Text shown to players
    pub fn label(&self) -> &'static str {
        match self {
            Reason::Language => "Language",
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Moderation action to apply to one player
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BanRequest {
    pub target: SteamId,
    pub authority: SteamId,
    pub reason: Reason,
    pub note: String,
    pub action: BanAction,
    /// `None` is permanent
    pub duration: Option<Duration>,
    pub origin: Option<ServerRef>,
    pub requested_at: DateTime<Utc>,
}

impl BanRequest {
    /// `None` for permanent, including lengths past the last representable date
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.duration.and_then(|d| self.requested_at.checked_add_signed(d))
    }

    /// `requested_at` truncated to the dedup window
    pub fn bucket(&self) -> DateTime<Utc> {
        self.requested_at
            .duration_trunc(Duration::seconds(BAN_BUCKET_SECS))
            .unwrap_or(self.requested_at)
    }

    fn to_record(&self) -> BanRecord {
        BanRecord {
            steam_id: self.target,
            author_id: self.authority,
            action: self.action,
            reason: self.reason,
            note: self.note.clone(),
            origin_server_id: self.origin.as_ref().map(|o| o.id),
            bucket: self.bucket(),
            valid_until: self.expires_at(),
            created_at: self.requested_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// `live` is false when the running server could not be told
    Applied { live: bool },
    /// Same target, reason and bucket was already persisted
    AlreadyApplied,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("failed to persist action: {0}")]
    Store(#[from] StoreError),

    #[error("failed to reach server: {0}")]
    Control(#[from] ControlError),

    #[error("kick requires an origin server")]
    NoOrigin,
}

pub struct Dispatcher {
    store: Arc<dyn Store>,
    control: Arc<dyn ServerControl>,
    timeout: StdDuration,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn Store>, control: Arc<dyn ServerControl>, timeout: StdDuration) -> Self {
        Self { store, control, timeout }
    }

    pub async fn dispatch(&self, req: &BanRequest) -> Result<DispatchOutcome, DispatchError> {
        if req.action == BanAction::Kick {
            let origin = req.origin.as_ref().ok_or(DispatchError::NoOrigin)?;
            self.live(origin, req).await?;
            tracing::info!(target_id = %req.target, server = %origin.name, reason = %req.reason, "Player kicked");
            return Ok(DispatchOutcome::Applied { live: true });
        }

        let record = req.to_record();
        match with_deadline(self.timeout, self.store.apply_ban(&record)).await {
            Ok(()) => {}
            Err(StoreError::Duplicate) => {
                tracing::info!(
                    target_id = %req.target,
                    action = %req.action,
                    reason = %req.reason,
                    "Action already applied in this window"
                );
                return Ok(DispatchOutcome::AlreadyApplied);
            }
            Err(e) => return Err(e.into()),
        }

        tracing::info!(
            target_id = %req.target,
            action = %req.action,
            reason = %req.reason,
            expires_at = ?req.expires_at(),
            "Action persisted"
        );

        let Some(origin) = req.origin.as_ref() else {
            return Ok(DispatchOutcome::Applied { live: false });
        };

        match self.live(origin, req).await {
            Ok(()) => Ok(DispatchOutcome::Applied { live: true }),
            Err(e) => {
                tracing::warn!(
                    target_id = %req.target,
                    server = %origin.name,
                    error = %e,
                    "Action persisted but server could not be updated"
                );
                Ok(DispatchOutcome::Applied { live: false })
            }
        }
    }

    async fn live(&self, origin: &ServerRef, req: &BanRequest) -> Result<(), ControlError> {
        let call = async {
            match req.action {
                BanAction::Ban | BanAction::Kick => {
                    self.control.kick(origin, req.target, req.reason.label()).await
                }
                BanAction::Gag => self.control.gag(origin, req.target).await,
            }
        };

        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| ControlError::Timeout(self.timeout))?
    }
}
