//! Per-player warning records
//!
//! Pure state: no clocks, no I/O. The engine passes `now` in and acts on the
//! returned [`WarnOutcome`].

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use crate::dispatch::Reason;
use crate::event::SteamId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    pub reason: Reason,
    pub message: String,
    pub matched: String,
    pub filter_id: i64,
    pub pattern: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WarnOutcome {
    /// Still at or below the limit; `count` includes this warning
    Warned { count: usize },
    /// Limit exceeded. The record was cleared and these are its entries.
    Escalated { warnings: Vec<Warning> },
}

pub struct WarningTracker {
    limit: usize,
    timeout: Duration,
    records: HashMap<SteamId, Vec<Warning>>,
}

impl WarningTracker {
    pub fn new(limit: usize, timeout: Duration) -> Self {
        Self {
            limit,
            timeout,
            records: HashMap::new(),
        }
    }

    pub fn record(&mut self, player: SteamId, warning: Warning) -> WarnOutcome {
        let entries = self.records.entry(player).or_default();
        entries.push(warning);

        if entries.len() > self.limit {
            let warnings = self.records.remove(&player).unwrap_or_default();
            return WarnOutcome::Escalated { warnings };
        }

        WarnOutcome::Warned { count: entries.len() }
    }

    /// Drop every entry older than the timeout and any record left empty.
    /// Returns the number of entries removed.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> usize {
        let timeout = self.timeout;
        let mut removed = 0;

        for entries in self.records.values_mut() {
            let before = entries.len();
            entries.retain(|w| now - w.created_at <= timeout);
            removed += before - entries.len();
        }
        self.records.retain(|_, entries| !entries.is_empty());

        removed
    }

    pub fn count(&self, player: SteamId) -> usize {
        self.records.get(&player).map_or(0, Vec::len)
    }

    pub fn is_tracked(&self, player: SteamId) -> bool {
        self.records.contains_key(&player)
    }

    /// Number of players with at least one live warning
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
