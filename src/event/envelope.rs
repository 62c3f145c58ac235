//! Event envelope - classified representation of one raw log line

use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// EVENT KIND
// ============================================================================

/// Classified event type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Say,
    SayTeam,
    Connected,
    RoundStart,
    RoundEnd,
    MapLoad,
    LogStart,
    LogStop,
    GameOver,
    Kill,
    Damage,
    Heal,
    ChargeDeployed,
    MedicDeath,
    Unknown,
    Ignored,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Say => "say",
            EventKind::SayTeam => "say_team",
            EventKind::Connected => "connected",
            EventKind::RoundStart => "round_start",
            EventKind::RoundEnd => "round_end",
            EventKind::MapLoad => "map_load",
            EventKind::LogStart => "log_start",
            EventKind::LogStop => "log_stop",
            EventKind::GameOver => "game_over",
            EventKind::Kill => "kill",
            EventKind::Damage => "damage",
            EventKind::Heal => "heal",
            EventKind::ChargeDeployed => "charge_deployed",
            EventKind::MedicDeath => "medic_death",
            EventKind::Unknown => "unknown",
            EventKind::Ignored => "ignored",
        }
    }

    /// Events that close the live match for a server
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventKind::LogStop | EventKind::GameOver)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// IDENTITIES
// ============================================================================

/// Upstream game server
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerRef {
    pub id: i64,
    pub name: String,
}

impl ServerRef {
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self { id, name: name.into() }
    }
}

const STEAM64_BASE: u64 = 76_561_197_960_265_728;

/// 64-bit steam id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SteamId(pub u64);

impl SteamId {
    /// Parse the `[U:1:<account>]` form used in game logs
    pub fn from_steam3(s: &str) -> Option<Self> {
        let inner = s.strip_prefix("[U:1:")?.strip_suffix(']')?;
        let account: u64 = inner.parse().ok()?;
        if account == 0 {
            return None;
        }
        Some(SteamId(STEAM64_BASE + account))
    }

    pub fn account_id(&self) -> u64 {
        self.0.saturating_sub(STEAM64_BASE)
    }

    pub fn is_valid(&self) -> bool {
        self.0 > STEAM64_BASE
    }

    pub fn steam3(&self) -> String {
        format!("[U:1:{}]", self.account_id())
    }

    pub fn steam2(&self) -> String {
        let account = self.account_id();
        format!("STEAM_0:{}:{}", account % 2, account / 2)
    }
}

impl fmt::Display for SteamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Team a player belongs to at the time of the event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Team {
    Red,
    Blu,
    Spectator,
    Unassigned,
}

impl Team {
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "red" => Team::Red,
            "blue" | "blu" => Team::Blu,
            "spectator" => Team::Spectator,
            _ => Team::Unassigned,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Team::Red => "RED",
            Team::Blu => "BLU",
            Team::Spectator => "SPEC",
            Team::Unassigned => "UNASSIGNED",
        }
    }
}

/// Player that originated (or was the target of) an event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerRef {
    pub steam_id: SteamId,
    pub name: String,
    pub team: Team,
    pub address: Option<IpAddr>,
}

// ============================================================================
// PAYLOAD
// ============================================================================

/// Per round score
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Score {
    pub red: i32,
    pub blu: i32,
}

/// Known attribute schemas per kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    Say { message: String },
    Connected { address: Option<IpAddr> },
    Kill { victim: PlayerRef, weapon: String },
    Damage { victim: Option<PlayerRef>, amount: i64, weapon: Option<String> },
    Heal { target: Option<PlayerRef>, amount: i64 },
    ChargeDeployed { medigun: Option<String> },
    MedicDeath { medic: PlayerRef, ubercharge: bool },
    RoundEnd { winner: Option<Team>, score: Score },
    MapLoad { map: String },
    GameOver { reason: String },
    None,
}

/// Loosely typed attribute value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
}

/// Open key/value map for fields without a fixed schema
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Attributes(BTreeMap<String, AttrValue>);

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: AttrValue) {
        self.0.insert(key.into(), value);
    }

    /// Insert a raw log string, keeping numbers typed
    pub fn insert_raw(&mut self, key: impl Into<String>, raw: &str) {
        let value = if let Ok(i) = raw.parse::<i64>() {
            AttrValue::Int(i)
        } else if let Ok(f) = raw.parse::<f64>() {
            AttrValue::Float(f)
        } else {
            AttrValue::Str(raw.to_string())
        };
        self.0.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&AttrValue> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.0.get(key)? {
            AttrValue::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        match self.0.get(key)? {
            AttrValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.0.get(key)? {
            AttrValue::Bool(b) => Some(*b),
            AttrValue::Int(i) => Some(*i != 0),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// ============================================================================
// ENVELOPE
// ============================================================================

/// One classified log line plus routing metadata.
///
/// Constructed by the classifier and never mutated afterwards: the bus only
/// hands out `Arc<Envelope>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    kind: EventKind,
    pub origin: ServerRef,
    pub actor: Option<PlayerRef>,
    pub occurred_at: DateTime<Utc>,
    pub payload: Payload,
    pub attributes: Attributes,
}

impl Envelope {
    pub fn new(kind: EventKind, origin: ServerRef, occurred_at: DateTime<Utc>) -> Self {
        Self {
            kind,
            origin,
            actor: None,
            occurred_at,
            payload: Payload::None,
            attributes: Attributes::new(),
        }
    }

    pub fn with_actor(mut self, actor: PlayerRef) -> Self {
        self.actor = Some(actor);
        self
    }

    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Chat body for say / say_team events
    pub fn message(&self) -> Option<&str> {
        match &self.payload {
            Payload::Say { message } if !message.is_empty() => Some(message.as_str()),
            _ => None,
        }
    }
}
