//! Log line classifier
//!
//! Turns one raw srcds log line into an [`Envelope`]. Classification never
//! fails outright: unrecognized shapes become `Unknown`, noise becomes
//! `Ignored`, and recognized shapes with bad fields become `Unknown` with a
//! failure reason attached.

use std::net::{IpAddr, SocketAddr};

use chrono::{DateTime, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use super::envelope::{
    Attributes, Envelope, EventKind, Payload, PlayerRef, Score, ServerRef, SteamId, Team,
};

const PLAYER: &str = r#""(?P<{p}name>.*?)<(?P<{p}uid>\d*)><(?P<{p}sid>[^>]*)><(?P<{p}team>[^>]*)>""#;

fn player_pattern(prefix: &str) -> String {
    PLAYER.replace("{p}", prefix)
}

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("static log pattern must compile")
}

static RE_HEADER: Lazy<Regex> =
    Lazy::new(|| compile(r"^L (\d{2}/\d{2}/\d{4} - \d{2}:\d{2}:\d{2}): (.*)$"));

static RE_SAY: Lazy<Regex> = Lazy::new(|| {
    compile(&format!(r#"^{} (?P<kind>say|say_team) "(?P<msg>.*)"$"#, player_pattern("a")))
});

static RE_CONNECTED: Lazy<Regex> = Lazy::new(|| {
    compile(&format!(r#"^{} connected, address "(?P<addr>[^"]*)""#, player_pattern("a")))
});

static RE_KILLED: Lazy<Regex> = Lazy::new(|| {
    compile(&format!(
        r#"^{} killed {} with "(?P<weapon>[^"]*)"(?P<rest>.*)$"#,
        player_pattern("a"),
        player_pattern("v")
    ))
});

static RE_TRIGGERED_AGAINST: Lazy<Regex> = Lazy::new(|| {
    compile(&format!(
        r#"^{} triggered "(?P<what>[^"]+)" against {}(?P<rest>.*)$"#,
        player_pattern("a"),
        player_pattern("v")
    ))
});

static RE_TRIGGERED: Lazy<Regex> = Lazy::new(|| {
    compile(&format!(r#"^{} triggered "(?P<what>[^"]+)"(?P<rest>.*)$"#, player_pattern("a")))
});

static RE_WORLD: Lazy<Regex> =
    Lazy::new(|| compile(r#"^World triggered "(?P<what>[^"]+)"(?P<rest>.*)$"#));

static RE_LOADING_MAP: Lazy<Regex> = Lazy::new(|| compile(r#"^Loading map "(?P<map>[^"]+)""#));

static RE_PROPERTY: Lazy<Regex> = Lazy::new(|| compile(r#"\((?P<key>\w+) "(?P<value>[^"]*)"\)"#));

static RE_GAME_OVER_REASON: Lazy<Regex> = Lazy::new(|| compile(r#"reason "(?P<reason>[^"]*)""#));

/// Line prefixes that carry nothing for the pipeline
const IGNORED_PREFIXES: &[&str] = &[
    "server_cvar:",
    "rcon from",
    "[META]",
    "Team \"",
    "Started map",
];

/// Result of classifying one line
#[derive(Debug, Clone)]
pub struct Classified {
    pub envelope: Envelope,
    /// Set when the line matched a known shape but its fields did not parse
    pub failure: Option<String>,
}

impl Classified {
    fn ok(envelope: Envelope) -> Self {
        Self { envelope, failure: None }
    }
}

/// External classifier contract
pub trait Classifier: Send + Sync {
    fn classify(&self, line: &str, origin: &ServerRef) -> Classified;
}

/// Classifier for Source dedicated server (TF2) log lines
#[derive(Debug, Default, Clone)]
pub struct LogClassifier;

impl LogClassifier {
    pub fn new() -> Self {
        Self
    }

    fn classify_body(
        &self,
        body: &str,
        origin: &ServerRef,
        at: DateTime<Utc>,
    ) -> Result<Envelope, String> {
        let new = |kind| Envelope::new(kind, origin.clone(), at);

        if let Some(c) = RE_SAY.captures(body) {
            let kind = if &c["kind"] == "say_team" { EventKind::SayTeam } else { EventKind::Say };
            return Ok(new(kind)
                .with_actor(capture_player(&c, "a"))
                .with_payload(Payload::Say { message: c["msg"].to_string() }));
        }

        if let Some(c) = RE_CONNECTED.captures(body) {
            let address = parse_address(&c["addr"]);
            let mut actor = capture_player(&c, "a");
            actor.address = address;
            return Ok(new(EventKind::Connected)
                .with_actor(actor)
                .with_payload(Payload::Connected { address }));
        }

        if let Some(c) = RE_KILLED.captures(body) {
            return Ok(new(EventKind::Kill)
                .with_actor(capture_player(&c, "a"))
                .with_payload(Payload::Kill {
                    victim: capture_player(&c, "v"),
                    weapon: c["weapon"].to_string(),
                })
                .with_attributes(parse_properties(&c["rest"])));
        }

        if let Some(c) = RE_TRIGGERED_AGAINST.captures(body) {
            let attrs = parse_properties(&c["rest"]);
            let actor = capture_player(&c, "a");
            let other = capture_player(&c, "v");
            let envelope = match &c["what"] {
                "damage" => {
                    let amount = required_int(&attrs, "damage")?;
                    new(EventKind::Damage).with_payload(Payload::Damage {
                        victim: Some(other),
                        amount,
                        weapon: attrs.get_str("weapon").map(str::to_string),
                    })
                }
                "healed" => {
                    let amount = required_int(&attrs, "healing")?;
                    new(EventKind::Heal).with_payload(Payload::Heal { target: Some(other), amount })
                }
                "medic_death" => new(EventKind::MedicDeath).with_payload(Payload::MedicDeath {
                    medic: other,
                    ubercharge: attrs.get_bool("ubercharge").unwrap_or(false),
                }),
                _ => new(EventKind::Ignored),
            };
            return Ok(envelope.with_actor(actor).with_attributes(attrs));
        }

        if let Some(c) = RE_TRIGGERED.captures(body) {
            let attrs = parse_properties(&c["rest"]);
            let envelope = match &c["what"] {
                "chargedeployed" => new(EventKind::ChargeDeployed).with_payload(Payload::ChargeDeployed {
                    medigun: attrs.get_str("medigun").map(str::to_string),
                }),
                "damage" => {
                    let amount = required_int(&attrs, "damage")?;
                    new(EventKind::Damage).with_payload(Payload::Damage {
                        victim: None,
                        amount,
                        weapon: attrs.get_str("weapon").map(str::to_string),
                    })
                }
                _ => new(EventKind::Ignored),
            };
            return Ok(envelope.with_actor(capture_player(&c, "a")).with_attributes(attrs));
        }

        if let Some(c) = RE_WORLD.captures(body) {
            let rest = &c["rest"];
            return match &c["what"] {
                "Round_Start" => Ok(new(EventKind::RoundStart)),
                "Round_Win" => {
                    let attrs = parse_properties(rest);
                    let winner = match attrs.get_str("winner") {
                        Some(w) => Team::parse(w),
                        None => return Err("round win without winner".to_string()),
                    };
                    let score = match winner {
                        Team::Red => Score { red: 1, blu: 0 },
                        Team::Blu => Score { red: 0, blu: 1 },
                        _ => Score::default(),
                    };
                    Ok(new(EventKind::RoundEnd)
                        .with_payload(Payload::RoundEnd { winner: Some(winner), score })
                        .with_attributes(attrs))
                }
                "Round_Stalemate" => Ok(new(EventKind::RoundEnd)
                    .with_payload(Payload::RoundEnd { winner: None, score: Score::default() })),
                "Game_Over" => {
                    let reason = RE_GAME_OVER_REASON
                        .captures(rest)
                        .map(|r| r["reason"].to_string())
                        .unwrap_or_default();
                    Ok(new(EventKind::GameOver).with_payload(Payload::GameOver { reason }))
                }
                _ => Ok(new(EventKind::Ignored)),
            };
        }

        if let Some(c) = RE_LOADING_MAP.captures(body) {
            return Ok(new(EventKind::MapLoad).with_payload(Payload::MapLoad { map: c["map"].to_string() }));
        }

        if body.starts_with("Log file started") {
            return Ok(new(EventKind::LogStart).with_attributes(parse_properties(body)));
        }

        if body.starts_with("Log file closed") || body.starts_with("server_message: \"quit\"") {
            return Ok(new(EventKind::LogStop));
        }

        if IGNORED_PREFIXES.iter().any(|p| body.starts_with(p)) {
            return Ok(new(EventKind::Ignored));
        }

        Ok(new(EventKind::Unknown))
    }
}

impl Classifier for LogClassifier {
    fn classify(&self, line: &str, origin: &ServerRef) -> Classified {
        let line = line.trim_end_matches(['\r', '\n']).trim_start_matches('\u{0}');

        let (at, body) = match RE_HEADER.captures(line) {
            Some(c) => match parse_log_time(&c[1]) {
                Some(at) => (at, c.get(2).map_or("", |m| m.as_str())),
                None => {
                    return Classified {
                        envelope: Envelope::new(EventKind::Unknown, origin.clone(), Utc::now()),
                        failure: Some(format!("invalid timestamp: {}", &c[1])),
                    };
                }
            },
            None => (Utc::now(), line),
        };

        if body.trim().is_empty() {
            return Classified::ok(Envelope::new(EventKind::Ignored, origin.clone(), at));
        }

        match self.classify_body(body, origin, at) {
            Ok(envelope) => Classified::ok(envelope),
            Err(reason) => Classified {
                envelope: Envelope::new(EventKind::Unknown, origin.clone(), at),
                failure: Some(reason),
            },
        }
    }
}

// ============================================================================
// FIELD HELPERS
// ============================================================================

fn parse_log_time(s: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, "%m/%d/%Y - %H:%M:%S")
        .ok()
        .map(|t| t.and_utc())
}

fn capture_player(c: &Captures<'_>, prefix: &str) -> PlayerRef {
    let field = |name: &str| {
        c.name(&format!("{}{}", prefix, name))
            .map_or("", |m| m.as_str())
    };
    PlayerRef {
        steam_id: SteamId::from_steam3(field("sid")).unwrap_or(SteamId(0)),
        name: field("name").to_string(),
        team: Team::parse(field("team")),
        address: None,
    }
}

fn parse_address(raw: &str) -> Option<IpAddr> {
    raw.parse::<SocketAddr>()
        .map(|a| a.ip())
        .or_else(|_| raw.parse::<IpAddr>())
        .ok()
}

fn parse_properties(rest: &str) -> Attributes {
    let mut attrs = Attributes::new();
    for c in RE_PROPERTY.captures_iter(rest) {
        attrs.insert_raw(&c["key"], &c["value"]);
    }
    attrs
}

fn required_int(attrs: &Attributes, key: &str) -> Result<i64, String> {
    attrs
        .get_int(key)
        .ok_or_else(|| format!("missing or non-numeric '{}'", key))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PREFIX: &str = "L 10/19/2026 - 20:15:01: ";

    fn classify(body: &str) -> Classified {
        LogClassifier::new().classify(&format!("{}{}", PREFIX, body), &ServerRef::new(7, "us-1"))
    }

    #[test]
    fn test_say_and_say_team() {
        let c = classify(r#""Player One<12><[U:1:1000]><Red>" say "hello world""#);
        assert!(c.failure.is_none());
        assert_eq!(c.envelope.kind(), EventKind::Say);
        assert_eq!(c.envelope.message(), Some("hello world"));
        let actor = c.envelope.actor.as_ref().unwrap();
        assert_eq!(actor.name, "Player One");
        assert_eq!(actor.team, Team::Red);
        assert!(actor.steam_id.is_valid());

        let c = classify(r#""Player One<12><[U:1:1000]><Blue>" say_team "push cart""#);
        assert_eq!(c.envelope.kind(), EventKind::SayTeam);
    }

    #[test]
    fn test_timestamp_from_header() {
        let c = classify(r#""P<1><[U:1:1]><Red>" say "x""#);
        assert_eq!(c.envelope.occurred_at.to_rfc3339(), "2026-10-19T20:15:01+00:00");
    }

    #[test]
    fn test_connected_address() {
        let c = classify(r#""P<3><[U:1:77]><>" connected, address "10.0.0.5:27005""#);
        assert_eq!(c.envelope.kind(), EventKind::Connected);
        let expected: IpAddr = "10.0.0.5".parse().unwrap();
        assert_eq!(c.envelope.payload, Payload::Connected { address: Some(expected) });
        assert_eq!(c.envelope.actor.unwrap().address, Some(expected));
    }

    #[test]
    fn test_kill_damage_heal() {
        let c = classify(
            r#""A<2><[U:1:10]><Red>" killed "B<3><[U:1:11]><Blue>" with "scattergun" (attacker_position "1 2 3")"#,
        );
        assert_eq!(c.envelope.kind(), EventKind::Kill);
        match &c.envelope.payload {
            Payload::Kill { victim, weapon } => {
                assert_eq!(victim.team, Team::Blu);
                assert_eq!(weapon, "scattergun");
            }
            other => panic!("unexpected payload {:?}", other),
        }
        assert_eq!(c.envelope.attributes.get_str("attacker_position"), Some("1 2 3"));

        let c = classify(r#""A<2><[U:1:10]><Red>" triggered "damage" against "B<3><[U:1:11]><Blue>" (damage "56") (weapon "scattergun")"#);
        assert_eq!(c.envelope.kind(), EventKind::Damage);
        assert!(matches!(c.envelope.payload, Payload::Damage { amount: 56, .. }));

        let c = classify(r#""M<4><[U:1:12]><Red>" triggered "healed" against "A<2><[U:1:10]><Red>" (healing "75")"#);
        assert_eq!(c.envelope.kind(), EventKind::Heal);
        assert!(matches!(c.envelope.payload, Payload::Heal { amount: 75, .. }));
    }

    #[test]
    fn test_malformed_damage_is_failure() {
        let c = classify(r#""A<2><[U:1:10]><Red>" triggered "damage" against "B<3><[U:1:11]><Blue>" (damage "lots")"#);
        assert_eq!(c.envelope.kind(), EventKind::Unknown);
        assert!(c.failure.is_some());
    }

    #[test]
    fn test_world_events() {
        let c = classify(r#"World triggered "Round_Start""#);
        assert_eq!(c.envelope.kind(), EventKind::RoundStart);

        let c = classify(r#"World triggered "Round_Win" (winner "Red")"#);
        assert_eq!(c.envelope.kind(), EventKind::RoundEnd);
        assert_eq!(
            c.envelope.payload,
            Payload::RoundEnd { winner: Some(Team::Red), score: Score { red: 1, blu: 0 } }
        );

        let c = classify(r#"World triggered "Game_Over" reason "Reached Win Limit""#);
        assert_eq!(c.envelope.kind(), EventKind::GameOver);
        assert_eq!(c.envelope.payload, Payload::GameOver { reason: "Reached Win Limit".to_string() });
    }

    #[test]
    fn test_map_and_log_lifecycle() {
        assert_eq!(classify(r#"Loading map "ctf_2fort""#).envelope.kind(), EventKind::MapLoad);
        assert_eq!(
            classify(r#"Log file started (file "logs/L1019000.log") (game "/tf") (version "8622")"#).envelope.kind(),
            EventKind::LogStart
        );
        assert_eq!(classify("Log file closed.").envelope.kind(), EventKind::LogStop);
    }

    #[test]
    fn test_ignored_and_unknown() {
        assert_eq!(classify(r#"server_cvar: "sv_cheats" "0""#).envelope.kind(), EventKind::Ignored);
        assert_eq!(classify("something nobody parses").envelope.kind(), EventKind::Unknown);

        let c = classify("something nobody parses");
        assert!(c.failure.is_none());
    }

    #[test]
    fn test_bad_timestamp_is_failure() {
        let c = LogClassifier::new().classify(
            r#"L 13/45/2026 - 99:00:00: Loading map "x""#,
            &ServerRef::new(1, "a"),
        );
        assert_eq!(c.envelope.kind(), EventKind::Unknown);
        assert!(c.failure.is_some());
    }
}
