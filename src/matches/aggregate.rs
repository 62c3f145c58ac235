//! Match aggregate - accumulated statistics for one live match

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::event::{Envelope, EventKind, Payload, PlayerRef, Score, ServerRef, SteamId, Team};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ApplyError {
    #[error("event from server {got} applied to match of server {expected}")]
    WrongServer { expected: i64, got: i64 },

    #[error("{0} event without an acting player")]
    MissingActor(EventKind),

    #[error("{0} event carries an unexpected payload")]
    PayloadMismatch(EventKind),

    #[error("negative amount {amount} on {kind} event")]
    NegativeAmount { kind: EventKind, amount: i64 },
}

/// One played round
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Round {
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: DateTime<Utc>,
    pub winner: Option<Team>,
    pub score: Score,
}

/// Per team totals
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TeamSummary {
    pub team: Team,
    pub kills: i64,
    pub deaths: i64,
    pub damage: i64,
    pub healing: i64,
    pub charges: i64,
    pub drops: i64,
}

impl TeamSummary {
    fn new(team: Team) -> Self {
        Self { team, kills: 0, deaths: 0, damage: 0, healing: 0, charges: 0, drops: 0 }
    }
}

/// Per player totals
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlayerSummary {
    pub steam_id: SteamId,
    pub name: String,
    pub team: Team,
    pub kills: i64,
    pub deaths: i64,
    pub damage: i64,
    pub healing: i64,
    pub charges: i64,
    pub drops: i64,
}

impl PlayerSummary {
    fn new(player: &PlayerRef) -> Self {
        Self {
            steam_id: player.steam_id,
            name: player.name.clone(),
            team: player.team,
            kills: 0,
            deaths: 0,
            damage: 0,
            healing: 0,
            charges: 0,
            drops: 0,
        }
    }
}

/// In-progress match for one server.
///
/// Only the summarizer task holds these; sealing consumes the aggregate so a
/// finished match can no longer be updated.
#[derive(Debug, Clone)]
pub struct MatchAggregate {
    match_id: Uuid,
    server: ServerRef,
    map_name: String,
    created_at: DateTime<Utc>,
    rounds: Vec<Round>,
    open_round: Option<DateTime<Utc>>,
    team_sums: BTreeMap<Team, TeamSummary>,
    player_sums: BTreeMap<SteamId, PlayerSummary>,
}

impl MatchAggregate {
    pub fn new(server: ServerRef, map_name: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            match_id: Uuid::new_v4(),
            server,
            map_name: map_name.into(),
            created_at,
            rounds: Vec::new(),
            open_round: None,
            team_sums: BTreeMap::new(),
            player_sums: BTreeMap::new(),
        }
    }

    pub fn match_id(&self) -> Uuid {
        self.match_id
    }

    pub fn map_name(&self) -> &str {
        &self.map_name
    }

    pub fn rounds(&self) -> &[Round] {
        &self.rounds
    }

    pub fn team(&self, team: Team) -> Option<&TeamSummary> {
        self.team_sums.get(&team)
    }

    pub fn player(&self, steam_id: SteamId) -> Option<&PlayerSummary> {
        self.player_sums.get(&steam_id)
    }

    /// Fold one event into the running totals
    pub fn apply(&mut self, event: &Envelope) -> Result<(), ApplyError> {
        if event.origin.id != self.server.id {
            return Err(ApplyError::WrongServer { expected: self.server.id, got: event.origin.id });
        }

        let kind = event.kind();
        match (kind, &event.payload) {
            (EventKind::MapLoad, Payload::MapLoad { map }) => {
                if self.map_name != *map {
                    self.map_name = map.clone();
                }
            }
            (EventKind::RoundStart, _) => {
                self.open_round = Some(event.occurred_at);
            }
            (EventKind::RoundEnd, Payload::RoundEnd { winner, score }) => {
                self.rounds.push(Round {
                    started_at: self.open_round.take(),
                    ended_at: event.occurred_at,
                    winner: *winner,
                    score: *score,
                });
            }
            (EventKind::Kill, Payload::Kill { victim, .. }) => {
                let attacker = event.actor.as_ref().ok_or(ApplyError::MissingActor(kind))?;
                self.team_entry(attacker.team).kills += 1;
                self.team_entry(victim.team).deaths += 1;
                if let Some(p) = self.player_entry(attacker) {
                    p.kills += 1;
                }
                if let Some(p) = self.player_entry(victim) {
                    p.deaths += 1;
                }
            }
            (EventKind::Damage, Payload::Damage { amount, .. }) => {
                let actor = event.actor.as_ref().ok_or(ApplyError::MissingActor(kind))?;
                let amount = non_negative(kind, *amount)?;
                self.team_entry(actor.team).damage += amount;
                if let Some(p) = self.player_entry(actor) {
                    p.damage += amount;
                }
            }
            (EventKind::Heal, Payload::Heal { amount, .. }) => {
                let actor = event.actor.as_ref().ok_or(ApplyError::MissingActor(kind))?;
                let amount = non_negative(kind, *amount)?;
                self.team_entry(actor.team).healing += amount;
                if let Some(p) = self.player_entry(actor) {
                    p.healing += amount;
                }
            }
            (EventKind::ChargeDeployed, _) => {
                let actor = event.actor.as_ref().ok_or(ApplyError::MissingActor(kind))?;
                self.team_entry(actor.team).charges += 1;
                if let Some(p) = self.player_entry(actor) {
                    p.charges += 1;
                }
            }
            (EventKind::MedicDeath, Payload::MedicDeath { medic, ubercharge }) => {
                if *ubercharge {
                    self.team_entry(medic.team).drops += 1;
                    if let Some(p) = self.player_entry(medic) {
                        p.drops += 1;
                    }
                }
            }
            (
                EventKind::MapLoad
                | EventKind::RoundEnd
                | EventKind::Kill
                | EventKind::Damage
                | EventKind::Heal
                | EventKind::MedicDeath,
                _,
            ) => return Err(ApplyError::PayloadMismatch(kind)),
            // Chat, connections and lifecycle markers carry no match statistics
            _ => {}
        }

        Ok(())
    }

    /// Finalize the match. Consumes the aggregate.
    pub fn seal(mut self, sealed_at: DateTime<Utc>) -> SealedMatch {
        // A round still open at game over never produced a score
        self.open_round = None;
        SealedMatch {
            match_id: self.match_id,
            server: self.server,
            map_name: self.map_name,
            created_at: self.created_at,
            sealed_at,
            rounds: self.rounds,
            team_sums: self.team_sums.into_values().collect(),
            player_sums: self.player_sums.into_values().collect(),
        }
    }

    fn team_entry(&mut self, team: Team) -> &mut TeamSummary {
        self.team_sums.entry(team).or_insert_with(|| TeamSummary::new(team))
    }

    fn player_entry(&mut self, player: &PlayerRef) -> Option<&mut PlayerSummary> {
        if !player.steam_id.is_valid() {
            return None;
        }
        let entry = self
            .player_sums
            .entry(player.steam_id)
            .or_insert_with(|| PlayerSummary::new(player));
        entry.name.clone_from(&player.name);
        entry.team = player.team;
        Some(entry)
    }
}

fn non_negative(kind: EventKind, amount: i64) -> Result<i64, ApplyError> {
    if amount < 0 {
        return Err(ApplyError::NegativeAmount { kind, amount });
    }
    Ok(amount)
}

/// Finished match handed to persistence and notification
#[derive(Debug, Clone, Serialize)]
pub struct SealedMatch {
    pub match_id: Uuid,
    pub server: ServerRef,
    pub map_name: String,
    pub created_at: DateTime<Utc>,
    pub sealed_at: DateTime<Utc>,
    pub rounds: Vec<Round>,
    pub team_sums: Vec<TeamSummary>,
    pub player_sums: Vec<PlayerSummary>,
}

impl SealedMatch {
    pub fn red_score(&self) -> i32 {
        self.rounds.iter().map(|r| r.score.red).sum()
    }

    pub fn blu_score(&self) -> i32 {
        self.rounds.iter().map(|r| r.score.blu).sum()
    }

    pub fn team(&self, team: Team) -> Option<&TeamSummary> {
        self.team_sums.iter().find(|t| t.team == team)
    }

    /// Wall clock time from creation to `now`
    pub fn elapsed(&self, now: DateTime<Utc>) -> Duration {
        now - self.created_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Envelope;

    fn server() -> ServerRef {
        ServerRef::new(3, "eu-1")
    }

    fn player(account: u64, team: Team) -> PlayerRef {
        PlayerRef {
            steam_id: SteamId(76_561_197_960_265_728 + account),
            name: format!("player{}", account),
            team,
            address: None,
        }
    }

    fn event(kind: EventKind) -> Envelope {
        Envelope::new(kind, server(), Utc::now())
    }

    fn kill(attacker: &PlayerRef, victim: &PlayerRef) -> Envelope {
        event(EventKind::Kill)
            .with_actor(attacker.clone())
            .with_payload(Payload::Kill { victim: victim.clone(), weapon: "rocketlauncher".into() })
    }

    fn damage(actor: &PlayerRef, amount: i64) -> Envelope {
        event(EventKind::Damage)
            .with_actor(actor.clone())
            .with_payload(Payload::Damage { victim: None, amount, weapon: None })
    }

    fn heal(actor: &PlayerRef, amount: i64) -> Envelope {
        event(EventKind::Heal)
            .with_actor(actor.clone())
            .with_payload(Payload::Heal { target: None, amount })
    }

    #[test]
    fn test_team_totals_equal_event_sums() {
        let red = player(1, Team::Red);
        let blu = player(2, Team::Blu);
        let mut agg = MatchAggregate::new(server(), "pl_upward", Utc::now());

        let red_damage = [56, 90, 12, 150];
        let blu_damage = [34, 200];
        let red_heals = [24, 75];

        for d in red_damage {
            agg.apply(&damage(&red, d)).unwrap();
        }
        for d in blu_damage {
            agg.apply(&damage(&blu, d)).unwrap();
        }
        for h in red_heals {
            agg.apply(&heal(&red, h)).unwrap();
        }
        agg.apply(&kill(&red, &blu)).unwrap();
        agg.apply(&kill(&red, &blu)).unwrap();
        agg.apply(&kill(&blu, &red)).unwrap();

        let red_sum = agg.team(Team::Red).unwrap();
        let blu_sum = agg.team(Team::Blu).unwrap();
        assert_eq!(red_sum.damage, red_damage.iter().sum::<i64>());
        assert_eq!(blu_sum.damage, blu_damage.iter().sum::<i64>());
        assert_eq!(red_sum.healing, red_heals.iter().sum::<i64>());
        assert_eq!(red_sum.kills, 2);
        assert_eq!(blu_sum.kills, 1);
        assert_eq!(red_sum.deaths, 1);
        assert_eq!(blu_sum.deaths, 2);

        let p = agg.player(red.steam_id).unwrap();
        assert_eq!(p.kills, 2);
        assert_eq!(p.damage, red_sum.damage);
    }

    #[test]
    fn test_round_scores_accumulate() {
        let mut agg = MatchAggregate::new(server(), "ctf_2fort", Utc::now());
        agg.apply(&event(EventKind::RoundStart)).unwrap();
        agg.apply(&event(EventKind::RoundEnd).with_payload(Payload::RoundEnd {
            winner: Some(Team::Red),
            score: Score { red: 1, blu: 0 },
        }))
        .unwrap();
        agg.apply(&event(EventKind::RoundEnd).with_payload(Payload::RoundEnd {
            winner: Some(Team::Red),
            score: Score { red: 2, blu: 0 },
        }))
        .unwrap();

        assert_eq!(agg.rounds().len(), 2);
        assert!(agg.rounds()[0].started_at.is_some());
        assert!(agg.rounds()[1].started_at.is_none());

        let sealed = agg.seal(Utc::now());
        assert_eq!(sealed.red_score(), 3);
        assert_eq!(sealed.blu_score(), 0);
    }

    #[test]
    fn test_bad_events_rejected_without_side_effects() {
        let red = player(1, Team::Red);
        let mut agg = MatchAggregate::new(server(), "koth_viaduct", Utc::now());

        let no_actor = event(EventKind::Damage).with_payload(Payload::Damage { victim: None, amount: 5, weapon: None });
        assert_eq!(agg.apply(&no_actor), Err(ApplyError::MissingActor(EventKind::Damage)));

        assert!(matches!(agg.apply(&damage(&red, -4)), Err(ApplyError::NegativeAmount { .. })));
        assert_eq!(
            agg.apply(&event(EventKind::Kill).with_actor(red.clone())),
            Err(ApplyError::PayloadMismatch(EventKind::Kill))
        );

        let other = Envelope::new(EventKind::Say, ServerRef::new(99, "other"), Utc::now());
        assert!(matches!(agg.apply(&other), Err(ApplyError::WrongServer { .. })));

        assert!(agg.team(Team::Red).is_none());
    }

    #[test]
    fn test_charges_and_drops() {
        let medic = player(5, Team::Blu);
        let killer = player(6, Team::Red);
        let mut agg = MatchAggregate::new(server(), "cp_process_final", Utc::now());

        agg.apply(&event(EventKind::ChargeDeployed).with_actor(medic.clone())).unwrap();
        agg.apply(&event(EventKind::MedicDeath)
            .with_actor(killer.clone())
            .with_payload(Payload::MedicDeath { medic: medic.clone(), ubercharge: true }))
            .unwrap();
        agg.apply(&event(EventKind::MedicDeath)
            .with_actor(killer)
            .with_payload(Payload::MedicDeath { medic: medic.clone(), ubercharge: false }))
            .unwrap();

        let blu = agg.team(Team::Blu).unwrap();
        assert_eq!(blu.charges, 1);
        assert_eq!(blu.drops, 1);
    }

    #[test]
    fn test_bots_count_for_team_only() {
        let bot = PlayerRef { steam_id: SteamId(0), name: "Bot".into(), team: Team::Red, address: None };
        let mut agg = MatchAggregate::new(server(), "pl_badwater", Utc::now());
        agg.apply(&damage(&bot, 10)).unwrap();

        assert_eq!(agg.team(Team::Red).unwrap().damage, 10);
        assert!(agg.player(SteamId(0)).is_none());
    }
}
