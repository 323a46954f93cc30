// scrim_stats/server/src/systems/analytics/mod.rs
pub mod clutch;
pub mod impact;
pub mod trade;

use crate::concurrent::task_supervisor::TaskSupervisor;
use crate::core::config::AnalyticsConfig;
use crate::core::constants::{SLOW_EVENT_LOG_MS, UTILITY_WEAPONS};
use crate::core::error::{StatsError, StatsResult};
use crate::core::types::{GameEvent, GameTime, Participant, PlayerId, Team, Vec3};
use crate::entities::accumulator::PlayerAccumulator;
use crate::entities::player::PlayerSessionStore;
use crate::operational::monitoring::metrics::{
    record_event_failed, record_event_processed, CLUTCHES, DEATHS, ENTRY_KILLS, KILLS, MISSED_TRADES, ROUNDS,
    SESSIONS_ACTIVE, TRADE_KILLS,
};
use crate::persistence::{EnqueueOutcome, PersistenceUpdate, PipelineHandle};
use crate::systems::round_state::{RoundStateTracker, TeamDeath};
use crate::systems::snapshot::{
    assemble, assemble_weapons, unix_millis, MatchSummarySnapshot, RoundMarker, RoundPhase, SnapshotContext,
};
use ahash::{AHashMap, AHashSet};
use clutch::ClutchOutcome;
use impact::{ImpactInputs, KillImpact};
use metrics::{counter, gauge};
use std::sync::Arc;
use std::time::Instant;
use trade::{KillFacts, TradeCredit};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// Scoreboard of the match in progress.
#[derive(Debug, Clone)]
pub struct MatchProgress {
    pub match_id: Uuid,
    pub map_name: Option<String>,
    pub rounds_played: u32,
    pub ct_score: u32,
    pub t_score: u32,
    pub round_in_progress: bool,
}

impl MatchProgress {
    fn new() -> Self {
        MatchProgress {
            match_id: Uuid::new_v4(),
            map_name: None,
            rounds_played: 0,
            ct_score: 0,
            t_score: 0,
            round_in_progress: false,
        }
    }

    fn leader(&self) -> Option<Team> {
        match self.ct_score.cmp(&self.t_score) {
            std::cmp::Ordering::Greater => Some(Team::CounterTerrorist),
            std::cmp::Ordering::Less => Some(Team::Terrorist),
            std::cmp::Ordering::Equal => None,
        }
    }

    fn summary(&self, finished: bool) -> MatchSummarySnapshot {
        MatchSummarySnapshot {
            match_id: self.match_id,
            map_name: self.map_name.clone(),
            rounds_played: self.rounds_played,
            ct_score: self.ct_score,
            t_score: self.t_score,
            winner: if finished { self.leader() } else { None },
            finished,
            captured_at_ms: unix_millis(),
        }
    }
}

/// Payload of a `PlayerKilled` event.
struct Kill {
    time: GameTime,
    victim: Participant,
    attacker: Option<Participant>,
    assister: Option<Participant>,
    weapon: String,
    headshot: bool,
    wallbang: bool,
    attacker_blind: bool,
    no_scope: bool,
    through_smoke: bool,
    flash_assist: bool,
}

fn is_utility(weapon: &str) -> bool {
    UTILITY_WEAPONS.iter().any(|w| weapon.eq_ignore_ascii_case(w))
}

fn check_time(time: GameTime) -> StatsResult<()> {
    if time.is_finite() {
        Ok(())
    } else {
        Err(StatsError::MalformedEvent(format!("non-finite timestamp {}", time)))
    }
}

/// Consumes game events one at a time, keeps the round state and per-player
/// accumulators current, and hands snapshots to the persistence pipeline at
/// round boundaries. Never performs I/O itself.
pub struct CombatAnalyticsEngine {
    config: Arc<AnalyticsConfig>,
    sessions: Arc<PlayerSessionStore>,
    round: RoundStateTracker,
    // victim -> their most recent killer; survives round resets
    revenge: AHashMap<PlayerId, PlayerId>,
    bots: AHashSet<PlayerId>,
    progress: MatchProgress,
    persistence: PipelineHandle,
    supervisor: Arc<TaskSupervisor>,
    events_handled: u64,
    events_failed: u64,
}

impl CombatAnalyticsEngine {
    pub fn new(
        config: Arc<AnalyticsConfig>,
        sessions: Arc<PlayerSessionStore>,
        persistence: PipelineHandle,
        supervisor: Arc<TaskSupervisor>,
    ) -> Self {
        CombatAnalyticsEngine {
            config,
            sessions,
            round: RoundStateTracker::new(),
            revenge: AHashMap::new(),
            bots: AHashSet::new(),
            progress: MatchProgress::new(),
            persistence,
            supervisor,
            events_handled: 0,
            events_failed: 0,
        }
    }

    pub fn sessions(&self) -> &Arc<PlayerSessionStore> {
        &self.sessions
    }

    pub fn round(&self) -> &RoundStateTracker {
        &self.round
    }

    pub fn progress(&self) -> &MatchProgress {
        &self.progress
    }

    pub fn events_handled(&self) -> u64 {
        self.events_handled
    }

    pub fn events_failed(&self) -> u64 {
        self.events_failed
    }

    /// Processes one event. A failing handler is logged and counted, and the
    /// event is skipped; the next event is processed normally.
    pub fn handle(&mut self, event: GameEvent) -> bool {
        let kind = event.kind();
        let started = Instant::now();
        let result = self.dispatch(event);
        let elapsed = started.elapsed();
        if elapsed.as_millis() as u64 > SLOW_EVENT_LOG_MS {
            warn!("Handling {} took {:?}", kind, elapsed);
        }
        match result {
            Ok(()) => {
                self.events_handled += 1;
                record_event_processed(kind, elapsed.as_secs_f64());
                true
            }
            Err(e) => {
                self.events_failed += 1;
                record_event_failed(kind);
                warn!("Skipped {} event: {}", kind, e);
                false
            }
        }
    }

    fn dispatch(&mut self, event: GameEvent) -> StatsResult<()> {
        match event {
            GameEvent::PlayerConnected { player_id, name, is_bot } => self.on_connected(player_id, &name, is_bot),
            GameEvent::PlayerDisconnected { player_id } => self.on_disconnected(player_id),
            GameEvent::PlayerTeamChanged { player_id, team } => self.on_team_changed(player_id, team),
            GameEvent::RoundStarted { round_number, time } => self.on_round_started(round_number, time),
            GameEvent::PlayerSpawned { time, player } => self.on_spawned(time, &player),
            GameEvent::PositionSampled { time, player_id, position } => {
                self.on_position_sampled(time, player_id, position)
            }
            GameEvent::PlayerHurt { time, victim, attacker, weapon, damage, headshot: _, armor_damage: _ } => {
                self.on_hurt(time, &victim, attacker.as_ref(), &weapon, damage)
            }
            GameEvent::PlayerKilled {
                time,
                victim,
                attacker,
                assister,
                weapon,
                headshot,
                wallbang,
                attacker_blind,
                no_scope,
                through_smoke,
                flash_assist,
            } => self.on_killed(Kill {
                time,
                victim,
                attacker,
                assister,
                weapon,
                headshot,
                wallbang,
                attacker_blind,
                no_scope,
                through_smoke,
                flash_assist,
            }),
            GameEvent::WeaponFired { player_id, weapon, .. } => self.with_player(player_id, |acc| {
                acc.shots_fired += 1;
                acc.weapon_mut(&weapon).shots_fired += 1;
            }),
            GameEvent::GrenadeDetonated { player_id, grenade, .. } => {
                trace!("Player {} detonated {:?}", player_id, grenade);
                self.with_player(player_id, |acc| acc.grenades_thrown += 1)
            }
            GameEvent::PlayerBlinded { time, victim, attacker, duration_secs } => {
                self.on_blinded(time, &victim, &attacker, duration_secs)
            }
            GameEvent::BombPlanted { player_id, site, .. } => {
                debug!("Bomb planted at {:?} by {}", site, player_id);
                self.with_player(player_id, |acc| acc.bomb_plants += 1)
            }
            GameEvent::BombDefused { player_id, site, .. } => {
                debug!("Bomb defused at {:?} by {}", site, player_id);
                self.with_player(player_id, |acc| acc.bomb_defuses += 1)
            }
            GameEvent::BombExploded { site, time } => {
                debug!("Bomb exploded at {:?} (t={})", site, time);
                Ok(())
            }
            GameEvent::ItemPurchased { player_id, item, cost } => {
                trace!("Player {} bought {} for {}", player_id, item, cost);
                self.with_player(player_id, |acc| acc.money_spent += cost as u64)
            }
            GameEvent::RoundMvp { player_id, reason } => {
                debug!("Round MVP {} ({})", player_id, reason);
                self.with_player(player_id, |acc| acc.mvps += 1)
            }
            GameEvent::RoundEnded { time, round_number, winner, reason } => {
                self.on_round_ended(time, round_number, winner, &reason)
            }
            GameEvent::MatchEnded { time, map_name } => self.on_match_ended(time, map_name),
        }
    }

    fn with_player<F>(&self, player_id: PlayerId, func: F) -> StatsResult<()>
    where
        F: FnOnce(&mut PlayerAccumulator),
    {
        self.sessions.mutate(player_id, func).ok_or(StatsError::UnknownPlayer(player_id.get()))
    }

    /// Creates a session on first sighting of a participant.
    fn ensure_session(&mut self, participant: &Participant) {
        let id = participant.player_id;
        if participant.is_bot {
            self.bots.insert(id);
        }
        if self.sessions.register(id, "") {
            gauge!(SESSIONS_ACTIVE).set(self.sessions.player_count() as f64);
        }
        if participant.team.is_playing() {
            self.sessions.mutate(id, |acc| acc.current_team = participant.team);
        }
    }

    fn is_human(&self, participant: &Participant) -> bool {
        !participant.is_bot && !self.bots.contains(&participant.player_id)
    }

    fn team_of(&self, participant: &Participant) -> Team {
        if participant.team.is_playing() {
            return participant.team;
        }
        self.round
            .alive_team_of(participant.player_id)
            .or_else(|| self.sessions.team_of(participant.player_id))
            .unwrap_or(participant.team)
    }

    fn position_of(&self, participant: &Participant) -> Option<Vec3> {
        participant
            .position
            .filter(Vec3::is_finite)
            .or_else(|| self.round.position(participant.player_id))
    }

    fn note_position(&mut self, participant: &Participant) {
        if let Some(position) = participant.position.filter(Vec3::is_finite) {
            self.round.set_position(participant.player_id, position);
            self.sessions.record_position(participant.player_id, position);
        }
    }

    fn context(&self, with_round: bool) -> SnapshotContext {
        let round = if with_round { Some(self.round.round_number()) } else { None };
        SnapshotContext::now(Some(self.progress.match_id), round)
    }

    fn emit(&self, update: PersistenceUpdate) -> EnqueueOutcome {
        self.persistence.enqueue(update)
    }

    fn credit_missed_trades(&self, missed: Vec<(PlayerId, u32)>) {
        for (holder, count) in missed {
            self.sessions.mutate(holder, |acc| acc.missed_trade_windows += count);
            counter!(MISSED_TRADES).increment(count as u64);
        }
    }

    fn round_marker(&self, phase: RoundPhase, time: GameTime, winner: Option<Team>, reason: Option<String>) -> RoundMarker {
        // nobody has spawned yet when a round opens, so report the roster
        let (ct_alive, t_alive) = match phase {
            RoundPhase::Started => self.round.start_counts(),
            _ => self.round.get_alive_counts(),
        };
        RoundMarker {
            match_id: self.progress.match_id,
            round_number: self.round.round_number(),
            phase,
            time,
            winner,
            reason,
            ct_alive,
            t_alive,
        }
    }

    fn on_connected(&mut self, player_id: PlayerId, name: &str, is_bot: bool) -> StatsResult<()> {
        if is_bot {
            self.bots.insert(player_id);
        }
        if self.sessions.register(player_id, name) {
            info!("Player {} ({}) connected", player_id, name);
            gauge!(SESSIONS_ACTIVE).set(self.sessions.player_count() as f64);
        }
        Ok(())
    }

    /// Removes the session exactly once and emits its final snapshot. A
    /// repeated disconnect finds nothing to remove and emits nothing.
    fn on_disconnected(&mut self, player_id: PlayerId) -> StatsResult<()> {
        let Some(acc) = self.sessions.remove(player_id) else {
            debug!("Disconnect for player {} without a session", player_id);
            return Ok(());
        };
        gauge!(SESSIONS_ACTIVE).set(self.sessions.player_count() as f64);

        let abandoned = self.leave_round(player_id);
        if abandoned > 0 {
            counter!(MISSED_TRADES).increment(abandoned as u64);
        }
        self.revenge.retain(|victim, killer| *victim != player_id && *killer != player_id);
        self.bots.remove(&player_id);

        let snapshot = assemble(&acc, self.context(self.progress.round_in_progress));
        info!("Player {} disconnected after {} kills / {} deaths", player_id, acc.kills, acc.deaths);

        let update = PersistenceUpdate::PlayerStats(snapshot);
        if self.emit(update.clone()) == EnqueueOutcome::Dropped {
            let handle = self.persistence.clone();
            let spawned = self.supervisor.spawn("final-snapshot", async move {
                if !handle.enqueue_with_wait(update).await.is_accepted() {
                    warn!("Final snapshot of player {} could not be queued", player_id);
                }
            });
            if !spawned {
                warn!("Final snapshot of player {} dropped: queue full", player_id);
            }
        }
        Ok(())
    }

    fn on_team_changed(&mut self, player_id: PlayerId, team: Team) -> StatsResult<()> {
        self.with_player(player_id, |acc| acc.current_team = team)?;
        if !team.is_playing() {
            // moving to spectators mid-round takes the player out of the fight
            self.leave_round(player_id);
        }
        Ok(())
    }

    /// Takes a player out of the round without a death. Clutches are settled
    /// on both sides of the departure when it changes the alive counts.
    /// Returns the trade opportunities the player still held.
    fn leave_round(&mut self, player_id: PlayerId) -> u32 {
        let was_alive = self.round.is_alive(player_id);
        if was_alive {
            self.settle_clutches();
        }
        let abandoned = self.round.forget_player(player_id);
        if was_alive {
            self.settle_clutches();
        }
        abandoned
    }

    /// Records a clutch for every team currently down to its last player.
    /// Spawns do not run this since the roster is still filling up; the next
    /// kill, departure or round end does.
    fn settle_clutches(&mut self) {
        if !self.progress.round_in_progress {
            return;
        }
        for started in clutch::detect_clutches(&mut self.round) {
            debug!("Player {} is clutching in round {}", started, self.round.round_number());
        }
    }

    fn on_round_started(&mut self, round_number: u32, time: GameTime) -> StatsResult<()> {
        check_time(time)?;
        if self.progress.round_in_progress {
            debug!("Round {} started without an end for round {}", round_number, self.round.round_number());
        }

        let mut counts = (0u32, 0u32);
        self.sessions.for_each_mut(|acc| {
            acc.begin_round();
            match acc.current_team {
                Team::CounterTerrorist => counts.0 += 1,
                Team::Terrorist => counts.1 += 1,
                _ => {}
            }
        });

        let missed = self.round.on_round_start(round_number, time, counts.0, counts.1);
        self.credit_missed_trades(missed);
        self.progress.round_in_progress = true;

        debug!("Round {} started with {}v{} on the roster", round_number, counts.0, counts.1);
        self.emit(PersistenceUpdate::RoundLifecycle(self.round_marker(RoundPhase::Started, time, None, None)));
        Ok(())
    }

    fn on_spawned(&mut self, time: GameTime, player: &Participant) -> StatsResult<()> {
        check_time(time)?;
        self.ensure_session(player);
        self.note_position(player);
        if player.team.is_playing() {
            self.round.record_spawn(player.player_id, player.team);
        }
        Ok(())
    }

    fn on_position_sampled(&mut self, time: GameTime, player_id: PlayerId, position: Vec3) -> StatsResult<()> {
        check_time(time)?;
        if !position.is_finite() {
            return Err(StatsError::MalformedEvent(format!("non-finite position for player {}", player_id)));
        }
        if !self.sessions.record_position(player_id, position) {
            return Err(StatsError::UnknownPlayer(player_id.get()));
        }
        self.round.set_position(player_id, position);
        Ok(())
    }

    fn on_hurt(
        &mut self,
        time: GameTime,
        victim: &Participant,
        attacker: Option<&Participant>,
        weapon: &str,
        damage: u32,
    ) -> StatsResult<()> {
        check_time(time)?;
        self.ensure_session(victim);
        self.note_position(victim);
        self.sessions.mutate(victim.player_id, |acc| acc.damage_taken += damage as u64);

        let Some(attacker) = attacker.filter(|a| a.player_id != victim.player_id) else {
            return Ok(());
        };
        self.ensure_session(attacker);
        self.note_position(attacker);

        let attacker_team = self.team_of(attacker);
        let victim_team = self.team_of(victim);
        if attacker_team.is_playing() && attacker_team == victim_team {
            self.sessions.mutate(attacker.player_id, |acc| acc.team_damage += damage as u64);
            return Ok(());
        }

        let utility = is_utility(weapon);
        self.sessions.mutate(attacker.player_id, |acc| acc.record_damage(weapon, damage, utility));
        self.mark_entry_duel(attacker, victim, attacker_team, victim_team, time);
        Ok(())
    }

    fn mark_entry_duel(
        &mut self,
        attacker: &Participant,
        victim: &Participant,
        attacker_team: Team,
        victim_team: Team,
        time: GameTime,
    ) {
        let opposing = attacker_team.is_playing() && attacker_team.opponent() == Some(victim_team);
        if !opposing || !self.is_human(attacker) || !self.is_human(victim) {
            return;
        }
        if self.round.mark_entry_duel(attacker.player_id, victim.player_id, time) {
            self.sessions.mutate(attacker.player_id, |acc| acc.entry_engagements += 1);
            self.sessions.mutate(victim.player_id, |acc| acc.entry_engagements_received += 1);
            debug!("Entry duel: {} engaged {} at t={}", attacker.player_id, victim.player_id, time);
        }
    }

    fn on_killed(&mut self, kill: Kill) -> StatsResult<()> {
        check_time(kill.time)?;
        self.ensure_session(&kill.victim);
        self.note_position(&kill.victim);
        if let Some(attacker) = kill.attacker.as_ref() {
            self.ensure_session(attacker);
            self.note_position(attacker);
        }

        self.settle_clutches();

        let victim_id = kill.victim.player_id;
        let victim_team = self.team_of(&kill.victim);
        let victim_position = self.position_of(&kill.victim);
        let prior_death = self.round.last_team_death(victim_team);
        let (ct_before, t_before) = self.round.get_alive_counts();

        self.sessions.mutate(victim_id, |acc| acc.deaths += 1);
        counter!(DEATHS).increment(1);
        self.round.record_death(victim_id, victim_team, kill.time);
        let dropped = self.round.discard_trades_of(victim_id);
        if dropped > 0 {
            self.credit_missed_trades(vec![(victim_id, dropped)]);
        }
        let expired = self.round.expire_trade_windows(kill.time);
        self.credit_missed_trades(expired);

        let attacker = kill.attacker.as_ref().filter(|a| a.player_id != victim_id);
        match attacker {
            Some(attacker) => {
                let attacker_team = self.team_of(attacker);
                if attacker_team.is_playing() && attacker_team == victim_team {
                    self.sessions.mutate(attacker.player_id, |acc| acc.team_kills += 1);
                    debug!("Team kill: {} killed teammate {}", attacker.player_id, victim_id);
                } else {
                    let (own_alive, enemy_alive) = match attacker_team {
                        Team::CounterTerrorist => (ct_before, t_before),
                        Team::Terrorist => (t_before, ct_before),
                        _ => (0, 0),
                    };
                    self.credit_enemy_kill(
                        &kill,
                        attacker,
                        attacker_team,
                        victim_team,
                        victim_position,
                        prior_death,
                        own_alive,
                        enemy_alive,
                    );
                }
            }
            None => debug!("Player {} died without an enemy killer ({})", victim_id, kill.weapon),
        }

        self.settle_clutches();
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn credit_enemy_kill(
        &mut self,
        kill: &Kill,
        attacker: &Participant,
        attacker_team: Team,
        victim_team: Team,
        victim_position: Option<Vec3>,
        prior_death: Option<TeamDeath>,
        own_alive: u32,
        enemy_alive: u32,
    ) {
        let killer = attacker.player_id;
        let victim = kill.victim.player_id;

        self.sessions.mutate(killer, |acc| {
            acc.record_kill(&kill.weapon, kill.headshot);
            if kill.wallbang {
                acc.wallbang_kills += 1;
            }
            if kill.attacker_blind {
                acc.blind_kills += 1;
            }
            if kill.no_scope {
                acc.no_scope_kills += 1;
            }
            if kill.through_smoke {
                acc.smoke_kills += 1;
            }
        });
        counter!(KILLS).increment(1);
        let round_kills = self.round.increment_round_kills(killer);

        // entry
        let humans = self.is_human(attacker) && self.is_human(&kill.victim);
        let mut entry_kill = false;
        if humans && !self.round.entry_kill_taken() {
            self.mark_entry_duel(attacker, &kill.victim, attacker_team, victim_team, kill.time);
            if self.round.claim_entry_kill() {
                entry_kill = true;
                self.sessions.mutate(killer, |acc| acc.entry_kills += 1);
                self.sessions.mutate(victim, |acc| acc.entry_deaths += 1);
                counter!(ENTRY_KILLS).increment(1);
            }
        }

        // trade
        let facts = KillFacts {
            time: kill.time,
            killer,
            killer_team: attacker_team,
            killer_position: self.position_of(attacker),
            victim,
            victim_team,
            victim_position,
        };
        if let Some(credit) = trade::classify_trade(&mut self.round, &self.config, &facts, prior_death) {
            let traded = match credit {
                TradeCredit::Avenged { original_victim } => original_victim,
                TradeCredit::FollowUp { victim } => victim,
            };
            self.sessions.mutate(killer, |acc| {
                acc.trade_kills += 1;
                acc.round.did_trade_this_round = true;
            });
            self.sessions.mutate(traded, |acc| {
                acc.traded_deaths += 1;
                acc.round.was_traded_this_round = true;
            });
            counter!(TRADE_KILLS).increment(1);
            trace!("Trade kill by {} for {} at t={}", killer, traded, kill.time);
        }
        let opened = trade::open_trade_windows(&mut self.round, &self.config, &facts);
        if opened > 0 {
            trace!("Opened {} trade windows after {} died", opened, victim);
        }

        // revenge
        if self.revenge.get(&killer) == Some(&victim) {
            self.revenge.remove(&killer);
            self.sessions.mutate(killer, |acc| acc.revenge_kills += 1);
            trace!("Revenge kill by {} on {}", killer, victim);
        }
        self.revenge.insert(victim, killer);

        // impact
        let inputs = ImpactInputs {
            round_kills,
            entry_kill,
            clutch_kill: self.round.clutch_of(killer).is_some(),
            own_alive,
            enemy_alive,
        };
        match impact::classify(&self.config, &inputs) {
            KillImpact::High => {
                self.sessions.mutate(killer, |acc| acc.high_impact_kills += 1);
            }
            KillImpact::Low => {
                self.sessions.mutate(killer, |acc| acc.low_impact_kills += 1);
            }
            KillImpact::Normal => {}
        }

        // assist
        if let Some(assister) = kill.assister.as_ref() {
            let id = assister.player_id;
            if id != killer && id != victim && self.team_of(assister) != victim_team {
                self.ensure_session(assister);
                self.sessions.mutate(id, |acc| {
                    acc.assists += 1;
                    acc.round.had_assist_this_round = true;
                    if kill.flash_assist {
                        acc.flash_assists += 1;
                    }
                });
            }
        }
    }

    fn on_blinded(
        &mut self,
        time: GameTime,
        victim: &Participant,
        attacker: &Participant,
        duration_secs: f32,
    ) -> StatsResult<()> {
        check_time(time)?;
        if !duration_secs.is_finite() || duration_secs <= 0.0 {
            return Err(StatsError::MalformedEvent(format!("blind duration {}", duration_secs)));
        }
        let attacker_team = self.team_of(attacker);
        if attacker_team.is_playing() && attacker_team.opponent() == Some(self.team_of(victim)) {
            self.with_player(attacker.player_id, |acc| acc.enemies_flashed += 1)?;
        }
        Ok(())
    }

    fn on_round_ended(&mut self, time: GameTime, round_number: u32, winner: Team, reason: &str) -> StatsResult<()> {
        check_time(time)?;
        if round_number != self.round.round_number() {
            debug!("Round end for {} while tracking round {}", round_number, self.round.round_number());
        }

        self.settle_clutches();
        let missed = self.round.drain_unconsumed_trades();
        self.credit_missed_trades(missed);

        let clutches: Vec<_> = self.round.clutches().collect();
        for (player_id, situation) in clutches {
            let outcome = clutch::resolve(&self.config, &situation, winner);
            self.sessions.mutate(player_id, |acc| match outcome {
                ClutchOutcome::Won { points } => {
                    acc.clutch_wins += 1;
                    acc.clutch_points += points;
                }
                ClutchOutcome::Lost => acc.clutch_losses += 1,
            });
            let label = if matches!(outcome, ClutchOutcome::Won { .. }) { "won" } else { "lost" };
            counter!(CLUTCHES, "outcome" => label).increment(1);
            debug!("Clutch by {} against {} {}", player_id, situation.enemies_alive, label);
        }

        let round = &self.round;
        self.sessions.for_each_mut(|acc| {
            if acc.current_team.is_playing() && round.has_spawned(acc.player_id) {
                acc.finish_round(round.is_alive(acc.player_id));
            }
        });

        match winner {
            Team::CounterTerrorist => self.progress.ct_score += 1,
            Team::Terrorist => self.progress.t_score += 1,
            _ => {}
        }
        self.progress.rounds_played += 1;
        self.progress.round_in_progress = false;
        counter!(ROUNDS).increment(1);

        let emitted = self.flush_round_snapshots();
        self.emit(PersistenceUpdate::MatchSummary(self.progress.summary(false)));
        let marker = self.round_marker(RoundPhase::Ended, time, Some(winner), Some(reason.to_string()));
        self.emit(PersistenceUpdate::RoundLifecycle(marker));
        info!(
            "Round {} won by {:?} ({}), score CT {} - T {}, {} snapshots queued",
            round_number, winner, reason, self.progress.ct_score, self.progress.t_score, emitted
        );
        Ok(())
    }

    /// Player and weapon snapshots for everyone in the store.
    fn flush_round_snapshots(&self) -> usize {
        let context = self.context(true);
        let mut updates = Vec::new();
        self.sessions.for_each_mut(|acc| {
            updates.push(PersistenceUpdate::PlayerStats(assemble(acc, context)));
            updates.extend(assemble_weapons(acc, context).into_iter().map(PersistenceUpdate::WeaponStats));
        });
        let total = updates.len();
        for update in updates {
            self.emit(update);
        }
        total
    }

    fn on_match_ended(&mut self, time: GameTime, map_name: String) -> StatsResult<()> {
        check_time(time)?;
        self.progress.map_name = Some(map_name);
        self.flush_round_snapshots();
        let summary = self.progress.summary(true);
        info!(
            "Match {} on {} finished after {} rounds, CT {} - T {}",
            summary.match_id,
            summary.map_name.as_deref().unwrap_or("unknown"),
            summary.rounds_played,
            summary.ct_score,
            summary.t_score
        );
        self.emit(PersistenceUpdate::MatchSummary(summary));

        self.progress = MatchProgress::new();
        self.revenge.clear();
        self.sessions.for_each_mut(|acc| acc.reset_totals());
        Ok(())
    }

    /// Mid-round player snapshots for the periodic auto-flush. Returns how
    /// many were accepted.
    pub fn flush_all_snapshots(&self) -> usize {
        let context = self.context(self.progress.round_in_progress);
        let mut snapshots = Vec::with_capacity(self.sessions.player_count());
        self.sessions.for_each_mut(|acc| snapshots.push(assemble(acc, context)));
        snapshots
            .into_iter()
            .filter(|snapshot| self.emit(PersistenceUpdate::PlayerStats(snapshot.clone())).is_accepted())
            .count()
    }
}
