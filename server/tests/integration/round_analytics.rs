// scrim_stats/server/tests/integration/round_analytics.rs

use scrim_stats_core::concurrent::task_supervisor::TaskSupervisor;
use scrim_stats_core::core::config::{AnalyticsConfig, PipelineConfig};
use scrim_stats_core::core::types::{GameEvent, GameTime, Participant, PlayerId, Team, Vec3};
use scrim_stats_core::entities::accumulator::PlayerAccumulator;
use scrim_stats_core::entities::player::PlayerSessionStore;
use scrim_stats_core::persistence::{InMemoryRepository, PersistencePipeline};
use scrim_stats_core::systems::analytics::CombatAnalyticsEngine;
use scrim_stats_core::systems::snapshot::{assemble, SnapshotContext};

use std::sync::Arc;

const CT: Team = Team::CounterTerrorist;
const T: Team = Team::Terrorist;

// Helper to build an engine whose pipeline is never started; the tests only
// look at accumulators.
fn setup_engine() -> (CombatAnalyticsEngine, PersistencePipeline) {
    let pipeline = PersistencePipeline::new(PipelineConfig::default(), Arc::new(InMemoryRepository::new()));
    let engine = CombatAnalyticsEngine::new(
        Arc::new(AnalyticsConfig { trade_window_secs: 5.0, ..AnalyticsConfig::default() }),
        Arc::new(PlayerSessionStore::default()),
        pipeline.handle(),
        Arc::new(TaskSupervisor::new()),
    );
    (engine, pipeline)
}

fn pid(raw: u64) -> PlayerId {
    PlayerId::new(raw).unwrap()
}

fn player(raw: u64, team: Team, x: f32) -> Participant {
    Participant::new(pid(raw), team).at(Vec3::new(x, 0.0, 0.0))
}

fn kill(time: GameTime, attacker: &Participant, victim: &Participant) -> GameEvent {
    GameEvent::PlayerKilled {
        time,
        victim: victim.clone(),
        attacker: Some(attacker.clone()),
        assister: None,
        weapon: "ak47".into(),
        headshot: false,
        wallbang: false,
        attacker_blind: false,
        no_scope: false,
        through_smoke: false,
        flash_assist: false,
    }
}

fn start_round(engine: &mut CombatAnalyticsEngine, number: u32, time: GameTime, roster: &[&Participant]) {
    for p in roster {
        engine.handle(GameEvent::PlayerConnected {
            player_id: p.player_id,
            name: format!("player{}", p.player_id),
            is_bot: false,
        });
        engine.handle(GameEvent::PlayerTeamChanged { player_id: p.player_id, team: p.team });
    }
    assert!(engine.handle(GameEvent::RoundStarted { round_number: number, time }));
    for p in roster {
        assert!(engine.handle(GameEvent::PlayerSpawned { time, player: (*p).clone() }));
    }
}

fn end_round(engine: &mut CombatAnalyticsEngine, number: u32, time: GameTime, winner: Team) {
    assert!(engine.handle(GameEvent::RoundEnded {
        time,
        round_number: number,
        winner,
        reason: "elimination".into(),
    }));
}

fn acc(engine: &CombatAnalyticsEngine, raw: u64) -> PlayerAccumulator {
    engine.sessions().snapshot(pid(raw)).unwrap()
}

#[test]
fn follow_up_kill_in_five_on_five_is_a_trade() {
    let (mut engine, _pipeline) = setup_engine();
    // CT 1,3,5,7,9 and T 2,4,6,8,10. Players 1-4 fight on one lane, the rest far away.
    let p1 = player(1, CT, 0.0);
    let p2 = player(2, T, 100.0);
    let p3 = player(3, CT, 200.0);
    let p4 = player(4, T, 300.0);
    let far: Vec<Participant> = (5..=10)
        .map(|raw| player(raw, if raw % 2 == 1 { CT } else { T }, 5_000.0 + raw as f32 * 1_000.0))
        .collect();
    let mut roster = vec![&p1, &p2, &p3, &p4];
    roster.extend(far.iter());
    start_round(&mut engine, 1, 0.0, &roster);
    assert_eq!(engine.round().get_alive_counts(), (5, 5));

    assert!(engine.handle(kill(0.0, &p1, &p2)));
    assert!(engine.handle(kill(3.0, &p3, &p4)));

    let killer = acc(&engine, 3);
    assert!(killer.round.did_trade_this_round);
    assert_eq!(killer.trade_kills, 1);
    let traded = acc(&engine, 4);
    assert!(traded.round.was_traded_this_round);
    assert_eq!(traded.traded_deaths, 1);
    // 4 stood next to 2 and never answered before dying
    assert_eq!(traded.missed_trade_windows, 1);

    // the opening kill is neither a trade nor traded
    assert!(!acc(&engine, 1).round.did_trade_this_round);
    assert!(!acc(&engine, 2).round.was_traded_this_round);
    assert_eq!(acc(&engine, 1).entry_kills, 1);
    assert_eq!(acc(&engine, 2).entry_deaths, 1);
    assert_eq!(engine.round().get_alive_counts(), (5, 3));
}

#[test]
fn answering_a_teammates_death_credits_both_sides() {
    let (mut engine, _pipeline) = setup_engine();
    let ct1 = player(1, CT, 0.0);
    let ct3 = player(3, CT, 150.0);
    let t2 = player(2, T, 400.0);
    let t4 = player(4, T, 9_000.0);
    start_round(&mut engine, 1, 0.0, &[&ct1, &ct3, &t2, &t4]);

    engine.handle(kill(1.0, &t2, &ct1));
    assert_eq!(engine.round().pending_trades(pid(3)).len(), 1);
    engine.handle(kill(2.5, &ct3, &t2));

    let avenger = acc(&engine, 3);
    assert_eq!(avenger.trade_kills, 1);
    assert!(avenger.round.did_trade_this_round);
    let fallen = acc(&engine, 1);
    assert_eq!(fallen.traded_deaths, 1);
    assert!(fallen.round.was_traded_this_round);
    assert!(engine.round().pending_trades(pid(3)).is_empty());

    end_round(&mut engine, 1, 10.0, CT);
    // dead but traded still counts for KAST
    let fallen = acc(&engine, 1);
    assert_eq!(fallen.rounds_played, 1);
    assert_eq!(fallen.kast_rounds, 1);
    assert_eq!(acc(&engine, 4).kast_rounds, 1);
}

#[test]
fn late_answer_is_not_a_trade() {
    let (mut engine, _pipeline) = setup_engine();
    let ct1 = player(1, CT, 0.0);
    let ct3 = player(3, CT, 150.0);
    let t2 = player(2, T, 400.0);
    let t4 = player(4, T, 9_000.0);
    start_round(&mut engine, 1, 0.0, &[&ct1, &ct3, &t2, &t4]);

    engine.handle(kill(1.0, &t2, &ct1));
    engine.handle(kill(7.0, &ct3, &t2));

    assert_eq!(acc(&engine, 3).trade_kills, 0);
    assert_eq!(acc(&engine, 1).traded_deaths, 0);
    assert_eq!(acc(&engine, 3).missed_trade_windows, 1);
}

#[test]
fn unanswered_windows_are_missed_at_round_end() {
    let (mut engine, _pipeline) = setup_engine();
    let ct1 = player(1, CT, 0.0);
    let ct3 = player(3, CT, 150.0);
    let t2 = player(2, T, 400.0);
    start_round(&mut engine, 1, 0.0, &[&ct1, &ct3, &t2]);

    engine.handle(kill(1.0, &t2, &ct1));
    end_round(&mut engine, 1, 2.0, T);

    assert_eq!(acc(&engine, 3).missed_trade_windows, 1);
    assert!(engine.round().pending_trades(pid(3)).is_empty());
}

#[test]
fn last_player_standing_wins_clutch_with_multi_kill() {
    let (mut engine, _pipeline) = setup_engine();
    let ct1 = player(1, CT, 0.0);
    let ct3 = player(3, CT, 3_000.0);
    let t2 = player(2, T, 6_000.0);
    let t4 = player(4, T, 9_000.0);
    let t6 = player(6, T, 12_000.0);
    start_round(&mut engine, 1, 0.0, &[&ct1, &ct3, &t2, &t4, &t6]);

    engine.handle(kill(1.0, &t2, &ct3));
    assert!(engine.round().clutch_of(pid(1)).is_some());

    engine.handle(kill(20.0, &ct1, &t2));
    engine.handle(kill(40.0, &ct1, &t4));
    engine.handle(kill(60.0, &ct1, &t6));
    end_round(&mut engine, 1, 61.0, CT);

    let clutcher = acc(&engine, 1);
    assert_eq!(clutcher.clutch_wins, 1);
    assert_eq!(clutcher.clutch_losses, 0);
    assert!((clutcher.clutch_points - 2.5).abs() < 1e-9);
    assert_eq!(clutcher.multi_kills.triples, 1);
    assert_eq!(clutcher.high_impact_kills, 3);
    assert_eq!(clutcher.rounds_played, 1);
    assert_eq!(clutcher.kast_rounds, 1);

    // 6 was briefly the last T against one CT
    let last_t = acc(&engine, 6);
    assert_eq!(last_t.clutch_losses, 1);
    assert_eq!(last_t.clutch_wins, 0);
    assert_eq!(acc(&engine, 4).clutch_losses, 0);
    assert_eq!(acc(&engine, 2).entry_kills, 1);
    assert_eq!(acc(&engine, 3).entry_deaths, 1);
}

#[test]
fn first_damage_marks_entry_duel_once() {
    let (mut engine, _pipeline) = setup_engine();
    let ct1 = player(1, CT, 0.0);
    let t2 = player(2, T, 100.0);
    let t4 = player(4, T, 200.0);
    start_round(&mut engine, 1, 0.0, &[&ct1, &t2, &t4]);

    let hurt = |time: GameTime, attacker: &Participant, victim: &Participant| GameEvent::PlayerHurt {
        time,
        victim: victim.clone(),
        attacker: Some(attacker.clone()),
        weapon: "m4a1".into(),
        damage: 27,
        armor_damage: 3,
        headshot: false,
    };
    engine.handle(hurt(1.0, &t2, &ct1));
    engine.handle(hurt(1.2, &ct1, &t2));
    engine.handle(hurt(1.4, &t4, &ct1));

    assert_eq!(acc(&engine, 2).entry_engagements, 1);
    assert_eq!(acc(&engine, 1).entry_engagements_received, 1);
    assert_eq!(acc(&engine, 1).entry_engagements, 0);
    assert_eq!(acc(&engine, 4).entry_engagements, 0);
    assert_eq!(acc(&engine, 1).damage_taken, 54);
    assert_eq!(acc(&engine, 1).damage_dealt, 27);

    // the later kill still settles who won the opening
    engine.handle(kill(2.0, &ct1, &t2));
    assert_eq!(acc(&engine, 1).entry_kills, 1);
    assert_eq!(acc(&engine, 2).entry_deaths, 1);
}

#[test]
fn cleanup_kill_while_far_ahead_is_low_impact() {
    let (mut engine, _pipeline) = setup_engine();
    let cts: Vec<Participant> = [1u64, 3, 5, 7, 9].iter().map(|raw| player(*raw, CT, *raw as f32 * 2_000.0)).collect();
    let t2 = player(2, T, 50_000.0);
    let t4 = player(4, T, 60_000.0);
    let mut roster: Vec<&Participant> = cts.iter().collect();
    roster.push(&t2);
    roster.push(&t4);
    start_round(&mut engine, 1, 0.0, &roster);

    // the opening kill counts as high impact even while outnumbering
    engine.handle(kill(10.0, &cts[4], &t2));
    assert_eq!(acc(&engine, 9).high_impact_kills, 1);

    // 5v1 afterwards
    engine.handle(kill(30.0, &cts[3], &t4));
    let cleanup = acc(&engine, 7);
    assert_eq!(cleanup.low_impact_kills, 1);
    assert_eq!(cleanup.high_impact_kills, 0);
    assert_eq!(cleanup.trade_kills, 0);
}

#[test]
fn snapshot_after_round_reflects_derived_rates() {
    let (mut engine, _pipeline) = setup_engine();
    let ct1 = player(1, CT, 0.0);
    let t2 = player(2, T, 100.0);
    start_round(&mut engine, 1, 0.0, &[&ct1, &t2]);
    engine.handle(kill(4.0, &ct1, &t2));
    end_round(&mut engine, 1, 5.0, CT);

    let winner = assemble(&acc(&engine, 1), SnapshotContext::now(None, Some(1)));
    assert_eq!(winner.kills, 1);
    assert_eq!(winner.rounds_played, 1);
    assert!((winner.kast_pct - 100.0).abs() < 1e-9);
    assert!((winner.survival_rate - 1.0).abs() < 1e-9);
    assert!(winner.rating > 0.0);

    let loser = assemble(&acc(&engine, 2), SnapshotContext::now(None, Some(1)));
    assert_eq!(loser.kd_ratio, 0.0);
    assert_eq!(loser.kast_pct, 0.0);
    assert_eq!(engine.progress().ct_score, 1);
}

#[test]
fn outnumbered_from_spawn_is_a_clutch() {
    let (mut engine, _pipeline) = setup_engine();
    let ct1 = player(1, CT, 0.0);
    let t2 = player(2, T, 3_000.0);
    let t4 = player(4, T, 6_000.0);
    start_round(&mut engine, 1, 0.0, &[&ct1, &t2, &t4]);
    assert_eq!(engine.round().get_alive_counts(), (1, 2));

    // the lone CT dies before anyone else
    engine.handle(kill(5.0, &t2, &ct1));
    assert_eq!(engine.round().clutch_of(pid(1)).unwrap().enemies_alive, 2);
    end_round(&mut engine, 1, 6.0, T);

    let loner = acc(&engine, 1);
    assert_eq!(loner.clutch_losses, 1);
    assert_eq!(loner.clutch_wins, 0);
    assert_eq!(acc(&engine, 2).clutch_wins, 0);
}

#[test]
fn lone_survivor_from_spawn_wins_clutch() {
    let (mut engine, _pipeline) = setup_engine();
    let ct1 = player(1, CT, 0.0);
    let t2 = player(2, T, 3_000.0);
    let t4 = player(4, T, 6_000.0);
    start_round(&mut engine, 1, 0.0, &[&ct1, &t2, &t4]);

    engine.handle(kill(5.0, &ct1, &t2));
    engine.handle(kill(9.0, &ct1, &t4));
    end_round(&mut engine, 1, 10.0, CT);

    let loner = acc(&engine, 1);
    assert_eq!(loner.clutch_wins, 1);
    // two enemies were alive when the clutch began
    assert!((loner.clutch_points - 2.0).abs() < 1e-9);
    assert_eq!(loner.high_impact_kills, 2);
}

#[test]
fn teammate_leaving_for_spectators_starts_a_clutch() {
    let (mut engine, _pipeline) = setup_engine();
    let ct1 = player(1, CT, 0.0);
    let ct3 = player(3, CT, 200.0);
    let t2 = player(2, T, 3_000.0);
    let t4 = player(4, T, 6_000.0);
    let t6 = player(6, T, 9_000.0);
    start_round(&mut engine, 1, 0.0, &[&ct1, &ct3, &t2, &t4, &t6]);

    assert!(engine.handle(GameEvent::PlayerTeamChanged { player_id: pid(3), team: Team::Spectator }));
    assert_eq!(engine.round().get_alive_counts(), (1, 3));
    assert_eq!(engine.round().clutch_of(pid(1)).unwrap().enemies_alive, 3);

    engine.handle(kill(8.0, &t4, &ct1));
    end_round(&mut engine, 1, 9.0, T);
    assert_eq!(acc(&engine, 1).clutch_losses, 1);
    assert_eq!(acc(&engine, 3).clutch_losses, 0);
    // a spectator at round end plays no round
    assert_eq!(acc(&engine, 3).rounds_played, 0);
}

#[test]
fn teammate_disconnecting_starts_a_clutch() {
    let (mut engine, _pipeline) = setup_engine();
    let ct1 = player(1, CT, 0.0);
    let ct3 = player(3, CT, 200.0);
    let t2 = player(2, T, 3_000.0);
    start_round(&mut engine, 1, 0.0, &[&ct1, &ct3, &t2]);
    assert!(engine.round().clutch_of(pid(1)).is_none());

    assert!(engine.handle(GameEvent::PlayerDisconnected { player_id: pid(3) }));
    assert_eq!(engine.round().clutch_of(pid(1)).unwrap().enemies_alive, 1);
    // t2 was already alone against two
    assert_eq!(engine.round().clutch_of(pid(2)).unwrap().enemies_alive, 2);
}

#[test]
fn player_who_never_spawned_plays_no_round() {
    let (mut engine, _pipeline) = setup_engine();
    let ct1 = player(1, CT, 0.0);
    let t2 = player(2, T, 100.0);
    start_round(&mut engine, 1, 0.0, &[&ct1, &t2]);

    // joins the CT side mid-round and waits for the next one
    engine.handle(GameEvent::PlayerConnected { player_id: pid(5), name: "late".into(), is_bot: false });
    engine.handle(GameEvent::PlayerTeamChanged { player_id: pid(5), team: CT });
    engine.handle(kill(4.0, &ct1, &t2));
    end_round(&mut engine, 1, 5.0, CT);

    let late = acc(&engine, 5);
    assert_eq!(late.rounds_played, 0);
    assert_eq!(late.kast_rounds, 0);
    assert_eq!(acc(&engine, 1).rounds_played, 1);
    assert_eq!(acc(&engine, 2).rounds_played, 1);

    start_round(&mut engine, 2, 30.0, &[&ct1, &t2, &player(5, CT, 50.0)]);
    end_round(&mut engine, 2, 60.0, CT);
    assert_eq!(acc(&engine, 5).rounds_played, 1);
}
