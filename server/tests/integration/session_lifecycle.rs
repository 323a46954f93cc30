// scrim_stats/server/tests/integration/session_lifecycle.rs

use scrim_stats_core::concurrent::task_supervisor::TaskSupervisor;
use scrim_stats_core::core::config::{AnalyticsConfig, PipelineConfig, ServerConfig};
use scrim_stats_core::core::types::{GameEvent, GameTime, Participant, PlayerId, Team};
use scrim_stats_core::entities::player::PlayerSessionStore;
use scrim_stats_core::persistence::{InMemoryRepository, PersistencePipeline};
use scrim_stats_core::server::event_loop::{event_channel, parse_event_line};
use scrim_stats_core::server::instance::StatsServer;
use scrim_stats_core::systems::analytics::CombatAnalyticsEngine;
use scrim_stats_core::systems::snapshot::RoundPhase;

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn pid(raw: u64) -> PlayerId {
    PlayerId::new(raw).unwrap()
}

fn kill(time: GameTime, attacker: &Participant, victim: &Participant) -> GameEvent {
    GameEvent::PlayerKilled {
        time,
        victim: victim.clone(),
        attacker: Some(attacker.clone()),
        assister: None,
        weapon: "usp_silencer".into(),
        headshot: true,
        wallbang: false,
        attacker_blind: false,
        no_scope: false,
        through_smoke: false,
        flash_assist: false,
    }
}

fn round(number: u32, start: GameTime, ct: &Participant, t: &Participant) -> Vec<GameEvent> {
    vec![
        GameEvent::RoundStarted { round_number: number, time: start },
        GameEvent::PlayerSpawned { time: start, player: ct.clone() },
        GameEvent::PlayerSpawned { time: start, player: t.clone() },
        kill(start + 12.0, ct, t),
        GameEvent::RoundEnded {
            time: start + 13.0,
            round_number: number,
            winner: Team::CounterTerrorist,
            reason: "elimination".into(),
        },
    ]
}

#[test]
fn disconnect_emits_one_final_snapshot() {
    let pipeline = PersistencePipeline::new(PipelineConfig::default(), Arc::new(InMemoryRepository::new()));
    let handle = pipeline.handle();
    let sessions = Arc::new(PlayerSessionStore::default());
    let mut engine = CombatAnalyticsEngine::new(
        Arc::new(AnalyticsConfig::default()),
        sessions.clone(),
        pipeline.handle(),
        Arc::new(TaskSupervisor::new()),
    );

    let ct = Participant::new(pid(1), Team::CounterTerrorist);
    let t = Participant::new(pid(2), Team::Terrorist);
    for p in [&ct, &t] {
        engine.handle(GameEvent::PlayerConnected { player_id: p.player_id, name: format!("p{}", p.player_id), is_bot: false });
        engine.handle(GameEvent::PlayerTeamChanged { player_id: p.player_id, team: p.team });
    }
    engine.handle(GameEvent::RoundStarted { round_number: 1, time: 0.0 });
    engine.handle(GameEvent::PlayerSpawned { time: 0.0, player: ct.clone() });
    engine.handle(GameEvent::PlayerSpawned { time: 0.0, player: t.clone() });
    engine.handle(GameEvent::WeaponFired { time: 3.0, player_id: pid(2), weapon: "glock".into() });
    assert_eq!(engine.round().get_alive_counts(), (1, 1));

    let before = handle.stats().enqueued;
    assert!(engine.handle(GameEvent::PlayerDisconnected { player_id: pid(2) }));
    assert_eq!(handle.stats().enqueued, before + 1);
    assert!(!sessions.contains(pid(2)));
    assert_eq!(sessions.player_count(), 1);
    // leaving is not a death
    assert_eq!(engine.round().get_alive_counts(), (1, 0));
    assert!(engine.round().last_team_death(Team::Terrorist).is_none());

    // a repeated disconnect finds nothing to remove
    assert!(engine.handle(GameEvent::PlayerDisconnected { player_id: pid(2) }));
    assert_eq!(handle.stats().enqueued, before + 1);

    // id-only events for the departed player are skipped
    let failed = engine.events_failed();
    assert!(!engine.handle(GameEvent::WeaponFired { time: 5.0, player_id: pid(2), weapon: "glock".into() }));
    assert_eq!(engine.events_failed(), failed + 1);
    assert!(engine.handle(GameEvent::WeaponFired { time: 5.0, player_id: pid(1), weapon: "usp_silencer".into() }));
}

#[test]
fn match_end_starts_fresh_totals() {
    let pipeline = PersistencePipeline::new(PipelineConfig::default(), Arc::new(InMemoryRepository::new()));
    let mut engine = CombatAnalyticsEngine::new(
        Arc::new(AnalyticsConfig::default()),
        Arc::new(PlayerSessionStore::default()),
        pipeline.handle(),
        Arc::new(TaskSupervisor::new()),
    );
    let ct = Participant::new(pid(1), Team::CounterTerrorist);
    let t = Participant::new(pid(2), Team::Terrorist);
    for event in round(1, 0.0, &ct, &t) {
        assert!(engine.handle(event));
    }
    let first_match = engine.progress().match_id;
    assert_eq!(engine.sessions().snapshot(pid(1)).unwrap().kills, 1);

    assert!(engine.handle(GameEvent::MatchEnded { time: 20.0, map_name: "de_inferno".into() }));
    assert_ne!(engine.progress().match_id, first_match);
    assert_eq!(engine.progress().rounds_played, 0);
    let fresh = engine.sessions().snapshot(pid(1)).unwrap();
    assert_eq!(fresh.kills, 0);
    assert_eq!(fresh.current_team, Team::CounterTerrorist);
}

#[tokio::test]
async fn replayed_match_lands_in_repository() {
    let repo = Arc::new(InMemoryRepository::new());
    let server = StatsServer::new(ServerConfig::default(), repo.clone()).await.unwrap();
    let (tx, rx) = event_channel();
    let task = tokio::spawn(server.run_event_loop(rx, CancellationToken::new()));

    let ct = Participant::new(pid(1), Team::CounterTerrorist);
    let t = Participant::new(pid(2), Team::Terrorist);
    tx.send(parse_event_line(r#"{"type":"player_connected","player_id":1,"name":"alpha"}"#).unwrap())
        .await
        .unwrap();
    tx.send(parse_event_line(r#"{"type":"player_connected","player_id":2,"name":"bravo"}"#).unwrap())
        .await
        .unwrap();
    let mut events = round(1, 0.0, &ct, &t);
    events.extend(round(2, 30.0, &ct, &t));
    events.push(GameEvent::MatchEnded { time: 60.0, map_name: "de_nuke".into() });
    for event in events {
        tx.send(event).await.unwrap();
    }
    drop(tx);

    let report = task.await.unwrap();
    assert_eq!(report.lost, 0);

    let markers = repo.round_markers();
    assert_eq!(markers.len(), 4);
    assert_eq!(markers[0].phase, RoundPhase::Started);
    assert_eq!(markers[3].winner, Some(Team::CounterTerrorist));
    let match_id = markers[0].match_id;
    // teams are only known from round 1 spawns on, so round 2 opens 1v1
    let second = markers
        .iter()
        .find(|m| m.round_number == 2 && m.phase == RoundPhase::Started)
        .unwrap();
    assert_eq!((second.ct_alive, second.t_alive), (1, 1));

    let summary = repo.match_summary(match_id).unwrap();
    assert!(summary.finished);
    assert_eq!(summary.ct_score, 2);
    assert_eq!(summary.winner, Some(Team::CounterTerrorist));
    assert_eq!(summary.map_name.as_deref(), Some("de_nuke"));

    let alpha = repo.player(pid(1), Some(match_id)).unwrap();
    assert_eq!(alpha.name, "alpha");
    assert_eq!(alpha.kills, 2);
    assert_eq!(alpha.headshot_kills, 2);
    assert_eq!(alpha.rounds_played, 2);
    let bravo = repo.player(pid(2), Some(match_id)).unwrap();
    assert_eq!(bravo.deaths, 2);
    assert_eq!(bravo.kast_rounds, 0);
    assert!(repo.weapon_rows() >= 1);
}
