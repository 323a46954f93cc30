// scrim_stats/server/tests/performance/event_throughput.rs
use metrics::histogram;
use scrim_stats_core::core::config::ServerConfig;
use scrim_stats_core::core::types::{GameEvent, Participant, PlayerId, Team, Vec3};
use scrim_stats_core::persistence::InMemoryRepository;
use scrim_stats_core::server::instance::StatsServer;
use std::sync::Arc;
use std::time::Instant;

const ROUNDS: u32 = 100;

fn roster() -> Vec<Participant> {
    (1..=10u64)
        .map(|raw| {
            let team = if raw % 2 == 1 { Team::CounterTerrorist } else { Team::Terrorist };
            Participant::new(PlayerId::new(raw).unwrap(), team).at(Vec3::new(raw as f32 * 120.0, 0.0, 0.0))
        })
        .collect()
}

fn round_events(number: u32, players: &[Participant]) -> Vec<GameEvent> {
    let start = number as f64 * 120.0;
    let mut events = vec![GameEvent::RoundStarted { round_number: number, time: start }];
    events.extend(players.iter().map(|p| GameEvent::PlayerSpawned { time: start, player: p.clone() }));

    let (cts, ts): (Vec<&Participant>, Vec<&Participant>) =
        players.iter().partition(|p| p.team == Team::CounterTerrorist);
    for (i, (ct, t)) in cts.iter().zip(ts.iter()).enumerate() {
        let time = start + 10.0 + i as f64 * 2.0;
        events.push(GameEvent::PlayerHurt {
            time,
            victim: (*t).clone(),
            attacker: Some((*ct).clone()),
            weapon: "m4a1".into(),
            damage: 100,
            armor_damage: 0,
            headshot: i % 2 == 0,
        });
        events.push(GameEvent::PlayerKilled {
            time: time + 0.5,
            victim: (*t).clone(),
            attacker: Some((*ct).clone()),
            assister: None,
            weapon: "m4a1".into(),
            headshot: i % 2 == 0,
            wallbang: false,
            attacker_blind: false,
            no_scope: false,
            through_smoke: false,
            flash_assist: false,
        });
    }
    events.push(GameEvent::RoundEnded {
        time: start + 30.0,
        round_number: number,
        winner: Team::CounterTerrorist,
        reason: "elimination".into(),
    });
    events
}

#[tokio::test]
async fn stress_test_event_handling() {
    let repo = Arc::new(InMemoryRepository::new());
    let mut server = StatsServer::new(ServerConfig::default(), repo.clone()).await.unwrap();
    let players = roster();

    let mut expected: u64 = 0;
    for p in &players {
        server.handle_event(GameEvent::PlayerConnected {
            player_id: p.player_id,
            name: format!("player{}", p.player_id),
            is_bot: false,
        });
        server.handle_event(GameEvent::PlayerTeamChanged { player_id: p.player_id, team: p.team });
        expected += 2;
    }

    let started = Instant::now();
    for number in 1..=ROUNDS {
        let round_start = Instant::now();
        for event in round_events(number, &players) {
            assert!(server.handle_event(event));
            expected += 1;
        }
        histogram!("round_replay_duration_ms").record(round_start.elapsed().as_secs_f64() * 1000.0);
        tokio::task::yield_now().await;
    }
    let elapsed = started.elapsed();
    println!("Replayed {} events in {:?}", expected, elapsed);

    assert_eq!(server.engine().events_handled(), expected);
    assert_eq!(server.engine().events_failed(), 0);
    let alpha = server.sessions.snapshot(PlayerId::new(1).unwrap()).unwrap();
    assert_eq!(alpha.kills, ROUNDS);
    assert_eq!(alpha.rounds_played, ROUNDS);

    let pipeline = server.pipeline_handle();
    let report = server.shutdown().await;
    assert_eq!(report.lost, 0);
    assert_eq!(pipeline.stats().dropped, 0);
    assert_eq!(repo.players().len(), 10);
}
