// scrim_stats/server/src/core/types.rs
use serde::{Deserialize, Serialize};
use std::fmt;

/// Seconds of match time as reported by the event source (tick-quantized).
pub type GameTime = f64;

/// Stable numeric player identifier. Zero is reserved for anonymous entities
/// and never names a player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct PlayerId(u64);

impl PlayerId {
    pub fn new(raw: u64) -> Option<Self> {
        if raw == 0 { None } else { Some(PlayerId(raw)) }
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl TryFrom<u64> for PlayerId {
    type Error = String;

    fn try_from(raw: u64) -> Result<Self, Self::Error> {
        PlayerId::new(raw).ok_or_else(|| "player id 0 is reserved".to_string())
    }
}

impl From<PlayerId> for u64 {
    fn from(id: PlayerId) -> u64 {
        id.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Team {
    #[default]
    Unassigned,
    Spectator,
    Terrorist,
    CounterTerrorist,
}

impl Team {
    pub fn is_playing(self) -> bool {
        matches!(self, Team::Terrorist | Team::CounterTerrorist)
    }

    pub fn opponent(self) -> Option<Team> {
        match self {
            Team::Terrorist => Some(Team::CounterTerrorist),
            Team::CounterTerrorist => Some(Team::Terrorist),
            _ => None,
        }
    }

    /// Slot used by per-team arrays; `None` for non-playing teams.
    pub fn index(self) -> Option<usize> {
        match self {
            Team::CounterTerrorist => Some(0),
            Team::Terrorist => Some(1),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub fn new(x: f32, y: f32, z: f32) -> Self { Vec3 { x, y, z } }
    pub fn zero() -> Self { Vec3 { x: 0.0, y: 0.0, z: 0.0 } }

    pub fn distance(&self, other: &Vec3) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

/// A combatant as seen by a single event: identity plus the context at the
/// moment the event fired.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub player_id: PlayerId,
    pub team: Team,
    #[serde(default)]
    pub position: Option<Vec3>,
    #[serde(default)]
    pub is_bot: bool,
}

impl Participant {
    pub fn new(player_id: PlayerId, team: Team) -> Self {
        Participant { player_id, team, position: None, is_bot: false }
    }

    pub fn at(mut self, position: Vec3) -> Self {
        self.position = Some(position);
        self
    }

    pub fn bot(mut self) -> Self {
        self.is_bot = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GrenadeKind {
    HighExplosive,
    Flashbang,
    Smoke,
    Molotov,
    Decoy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BombSite {
    A,
    B,
}

/// Every event kind the analytics engine understands. Dispatch happens through
/// a single `match` in the engine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GameEvent {
    PlayerConnected { player_id: PlayerId, name: String, #[serde(default)] is_bot: bool },
    PlayerDisconnected { player_id: PlayerId },
    PlayerTeamChanged { player_id: PlayerId, team: Team },
    RoundStarted { round_number: u32, time: GameTime },
    PlayerSpawned { time: GameTime, player: Participant },
    PositionSampled { time: GameTime, player_id: PlayerId, position: Vec3 },
    PlayerHurt {
        time: GameTime,
        victim: Participant,
        attacker: Option<Participant>,
        weapon: String,
        damage: u32,
        #[serde(default)]
        armor_damage: u32,
        #[serde(default)]
        headshot: bool,
    },
    PlayerKilled {
        time: GameTime,
        victim: Participant,
        attacker: Option<Participant>,
        #[serde(default)]
        assister: Option<Participant>,
        weapon: String,
        #[serde(default)]
        headshot: bool,
        #[serde(default)]
        wallbang: bool,
        #[serde(default)]
        attacker_blind: bool,
        #[serde(default)]
        no_scope: bool,
        #[serde(default)]
        through_smoke: bool,
        #[serde(default)]
        flash_assist: bool,
    },
    WeaponFired { time: GameTime, player_id: PlayerId, weapon: String },
    GrenadeDetonated { time: GameTime, player_id: PlayerId, grenade: GrenadeKind, position: Vec3 },
    PlayerBlinded { time: GameTime, victim: Participant, attacker: Participant, duration_secs: f32 },
    BombPlanted { time: GameTime, player_id: PlayerId, site: BombSite },
    BombDefused { time: GameTime, player_id: PlayerId, site: BombSite },
    BombExploded { time: GameTime, site: BombSite },
    ItemPurchased { player_id: PlayerId, item: String, cost: u32 },
    RoundMvp { player_id: PlayerId, reason: String },
    RoundEnded { time: GameTime, round_number: u32, winner: Team, reason: String },
    MatchEnded { time: GameTime, map_name: String },
}

impl GameEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            GameEvent::PlayerConnected { .. } => "player_connected",
            GameEvent::PlayerDisconnected { .. } => "player_disconnected",
            GameEvent::PlayerTeamChanged { .. } => "player_team_changed",
            GameEvent::RoundStarted { .. } => "round_started",
            GameEvent::PlayerSpawned { .. } => "player_spawned",
            GameEvent::PositionSampled { .. } => "position_sampled",
            GameEvent::PlayerHurt { .. } => "player_hurt",
            GameEvent::PlayerKilled { .. } => "player_killed",
            GameEvent::WeaponFired { .. } => "weapon_fired",
            GameEvent::GrenadeDetonated { .. } => "grenade_detonated",
            GameEvent::PlayerBlinded { .. } => "player_blinded",
            GameEvent::BombPlanted { .. } => "bomb_planted",
            GameEvent::BombDefused { .. } => "bomb_defused",
            GameEvent::BombExploded { .. } => "bomb_exploded",
            GameEvent::ItemPurchased { .. } => "item_purchased",
            GameEvent::RoundMvp { .. } => "round_mvp",
            GameEvent::RoundEnded { .. } => "round_ended",
            GameEvent::MatchEnded { .. } => "match_ended",
        }
    }
}
