use serde::Serialize;

use crate::constants::{
    MAX_ROUNDS, PLAYER_SIZE, PUZZLE_AWARD, SCORE_THRESHOLD, SETTLE_DELAY_MS, SPAWN_X, SPAWN_Y,
    WIN_REWARD_USD,
};

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Move,
    Reset,
    Solve,
}

impl ActionKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "move" => Some(Self::Move),
            "reset" => Some(Self::Reset),
            "solve" => Some(Self::Solve),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct PlayerAction {
    pub kind: ActionKind,
    pub position: Position,
    #[serde(rename = "elapsedMs")]
    pub elapsed_ms: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GamePhase {
    Lobby,
    Playing,
    Finished,
}

#[derive(Clone, Debug, Serialize)]
pub struct ParticipantView {
    pub id: String,
    pub identity: String,
    pub x: f32,
    pub y: f32,
    pub score: i64,
    #[serde(rename = "isHost")]
    pub is_host: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct GhostTrailView {
    #[serde(rename = "participantId")]
    pub participant_id: String,
    pub points: Vec<Position>,
}

#[derive(Clone, Debug, Serialize)]
pub struct RoomConfig {
    #[serde(rename = "puzzleAward")]
    pub puzzle_award: i64,
    #[serde(rename = "scoreThreshold")]
    pub score_threshold: i64,
    #[serde(rename = "maxRounds")]
    pub max_rounds: u32,
    #[serde(rename = "settleDelayMs")]
    pub settle_delay_ms: u64,
    #[serde(rename = "collisionRadius")]
    pub collision_radius: f32,
    pub spawn: Position,
    #[serde(rename = "rewardUsd")]
    pub reward_usd: u32,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            puzzle_award: PUZZLE_AWARD,
            score_threshold: SCORE_THRESHOLD,
            max_rounds: MAX_ROUNDS,
            settle_delay_ms: SETTLE_DELAY_MS,
            collision_radius: PLAYER_SIZE,
            spawn: Position {
                x: SPAWN_X,
                y: SPAWN_Y,
            },
            reward_usd: WIN_REWARD_USD,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoomEvent {
    CollisionGlitch {
        #[serde(rename = "participantId")]
        participant_id: String,
    },
    PositionReset {
        #[serde(rename = "participantId")]
        participant_id: String,
    },
    PuzzleSolved {
        #[serde(rename = "participantId")]
        participant_id: String,
        score: i64,
    },
    RoundAdvanced {
        round: u32,
    },
    GameWon {
        #[serde(rename = "participantId")]
        participant_id: String,
        #[serde(rename = "rewardUsd")]
        reward_usd: u32,
    },
    RewardClaimed {
        #[serde(rename = "participantId")]
        participant_id: String,
        reference: String,
        #[serde(rename = "amountUsd")]
        amount_usd: u32,
    },
}

#[derive(Clone, Debug, Serialize)]
pub struct RoomSnapshot {
    pub phase: GamePhase,
    #[serde(rename = "roundNumber")]
    pub round_number: u32,
    #[serde(rename = "hasWon")]
    pub has_won: bool,
    #[serde(rename = "winnerId")]
    pub winner_id: Option<String>,
    #[serde(rename = "rewardUsd")]
    pub reward_usd: u32,
    pub participants: Vec<ParticipantView>,
    #[serde(rename = "ghostTrails")]
    pub ghost_trails: Vec<GhostTrailView>,
    pub events: Vec<RoomEvent>,
}

#[derive(Clone, Debug, Serialize)]
pub struct RewardReceipt {
    pub reference: String,
    #[serde(rename = "amountUsd")]
    pub amount_usd: u32,
    #[serde(rename = "blockNumber")]
    pub block_number: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct PersistentHistoryEntry {
    pub identity: String,
    #[serde(rename = "roundsPlayed")]
    pub rounds_played: u64,
    pub escapes: u64,
    #[serde(rename = "bestScore")]
    pub best_score: i64,
    #[serde(rename = "claimedUsd")]
    pub claimed_usd: u64,
    #[serde(rename = "updatedAtMs")]
    pub updated_at_ms: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct HistoryResponse {
    #[serde(rename = "generatedAt")]
    pub generated_at_iso: String,
    pub entries: Vec<PersistentHistoryEntry>,
}
