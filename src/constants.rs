pub const GAME_AREA_WIDTH: f32 = 600.0;
pub const GAME_AREA_HEIGHT: f32 = 400.0;
pub const PLAYER_SIZE: f32 = 30.0;
pub const MOVE_SPEED: f32 = 5.0;

pub const SPAWN_X: f32 = 100.0;
pub const SPAWN_Y: f32 = 100.0;

pub const PUZZLE_AWARD: i64 = 1_000;
pub const SCORE_THRESHOLD: i64 = 5_000;
pub const MAX_ROUNDS: u32 = 5;
pub const SETTLE_DELAY_MS: u64 = 1_000;

pub const WIN_REWARD_USD: u32 = 25;
pub const MAX_PLAYERS_PER_ROOM: usize = 4;

pub const PUZZLE_SEQUENCE_LEN: usize = 4;

pub const PUZZLE_VARIATIONS: [[u8; PUZZLE_SEQUENCE_LEN]; 5] = [
    [1, 3, 2, 4],
    [2, 1, 4, 3],
    [3, 4, 1, 2],
    [4, 2, 3, 1],
    [1, 4, 3, 2],
];
