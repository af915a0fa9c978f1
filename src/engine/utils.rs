use std::time::{SystemTime, UNIX_EPOCH};

use crate::constants::{GAME_AREA_HEIGHT, GAME_AREA_WIDTH, PLAYER_SIZE};
use crate::types::Position;

pub(super) fn now_ms() -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    now as u64
}

pub(super) fn euclidean(a: Position, b: Position) -> f32 {
    let dx = a.x - b.x;
    let dy = a.y - b.y;
    (dx * dx + dy * dy).sqrt()
}

/// Keeps a coordinate inside the playable board, matching the client's
/// movement bounds (the player sprite occupies `PLAYER_SIZE` pixels).
pub(super) fn clamp_to_board(position: Position) -> Position {
    Position {
        x: position.x.clamp(0.0, GAME_AREA_WIDTH - PLAYER_SIZE),
        y: position.y.clamp(0.0, GAME_AREA_HEIGHT - PLAYER_SIZE),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn euclidean_distance_is_zero_for_identical_points() {
        let p = Position { x: 12.5, y: -3.0 };
        assert_eq!(euclidean(p, p), 0.0);
    }

    #[test]
    fn clamp_respects_sprite_size() {
        let clamped = clamp_to_board(Position { x: 9999.0, y: -50.0 });
        assert_eq!(clamped.x, GAME_AREA_WIDTH - PLAYER_SIZE);
        assert_eq!(clamped.y, 0.0);
    }
}
