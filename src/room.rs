use rand::Rng;

use crate::constants::MAX_PLAYERS_PER_ROOM;
use crate::engine::RoundEngine;
use crate::errors::EngineError;
use crate::types::{GamePhase, RoomConfig};

const ROOM_CODE_LEN: usize = 6;
const ROOM_CODE_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// One haunted room: a code plus its own engine instance. Rooms never
/// share state; concurrent rooms are simply independent values in the
/// server map.
pub struct Room {
    pub code: String,
    pub engine: RoundEngine,
    pub created_at_ms: u64,
}

impl Room {
    pub fn create(
        code: &str,
        host_id: &str,
        host_identity: &str,
        config: RoomConfig,
        created_at_ms: u64,
    ) -> Result<Self, EngineError> {
        let mut engine = RoundEngine::new(config);
        engine.add_participant(host_id, host_identity, true)?;
        Ok(Self {
            code: code.to_string(),
            engine,
            created_at_ms,
        })
    }

    pub fn join(&mut self, participant_id: &str, identity: &str) -> Result<(), EngineError> {
        if self.engine.phase() != GamePhase::Lobby {
            return Err(EngineError::InvalidState("game already running"));
        }
        if self.engine.participant_count() >= MAX_PLAYERS_PER_ROOM {
            return Err(EngineError::InvalidState("room is full"));
        }
        self.engine.add_participant(participant_id, identity, false)
    }
}

pub fn make_room_code() -> String {
    let mut rng = rand::rng();
    (0..ROOM_CODE_LEN)
        .map(|_| {
            let index = rng.random_range(0..ROOM_CODE_CHARSET.len());
            ROOM_CODE_CHARSET[index] as char
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lobby_room() -> Room {
        Room::create("ABC123", "p_1", "0xhost", RoomConfig::default(), 0).expect("room created")
    }

    #[test]
    fn create_registers_the_host() {
        let room = lobby_room();
        assert!(room.engine.is_host("p_1"));
        assert_eq!(room.engine.participant_count(), 1);
    }

    #[test]
    fn join_caps_at_four_players() {
        let mut room = lobby_room();
        room.join("p_2", "guest_1").expect("join");
        room.join("p_3", "guest_2").expect("join");
        room.join("p_4", "guest_3").expect("join");
        assert_eq!(
            room.join("p_5", "guest_4"),
            Err(EngineError::InvalidState("room is full"))
        );
    }

    #[test]
    fn join_is_rejected_once_the_game_runs() {
        let mut room = lobby_room();
        room.engine.start_game().expect("start");
        assert_eq!(
            room.join("p_2", "guest_1"),
            Err(EngineError::InvalidState("game already running"))
        );
    }

    #[test]
    fn room_codes_use_the_uppercase_charset() {
        for _ in 0..32 {
            let code = make_room_code();
            assert_eq!(code.len(), ROOM_CODE_LEN);
            assert!(code
                .bytes()
                .all(|byte| ROOM_CODE_CHARSET.contains(&byte)));
        }
    }
}
