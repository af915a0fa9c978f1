use crate::errors::EngineError;
use crate::types::{
    ActionKind, GamePhase, GhostTrailView, ParticipantView, PlayerAction, Position, RoomConfig,
    RoomEvent, RoomSnapshot,
};

mod utils;

use self::utils::{clamp_to_board, euclidean, now_ms};

#[derive(Clone, Debug)]
struct ParticipantInternal {
    view: ParticipantView,
    action_log: Vec<Vec<PlayerAction>>,
    // Index of the first round log belonging to the current game. Earlier
    // entries are history from previous games in the same session.
    log_offset: usize,
    // Frozen at round start; round-N actions never mutate it.
    ghost_trail: Vec<Position>,
}

impl ParticipantInternal {
    fn current_round_positions(&self, round_number: u32) -> Vec<Position> {
        let index = self.log_offset + round_number.saturating_sub(1) as usize;
        self.action_log
            .get(index)
            .map(|actions| actions.iter().map(|action| action.position).collect())
            .unwrap_or_default()
    }
}

/// Outcome of a successful puzzle solve.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SolveOutcome {
    /// Solve arrived outside the playing phase and was dropped.
    Ignored,
    Won {
        reward_usd: u32,
    },
    /// Round advance is due after the settle delay. The caller owns the
    /// timer; `apply_scheduled_advance` must be invoked with this
    /// generation once the delay elapses.
    Advancing {
        generation: u64,
        delay_ms: u64,
    },
}

/// Per-room game state machine: participants, round progression, ghost
/// trails replayed from each participant's own previous round, win
/// detection and reward exposure. All mutation is synchronous; the owner
/// serializes access (one engine per room behind the server mutex).
#[derive(Clone, Debug)]
pub struct RoundEngine {
    pub config: RoomConfig,
    phase: GamePhase,
    round_number: u32,
    round_started_at_ms: u64,
    has_won: bool,
    winner_id: Option<String>,
    participants: Vec<ParticipantInternal>,
    events: Vec<RoomEvent>,
    // Bumped whenever a pending advance must die (start_game, lobby
    // return, the advance itself). A stale timer compares generations and
    // gives up instead of landing a round increment after a reset.
    advance_generation: u64,
    pending_advance: Option<u64>,
}

impl RoundEngine {
    pub fn new(config: RoomConfig) -> Self {
        Self {
            config,
            phase: GamePhase::Lobby,
            round_number: 1,
            round_started_at_ms: 0,
            has_won: false,
            winner_id: None,
            participants: Vec::new(),
            events: Vec::new(),
            advance_generation: 0,
            pending_advance: None,
        }
    }

    pub fn phase(&self) -> GamePhase {
        self.phase
    }

    pub fn round_number(&self) -> u32 {
        self.round_number
    }

    pub fn has_won(&self) -> bool {
        self.has_won
    }

    pub fn winner_id(&self) -> Option<&str> {
        self.winner_id.as_deref()
    }

    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    pub fn has_participant(&self, participant_id: &str) -> bool {
        self.find(participant_id).is_some()
    }

    pub fn is_host(&self, participant_id: &str) -> bool {
        self.find(participant_id)
            .map(|participant| participant.view.is_host)
            .unwrap_or(false)
    }

    pub fn participant_identity(&self, participant_id: &str) -> Option<String> {
        self.find(participant_id)
            .map(|participant| participant.view.identity.clone())
    }

    pub fn participant_position(&self, participant_id: &str) -> Option<Position> {
        self.find(participant_id).map(|participant| Position {
            x: participant.view.x,
            y: participant.view.y,
        })
    }

    pub fn add_participant(
        &mut self,
        participant_id: &str,
        identity: &str,
        is_host: bool,
    ) -> Result<(), EngineError> {
        if self.has_participant(participant_id) {
            return Err(EngineError::InvalidState("participant already registered"));
        }
        if is_host
            && self
                .participants
                .iter()
                .any(|participant| participant.view.is_host)
        {
            return Err(EngineError::InvalidState("room already has a host"));
        }

        self.participants.push(ParticipantInternal {
            view: ParticipantView {
                id: participant_id.to_string(),
                identity: identity.to_string(),
                x: self.config.spawn.x,
                y: self.config.spawn.y,
                score: 0,
                is_host,
            },
            action_log: Vec::new(),
            log_offset: 0,
            ghost_trail: Vec::new(),
        });
        Ok(())
    }

    /// Starts (or restarts) a game. Scores and action history survive from
    /// previous games; only the per-game round bookkeeping resets.
    pub fn start_game(&mut self) -> Result<(), EngineError> {
        if self.participants.is_empty() {
            return Err(EngineError::InvalidState("no participants in room"));
        }

        self.cancel_pending_advance();
        self.phase = GamePhase::Playing;
        self.round_number = 1;
        self.round_started_at_ms = now_ms();
        self.has_won = false;
        self.winner_id = None;

        let spawn = self.config.spawn;
        for participant in &mut self.participants {
            participant.log_offset = participant.action_log.len();
            participant.action_log.push(Vec::new());
            participant.ghost_trail.clear();
            participant.view.x = spawn.x;
            participant.view.y = spawn.y;
        }
        Ok(())
    }

    /// External lobby-return transition. Any pending round advance is
    /// cancelled so it cannot land after the reset.
    pub fn back_to_lobby(&mut self) {
        self.cancel_pending_advance();
        self.phase = GamePhase::Lobby;
    }

    /// Appends an action to the participant's current round log and moves
    /// the participant. Append and position update happen together or not
    /// at all. Outside the playing phase the call is a tolerated no-op
    /// (late keypresses race the phase change); `false` means dropped.
    pub fn record_action(
        &mut self,
        participant_id: &str,
        action: PlayerAction,
    ) -> Result<bool, EngineError> {
        let round_number = self.round_number;
        let playing = self.phase == GamePhase::Playing;
        let participant = self.find_mut(participant_id)?;
        if !playing {
            return Ok(false);
        }

        let action = PlayerAction {
            position: clamp_to_board(action.position),
            ..action
        };
        let index = participant.log_offset + (round_number - 1) as usize;
        debug_assert!(index < participant.action_log.len());
        let Some(entry) = participant.action_log.get_mut(index) else {
            return Err(EngineError::InvalidState("round log missing"));
        };
        entry.push(action);
        participant.view.x = action.position.x;
        participant.view.y = action.position.y;
        Ok(true)
    }

    /// Positions recorded by the participant in the round before `round_number`,
    /// in recorded order. Empty for round 1 or when no prior log exists.
    /// Each participant is haunted only by their own past.
    pub fn derive_ghost_trail(
        &self,
        participant_id: &str,
        round_number: u32,
    ) -> Result<Vec<Position>, EngineError> {
        let participant = self
            .find(participant_id)
            .ok_or_else(|| EngineError::NotFound(participant_id.to_string()))?;
        if round_number <= 1 {
            return Ok(Vec::new());
        }
        Ok(participant.current_round_positions(round_number - 1))
    }

    /// True when `position` is strictly within `radius` of any trail point.
    pub fn check_collision(position: Position, trail: &[Position], radius: f32) -> bool {
        trail
            .iter()
            .any(|point| euclidean(position, *point) < radius)
    }

    /// Collision test for a participant against their frozen trail for the
    /// current round.
    pub fn collides(&self, participant_id: &str) -> Result<bool, EngineError> {
        let participant = self
            .find(participant_id)
            .ok_or_else(|| EngineError::NotFound(participant_id.to_string()))?;
        let position = Position {
            x: participant.view.x,
            y: participant.view.y,
        };
        Ok(Self::check_collision(
            position,
            &participant.ghost_trail,
            self.config.collision_radius,
        ))
    }

    /// Snaps the participant back to spawn and records one reset action.
    /// Every collision produces exactly one reset entry.
    pub fn reset_position(&mut self, participant_id: &str) -> Result<bool, EngineError> {
        let spawn = self.config.spawn;
        let elapsed_ms = self.round_elapsed_ms();
        let applied = self.record_action(
            participant_id,
            PlayerAction {
                kind: ActionKind::Reset,
                position: spawn,
                elapsed_ms,
            },
        )?;
        if applied {
            self.events.push(RoomEvent::CollisionGlitch {
                participant_id: participant_id.to_string(),
            });
            self.events.push(RoomEvent::PositionReset {
                participant_id: participant_id.to_string(),
            });
        }
        Ok(applied)
    }

    /// Credits a solved puzzle and evaluates the win condition. Win ends
    /// the game immediately; otherwise the round advance is left to the
    /// caller's timer (settle delay), carrying a cancellation generation.
    pub fn solve_puzzle(&mut self, participant_id: &str) -> Result<SolveOutcome, EngineError> {
        if self.phase != GamePhase::Playing {
            // Still surface unknown ids before the phase no-op.
            self.find(participant_id)
                .ok_or_else(|| EngineError::NotFound(participant_id.to_string()))?;
            return Ok(SolveOutcome::Ignored);
        }

        let elapsed_ms = self.round_elapsed_ms();
        let position = self
            .participant_position(participant_id)
            .ok_or_else(|| EngineError::NotFound(participant_id.to_string()))?;
        self.record_action(
            participant_id,
            PlayerAction {
                kind: ActionKind::Solve,
                position,
                elapsed_ms,
            },
        )?;

        let award = self.config.puzzle_award;
        let participant = self.find_mut(participant_id)?;
        participant.view.score += award;
        let score = participant.view.score;
        self.events.push(RoomEvent::PuzzleSolved {
            participant_id: participant_id.to_string(),
            score,
        });

        if self.round_number >= self.config.max_rounds || score >= self.config.score_threshold {
            self.cancel_pending_advance();
            self.phase = GamePhase::Finished;
            self.has_won = true;
            self.winner_id = Some(participant_id.to_string());
            self.events.push(RoomEvent::GameWon {
                participant_id: participant_id.to_string(),
                reward_usd: self.config.reward_usd,
            });
            return Ok(SolveOutcome::Won {
                reward_usd: self.config.reward_usd,
            });
        }

        self.advance_generation += 1;
        let generation = self.advance_generation;
        self.pending_advance = Some(generation);
        Ok(SolveOutcome::Advancing {
            generation,
            delay_ms: self.config.settle_delay_ms,
        })
    }

    /// Lands a deferred round advance. Returns false when the generation is
    /// stale (a start or lobby return raced the timer) or the phase moved on.
    pub fn apply_scheduled_advance(&mut self, generation: u64) -> bool {
        if self.pending_advance != Some(generation) || self.phase != GamePhase::Playing {
            return false;
        }
        self.pending_advance = None;
        self.round_number += 1;
        self.round_started_at_ms = now_ms();

        let spawn = self.config.spawn;
        let round_number = self.round_number;
        for participant in &mut self.participants {
            participant.ghost_trail = participant.current_round_positions(round_number - 1);
            participant.action_log.push(Vec::new());
            participant.view.x = spawn.x;
            participant.view.y = spawn.y;
        }
        self.events.push(RoomEvent::RoundAdvanced {
            round: round_number,
        });
        true
    }

    /// Immutable snapshot of the winner's claim, taken so the caller can
    /// release any lock before awaiting the reward issuer.
    pub fn reward_claim_snapshot(&self) -> Result<(String, u32), EngineError> {
        if !self.has_won {
            return Err(EngineError::InvalidState("no win to claim"));
        }
        let winner_id = self
            .winner_id
            .as_deref()
            .ok_or(EngineError::InvalidState("winner missing"))?;
        let identity = self
            .participant_identity(winner_id)
            .ok_or_else(|| EngineError::NotFound(winner_id.to_string()))?;
        Ok((identity, self.config.reward_usd))
    }

    pub fn record_reward_claimed(&mut self, reference: &str, amount_usd: u32) {
        let Some(winner_id) = self.winner_id.clone() else {
            return;
        };
        self.events.push(RoomEvent::RewardClaimed {
            participant_id: winner_id,
            reference: reference.to_string(),
            amount_usd,
        });
    }

    pub fn build_snapshot(&mut self, include_events: bool) -> RoomSnapshot {
        RoomSnapshot {
            phase: self.phase,
            round_number: self.round_number,
            has_won: self.has_won,
            winner_id: self.winner_id.clone(),
            reward_usd: self.config.reward_usd,
            participants: self
                .participants
                .iter()
                .map(|participant| participant.view.clone())
                .collect(),
            ghost_trails: self
                .participants
                .iter()
                .map(|participant| GhostTrailView {
                    participant_id: participant.view.id.clone(),
                    points: participant.ghost_trail.clone(),
                })
                .collect(),
            events: if include_events {
                std::mem::take(&mut self.events)
            } else {
                Vec::new()
            },
        }
    }

    fn cancel_pending_advance(&mut self) {
        self.advance_generation += 1;
        self.pending_advance = None;
    }

    fn round_elapsed_ms(&self) -> u64 {
        now_ms().saturating_sub(self.round_started_at_ms)
    }

    fn find(&self, participant_id: &str) -> Option<&ParticipantInternal> {
        self.participants
            .iter()
            .find(|participant| participant.view.id == participant_id)
    }

    fn find_mut(&mut self, participant_id: &str) -> Result<&mut ParticipantInternal, EngineError> {
        self.participants
            .iter_mut()
            .find(|participant| participant.view.id == participant_id)
            .ok_or_else(|| EngineError::NotFound(participant_id.to_string()))
    }

    #[cfg(test)]
    fn current_round_log_len(&self, participant_id: &str) -> usize {
        let participant = self.find(participant_id).expect("participant exists");
        let index = participant.log_offset + (self.round_number - 1) as usize;
        participant
            .action_log
            .get(index)
            .map(Vec::len)
            .unwrap_or(0)
    }

    #[cfg(test)]
    fn score_of(&self, participant_id: &str) -> i64 {
        self.find(participant_id)
            .map(|participant| participant.view.score)
            .expect("participant exists")
    }
}
