//! The single logical session

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use uuid::Uuid;

use voice_flow_core::TurnState;

/// One conversational turn, from an accepted wake word to the Say dispatch
#[derive(Debug, Clone)]
pub struct Session {
    id: Uuid,
    state: TurnState,
    started_at: DateTime<Utc>,
    last_progress: Instant,
    turn: u64,
}

impl Session {
    pub(crate) fn begin(turn: u64, now: Instant) -> Self {
        Self {
            id: Uuid::new_v4(),
            state: TurnState::Idle,
            started_at: Utc::now(),
            last_progress: now,
            turn,
        }
    }

    pub(crate) fn advance(&mut self, to: TurnState, now: Instant) {
        self.state = to;
        self.last_progress = now;
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// When the last accepted event arrived
    pub fn last_progress(&self) -> Instant {
        self.last_progress
    }

    /// Sequence number of this turn, starting at 1
    pub fn turn(&self) -> u64 {
        self.turn
    }
}
