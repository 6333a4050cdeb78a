//! Turn states

use serde::{Deserialize, Serialize};
use std::fmt;

/// State of the single logical session owned by the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    /// Waiting for the wake word
    #[default]
    Idle,
    /// Voice-command and speech-to-text active, wake word muted
    Listening,
    /// Capture stopped, awaiting the transcription
    Transcribing,
    /// Text handed to the intent recognizer, awaiting the intent
    Recognizing,
    /// Intent handed to speech synthesis
    Responding,
}

impl TurnState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnState::Idle => "idle",
            TurnState::Listening => "listening",
            TurnState::Transcribing => "transcribing",
            TurnState::Recognizing => "recognizing",
            TurnState::Responding => "responding",
        }
    }

    /// Whether a session is in progress
    pub fn is_active(&self) -> bool {
        !matches!(self, TurnState::Idle)
    }

    /// Whether the wake-word service is listening in this state
    ///
    /// Wake-word listening is muted from wake detection until speech-to-text
    /// has been told to stop.
    pub fn wake_word_enabled(&self) -> bool {
        !matches!(self, TurnState::Listening)
    }
}

impl fmt::Display for TurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_idle() {
        assert_eq!(TurnState::default(), TurnState::Idle);
        assert!(!TurnState::Idle.is_active());
        assert!(TurnState::Recognizing.is_active());
    }

    #[test]
    fn test_wake_word_muted_only_while_listening() {
        assert!(!TurnState::Listening.wake_word_enabled());
        assert!(TurnState::Transcribing.wake_word_enabled());
        assert!(TurnState::Idle.wake_word_enabled());
    }

    #[test]
    fn test_state_serialization() {
        let json = serde_json::to_string(&TurnState::Transcribing).unwrap();
        assert_eq!(json, "\"transcribing\"");
    }
}
