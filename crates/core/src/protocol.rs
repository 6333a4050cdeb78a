//! Turn-taking protocol
//!
//! The sequencing contract of a voice interaction (wake → capture →
//! transcribe → understand → respond), expressed once as data.
//!
//! ```text
//! Idle ──WakeDetected──▶ Listening ──CommandStopped──▶ Transcribing
//!  ▲                                                        │
//!  │                                                   TextCaptured
//!  │                                                        ▼
//!  └──────── Responding ◀──IntentRecognized── Recognizing ◀─┘
//! ```
//!
//! Within a rule, stops are listed before starts so that two services never
//! claim the audio input at the same time.

use crate::command::{CommandAction, ControlCommand, Service};
use crate::event::EventKind;
use crate::state::TurnState;

/// Where an emitted command takes its payload from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadSource {
    /// No payload
    Empty,
    /// The triggering event's payload, unchanged
    ForwardEvent,
    /// A response derived from the triggering event's payload
    DerivedResponse,
}

/// A command emitted by a transition, before its payload is resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandTemplate {
    pub target: Service,
    pub action: CommandAction,
    pub payload: PayloadSource,
}

impl CommandTemplate {
    const fn new(target: Service, action: CommandAction, payload: PayloadSource) -> Self {
        Self {
            target,
            action,
            payload,
        }
    }

    const fn start(target: Service) -> Self {
        Self::new(target, CommandAction::StartListening, PayloadSource::Empty)
    }

    const fn stop(target: Service) -> Self {
        Self::new(target, CommandAction::StopListening, PayloadSource::Empty)
    }
}

/// One row of the transition table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionRule {
    pub from: TurnState,
    pub on: &'static [EventKind],
    pub emits: &'static [CommandTemplate],
    pub to: TurnState,
    /// The session ends once the commands are dispatched
    pub completes_turn: bool,
}

impl TransitionRule {
    pub fn accepts(&self, state: TurnState, kind: EventKind) -> bool {
        self.from == state && self.on.contains(&kind)
    }
}

/// The turn-taking protocol
pub static TRANSITIONS: &[TransitionRule] = &[
    TransitionRule {
        from: TurnState::Idle,
        on: &[EventKind::WakeDetected],
        emits: &[
            CommandTemplate::stop(Service::WakeWord),
            CommandTemplate::start(Service::VoiceCommand),
            CommandTemplate::start(Service::SpeechToText),
        ],
        to: TurnState::Listening,
        completes_turn: false,
    },
    TransitionRule {
        from: TurnState::Listening,
        on: &[EventKind::CommandStopped, EventKind::CommandTimedOut],
        emits: &[
            CommandTemplate::stop(Service::SpeechToText),
            CommandTemplate::start(Service::WakeWord),
        ],
        to: TurnState::Transcribing,
        completes_turn: false,
    },
    TransitionRule {
        from: TurnState::Transcribing,
        on: &[EventKind::TextCaptured],
        emits: &[CommandTemplate::new(
            Service::IntentRecognition,
            CommandAction::Recognize,
            PayloadSource::ForwardEvent,
        )],
        to: TurnState::Recognizing,
        completes_turn: false,
    },
    TransitionRule {
        from: TurnState::Recognizing,
        on: &[EventKind::IntentRecognized],
        emits: &[CommandTemplate::new(
            Service::TextToSpeech,
            CommandAction::Say,
            PayloadSource::DerivedResponse,
        )],
        to: TurnState::Responding,
        completes_turn: true,
    },
];

/// Find the rule that accepts `kind` in `state`
pub fn rule_for(state: TurnState, kind: EventKind) -> Option<&'static TransitionRule> {
    TRANSITIONS.iter().find(|rule| rule.accepts(state, kind))
}

/// The state in which `kind` is expected, if any
pub fn expected_state(kind: EventKind) -> Option<TurnState> {
    TRANSITIONS
        .iter()
        .find(|rule| rule.on.contains(&kind))
        .map(|rule| rule.from)
}

/// Commands that return the stages to the Idle configuration from `state`
///
/// Used when a session is abandoned (stall or interrupt). Stages that are
/// already stopped are not addressed; the wake word is re-enabled only if it
/// is muted in `state`.
pub fn compensation_for(state: TurnState) -> Vec<ControlCommand> {
    match state {
        TurnState::Listening => vec![
            ControlCommand::stop(Service::SpeechToText),
            ControlCommand::stop(Service::VoiceCommand),
            ControlCommand::start(Service::WakeWord),
        ],
        TurnState::Transcribing => vec![ControlCommand::stop(Service::SpeechToText)],
        TurnState::Idle | TurnState::Recognizing | TurnState::Responding => Vec::new(),
    }
}
