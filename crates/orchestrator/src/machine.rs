//! Turn state machine
//!
//! Pure and synchronous: it owns the [`Session`], consumes lifecycle events
//! and returns the commands to publish. All sequencing comes from
//! [`voice_flow_core::protocol::TRANSITIONS`]; nothing here decides which
//! service is started or stopped.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use voice_flow_config::SecondWakePolicy;
use voice_flow_core::{
    compensation_for, expected_state, rule_for, ControlCommand, ControlEvent, EventKind,
    PayloadSource, TransitionRule, TurnState,
};

use crate::response::ResponseComposer;
use crate::session::Session;

/// Why an event was not acted on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscardReason {
    /// The session is already past the state this event triggers
    Duplicate,
    /// The session has not reached the state this event expects
    OutOfOrder,
    /// A wake word during an active session, under the ignore policy
    SessionActive,
}

impl DiscardReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Duplicate => "duplicate",
            Self::OutOfOrder => "out_of_order",
            Self::SessionActive => "session_active",
        }
    }
}

impl fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of feeding the machine an event or a clock tick
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
    /// A rule matched; publish `commands` in order
    Advanced {
        session_id: Uuid,
        event: EventKind,
        from: TurnState,
        to: TurnState,
        commands: Vec<ControlCommand>,
        /// Call [`TurnStateMachine::complete_turn`] once dispatched
        completes_turn: bool,
    },
    /// The event was logged and dropped; nothing changed
    Discarded {
        state: TurnState,
        kind: EventKind,
        reason: DiscardReason,
    },
    /// A second wake word replaced the active session
    Interrupted {
        previous: Uuid,
        interrupted_in: TurnState,
        session_id: Uuid,
        /// Compensation for the old session followed by the wake sequence
        commands: Vec<ControlCommand>,
    },
    /// No progress within the stall timeout; the session was reset
    Stalled {
        session_id: Uuid,
        stalled_in: TurnState,
        idle_for: Duration,
        commands: Vec<ControlCommand>,
    },
}

impl TransitionOutcome {
    /// Commands to publish, in order
    pub fn commands(&self) -> &[ControlCommand] {
        match self {
            Self::Advanced { commands, .. }
            | Self::Interrupted { commands, .. }
            | Self::Stalled { commands, .. } => commands,
            Self::Discarded { .. } => &[],
        }
    }
}

/// Position of a state along the turn, for duplicate detection
fn stage(state: TurnState) -> u8 {
    match state {
        TurnState::Idle => 0,
        TurnState::Listening => 1,
        TurnState::Transcribing => 2,
        TurnState::Recognizing => 3,
        TurnState::Responding => 4,
    }
}

/// The turn-taking state machine for a single logical session
#[derive(Debug)]
pub struct TurnStateMachine {
    session: Option<Session>,
    policy: SecondWakePolicy,
    stall_timeout: Duration,
    composer: ResponseComposer,
    turns: u64,
}

impl TurnStateMachine {
    pub fn new(
        policy: SecondWakePolicy,
        stall_timeout: Duration,
        composer: ResponseComposer,
    ) -> Self {
        Self {
            session: None,
            policy,
            stall_timeout,
            composer,
            turns: 0,
        }
    }

    pub fn state(&self) -> TurnState {
        self.session
            .as_ref()
            .map(Session::state)
            .unwrap_or(TurnState::Idle)
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn policy(&self) -> SecondWakePolicy {
        self.policy
    }

    /// Instant at which the active session stalls, if any
    pub fn deadline(&self) -> Option<Instant> {
        self.session
            .as_ref()
            .map(|s| s.last_progress() + self.stall_timeout)
    }

    /// Feed one lifecycle event
    pub fn handle(&mut self, event: &ControlEvent, now: Instant) -> TransitionOutcome {
        let state = self.state();
        let kind = event.kind();

        if let Some(rule) = rule_for(state, kind) {
            return self.apply(rule, event, now);
        }

        if kind == EventKind::WakeDetected {
            return self.second_wake(state, event, now);
        }

        let reason = match expected_state(kind) {
            Some(expected) if stage(expected) < stage(state) => DiscardReason::Duplicate,
            _ => DiscardReason::OutOfOrder,
        };
        TransitionOutcome::Discarded {
            state,
            kind,
            reason,
        }
    }

    /// Reset a session that has made no progress within the stall timeout
    pub fn expire(&mut self, now: Instant) -> Option<TransitionOutcome> {
        let deadline = self.deadline()?;
        if now < deadline {
            return None;
        }

        let session = self.session.take()?;
        Some(TransitionOutcome::Stalled {
            session_id: session.id(),
            stalled_in: session.state(),
            idle_for: now.saturating_duration_since(session.last_progress()),
            commands: compensation_for(session.state()),
        })
    }

    /// End the session after its final commands were dispatched
    pub fn complete_turn(&mut self) -> Option<Session> {
        self.session.take()
    }

    fn apply(
        &mut self,
        rule: &'static TransitionRule,
        event: &ControlEvent,
        now: Instant,
    ) -> TransitionOutcome {
        let from = self.state();
        let commands = self.resolve(rule, event);
        let session = self.session.get_or_insert_with(|| {
            self.turns += 1;
            Session::begin(self.turns, now)
        });
        session.advance(rule.to, now);

        TransitionOutcome::Advanced {
            session_id: session.id(),
            event: event.kind(),
            from,
            to: rule.to,
            commands,
            completes_turn: rule.completes_turn,
        }
    }

    fn second_wake(
        &mut self,
        state: TurnState,
        event: &ControlEvent,
        now: Instant,
    ) -> TransitionOutcome {
        let interruptible = matches!(state, TurnState::Transcribing | TurnState::Recognizing);
        // A wake word the service should not have heard is a redelivery
        let reason = if !state.wake_word_enabled() {
            DiscardReason::Duplicate
        } else {
            DiscardReason::SessionActive
        };

        if self.policy != SecondWakePolicy::Interrupt || !interruptible {
            return TransitionOutcome::Discarded {
                state,
                kind: event.kind(),
                reason,
            };
        }

        let previous = match self.session.take() {
            Some(session) => session.id(),
            None => Uuid::nil(),
        };
        let mut commands = compensation_for(state);
        match self.handle(event, now) {
            TransitionOutcome::Advanced {
                session_id,
                commands: wake_commands,
                ..
            } => {
                commands.extend(wake_commands);
                TransitionOutcome::Interrupted {
                    previous,
                    interrupted_in: state,
                    session_id,
                    commands,
                }
            }
            // Unreachable with the stock table: Idle always accepts a wake word
            other => other,
        }
    }

    fn resolve(&self, rule: &TransitionRule, event: &ControlEvent) -> Vec<ControlCommand> {
        rule.emits
            .iter()
            .map(|template| {
                let payload = match template.payload {
                    PayloadSource::Empty => Bytes::new(),
                    PayloadSource::ForwardEvent => event.payload().clone(),
                    PayloadSource::DerivedResponse => self.composer.render(event.payload()),
                };
                ControlCommand::new(template.target, template.action, payload)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voice_flow_core::{CommandAction, Service};

    const TIMEOUT: Duration = Duration::from_secs(30);

    fn machine(policy: SecondWakePolicy) -> TurnStateMachine {
        TurnStateMachine::new(policy, TIMEOUT, ResponseComposer::default())
    }

    fn event(kind: EventKind, payload: &'static [u8]) -> ControlEvent {
        ControlEvent::new(kind, Bytes::from_static(payload))
    }

    fn names(commands: &[ControlCommand]) -> Vec<String> {
        commands.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn test_full_turn_emits_table_in_order() {
        let mut m = machine(SecondWakePolicy::Ignore);
        let now = Instant::now();

        let out = m.handle(&ControlEvent::empty(EventKind::WakeDetected), now);
        assert_eq!(
            names(out.commands()),
            vec![
                "stop_listening(wake-word)",
                "start_listening(voice-command)",
                "start_listening(speech-to-text)"
            ]
        );
        assert_eq!(m.state(), TurnState::Listening);
        assert_eq!(m.session().map(Session::turn), Some(1));

        let out = m.handle(&ControlEvent::empty(EventKind::CommandStopped), now);
        assert_eq!(
            names(out.commands()),
            vec!["stop_listening(speech-to-text)", "start_listening(wake-word)"]
        );
        assert_eq!(m.state(), TurnState::Transcribing);

        let out = m.handle(&event(EventKind::TextCaptured, b"turn on the lights"), now);
        assert_eq!(out.commands().len(), 1);
        assert_eq!(out.commands()[0].action(), CommandAction::Recognize);
        assert_eq!(&out.commands()[0].payload()[..], b"turn on the lights");
        assert_eq!(m.state(), TurnState::Recognizing);

        let out = m.handle(
            &event(EventKind::IntentRecognized, br#"{"intent":"ChangeLightState"}"#),
            now,
        );
        match &out {
            TransitionOutcome::Advanced {
                to, completes_turn, ..
            } => {
                assert_eq!(*to, TurnState::Responding);
                assert!(*completes_turn);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(out.commands()[0].target(), Service::TextToSpeech);
        assert_eq!(
            &out.commands()[0].payload()[..],
            br#"{"text":"Recognized ChangeLightState"}"#
        );

        assert!(m.complete_turn().is_some());
        assert_eq!(m.state(), TurnState::Idle);
        assert!(m.deadline().is_none());
    }

    #[test]
    fn test_command_timeout_acts_as_command_stop() {
        let mut m = machine(SecondWakePolicy::Ignore);
        let now = Instant::now();
        m.handle(&ControlEvent::empty(EventKind::WakeDetected), now);
        let out = m.handle(&ControlEvent::empty(EventKind::CommandTimedOut), now);
        assert_eq!(out.commands().len(), 2);
        assert_eq!(m.state(), TurnState::Transcribing);
    }

    #[test]
    fn test_out_of_order_event_is_discarded() {
        let mut m = machine(SecondWakePolicy::Ignore);
        let out = m.handle(&event(EventKind::TextCaptured, b"hello"), Instant::now());
        assert_eq!(
            out,
            TransitionOutcome::Discarded {
                state: TurnState::Idle,
                kind: EventKind::TextCaptured,
                reason: DiscardReason::OutOfOrder,
            }
        );
        assert_eq!(m.state(), TurnState::Idle);
        assert!(m.session().is_none());
    }

    #[test]
    fn test_duplicate_event_is_suppressed() {
        let mut m = machine(SecondWakePolicy::Ignore);
        let now = Instant::now();
        m.handle(&ControlEvent::empty(EventKind::WakeDetected), now);
        m.handle(&ControlEvent::empty(EventKind::CommandStopped), now);

        let out = m.handle(&ControlEvent::empty(EventKind::CommandStopped), now);
        assert!(out.commands().is_empty());
        assert!(matches!(
            out,
            TransitionOutcome::Discarded {
                reason: DiscardReason::Duplicate,
                ..
            }
        ));
        assert_eq!(m.state(), TurnState::Transcribing);

        let out = m.handle(&ControlEvent::empty(EventKind::WakeDetected), now);
        assert!(out.commands().is_empty());
    }

    #[test]
    fn test_wake_while_listening_is_duplicate_under_both_policies() {
        for policy in [SecondWakePolicy::Ignore, SecondWakePolicy::Interrupt] {
            let mut m = machine(policy);
            let now = Instant::now();
            m.handle(&ControlEvent::empty(EventKind::WakeDetected), now);
            let out = m.handle(&ControlEvent::empty(EventKind::WakeDetected), now);
            assert!(matches!(
                out,
                TransitionOutcome::Discarded {
                    reason: DiscardReason::Duplicate,
                    ..
                }
            ));
            assert_eq!(m.state(), TurnState::Listening);
        }
    }

    #[test]
    fn test_interrupt_policy_restarts_session() {
        let mut m = machine(SecondWakePolicy::Interrupt);
        let now = Instant::now();
        m.handle(&ControlEvent::empty(EventKind::WakeDetected), now);
        m.handle(&ControlEvent::empty(EventKind::CommandStopped), now);
        let first = m.session().map(Session::id);

        let out = m.handle(&ControlEvent::empty(EventKind::WakeDetected), now);
        match &out {
            TransitionOutcome::Interrupted {
                previous,
                interrupted_in,
                session_id,
                ..
            } => {
                assert_eq!(Some(*previous), first);
                assert_eq!(*interrupted_in, TurnState::Transcribing);
                assert_ne!(Some(*session_id), first);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(
            names(out.commands()),
            vec![
                "stop_listening(speech-to-text)",
                "stop_listening(wake-word)",
                "start_listening(voice-command)",
                "start_listening(speech-to-text)"
            ]
        );
        assert_eq!(m.state(), TurnState::Listening);
        assert_eq!(m.session().map(Session::turn), Some(2));
    }

    #[test]
    fn test_interrupt_while_recognizing_needs_no_compensation() {
        let mut m = machine(SecondWakePolicy::Interrupt);
        let now = Instant::now();
        m.handle(&ControlEvent::empty(EventKind::WakeDetected), now);
        m.handle(&ControlEvent::empty(EventKind::CommandStopped), now);
        m.handle(&event(EventKind::TextCaptured, b"what time is it"), now);
        assert_eq!(m.state(), TurnState::Recognizing);

        let out = m.handle(&ControlEvent::empty(EventKind::WakeDetected), now);
        assert!(matches!(
            out,
            TransitionOutcome::Interrupted {
                interrupted_in: TurnState::Recognizing,
                ..
            }
        ));
        assert_eq!(
            names(out.commands()),
            vec![
                "stop_listening(wake-word)",
                "start_listening(voice-command)",
                "start_listening(speech-to-text)"
            ]
        );
        assert_eq!(m.state(), TurnState::Listening);
    }

    #[test]
    fn test_ignore_policy_keeps_session() {
        let mut m = machine(SecondWakePolicy::Ignore);
        let now = Instant::now();
        m.handle(&ControlEvent::empty(EventKind::WakeDetected), now);
        m.handle(&ControlEvent::empty(EventKind::CommandStopped), now);
        m.handle(&event(EventKind::TextCaptured, b"hi"), now);

        let out = m.handle(&ControlEvent::empty(EventKind::WakeDetected), now);
        assert!(matches!(
            out,
            TransitionOutcome::Discarded {
                reason: DiscardReason::SessionActive,
                ..
            }
        ));
        assert_eq!(m.state(), TurnState::Recognizing);
    }

    #[test]
    fn test_expire_compensates_and_resets() {
        let mut m = machine(SecondWakePolicy::Ignore);
        let start = Instant::now();
        m.handle(&ControlEvent::empty(EventKind::WakeDetected), start);

        assert!(m.expire(start + Duration::from_secs(29)).is_none());
        let out = m
            .expire(start + TIMEOUT)
            .expect("session stalls at the deadline");
        assert_eq!(
            names(out.commands()),
            vec![
                "stop_listening(speech-to-text)",
                "stop_listening(voice-command)",
                "start_listening(wake-word)"
            ]
        );
        assert_eq!(m.state(), TurnState::Idle);
        assert!(m.expire(start + TIMEOUT * 2).is_none());
    }

    #[test]
    fn test_progress_pushes_deadline() {
        let mut m = machine(SecondWakePolicy::Ignore);
        let start = Instant::now();
        m.handle(&ControlEvent::empty(EventKind::WakeDetected), start);
        let later = start + Duration::from_secs(20);
        m.handle(&ControlEvent::empty(EventKind::CommandStopped), later);
        assert_eq!(m.deadline(), Some(later + TIMEOUT));
        assert!(m.expire(start + TIMEOUT).is_none());
    }

    #[test]
    fn test_arbitrary_sequences_never_break_invariants() {
        // Deterministic pseudo-random walk over all event kinds
        let mut m = machine(SecondWakePolicy::Interrupt);
        let now = Instant::now();
        let mut seed: u32 = 0x9e37_79b9;
        for _ in 0..2_000 {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;
            let kind = EventKind::ALL[(seed % EventKind::ALL.len() as u32) as usize];
            let out = m.handle(&ControlEvent::empty(kind), now);
            if let TransitionOutcome::Advanced {
                completes_turn: true,
                ..
            } = out
            {
                m.complete_turn();
            }
            assert_eq!(m.session().is_some(), m.state() != TurnState::Idle);
        }
    }
}
