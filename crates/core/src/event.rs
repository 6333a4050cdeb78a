//! Inbound lifecycle events

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of lifecycle event emitted by a pipeline service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Wake-word service heard the trigger phrase
    WakeDetected,
    /// Voice-command service detected the end of the command
    CommandStopped,
    /// Voice-command service gave up waiting for the command to end
    CommandTimedOut,
    /// Speech-to-text produced a transcription
    TextCaptured,
    /// Intent recognizer produced an intent
    IntentRecognized,
}

impl EventKind {
    pub const ALL: [EventKind; 5] = [
        EventKind::WakeDetected,
        EventKind::CommandStopped,
        EventKind::CommandTimedOut,
        EventKind::TextCaptured,
        EventKind::IntentRecognized,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::WakeDetected => "wake_detected",
            EventKind::CommandStopped => "command_stopped",
            EventKind::CommandTimedOut => "command_timed_out",
            EventKind::TextCaptured => "text_captured",
            EventKind::IntentRecognized => "intent_recognized",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An inbound message signaling a stage-lifecycle transition
///
/// Immutable once received; the payload is opaque to the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlEvent {
    kind: EventKind,
    payload: Bytes,
    received_at: DateTime<Utc>,
}

impl ControlEvent {
    /// Create an event received now
    pub fn new(kind: EventKind, payload: impl Into<Bytes>) -> Self {
        Self::received_at(kind, payload, Utc::now())
    }

    /// Create an event with an explicit receive time
    pub fn received_at(kind: EventKind, payload: impl Into<Bytes>, at: DateTime<Utc>) -> Self {
        Self {
            kind,
            payload: payload.into(),
            received_at: at,
        }
    }

    /// Create an event with an empty payload
    pub fn empty(kind: EventKind) -> Self {
        Self::new(kind, Bytes::new())
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn received(&self) -> DateTime<Utc> {
        self.received_at
    }

    /// Payload as UTF-8 text, lossily
    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}
