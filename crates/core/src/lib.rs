//! Core traits and types for the voice flow orchestrator
//!
//! This crate provides foundational types used across all other crates:
//! - Lifecycle events and control commands exchanged with pipeline services
//! - The turn-taking protocol, expressed once as a transition table
//! - The topic registry (wire-level topic names)
//! - Bus and diagnostic sink traits for pluggable adapters
//! - Error types

pub mod command;
pub mod error;
pub mod event;
pub mod protocol;
pub mod state;
pub mod topics;
pub mod traits;

pub use command::{CommandAction, ControlCommand, Service};
pub use error::{BusError, Result, SinkError};
pub use event::{ControlEvent, EventKind};
pub use protocol::{
    compensation_for, expected_state, rule_for, CommandTemplate, PayloadSource, TransitionRule,
    TRANSITIONS,
};
pub use state::TurnState;
pub use topics::{topic_matches, TopicRegistry, DEFAULT_TOPIC_PREFIX};

pub use traits::{
    BusMessage, DiagnosticRecord, DiagnosticSink, MessageBus, MessageHandler, QoS, SubscriptionId,
};
