//! Turn orchestration for a voice pipeline
//!
//! Features:
//! - Pure [`TurnStateMachine`] driven by the transition table in
//!   `voice_flow_core::protocol`
//! - [`TurnOrchestrator`] that subscribes to lifecycle topics, serializes all
//!   events through one owned task, and publishes control commands in order
//! - Stall watchdog and an explicit second-wake policy
//! - Spoken responses derived from recognized intents
//! - Passive [`ObservabilityTap`] for captured text and intents

pub mod machine;
pub mod metrics;
pub mod orchestrator;
pub mod response;
pub mod session;
pub mod tap;

pub use machine::{DiscardReason, TransitionOutcome, TurnStateMachine};
pub use metrics::{MetricsSnapshot, TurnMetrics};
pub use orchestrator::{OrchestratorEvent, OrchestratorHandle, TurnOrchestrator};
pub use response::ResponseComposer;
pub use session::Session;
pub use tap::{MemorySink, ObservabilityTap, TracingSink};

use thiserror::Error;
use voice_flow_core::BusError;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    #[error("Orchestrator already stopped")]
    AlreadyStopped,

    #[error("Configuration error: {0}")]
    Config(String),
}
