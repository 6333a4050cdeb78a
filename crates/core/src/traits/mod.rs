//! Core traits for the voice flow system
//!
//! Components talk to the outside world only through these traits, so that
//! adapters can be swapped without touching the orchestrator and tests can
//! run entirely in process.
//!
//! ```text
//! Messaging:
//!   - MessageBus: publish/subscribe transport shared with pipeline services
//!
//! Diagnostics:
//!   - DiagnosticSink: destination for passively observed pipeline output
//! ```

mod bus;
mod sink;

pub use bus::{BusMessage, MessageBus, MessageHandler, QoS, SubscriptionId};
pub use sink::{DiagnosticRecord, DiagnosticSink};
