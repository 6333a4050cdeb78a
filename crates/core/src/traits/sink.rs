//! Diagnostic sink trait

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::error::SinkError;
use crate::event::EventKind;

/// One observed pipeline output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticRecord {
    pub topic: String,
    pub kind: EventKind,
    pub payload: Bytes,
    pub observed_at: DateTime<Utc>,
}

impl DiagnosticRecord {
    /// Payload as UTF-8 text, lossily
    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// Destination for captured text and recognized intents
///
/// Failures are reported to the caller but never influence control flow.
#[async_trait]
pub trait DiagnosticSink: Send + Sync + 'static {
    async fn record(&self, record: DiagnosticRecord) -> Result<(), SinkError>;

    /// Sink name for logging
    fn name(&self) -> &str;
}
