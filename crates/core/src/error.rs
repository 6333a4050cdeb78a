//! Error types shared by bus adapters and diagnostic sinks

use thiserror::Error;

/// Errors raised by a message bus adapter
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("Bus is closed")]
    Closed,

    #[error("Publish to {topic} failed: {message}")]
    Publish { topic: String, message: String },

    #[error("Subscribe to {filter} failed: {message}")]
    Subscribe { filter: String, message: String },

    #[error("Invalid topic: {0}")]
    InvalidTopic(String),

    #[error("Invalid payload for {topic}: {message}")]
    InvalidPayload { topic: String, message: String },

    #[error("I/O error: {0}")]
    Io(String),
}

impl BusError {
    /// Create a publish error
    pub fn publish(topic: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Publish {
            topic: topic.into(),
            message: message.into(),
        }
    }

    /// Whether retrying the same operation can succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Publish { .. } | Self::Io(_))
    }
}

impl From<std::io::Error> for BusError {
    fn from(err: std::io::Error) -> Self {
        BusError::Io(err.to_string())
    }
}

/// Errors raised by a diagnostic sink
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    #[error("Sink unavailable: {0}")]
    Unavailable(String),

    #[error("Sink rejected record: {0}")]
    Rejected(String),
}

pub type Result<T> = std::result::Result<T, BusError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(BusError::publish("a/b", "broken pipe").is_retryable());
        assert!(BusError::Io("reset".into()).is_retryable());
        assert!(!BusError::Closed.is_retryable());
        assert!(!BusError::InvalidTopic("".into()).is_retryable());
        let invalid = BusError::InvalidPayload {
            topic: "a/b".into(),
            message: "newline".into(),
        };
        assert!(!invalid.is_retryable());
    }

    #[test]
    fn test_io_conversion() {
        let err: BusError = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe").into();
        assert!(matches!(err, BusError::Io(_)));
    }
}
