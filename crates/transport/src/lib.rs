//! Message bus adapters
//!
//! Implementations of [`voice_flow_core::MessageBus`]:
//! - [`InMemoryBus`]: in-process bus with wildcard filters, used for embedding
//!   and tests
//! - [`LineBus`]: the line protocol spoken by the pipeline services
//!   (`<topic> <payload>` per line) over any byte stream, stdio by default
//! - [`RetryingBus`]: wraps another bus and retries failed publishes with
//!   bounded exponential backoff

pub mod line;
pub mod memory;
pub mod retry;

pub use line::{encode_line, parse_line, LineBus, DEFAULT_MAX_LINE_BYTES};
pub use memory::InMemoryBus;
pub use retry::{RetryPolicy, RetryingBus};

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use voice_flow_core::{
    topic_matches, BusError, BusMessage, MessageHandler, QoS, SubscriptionId,
};

/// A registered handler
struct Subscription {
    id: SubscriptionId,
    filter: String,
    qos: QoS,
    handler: MessageHandler,
}

/// Subscription table shared by the adapters
#[derive(Default)]
pub(crate) struct SubscriptionTable {
    entries: RwLock<Vec<Subscription>>,
    next_id: AtomicU64,
}

impl SubscriptionTable {
    pub(crate) fn insert(
        &self,
        filter: &str,
        qos: QoS,
        handler: MessageHandler,
    ) -> Result<SubscriptionId, BusError> {
        validate_filter(filter)?;
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.entries.write().push(Subscription {
            id,
            filter: filter.to_string(),
            qos,
            handler,
        });
        Ok(id)
    }

    pub(crate) fn remove(&self, id: SubscriptionId) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|s| s.id != id);
        entries.len() != before
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Deliver a message to every matching handler, in subscription order
    ///
    /// Handlers are invoked outside the table lock so they may subscribe or
    /// unsubscribe. Delivered QoS is the lower of publish and subscription QoS.
    /// Returns the number of handlers invoked.
    pub(crate) fn dispatch(&self, topic: &str, payload: &bytes::Bytes, qos: QoS) -> usize {
        let targets: Vec<(MessageHandler, QoS)> = self
            .entries
            .read()
            .iter()
            .filter(|s| topic_matches(&s.filter, topic))
            .map(|s| (s.handler.clone(), s.qos.min(qos)))
            .collect();

        for (handler, qos) in &targets {
            handler(BusMessage::new(topic, payload.clone(), *qos));
        }

        targets.len()
    }
}

/// A publish topic must be a concrete, non-empty name
pub(crate) fn validate_topic(topic: &str) -> Result<(), BusError> {
    if topic.is_empty() || topic.contains(['+', '#']) || topic.contains(char::is_whitespace) {
        return Err(BusError::InvalidTopic(topic.to_string()));
    }
    Ok(())
}

/// A filter may use `+` for a whole level and `#` only as the last level
pub(crate) fn validate_filter(filter: &str) -> Result<(), BusError> {
    if filter.is_empty() || filter.contains(char::is_whitespace) {
        return Err(BusError::InvalidTopic(filter.to_string()));
    }
    let levels: Vec<&str> = filter.split('/').collect();
    for (i, level) in levels.iter().enumerate() {
        let is_last = i + 1 == levels.len();
        let wildcard_ok = match *level {
            "#" => is_last,
            "+" => true,
            other => !other.contains(['+', '#']),
        };
        if !wildcard_ok {
            return Err(BusError::InvalidTopic(filter.to_string()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_topic() {
        assert!(validate_topic("rhasspy/wake-word/detected").is_ok());
        assert!(validate_topic("").is_err());
        assert!(validate_topic("rhasspy/#").is_err());
        assert!(validate_topic("rhasspy/wake word").is_err());
    }

    #[test]
    fn test_validate_filter() {
        assert!(validate_filter("rhasspy/#").is_ok());
        assert!(validate_filter("rhasspy/+/detected").is_ok());
        assert!(validate_filter("#").is_ok());
        assert!(validate_filter("rhasspy/#/detected").is_err());
        assert!(validate_filter("rhasspy/wake#").is_err());
        assert!(validate_filter("").is_err());
    }
}
