//! In-process message bus
//!
//! Handlers are invoked synchronously on the publishing task, in publish
//! order, which makes the bus deterministic enough to assert exact command
//! sequences in tests.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use voice_flow_core::{BusError, BusMessage, MessageBus, MessageHandler, QoS, SubscriptionId};

use crate::{validate_topic, SubscriptionTable};

/// Default number of published messages kept for inspection
const DEFAULT_LOG_CAPACITY: usize = 1024;

/// In-process publish/subscribe bus
pub struct InMemoryBus {
    subscriptions: SubscriptionTable,
    log: Mutex<VecDeque<BusMessage>>,
    log_capacity: usize,
    /// Publishes left to fail (fault injection)
    fail_next: AtomicU32,
    closed: AtomicBool,
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::with_log_capacity(DEFAULT_LOG_CAPACITY)
    }

    /// Create a bus that keeps at most `capacity` published messages
    pub fn with_log_capacity(capacity: usize) -> Self {
        Self {
            subscriptions: SubscriptionTable::default(),
            log: Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_LOG_CAPACITY))),
            log_capacity: capacity,
            fail_next: AtomicU32::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Messages published so far, oldest first
    pub fn published(&self) -> Vec<BusMessage> {
        self.log.lock().iter().cloned().collect()
    }

    /// Topics published so far, oldest first
    pub fn published_topics(&self) -> Vec<String> {
        self.log.lock().iter().map(|m| m.topic.clone()).collect()
    }

    /// Make the next `count` publishes fail with a retryable error
    pub fn fail_next_publishes(&self, count: u32) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Reject all further publishes and subscriptions
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn record(&self, message: BusMessage) {
        if self.log_capacity == 0 {
            return;
        }
        let mut log = self.log.lock();
        if log.len() == self.log_capacity {
            log.pop_front();
        }
        log.push_back(message);
    }

    fn take_injected_failure(&self) -> bool {
        self.fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn publish(&self, topic: &str, payload: Bytes, qos: QoS) -> Result<(), BusError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BusError::Closed);
        }
        validate_topic(topic)?;

        if self.take_injected_failure() {
            tracing::debug!(topic, "Injected publish failure");
            return Err(BusError::publish(topic, "injected failure"));
        }

        self.record(BusMessage::new(topic, payload.clone(), qos));
        let delivered = self.subscriptions.dispatch(topic, &payload, qos);
        tracing::trace!(topic, delivered, "Published");
        Ok(())
    }

    async fn subscribe(
        &self,
        filter: &str,
        qos: QoS,
        handler: MessageHandler,
    ) -> Result<SubscriptionId, BusError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BusError::Closed);
        }
        let id = self.subscriptions.insert(filter, qos, handler)?;
        tracing::debug!(filter, %id, "Subscribed");
        Ok(id)
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), BusError> {
        if self.subscriptions.remove(id) {
            tracing::debug!(%id, "Unsubscribed");
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "in-memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn collector() -> (MessageHandler, Arc<Mutex<Vec<BusMessage>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler: MessageHandler = Arc::new(move |msg| sink.lock().push(msg));
        (handler, seen)
    }

    #[tokio::test]
    async fn test_publish_reaches_matching_subscribers_in_order() {
        let bus = InMemoryBus::new();
        let (all, seen_all) = collector();
        let (wake, seen_wake) = collector();
        bus.subscribe("rhasspy/#", QoS::AtLeastOnce, all).await.unwrap();
        bus.subscribe("rhasspy/wake-word/+", QoS::AtLeastOnce, wake)
            .await
            .unwrap();

        bus.publish("rhasspy/wake-word/detected", Bytes::new(), QoS::AtLeastOnce)
            .await
            .unwrap();
        bus.publish("rhasspy/speech-to-text/text-captured", Bytes::from("hi"), QoS::AtMostOnce)
            .await
            .unwrap();

        let all: Vec<_> = seen_all.lock().iter().map(|m| m.topic.clone()).collect();
        assert_eq!(
            all,
            vec![
                "rhasspy/wake-word/detected".to_string(),
                "rhasspy/speech-to-text/text-captured".to_string()
            ]
        );
        assert_eq!(seen_wake.lock().len(), 1);
        assert_eq!(seen_all.lock()[1].qos, QoS::AtMostOnce);
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let bus = InMemoryBus::new();
        let (handler, seen) = collector();
        let id = bus.subscribe("a/b", QoS::AtMostOnce, handler).await.unwrap();
        bus.unsubscribe(id).await.unwrap();
        bus.publish("a/b", Bytes::new(), QoS::AtMostOnce).await.unwrap();
        assert!(seen.lock().is_empty());
        assert_eq!(bus.subscription_count(), 0);
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed() {
        let bus = InMemoryBus::new();
        bus.fail_next_publishes(2);
        assert!(bus.publish("a/b", Bytes::new(), QoS::AtMostOnce).await.is_err());
        assert!(bus.publish("a/b", Bytes::new(), QoS::AtMostOnce).await.is_err());
        assert!(bus.publish("a/b", Bytes::new(), QoS::AtMostOnce).await.is_ok());
        assert_eq!(bus.published_topics(), vec!["a/b".to_string()]);
    }

    #[tokio::test]
    async fn test_log_is_bounded() {
        let bus = InMemoryBus::with_log_capacity(2);
        for topic in ["a", "b", "c"] {
            bus.publish(topic, Bytes::new(), QoS::AtMostOnce).await.unwrap();
        }
        assert_eq!(bus.published_topics(), vec!["b".to_string(), "c".to_string()]);
    }

    #[tokio::test]
    async fn test_closed_bus_rejects() {
        let bus = InMemoryBus::new();
        bus.close();
        assert_eq!(
            bus.publish("a", Bytes::new(), QoS::AtMostOnce).await,
            Err(BusError::Closed)
        );
    }

    #[tokio::test]
    async fn test_wildcard_publish_rejected() {
        let bus = InMemoryBus::new();
        assert!(matches!(
            bus.publish("a/#", Bytes::new(), QoS::AtMostOnce).await,
            Err(BusError::InvalidTopic(_))
        ));
    }
}
