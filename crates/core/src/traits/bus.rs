//! Message bus trait

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::Result;

/// Delivery guarantee requested for a publish or subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum QoS {
    /// Best effort, may be lost
    #[default]
    AtMostOnce,
    /// Delivered at least once, may be duplicated
    AtLeastOnce,
    /// Delivered exactly once
    ExactlyOnce,
}

impl QoS {
    /// Numeric level as used by MQTT-style brokers
    pub fn level(&self) -> u8 {
        match self {
            QoS::AtMostOnce => 0,
            QoS::AtLeastOnce => 1,
            QoS::ExactlyOnce => 2,
        }
    }
}

/// A message delivered to a subscription handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
}

impl BusMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>, qos: QoS) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos,
        }
    }
}

/// Callback invoked for each delivered message
///
/// Handlers run on the adapter's delivery path and must not block; they are
/// expected to hand the message off (e.g. onto a channel) and return.
pub type MessageHandler = Arc<dyn Fn(BusMessage) + Send + Sync>;

/// Handle for removing a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Publish/subscribe transport shared with the pipeline services
///
/// No ordering is guaranteed between distinct topics. Subscriptions may see
/// duplicates under at-least-once delivery; deduplication is the consumer's
/// job.
///
/// # Example
///
/// ```ignore
/// let handler: MessageHandler = Arc::new(move |msg| { let _ = tx.try_send(msg); });
/// bus.subscribe("rhasspy/wake-word/detected", QoS::AtLeastOnce, handler).await?;
/// bus.publish("rhasspy/wake-word/stop-listening", Bytes::new(), QoS::AtMostOnce).await?;
/// ```
#[async_trait]
pub trait MessageBus: Send + Sync + 'static {
    /// Publish a message
    ///
    /// Returns once the adapter has accepted the message; never waits for
    /// subscribers to process it.
    async fn publish(&self, topic: &str, payload: Bytes, qos: QoS) -> Result<()>;

    /// Register `handler` for every message whose topic matches `filter`
    async fn subscribe(
        &self,
        filter: &str,
        qos: QoS,
        handler: MessageHandler,
    ) -> Result<SubscriptionId>;

    /// Remove a subscription; unknown ids are ignored
    async fn unsubscribe(&self, id: SubscriptionId) -> Result<()>;

    /// Adapter name for logging
    fn name(&self) -> &str;
}

#[async_trait]
impl<B: MessageBus + ?Sized> MessageBus for Arc<B> {
    async fn publish(&self, topic: &str, payload: Bytes, qos: QoS) -> Result<()> {
        (**self).publish(topic, payload, qos).await
    }

    async fn subscribe(
        &self,
        filter: &str,
        qos: QoS,
        handler: MessageHandler,
    ) -> Result<SubscriptionId> {
        (**self).subscribe(filter, qos, handler).await
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        (**self).unsubscribe(id).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
