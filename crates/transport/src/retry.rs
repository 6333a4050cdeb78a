//! Publish retry with bounded exponential backoff

use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

use voice_flow_config::RetrySettings;
use voice_flow_core::{BusError, MessageBus, MessageHandler, QoS, SubscriptionId};

/// Retry schedule for failed publishes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            initial_backoff: settings.initial_backoff(),
            max_backoff: settings.max_backoff(),
        }
    }
}

impl RetryPolicy {
    /// Never retry
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Delay before retry number `retry` (1-based), doubling and capped
    pub fn backoff(&self, retry: u32) -> Duration {
        let shift = retry.saturating_sub(1).min(31);
        self.initial_backoff
            .saturating_mul(1u32 << shift)
            .min(self.max_backoff)
    }
}

/// Wraps a bus and retries publishes that fail with a retryable error
///
/// Subscriptions are passed straight through.
pub struct RetryingBus<B> {
    inner: B,
    policy: RetryPolicy,
}

impl<B: MessageBus> RetryingBus<B> {
    pub fn new(inner: B, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }
}

#[async_trait]
impl<B: MessageBus> MessageBus for RetryingBus<B> {
    async fn publish(&self, topic: &str, payload: Bytes, qos: QoS) -> Result<(), BusError> {
        let mut attempt = 1;
        loop {
            match self.inner.publish(topic, payload.clone(), qos).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() && attempt < self.policy.max_attempts => {
                    let backoff = self.policy.backoff(attempt);
                    tracing::warn!(
                        topic,
                        error = %e,
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        "Publish failed, retrying in {:?}",
                        backoff
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn subscribe(
        &self,
        filter: &str,
        qos: QoS,
        handler: MessageHandler,
    ) -> Result<SubscriptionId, BusError> {
        self.inner.subscribe(filter, qos, handler).await
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), BusError> {
        self.inner.unsubscribe(id).await
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}
