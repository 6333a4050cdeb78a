//! Turn counters

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters updated by the orchestrator task and its bus handlers
#[derive(Debug, Default)]
pub struct TurnMetrics {
    turns_started: AtomicU64,
    turns_completed: AtomicU64,
    events_accepted: AtomicU64,
    events_discarded: AtomicU64,
    stalls: AtomicU64,
    interrupts: AtomicU64,
    publish_failures: AtomicU64,
    queue_overflows: AtomicU64,
}

/// Point-in-time copy of [`TurnMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub turns_started: u64,
    pub turns_completed: u64,
    pub events_accepted: u64,
    pub events_discarded: u64,
    pub stalls: u64,
    pub interrupts: u64,
    pub publish_failures: u64,
    /// Inbound events dropped because the queue was full
    pub queue_overflows: u64,
}

impl TurnMetrics {
    pub fn turn_started(&self) {
        self.turns_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn turn_completed(&self) {
        self.turns_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn event_accepted(&self) {
        self.events_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn event_discarded(&self) {
        self.events_discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stalled(&self) {
        self.stalls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn interrupted(&self) {
        self.interrupts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn publish_failed(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn queue_overflowed(&self) {
        self.queue_overflows.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            turns_started: self.turns_started.load(Ordering::Relaxed),
            turns_completed: self.turns_completed.load(Ordering::Relaxed),
            events_accepted: self.events_accepted.load(Ordering::Relaxed),
            events_discarded: self.events_discarded.load(Ordering::Relaxed),
            stalls: self.stalls.load(Ordering::Relaxed),
            interrupts: self.interrupts.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            queue_overflows: self.queue_overflows.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let metrics = TurnMetrics::default();
        metrics.turn_started();
        metrics.event_accepted();
        metrics.event_accepted();
        metrics.queue_overflowed();

        let snap = metrics.snapshot();
        assert_eq!(snap.turns_started, 1);
        assert_eq!(snap.events_accepted, 2);
        assert_eq!(snap.queue_overflows, 1);
        assert_eq!(snap.turns_completed, 0);
    }
}
