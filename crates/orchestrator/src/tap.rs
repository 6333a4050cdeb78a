//! Observability tap
//!
//! Records captured text and recognized intents to a [`DiagnosticSink`].
//! The tap has its own queue and task: a slow or failing sink can only lose
//! diagnostic records, never delay or alter orchestration.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use voice_flow_core::{
    BusError, BusMessage, DiagnosticRecord, DiagnosticSink, EventKind, MessageBus,
    MessageHandler, QoS, SinkError, SubscriptionId, TopicRegistry,
};

/// Event kinds the tap listens to
const TAPPED: [EventKind; 2] = [EventKind::TextCaptured, EventKind::IntentRecognized];

/// Passive listener forwarding pipeline outputs to a sink
pub struct ObservabilityTap {
    bus: Arc<dyn MessageBus>,
    subscriptions: Vec<SubscriptionId>,
    shutdown_tx: broadcast::Sender<()>,
    task: JoinHandle<()>,
    dropped: Arc<AtomicU64>,
}

impl ObservabilityTap {
    /// Subscribe to text-captured and intent-recognized and start forwarding
    pub async fn attach(
        bus: Arc<dyn MessageBus>,
        topics: &TopicRegistry,
        sink: Arc<dyn DiagnosticSink>,
        capacity: usize,
    ) -> Result<Self, BusError> {
        let (record_tx, record_rx) = mpsc::channel::<DiagnosticRecord>(capacity.max(1));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let dropped = Arc::new(AtomicU64::new(0));

        let mut subscriptions = Vec::with_capacity(TAPPED.len());
        for kind in TAPPED {
            let record_tx = record_tx.clone();
            let dropped = Arc::clone(&dropped);
            let handler: MessageHandler = Arc::new(move |message: BusMessage| {
                let record = DiagnosticRecord {
                    topic: message.topic,
                    kind,
                    payload: message.payload,
                    observed_at: chrono::Utc::now(),
                };
                if let Err(TrySendError::Full(_)) = record_tx.try_send(record) {
                    dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(event = %kind, "Tap queue full, dropping record");
                }
            });

            match bus
                .subscribe(topics.topic_for_event(kind), QoS::AtMostOnce, handler)
                .await
            {
                Ok(id) => subscriptions.push(id),
                Err(e) => {
                    for id in subscriptions {
                        let _ = bus.unsubscribe(id).await;
                    }
                    return Err(e);
                }
            }
        }

        tracing::info!(sink = sink.name(), capacity, "Observability tap attached");
        let task = tokio::spawn(forward(sink, record_rx, shutdown_rx));

        Ok(Self {
            bus,
            subscriptions,
            shutdown_tx,
            task,
            dropped,
        })
    }

    /// Records lost to a full queue
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Unsubscribe and stop forwarding once queued records are flushed
    pub async fn detach(self) -> Result<(), BusError> {
        for id in &self.subscriptions {
            self.bus.unsubscribe(*id).await?;
        }
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Tap task failed");
        }
        Ok(())
    }
}

async fn forward(
    sink: Arc<dyn DiagnosticSink>,
    mut record_rx: mpsc::Receiver<DiagnosticRecord>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            received = record_rx.recv() => match received {
                Some(record) => deliver(sink.as_ref(), record).await,
                None => break,
            },
            _ = shutdown_rx.recv() => {
                while let Ok(record) = record_rx.try_recv() {
                    deliver(sink.as_ref(), record).await;
                }
                break;
            }
        }
    }
    tracing::debug!(sink = sink.name(), "Observability tap stopped");
}

async fn deliver(sink: &dyn DiagnosticSink, record: DiagnosticRecord) {
    let topic = record.topic.clone();
    if let Err(e) = sink.record(record).await {
        tracing::warn!(sink = sink.name(), topic = %topic, error = %e, "Diagnostic sink failed");
    }
}

/// Writes records to the log under target `voice_flow::tap`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

#[async_trait]
impl DiagnosticSink for TracingSink {
    async fn record(&self, record: DiagnosticRecord) -> Result<(), SinkError> {
        tracing::info!(
            target: "voice_flow::tap",
            topic = %record.topic,
            event = %record.kind,
            payload = %record.payload_text(),
            observed_at = %record.observed_at,
            "Pipeline output"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "tracing"
    }
}

/// Keeps the most recent records in memory
#[derive(Debug)]
pub struct MemorySink {
    records: Mutex<VecDeque<DiagnosticRecord>>,
    capacity: usize,
}

impl MemorySink {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
        }
    }

    /// Records held, oldest first
    pub fn records(&self) -> Vec<DiagnosticRecord> {
        self.records.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[async_trait]
impl DiagnosticSink for MemorySink {
    async fn record(&self, record: DiagnosticRecord) -> Result<(), SinkError> {
        let mut records = self.records.lock();
        if records.len() == self.capacity {
            records.pop_front();
        }
        records.push_back(record);
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
