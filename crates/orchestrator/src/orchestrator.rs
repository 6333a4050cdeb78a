//! Turn orchestrator
//!
//! Bus handlers never touch session state. They enqueue events into a bounded
//! channel that a single owned task drains, so events from different topics
//! are applied one at a time in arrival order. The same task runs the stall
//! watchdog and publishes commands, in table order, before taking the next
//! event.

use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use voice_flow_config::Settings;
use voice_flow_core::{
    BusMessage, ControlCommand, ControlEvent, EventKind, MessageBus, MessageHandler, QoS,
    SubscriptionId, TopicRegistry, TurnState,
};

use crate::machine::{DiscardReason, TransitionOutcome, TurnStateMachine};
use crate::metrics::{MetricsSnapshot, TurnMetrics};
use crate::response::ResponseComposer;
use crate::OrchestratorError;

/// Observable orchestrator activity
#[derive(Debug, Clone, PartialEq)]
pub enum OrchestratorEvent {
    /// A wake word opened a new session
    SessionStarted { session_id: Uuid, turn: u64 },
    /// State changed
    StateChanged { from: TurnState, to: TurnState },
    /// A command was published
    CommandIssued {
        command: ControlCommand,
        topic: String,
    },
    /// An event was dropped without effect
    EventDiscarded {
        kind: EventKind,
        state: TurnState,
        reason: DiscardReason,
    },
    /// The watchdog reset a session
    SessionStalled {
        session_id: Uuid,
        state: TurnState,
        idle_for: Duration,
    },
    /// A second wake word replaced the session
    SessionInterrupted { session_id: Uuid, state: TurnState },
    /// The response was handed to speech synthesis
    TurnCompleted {
        session_id: Uuid,
        turn: u64,
        duration: Duration,
    },
    /// A command could not be published
    PublishFailed { topic: String, error: String },
}

/// State mirrored out of the orchestrator task for cheap reads
#[derive(Debug, Clone, Copy, Default)]
struct Snapshot {
    state: TurnState,
    session_id: Option<Uuid>,
}

/// Builds and starts the orchestrator task
pub struct TurnOrchestrator {
    bus: Arc<dyn MessageBus>,
    topics: TopicRegistry,
    machine: TurnStateMachine,
    inbound_qos: QoS,
    outbound_qos: QoS,
    queue_capacity: usize,
    event_capacity: usize,
}

impl TurnOrchestrator {
    pub fn new(bus: Arc<dyn MessageBus>, topics: TopicRegistry, settings: &Settings) -> Self {
        let o = &settings.orchestrator;
        Self {
            bus,
            topics,
            machine: TurnStateMachine::new(
                o.second_wake_policy,
                o.stall_timeout(),
                ResponseComposer::new(&settings.responses),
            ),
            inbound_qos: settings.bus.inbound_qos,
            outbound_qos: settings.bus.outbound_qos,
            queue_capacity: o.event_queue_capacity.max(1),
            event_capacity: o.event_channel_capacity.max(1),
        }
    }

    /// Subscribe to every inbound topic and spawn the orchestrator task
    pub async fn start(self) -> Result<OrchestratorHandle, OrchestratorError> {
        self.topics.validate().map_err(|(field, message)| {
            OrchestratorError::Config(format!("topics.{}: {}", field, message))
        })?;

        let (queue_tx, queue_rx) = mpsc::channel::<ControlEvent>(self.queue_capacity);
        let (event_tx, _) = broadcast::channel(self.event_capacity);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let metrics = Arc::new(TurnMetrics::default());
        let snapshot = Arc::new(RwLock::new(Snapshot::default()));

        let mut subscriptions = Vec::new();
        for (kind, topic) in self.topics.inbound() {
            let handler = enqueue_handler(kind, queue_tx.clone(), Arc::clone(&metrics));
            match self.bus.subscribe(topic, self.inbound_qos, handler).await {
                Ok(id) => subscriptions.push(id),
                Err(e) => {
                    for id in subscriptions {
                        let _ = self.bus.unsubscribe(id).await;
                    }
                    return Err(e.into());
                }
            }
        }

        tracing::info!(
            bus = self.bus.name(),
            subscriptions = subscriptions.len(),
            policy = ?self.machine.policy(),
            "Turn orchestrator started"
        );

        let worker = Worker {
            machine: self.machine,
            bus: Arc::clone(&self.bus),
            topics: self.topics,
            outbound_qos: self.outbound_qos,
            event_tx: event_tx.clone(),
            metrics: Arc::clone(&metrics),
            snapshot: Arc::clone(&snapshot),
        };
        let task = tokio::spawn(worker.run(queue_rx, shutdown_rx));

        Ok(OrchestratorHandle {
            bus: self.bus,
            queue_tx,
            event_tx,
            shutdown_tx,
            metrics,
            snapshot,
            subscriptions: Mutex::new(subscriptions),
            task: Mutex::new(Some(task)),
        })
    }
}

/// Bus handler that only enqueues
fn enqueue_handler(
    kind: EventKind,
    queue_tx: mpsc::Sender<ControlEvent>,
    metrics: Arc<TurnMetrics>,
) -> MessageHandler {
    Arc::new(move |message: BusMessage| {
        let event = ControlEvent::new(kind, message.payload);
        match queue_tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                metrics.queue_overflowed();
                tracing::warn!(event = %kind, topic = %message.topic, "Event queue full, dropping event");
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(event = %kind, "Orchestrator stopped, dropping event");
            }
        }
    })
}

/// Owner of the state machine
struct Worker {
    machine: TurnStateMachine,
    bus: Arc<dyn MessageBus>,
    topics: TopicRegistry,
    outbound_qos: QoS,
    event_tx: broadcast::Sender<OrchestratorEvent>,
    metrics: Arc<TurnMetrics>,
    snapshot: Arc<RwLock<Snapshot>>,
}

impl Worker {
    async fn run(
        mut self,
        mut queue_rx: mpsc::Receiver<ControlEvent>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        loop {
            let deadline = self.machine.deadline();

            tokio::select! {
                biased;

                _ = shutdown_rx.recv() => {
                    tracing::info!(state = %self.machine.state(), "Turn orchestrator shutting down");
                    break;
                }

                received = queue_rx.recv() => match received {
                    Some(event) => self.on_event(event).await,
                    None => break,
                },

                _ = wait_until(deadline) => self.on_deadline().await,
            }
        }
    }

    async fn on_event(&mut self, event: ControlEvent) {
        let outcome = self.machine.handle(&event, Instant::now());

        match outcome {
            TransitionOutcome::Advanced {
                session_id,
                event: kind,
                from,
                to,
                commands,
                completes_turn,
            } => {
                self.metrics.event_accepted();
                if from == TurnState::Idle {
                    self.metrics.turn_started();
                    let turn = self.machine.session().map(|s| s.turn()).unwrap_or_default();
                    tracing::info!(session_id = %session_id, turn, "Session started");
                    self.emit(OrchestratorEvent::SessionStarted { session_id, turn });
                }
                if kind == EventKind::CommandTimedOut {
                    tracing::warn!(session_id = %session_id, "Voice command timed out, ending capture");
                }
                tracing::debug!(session_id = %session_id, event = %kind, from = %from, to = %to, "Transition");
                self.set_state(from, to);
                self.publish_all(&commands).await;

                if completes_turn {
                    self.finish_turn(to);
                }
            }
            TransitionOutcome::Discarded {
                state,
                kind,
                reason,
            } => {
                self.metrics.event_discarded();
                tracing::info!(event = %kind, state = %state, reason = %reason, "Discarding event");
                self.emit(OrchestratorEvent::EventDiscarded {
                    kind,
                    state,
                    reason,
                });
            }
            TransitionOutcome::Interrupted {
                previous,
                interrupted_in,
                session_id,
                commands,
            } => {
                self.metrics.interrupted();
                self.metrics.event_accepted();
                self.metrics.turn_started();
                tracing::warn!(
                    session_id = %previous,
                    state = %interrupted_in,
                    new_session_id = %session_id,
                    "Session interrupted by wake word"
                );
                self.emit(OrchestratorEvent::SessionInterrupted {
                    session_id: previous,
                    state: interrupted_in,
                });
                let turn = self.machine.session().map(|s| s.turn()).unwrap_or_default();
                self.emit(OrchestratorEvent::SessionStarted { session_id, turn });
                self.set_state(interrupted_in, self.machine.state());
                self.publish_all(&commands).await;
            }
            TransitionOutcome::Stalled { .. } => {}
        }
    }

    async fn on_deadline(&mut self) {
        let Some(TransitionOutcome::Stalled {
            session_id,
            stalled_in,
            idle_for,
            commands,
        }) = self.machine.expire(Instant::now())
        else {
            return;
        };

        self.metrics.stalled();
        tracing::warn!(
            session_id = %session_id,
            state = %stalled_in,
            idle_ms = idle_for.as_millis() as u64,
            "Session stalled, resetting to idle"
        );
        self.emit(OrchestratorEvent::SessionStalled {
            session_id,
            state: stalled_in,
            idle_for,
        });
        self.set_state(stalled_in, TurnState::Idle);
        self.publish_all(&commands).await;
    }

    fn finish_turn(&mut self, state: TurnState) {
        let Some(session) = self.machine.complete_turn() else {
            return;
        };
        let duration = (chrono::Utc::now() - session.started_at())
            .to_std()
            .unwrap_or_default();

        self.metrics.turn_completed();
        tracing::info!(
            session_id = %session.id(),
            turn = session.turn(),
            duration_ms = duration.as_millis() as u64,
            "Turn completed"
        );
        self.emit(OrchestratorEvent::TurnCompleted {
            session_id: session.id(),
            turn: session.turn(),
            duration,
        });
        self.set_state(state, TurnState::Idle);
    }

    /// Publish in order; failures are logged and never stop the sequence
    async fn publish_all(&self, commands: &[ControlCommand]) {
        for command in commands {
            let Some(topic) = command.topic(&self.topics) else {
                tracing::warn!(command = %command, "No topic for command");
                continue;
            };

            match self
                .bus
                .publish(topic, command.payload().clone(), self.outbound_qos)
                .await
            {
                Ok(()) => {
                    tracing::debug!(command = %command, topic, "Command issued");
                    self.emit(OrchestratorEvent::CommandIssued {
                        command: command.clone(),
                        topic: topic.to_string(),
                    });
                }
                Err(e) => {
                    self.metrics.publish_failed();
                    tracing::warn!(command = %command, topic, error = %e, "Failed to publish command");
                    self.emit(OrchestratorEvent::PublishFailed {
                        topic: topic.to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }
    }

    fn set_state(&self, from: TurnState, to: TurnState) {
        {
            let mut snapshot = self.snapshot.write();
            snapshot.state = to;
            snapshot.session_id = self.machine.session().map(|s| s.id());
        }
        if from != to {
            self.emit(OrchestratorEvent::StateChanged { from, to });
        }
    }

    fn emit(&self, event: OrchestratorEvent) {
        // No receivers is fine
        let _ = self.event_tx.send(event);
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Handle to a running orchestrator
pub struct OrchestratorHandle {
    bus: Arc<dyn MessageBus>,
    queue_tx: mpsc::Sender<ControlEvent>,
    event_tx: broadcast::Sender<OrchestratorEvent>,
    shutdown_tx: broadcast::Sender<()>,
    metrics: Arc<TurnMetrics>,
    snapshot: Arc<RwLock<Snapshot>>,
    subscriptions: Mutex<Vec<SubscriptionId>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl OrchestratorHandle {
    pub fn state(&self) -> TurnState {
        self.snapshot.read().state
    }

    /// Id of the active session, if any
    pub fn session_id(&self) -> Option<Uuid> {
        self.snapshot.read().session_id
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Subscribe to orchestrator events
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.event_tx.subscribe()
    }

    /// Deliver an event locally, bypassing the bus
    pub async fn inject(&self, event: ControlEvent) -> Result<(), OrchestratorError> {
        self.queue_tx
            .send(event)
            .await
            .map_err(|_| OrchestratorError::AlreadyStopped)
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .map(|task| !task.is_finished())
            .unwrap_or(false)
    }

    /// Stop the task and remove all bus subscriptions
    pub async fn shutdown(&self) -> Result<(), OrchestratorError> {
        let task = self
            .task
            .lock()
            .take()
            .ok_or(OrchestratorError::AlreadyStopped)?;

        let _ = self.shutdown_tx.send(());
        if let Err(e) = task.await {
            tracing::error!(error = %e, "Orchestrator task failed");
        }

        let subscriptions = std::mem::take(&mut *self.subscriptions.lock());
        for id in subscriptions {
            self.bus.unsubscribe(id).await?;
        }

        tracing::info!(metrics = ?self.metrics.snapshot(), "Turn orchestrator stopped");
        Ok(())
    }
}
