//! Voice Flow host process
//!
//! Wires a line-protocol bus, the turn orchestrator and the observability tap
//! together and runs them until shutdown or end of input.

use std::future::Future;
use std::sync::Arc;

use thiserror::Error;
use voice_flow_config::{ConfigError, Settings};
use voice_flow_core::BusError;
use voice_flow_orchestrator::{
    MetricsSnapshot, ObservabilityTap, OrchestratorError, TracingSink, TurnOrchestrator,
};
use voice_flow_transport::{LineBus, RetryPolicy, RetryingBus};

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Orchestrator error: {0}")]
    Orchestrator(#[from] OrchestratorError),

    #[error("Bus error: {0}")]
    Bus(#[from] BusError),
}

/// Run the orchestrator over `bus` until `shutdown` resolves or input ends
///
/// Returns the final turn counters.
pub async fn run<F>(
    bus: LineBus,
    settings: &Settings,
    shutdown: F,
) -> Result<MetricsSnapshot, ServerError>
where
    F: Future<Output = ()>,
{
    let topics = settings.topics.registry()?;
    let policy = RetryPolicy::from(&settings.bus.retry);
    let bus = bus.with_max_line_bytes(settings.bus.max_line_bytes);
    let bus = Arc::new(RetryingBus::new(bus, policy));

    let tap = if settings.tap.enabled {
        Some(
            ObservabilityTap::attach(
                bus.clone(),
                &topics,
                Arc::new(TracingSink),
                settings.tap.capacity,
            )
            .await?,
        )
    } else {
        None
    };

    let handle = TurnOrchestrator::new(bus.clone(), topics, settings)
        .start()
        .await?;

    // Subscriptions are in place; start reading input
    let reader = bus.inner().start();

    tokio::select! {
        _ = shutdown => {}
        _ = bus.inner().closed() => {
            tracing::info!("Input closed, shutting down");
        }
    }

    handle.shutdown().await?;
    if let Some(tap) = tap {
        tap.detach().await?;
    }
    if let Some(reader) = reader {
        // Reading stdin blocks; the reader cannot be joined
        reader.abort();
    }

    Ok(handle.metrics())
}
