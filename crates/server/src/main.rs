//! Voice Flow entry point
//!
//! Speaks the line protocol on stdin/stdout; all logging goes to stderr.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use voice_flow_config::{load_settings, Settings};
use voice_flow_transport::LineBus;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Priority: env vars > config/{env}.yaml > config/default.yaml > defaults
    let env = std::env::var("VOICE_FLOW_ENV").ok();
    let config = match load_settings(env.as_deref()) {
        Ok(settings) => {
            // Tracing not yet initialized
            eprintln!(
                "Loaded configuration (env: {})",
                env.as_deref().unwrap_or("default")
            );
            settings
        }
        Err(e) => {
            eprintln!("Warning: Failed to load config: {}. Using defaults.", e);
            Settings::default()
        }
    };

    init_tracing(&config);

    tracing::info!("Starting voice flow v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        topic_prefix = %config.topics.prefix,
        stall_timeout_ms = config.orchestrator.stall_timeout_ms,
        second_wake_policy = ?config.orchestrator.second_wake_policy,
        tap = config.tap.enabled,
        "Configuration loaded"
    );

    let metrics = voice_flow_server::run(LineBus::stdio(), &config, shutdown_signal()).await?;

    tracing::info!(
        turns_started = metrics.turns_started,
        turns_completed = metrics.turns_completed,
        stalls = metrics.stalls,
        publish_failures = metrics.publish_failures,
        "Shutdown complete"
    );
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}

/// Initialize tracing on stderr; stdout carries the bus
fn init_tracing(config: &Settings) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = &config.observability.log_level;
        format!("voice_flow={}", level).into()
    });

    let subscriber = tracing_subscriber::registry().with(env_filter);
    let fmt_layer = if config.observability.log_json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .boxed()
    };
    subscriber.with(fmt_layer).init();
}
