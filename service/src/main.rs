//! Travel-saga orchestration service: composition root and background
//! correlation-event worker.
//!
//! No HTTP/gRPC surface is started here (an explicit Non-goal, `spec.md`
//! §1): embedding applications call [`saga_domain::BookingDispatcher`]
//! in-process for the "book travel" command entrypoint. This binary's own
//! job is to wire the durable store, hot store, and broker into a running
//! [`saga_domain::SagaOrchestrator`] and drive its correlation protocol by
//! consuming the per-leg `.confirmed`/`.failed` topics, exactly the way
//! `examples/ticketing/src/main.rs` drives its analytics projections off a
//! subscribed broker stream.

mod config;

use std::sync::Arc;

use futures::StreamExt;
use saga_broker::RedpandaEventBus;
use saga_core::event_bus::EventBus;
use saga_domain::notification::NotificationHub;
use saga_domain::orchestrator::SagaOrchestrator;
use saga_domain::reservation::{LegClients, LegOutcome, LegOutcomePayload};
use saga_domain::topics;
use saga_hotstore::{RedisCoordinator, SagaCoordinator};
use saga_postgres::{PostgresSagaRepository, SagaRepository};
use saga_runtime::metrics::MetricsServer;
use tokio::signal;

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "saga_service=info,saga_domain=info".into()),
        )
        .init();

    tracing::info!("starting travel-saga orchestration service");

    let config = Config::from_env();

    let mut metrics_server = MetricsServer::new("0.0.0.0:9090".parse()?);
    if let Err(e) = metrics_server.start() {
        tracing::warn!(error = %e, "failed to start metrics server, continuing without it");
    }

    tracing::info!(url = %config.postgres.url, "connecting to durable store");
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(config.postgres.max_connections)
        .connect(&config.postgres.url)
        .await?;
    let repository = Arc::new(PostgresSagaRepository::new(pool));
    repository.migrate().await?;
    tracing::info!("durable store ready");

    tracing::info!(url = %config.redis.url, "connecting to hot store");
    let coordinator = Arc::new(RedisCoordinator::new(&config.redis.url).await?);
    tracing::info!("hot store ready");

    tracing::info!(brokers = %config.broker.brokers, "connecting to event bus");
    let event_bus: Arc<dyn EventBus> = Arc::new(
        RedpandaEventBus::builder()
            .brokers(&config.broker.brokers)
            .consumer_group(&config.broker.consumer_group)
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build event bus: {e}"))?,
    );
    tracing::info!("event bus connected");

    let notifications = Arc::new(NotificationHub::new(config.saga.notification_timeout_seconds));

    let orchestrator = Arc::new(SagaOrchestrator::new(
        repository as Arc<dyn SagaRepository>,
        coordinator as Arc<dyn SagaCoordinator>,
        Arc::clone(&event_bus),
        LegClients::broker(Arc::clone(&event_bus)),
        notifications,
        config.saga.clone(),
    ));

    run_correlation_consumer(Arc::clone(&orchestrator), Arc::clone(&event_bus)).await?;

    tracing::info!("service started; awaiting shutdown signal");
    shutdown_signal().await;
    tracing::info!("shutting down");

    Ok(())
}

/// Subscribe to every leg's `.confirmed`/`.failed` topic and route each
/// event into the orchestrator's correlation protocol. Spawned as a
/// background task; a stream error reconnects after a short backoff.
async fn run_correlation_consumer(
    orchestrator: Arc<SagaOrchestrator>,
    event_bus: Arc<dyn EventBus>,
) -> anyhow::Result<()> {
    let correlation_topics = topics::all_correlation_topics();
    tracing::info!(topics = ?correlation_topics, "subscribing to correlation topics");

    tokio::spawn(async move {
        loop {
            let mut stream = match event_bus.subscribe(&correlation_topics).await {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::error!(error = %e, "failed to subscribe to correlation topics, retrying in 5s");
                    tokio::time::sleep(tokio::time::Duration::from_secs(5)).await;
                    continue;
                }
            };

            while let Some(result) = stream.next().await {
                match result {
                    Ok(event) => handle_correlation_event(&orchestrator, &event.event_type, &event.data).await,
                    Err(e) => tracing::error!(error = %e, "correlation event stream error"),
                }
            }

            tracing::warn!("correlation event stream ended, resubscribing in 5s");
            tokio::time::sleep(tokio::time::Duration::from_secs(5)).await;
        }
    });

    Ok(())
}

async fn handle_correlation_event(orchestrator: &SagaOrchestrator, event_type: &str, data: &[u8]) {
    let Some(leg) = topics::leg_from_event_type(event_type) else {
        tracing::warn!(event_type = %event_type, "correlation event for unrecognised leg; dropping");
        return;
    };

    let outcome = match LegOutcomePayload::decode(data) {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!(error = %e, event_type = %event_type, "failed to decode correlation event");
            return;
        }
    };

    let result = match outcome {
        LegOutcome::Confirmed { request_id, confirmation } => {
            orchestrator.handle_leg_confirmed(&request_id, leg, confirmation).await
        }
        LegOutcome::Failed { request_id, reason } => orchestrator.handle_leg_failed(&request_id, leg, &reason).await,
    };

    if let Err(e) = result {
        tracing::error!(error = %e, leg = %leg, "failed to process correlation event");
    }
}

/// Wait for Ctrl+C or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        #[allow(clippy::expect_used)] // startup-only signal handler install
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[allow(clippy::expect_used)] // startup-only signal handler install
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received Ctrl+C, shutting down gracefully"),
        () = terminate => tracing::info!("received SIGTERM, shutting down gracefully"),
    }
}
