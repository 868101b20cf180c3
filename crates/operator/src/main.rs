//! Loki operator - lifecycle manager for clustered log stores
//!
//! Watches `Loki` custom resources, converges their workloads through
//! dry-run-based drift detection, and grows memory limits on the
//! crash-retry signature.

use anyhow::Result;
use kube::{Api, Client};
use operator_lib::health::components;
use operator_lib::{
    HealthRegistry, KubePlatform, LogAlert, Loki, OperatorMetrics, Reconciler, ResourceScaler,
    StructuredLogger,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;
mod watch;

const OPERATOR_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting loki-operator");

    // Load configuration
    let config = config::OperatorConfig::load()?;
    let options = config.workload_options()?;
    info!(operator_namespace = %config.operator_namespace, "Operator configured");

    // Initialize health registry
    let health_registry = HealthRegistry::new();
    health_registry.register(components::WATCHER).await;
    health_registry.register(components::RECONCILER).await;
    health_registry.register(components::SCALER).await;
    health_registry.register(components::RULE_STORE).await;

    // Initialize metrics and the structured logger
    let metrics = OperatorMetrics::new();
    let logger = StructuredLogger::new(&config.operator_namespace);
    logger.log_startup(OPERATOR_VERSION);

    // Single platform client shared by every component that does I/O
    let client = Client::try_default().await?;
    let platform = Arc::new(KubePlatform::new(client.clone()));

    let reconciler = Arc::new(Reconciler::new(
        platform.clone(),
        platform,
        options,
        config.normalizer(),
        ResourceScaler::default(),
        config.operator_namespace.clone(),
        config.retry_policy(),
    ));

    // Create shared application state
    let app_state = Arc::new(api::AppState::new(health_registry.clone(), metrics.clone()));

    let (shutdown_tx, _) = broadcast::channel(1);

    // Start health and metrics server
    let _api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    // Event watchers and periodic schedulers
    let instances: Api<Loki> = Api::all(client.clone());
    let alerts: Api<LogAlert> = Api::all(client.clone());

    tokio::spawn(watch::watch_instances(
        instances,
        reconciler.clone(),
        health_registry.clone(),
        shutdown_tx.subscribe(),
    ));
    tokio::spawn(watch::watch_alerts(
        alerts,
        reconciler.clone(),
        health_registry.clone(),
        shutdown_tx.subscribe(),
    ));
    tokio::spawn(watch::run_reconcile_timer(
        reconciler.clone(),
        Duration::from_secs(config.reconcile_interval_secs),
        health_registry.clone(),
        shutdown_tx.subscribe(),
    ));
    tokio::spawn(watch::run_scale_check_timer(
        reconciler,
        Duration::from_secs(config.scale_check_interval_secs),
        health_registry.clone(),
        shutdown_tx.subscribe(),
    ));

    // Mark operator as ready after initialization
    health_registry.set_ready(true).await;

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    let _ = shutdown_tx.send(());
    logger.log_shutdown("SIGINT received");
    info!("Shutting down");

    Ok(())
}
