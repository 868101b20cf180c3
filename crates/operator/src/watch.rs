//! Event wiring and periodic schedulers
//!
//! Watches the managed custom resources and drives the engine's entry
//! points. The reconciliation and scale-check cadences are deployment
//! configuration; the engine itself only exposes the one-shot operations.

use futures::StreamExt;
use kube::runtime::watcher::{self, Event};
use kube::Api;
use operator_lib::health::components;
use operator_lib::platform::{ObjectStore, RuleStore};
use operator_lib::{HealthRegistry, LogAlert, Loki, LokiSpec, ObjectIdentity, Reconciler};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, info, warn};

/// Watch `Loki` resources and converge on every applied event
pub async fn watch_instances<S, R>(
    api: Api<Loki>,
    reconciler: Arc<Reconciler<S, R>>,
    health: HealthRegistry,
    mut shutdown: broadcast::Receiver<()>,
) where
    S: ObjectStore + 'static,
    R: RuleStore + 'static,
{
    // Last-seen specs drive the resources-only fast path; kube events carry
    // no previous value.
    let mut last_seen: HashMap<ObjectIdentity, LokiSpec> = HashMap::new();
    let mut stream = watcher::watcher(api, watcher::Config::default()).boxed();

    info!("Watching for instance events");
    loop {
        tokio::select! {
            event = stream.next() => {
                match event {
                    Some(Ok(Event::Applied(loki))) => {
                        handle_applied(&reconciler, &mut last_seen, loki).await;
                        health.set_healthy(components::WATCHER).await;
                    }
                    Some(Ok(Event::Deleted(loki))) => {
                        if let Some(identity) = identity_of(&loki) {
                            last_seen.remove(&identity);
                            // Workload cleanup cascades through the owner reference
                            info!(%identity, "Instance deleted");
                        }
                    }
                    Some(Ok(Event::Restarted(lokis))) => {
                        debug!(count = lokis.len(), "Watch stream restarted");
                        for loki in lokis {
                            handle_applied(&reconciler, &mut last_seen, loki).await;
                        }
                    }
                    Some(Err(err)) => {
                        health.set_degraded(components::WATCHER, err.to_string()).await;
                        warn!(error = %err, "Instance watch failed, will resume");
                    }
                    None => {
                        warn!("Instance watch stream ended");
                        break;
                    }
                }
            }
            _ = shutdown.recv() => {
                info!("Shutting down instance watcher");
                break;
            }
        }
    }
}

async fn handle_applied<S, R>(
    reconciler: &Reconciler<S, R>,
    last_seen: &mut HashMap<ObjectIdentity, LokiSpec>,
    loki: Loki,
) where
    S: ObjectStore,
    R: RuleStore,
{
    let Some(identity) = identity_of(&loki) else {
        warn!("Ignoring instance event without a complete identity");
        return;
    };

    let previous = last_seen.insert(identity.clone(), loki.spec.clone());

    let outcome = match previous {
        // Only the resources block changed: patch the container in place
        Some(old)
            if old.resources != loki.spec.resources
                && old.image == loki.spec.image
                && old.storage == loki.spec.storage
                && old.replicas == loki.spec.replicas =>
        {
            reconciler
                .on_field_change(&old.resources, &loki.spec.resources, &identity)
                .await
        }
        _ => reconciler.reconcile_instance(&loki).await,
    };

    if let Err(err) = outcome {
        warn!(%identity, error = %err, "Instance event handling failed");
    }
}

/// Watch `LogAlert` resources and persist their rule documents
pub async fn watch_alerts<S, R>(
    api: Api<LogAlert>,
    reconciler: Arc<Reconciler<S, R>>,
    health: HealthRegistry,
    mut shutdown: broadcast::Receiver<()>,
) where
    S: ObjectStore + 'static,
    R: RuleStore + 'static,
{
    let mut stream = watcher::watcher(api, watcher::Config::default()).boxed();

    info!("Watching for alert events");
    loop {
        tokio::select! {
            event = stream.next() => {
                match event {
                    Some(Ok(Event::Applied(alert))) => {
                        store_alert(&reconciler, &health, &alert).await;
                    }
                    Some(Ok(Event::Deleted(alert))) => {
                        debug!(name = alert.metadata.name.as_deref().unwrap_or_default(),
                            "Alert deleted, keeping its stored document");
                    }
                    Some(Ok(Event::Restarted(alerts))) => {
                        for alert in alerts {
                            store_alert(&reconciler, &health, &alert).await;
                        }
                    }
                    Some(Err(err)) => {
                        warn!(error = %err, "Alert watch failed, will resume");
                    }
                    None => {
                        warn!("Alert watch stream ended");
                        break;
                    }
                }
            }
            _ = shutdown.recv() => {
                info!("Shutting down alert watcher");
                break;
            }
        }
    }
}

async fn store_alert<S, R>(
    reconciler: &Reconciler<S, R>,
    health: &HealthRegistry,
    alert: &LogAlert,
) where
    S: ObjectStore,
    R: RuleStore,
{
    match reconciler.on_alert_create(alert).await {
        Ok(()) => health.set_healthy(components::RULE_STORE).await,
        Err(err) => {
            health
                .set_degraded(components::RULE_STORE, err.to_string())
                .await;
            warn!(error = %err, "Failed to store alerting rule");
        }
    }
}

/// Periodic convergence pass over every managed instance
pub async fn run_reconcile_timer<S, R>(
    reconciler: Arc<Reconciler<S, R>>,
    period: Duration,
    health: HealthRegistry,
    mut shutdown: broadcast::Receiver<()>,
) where
    S: ObjectStore + 'static,
    R: RuleStore + 'static,
{
    info!(
        interval_secs = period.as_secs(),
        "Starting reconciliation timer"
    );
    let mut ticker = interval(period);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let failures = reconciler.reconcile_all().await;
                if failures == 0 {
                    health.set_healthy(components::RECONCILER).await;
                } else {
                    health
                        .set_degraded(components::RECONCILER, format!("{failures} instances failed"))
                        .await;
                }
            }
            _ = shutdown.recv() => {
                info!("Shutting down reconciliation timer");
                break;
            }
        }
    }
}

/// Periodic crash-signature scale check over every managed instance
pub async fn run_scale_check_timer<S, R>(
    reconciler: Arc<Reconciler<S, R>>,
    period: Duration,
    health: HealthRegistry,
    mut shutdown: broadcast::Receiver<()>,
) where
    S: ObjectStore + 'static,
    R: RuleStore + 'static,
{
    info!(
        interval_secs = period.as_secs(),
        "Starting scale-check timer"
    );
    let mut ticker = interval(period);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let failures = reconciler.scale_check_all().await;
                if failures == 0 {
                    health.set_healthy(components::SCALER).await;
                } else {
                    health
                        .set_degraded(components::SCALER, format!("{failures} instances failed"))
                        .await;
                }
            }
            _ = shutdown.recv() => {
                info!("Shutting down scale-check timer");
                break;
            }
        }
    }
}

fn identity_of(loki: &Loki) -> Option<ObjectIdentity> {
    Some(ObjectIdentity::new(
        loki.metadata.name.clone()?,
        loki.metadata.namespace.clone()?,
    ))
}
