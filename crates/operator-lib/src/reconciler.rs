//! Reconciliation loop
//!
//! Drives every managed instance toward its declared state and runs the
//! crash-triggered scale checks. Repeated work on the same identity is
//! serialized through a scoped in-flight marker; distinct identities proceed
//! concurrently. One instance's failure is logged and counted, never
//! propagated to the others.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::join_all;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::convergence::{Convergence, ConvergenceComparator};
use crate::crd::{LogAlert, Loki, LokiResources};
use crate::error::OperatorError;
use crate::models::{Ensure, ObjectIdentity};
use crate::normalize::Normalizer;
use crate::observability::{OperatorMetrics, StructuredLogger};
use crate::platform::{ObjectStore, RuleStore};
use crate::rules;
use crate::scaler::ResourceScaler;
use crate::workload::{container_resources_patch, WorkloadBuilder, WorkloadOptions};

/// Bounded backoff for transport failures
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

/// Top-level reconciliation driver
pub struct Reconciler<S, R> {
    store: Arc<S>,
    rules: Arc<R>,
    comparator: ConvergenceComparator<S>,
    scaler: ResourceScaler,
    options: WorkloadOptions,
    /// Namespace holding the shared rules ConfigMap
    rules_namespace: String,
    retry: RetryPolicy,
    in_flight: DashMap<ObjectIdentity, ()>,
    metrics: OperatorMetrics,
    logger: StructuredLogger,
}

impl<S: ObjectStore, R: RuleStore> Reconciler<S, R> {
    pub fn new(
        store: Arc<S>,
        rules: Arc<R>,
        options: WorkloadOptions,
        normalizer: Normalizer,
        scaler: ResourceScaler,
        rules_namespace: impl Into<String>,
        retry: RetryPolicy,
    ) -> Self {
        let rules_namespace = rules_namespace.into();
        Self {
            comparator: ConvergenceComparator::new(store.clone(), normalizer, options.clone()),
            store,
            rules,
            scaler,
            options,
            logger: StructuredLogger::new(rules_namespace.clone()),
            rules_namespace,
            retry,
            in_flight: DashMap::new(),
            metrics: OperatorMetrics::new(),
        }
    }

    /// Converge every managed instance once; returns the failure count
    pub async fn reconcile_all(&self) -> usize {
        let instances = match self
            .with_retry("list instances", || self.store.list_instances())
            .await
        {
            Ok(instances) => instances,
            Err(err) => {
                warn!(error = %err, "Failed to list managed instances");
                return 0;
            }
        };

        self.metrics.set_instances_managed(instances.len() as i64);

        let results = join_all(instances.iter().map(|loki| async move {
            let outcome = self.reconcile_instance(loki).await;
            if let Err(err) = &outcome {
                self.record_instance_failure(loki, err);
            }
            outcome
        }))
        .await;

        let failures = results.iter().filter(|outcome| outcome.is_err()).count();
        if failures > 0 {
            warn!(
                failures,
                total = results.len(),
                "Reconciliation pass finished with failures"
            );
        }
        failures
    }

    /// Run the scale check for every managed instance; returns the failure count
    pub async fn scale_check_all(&self) -> usize {
        let instances = match self
            .with_retry("list instances", || self.store.list_instances())
            .await
        {
            Ok(instances) => instances,
            Err(err) => {
                warn!(error = %err, "Failed to list managed instances");
                return 0;
            }
        };

        let results = join_all(instances.iter().map(|loki| async move {
            let identity = identity_of(loki)?;
            let outcome = self.scale_check_once(&identity).await;
            if let Err(err) = &outcome {
                self.record_instance_failure(loki, err);
            }
            outcome
        }))
        .await;

        results.iter().filter(|outcome| outcome.is_err()).count()
    }

    /// Converge a single fetched instance (create-or-patch, idempotent)
    pub async fn reconcile_instance(&self, loki: &Loki) -> Result<(), OperatorError> {
        let identity = identity_of(loki)?;
        let Some(_guard) = self.try_begin(&identity) else {
            debug!(%identity, "Reconciliation already in flight, skipping");
            return Ok(());
        };

        let start = Instant::now();
        let result = self.converge(loki, &identity).await;
        self.metrics
            .observe_reconcile_duration(start.elapsed().as_secs_f64());
        result
    }

    /// Converge one instance addressed by identity
    pub async fn reconcile_once(&self, identity: &ObjectIdentity) -> Result<(), OperatorError> {
        let instance = self
            .with_retry("fetch instance", || {
                self.store.get_instance(&identity.name, &identity.namespace)
            })
            .await?;

        let Some(loki) = instance else {
            debug!(%identity, "Instance no longer exists");
            return Ok(());
        };

        self.reconcile_instance(&loki).await
    }

    /// Create path: submit the workload for a newly declared instance
    pub async fn on_create(&self, loki: &Loki) -> Result<(), OperatorError> {
        let identity = identity_of(loki)?;
        let Some(_guard) = self.try_begin(&identity) else {
            debug!(%identity, "Reconciliation already in flight, skipping");
            return Ok(());
        };

        self.create_workload_for(loki, &identity).await
    }

    /// Fast path for a `spec.resources` change: patch the container in place
    pub async fn on_field_change(
        &self,
        old: &LokiResources,
        new: &LokiResources,
        identity: &ObjectIdentity,
    ) -> Result<(), OperatorError> {
        if old == new {
            return Ok(());
        }

        let Some(_guard) = self.try_begin(identity) else {
            debug!(%identity, "Reconciliation already in flight, skipping");
            return Ok(());
        };

        let patch = container_resources_patch(&identity.name, new);
        self.with_retry("patch container resources", || {
            self.store
                .patch_workload(&identity.name, &identity.namespace, &patch)
        })
        .await?;

        info!(%identity, "Container resources updated");
        Ok(())
    }

    /// Read the replica-0 container status and grow memory on the crash signature
    pub async fn scale_check_once(&self, identity: &ObjectIdentity) -> Result<(), OperatorError> {
        let Some(_guard) = self.try_begin(identity) else {
            debug!(%identity, "Reconciliation already in flight, skipping scale check");
            return Ok(());
        };

        // The decision must use the freshest status read, never a cached one
        let signal = self
            .with_retry("read container status", || {
                self.store
                    .replica_zero_status(&identity.name, &identity.namespace)
            })
            .await?;
        let Some(signal) = signal else {
            debug!(%identity, "No replica-0 container status yet");
            return Ok(());
        };

        let instance = self
            .with_retry("fetch instance", || {
                self.store.get_instance(&identity.name, &identity.namespace)
            })
            .await?;
        let Some(loki) = instance else {
            debug!(%identity, "Instance no longer exists");
            return Ok(());
        };

        let Some(delta) = self.scaler.scale_decision(&signal, &loki.spec.resources) else {
            return Ok(());
        };

        let previous = loki
            .spec
            .resources
            .limits
            .get("memory")
            .cloned()
            .unwrap_or_default();
        let updated = delta
            .resources
            .limits
            .get("memory")
            .cloned()
            .unwrap_or_default();

        let patch = delta.to_patch();
        self.with_retry("patch instance resources", || {
            self.store
                .patch_instance(&identity.name, &identity.namespace, &patch)
        })
        .await?;

        self.metrics.inc_memory_bumps();
        self.logger
            .log_memory_bump(&identity.name, &identity.namespace, &previous, &updated);
        Ok(())
    }

    /// Persist a newly declared alerting rule into the shared ConfigMap
    pub async fn on_alert_create(&self, alert: &LogAlert) -> Result<(), OperatorError> {
        let name = alert
            .metadata
            .name
            .clone()
            .ok_or_else(|| OperatorError::invalid_spec("<unnamed>", "missing metadata.name"))?;

        let document = rules::render_rule_document(&alert.spec)?;
        let rule_key = rules::rule_key(&name);

        self.with_retry("ensure rules config map", || {
            self.rules
                .ensure_exists(&self.rules_namespace, &self.options.rules_config_map)
        })
        .await?;
        self.with_retry("store rule document", || {
            self.rules.put_key(
                &self.rules_namespace,
                &self.options.rules_config_map,
                &rule_key,
                &document,
            )
        })
        .await?;

        self.metrics.inc_rule_documents_stored();
        info!(alert = %name, "Alerting rule stored");
        Ok(())
    }

    async fn converge(&self, loki: &Loki, identity: &ObjectIdentity) -> Result<(), OperatorError> {
        let observed = self
            .with_retry("fetch workload", || {
                self.store.get_workload(&identity.name, &identity.namespace)
            })
            .await?;

        let Some(observed) = observed else {
            return self.create_workload_for(loki, identity).await;
        };

        let outcome = self
            .with_retry("convergence check", || {
                self.comparator.compare(loki, &observed)
            })
            .await?;

        match outcome {
            Convergence::Converged => {
                debug!(%identity, "Workload already converged");
                Ok(())
            }
            Convergence::Diverged { patch } => {
                self.metrics.inc_drift_detected();
                self.logger.log_drift(&identity.name, &identity.namespace);

                self.with_retry("patch workload", || {
                    self.store
                        .patch_workload(&identity.name, &identity.namespace, &patch)
                })
                .await?;

                info!(%identity, "Corrective patch applied");
                Ok(())
            }
        }
    }

    async fn create_workload_for(
        &self,
        loki: &Loki,
        identity: &ObjectIdentity,
    ) -> Result<(), OperatorError> {
        let workload = WorkloadBuilder::from_resource(loki, &self.options)?.build()?;

        // The pod template mounts the rules map by name; it must exist before
        // the workload is submitted or the pods cannot schedule.
        let ensure = self
            .with_retry("ensure rules config map", || {
                self.rules
                    .ensure_exists(&self.rules_namespace, &self.options.rules_config_map)
            })
            .await?;
        if ensure == Ensure::Created {
            info!(
                namespace = %self.rules_namespace,
                name = %self.options.rules_config_map,
                "Created shared rules ConfigMap"
            );
        }

        self.with_retry("create workload", || {
            self.store.create_workload(&workload, &identity.namespace)
        })
        .await?;

        self.metrics.inc_workloads_created();
        info!(%identity, "Workload created");
        Ok(())
    }

    fn record_instance_failure(&self, loki: &Loki, err: &OperatorError) {
        let name = loki.metadata.name.as_deref().unwrap_or("<unnamed>");
        let namespace = loki.metadata.namespace.as_deref().unwrap_or_default();
        self.metrics.inc_reconcile_errors();
        self.logger
            .log_instance_failure(name, namespace, &err.to_string());
    }

    /// Acquire the per-identity marker; `None` when a reconciliation for the
    /// same identity is already running.
    fn try_begin(&self, identity: &ObjectIdentity) -> Option<InFlightGuard<'_>> {
        match self.in_flight.entry(identity.clone()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(());
                Some(InFlightGuard {
                    in_flight: &self.in_flight,
                    identity: identity.clone(),
                })
            }
        }
    }

    /// Retry transport failures with doubling, capped backoff; every other
    /// failure kind returns immediately.
    async fn with_retry<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, OperatorError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, OperatorError>>,
    {
        let mut attempt = 1;
        let mut backoff = self.retry.initial_backoff;

        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.retry.max_attempts => {
                    warn!(
                        operation,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "Transport failure, backing off"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = std::cmp::min(backoff * 2, self.retry.max_backoff);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Releases the per-identity marker on every exit path
struct InFlightGuard<'a> {
    in_flight: &'a DashMap<ObjectIdentity, ()>,
    identity: ObjectIdentity,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.remove(&self.identity);
    }
}

fn identity_of(loki: &Loki) -> Result<ObjectIdentity, OperatorError> {
    let name = loki
        .metadata
        .name
        .clone()
        .ok_or_else(|| OperatorError::invalid_spec("<unnamed>", "missing metadata.name"))?;
    let namespace = loki
        .metadata
        .namespace
        .clone()
        .ok_or_else(|| OperatorError::invalid_spec(name.clone(), "missing metadata.namespace"))?;
    Ok(ObjectIdentity { name, namespace })
}
