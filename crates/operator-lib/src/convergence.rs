//! Drift detection through dry-run materialization
//!
//! The desired descriptor is materialized with a side-effect-free dry-run
//! apply so both sides of the comparison carry the same server-injected
//! shape. Identity-correlated bookkeeping that legitimately differs between
//! a dry run and the real object is restored from the observed side before
//! normalization.

use k8s_openapi::api::apps::v1::StatefulSet;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use crate::crd::Loki;
use crate::error::OperatorError;
use crate::normalize::Normalizer;
use crate::platform::ObjectStore;
use crate::workload::{WorkloadBuilder, WorkloadOptions};

/// Name suffix of the throwaway dry-run object, so the materialization never
/// collides with the live workload
pub const DRY_RUN_NAME_SUFFIX: &str = "-new";

/// Outcome of one convergence check
#[derive(Debug, Clone, PartialEq)]
pub enum Convergence {
    /// Live and desired descriptors are equal after normalization
    Converged,
    /// The live workload drifted; the normalized desired document is the
    /// proposed corrective patch
    Diverged { patch: Value },
}

/// Compares a custom resource's desired state against the live workload
pub struct ConvergenceComparator<S> {
    store: Arc<S>,
    normalizer: Normalizer,
    options: WorkloadOptions,
}

impl<S: ObjectStore> ConvergenceComparator<S> {
    pub fn new(store: Arc<S>, normalizer: Normalizer, options: WorkloadOptions) -> Self {
        Self {
            store,
            normalizer,
            options,
        }
    }

    /// Check whether the observed workload matches the resource's intent
    ///
    /// A failed dry run surfaces as an error and is never reported as
    /// divergence. Re-running against an unchanged converged object returns
    /// `Converged` again.
    pub async fn compare(
        &self,
        loki: &Loki,
        observed: &StatefulSet,
    ) -> Result<Convergence, OperatorError> {
        let builder = WorkloadBuilder::from_resource(loki, &self.options)?;

        let name = loki.metadata.name.as_deref().unwrap_or_default();
        let namespace = loki.metadata.namespace.as_deref().unwrap_or_default();

        let desired = builder
            .with_name(format!("{name}{DRY_RUN_NAME_SUFFIX}"))
            .build()?;
        let dry_run = self.store.dry_run_apply(&desired, namespace).await?;

        let mut dry_run_doc = serde_json::to_value(&dry_run)?;
        let observed_doc = serde_json::to_value(observed)?;
        restore_identity_fields(&mut dry_run_doc, &observed_doc);

        let desired_normalized = self.normalizer.normalize(&dry_run_doc);
        let observed_normalized = self.normalizer.normalize(&observed_doc);

        if desired_normalized == observed_normalized {
            debug!(name, namespace, "Workload converged");
            Ok(Convergence::Converged)
        } else {
            debug!(name, namespace, "Workload diverged");
            Ok(Convergence::Diverged {
                patch: desired_normalized,
            })
        }
    }
}

/// Copy the bookkeeping that differs only because the dry-run object carries
/// a throwaway name: object name, pod-template name, container name and the
/// observed generation.
fn restore_identity_fields(dry_run: &mut Value, observed: &Value) {
    copy_field(dry_run, observed, "/metadata", "name");
    copy_field(dry_run, observed, "/metadata", "generation");
    copy_field(dry_run, observed, "/spec/template/metadata", "name");
    copy_field(
        dry_run,
        observed,
        "/spec/template/spec/containers/0",
        "name",
    );
}

/// Overwrite `parent/key` in `target` with the observed value; an absent
/// observed value removes the key so both sides agree on absence.
fn copy_field(target: &mut Value, observed: &Value, parent: &str, key: &str) {
    let Some(target_parent) = target.pointer_mut(parent).and_then(Value::as_object_mut) else {
        return;
    };

    match observed.pointer(&format!("{parent}/{key}")) {
        Some(value) => {
            target_parent.insert(key.to_string(), value.clone());
        }
        None => {
            target_parent.remove(key);
        }
    }
}
