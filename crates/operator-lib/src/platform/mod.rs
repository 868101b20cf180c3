//! Platform boundary
//!
//! The engine talks to the cluster exclusively through these traits. Pure
//! components (builder, normalizer, scaler) never see a client; the
//! reconciliation loop and comparator receive an implementation at
//! construction.

mod kube_store;

pub use kube_store::KubePlatform;

use k8s_openapi::api::apps::v1::StatefulSet;
use serde_json::Value;

use crate::crd::Loki;
use crate::error::OperatorError;
use crate::models::{ContainerStatusSignal, Ensure};

pub use async_trait::async_trait;

/// Workload and custom-resource store
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch the live workload, if any
    async fn get_workload(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<StatefulSet>, OperatorError>;

    /// Materialize a descriptor without persisting it
    ///
    /// The platform computes and returns the object as it would look after
    /// defaulting. Rejections surface as `Materialization`.
    async fn dry_run_apply(
        &self,
        workload: &StatefulSet,
        namespace: &str,
    ) -> Result<StatefulSet, OperatorError>;

    /// Submit a workload creation
    async fn create_workload(
        &self,
        workload: &StatefulSet,
        namespace: &str,
    ) -> Result<StatefulSet, OperatorError>;

    /// Patch the live workload with a descriptor fragment
    async fn patch_workload(
        &self,
        name: &str,
        namespace: &str,
        patch: &Value,
    ) -> Result<StatefulSet, OperatorError>;

    /// List every managed custom-resource instance, across namespaces
    async fn list_instances(&self) -> Result<Vec<Loki>, OperatorError>;

    /// Fetch one custom-resource instance
    async fn get_instance(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<Loki>, OperatorError>;

    /// Merge-patch a custom-resource instance
    async fn patch_instance(
        &self,
        name: &str,
        namespace: &str,
        patch: &Value,
    ) -> Result<Loki, OperatorError>;

    /// Freshest container status of the workload's replica-0 pod
    async fn replica_zero_status(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<ContainerStatusSignal>, OperatorError>;
}

/// Shared ConfigMap collaborator for alerting-rule documents
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// Create the ConfigMap if absent; no-op otherwise
    async fn ensure_exists(&self, namespace: &str, name: &str) -> Result<Ensure, OperatorError>;

    /// Store one rendered rule document under the given key
    async fn put_key(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
        value: &str,
    ) -> Result<(), OperatorError>;
}
