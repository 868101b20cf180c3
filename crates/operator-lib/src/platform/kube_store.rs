//! Kubernetes-backed platform implementation
//!
//! One `kube::Client` injected at construction; every call classifies its
//! failure into the operator taxonomy so the loop can decide what to retry.

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ConfigMap, ContainerState, Pod};
use kube::api::{ListParams, Patch, PatchParams, PostParams};
use kube::{Api, Client};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::debug;

use super::{async_trait, ObjectStore, RuleStore};
use crate::crd::Loki;
use crate::error::OperatorError;
use crate::models::{ContainerStateKind, ContainerStatusSignal, Ensure};

/// Kubernetes API client for workloads, custom resources and rule storage
#[derive(Clone)]
pub struct KubePlatform {
    client: Client,
}

impl KubePlatform {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn workloads(&self, namespace: &str) -> Api<StatefulSet> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn instances(&self, namespace: &str) -> Api<Loki> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn config_maps(&self, namespace: &str) -> Api<ConfigMap> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// Map a kube failure onto the operator taxonomy
fn classify(err: kube::Error) -> OperatorError {
    match err {
        kube::Error::Api(response) if response.code == 409 => OperatorError::Conflict {
            reason: response.message,
        },
        kube::Error::Api(response) => OperatorError::Materialization {
            reason: format!("{} (HTTP {})", response.message, response.code),
        },
        other => OperatorError::Transport {
            reason: other.to_string(),
        },
    }
}

fn state_kind(state: Option<&ContainerState>) -> ContainerStateKind {
    match state {
        Some(state) if state.waiting.is_some() => ContainerStateKind::Waiting,
        Some(state) if state.running.is_some() => ContainerStateKind::Running,
        Some(state) if state.terminated.is_some() => ContainerStateKind::Terminated,
        _ => ContainerStateKind::Absent,
    }
}

#[async_trait]
impl ObjectStore for KubePlatform {
    async fn get_workload(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<StatefulSet>, OperatorError> {
        self.workloads(namespace)
            .get_opt(name)
            .await
            .map_err(classify)
    }

    async fn dry_run_apply(
        &self,
        workload: &StatefulSet,
        namespace: &str,
    ) -> Result<StatefulSet, OperatorError> {
        let params = PostParams {
            dry_run: true,
            ..Default::default()
        };

        match self.workloads(namespace).create(&params, workload).await {
            Ok(materialized) => Ok(materialized),
            Err(kube::Error::Api(response)) => Err(OperatorError::Materialization {
                reason: format!("{} (HTTP {})", response.message, response.code),
            }),
            Err(other) => Err(OperatorError::Transport {
                reason: other.to_string(),
            }),
        }
    }

    async fn create_workload(
        &self,
        workload: &StatefulSet,
        namespace: &str,
    ) -> Result<StatefulSet, OperatorError> {
        self.workloads(namespace)
            .create(&PostParams::default(), workload)
            .await
            .map_err(classify)
    }

    async fn patch_workload(
        &self,
        name: &str,
        namespace: &str,
        patch: &Value,
    ) -> Result<StatefulSet, OperatorError> {
        self.workloads(namespace)
            .patch(name, &PatchParams::default(), &Patch::Strategic(patch))
            .await
            .map_err(classify)
    }

    async fn list_instances(&self) -> Result<Vec<Loki>, OperatorError> {
        let instances: Api<Loki> = Api::all(self.client.clone());
        let list = instances
            .list(&ListParams::default())
            .await
            .map_err(classify)?;

        debug!(count = list.items.len(), "Listed managed instances");
        Ok(list.items)
    }

    async fn get_instance(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<Loki>, OperatorError> {
        self.instances(namespace)
            .get_opt(name)
            .await
            .map_err(classify)
    }

    async fn patch_instance(
        &self,
        name: &str,
        namespace: &str,
        patch: &Value,
    ) -> Result<Loki, OperatorError> {
        self.instances(namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(patch))
            .await
            .map_err(classify)
    }

    async fn replica_zero_status(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<ContainerStatusSignal>, OperatorError> {
        let pod_name = format!("{name}-0");
        let pod = self
            .pods(namespace)
            .get_opt(&pod_name)
            .await
            .map_err(classify)?;

        let Some(pod) = pod else {
            return Ok(None);
        };

        let signal = pod
            .status
            .as_ref()
            .and_then(|status| status.container_statuses.as_ref())
            .and_then(|statuses| statuses.first())
            .map(|status| {
                ContainerStatusSignal::new(
                    state_kind(status.state.as_ref()),
                    state_kind(status.last_state.as_ref()),
                )
            });

        Ok(signal)
    }
}

#[async_trait]
impl RuleStore for KubePlatform {
    async fn ensure_exists(&self, namespace: &str, name: &str) -> Result<Ensure, OperatorError> {
        let api = self.config_maps(namespace);

        if api.get_opt(name).await.map_err(classify)?.is_some() {
            return Ok(Ensure::AlreadyExists);
        }

        let config_map = ConfigMap {
            metadata: k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            data: Some(BTreeMap::new()),
            ..Default::default()
        };

        api.create(&PostParams::default(), &config_map)
            .await
            .map_err(classify)?;
        Ok(Ensure::Created)
    }

    async fn put_key(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
        value: &str,
    ) -> Result<(), OperatorError> {
        let patch = json!({ "data": { key: value } });

        self.config_maps(namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(classify)?;
        Ok(())
    }
}
