//! Workload descriptor construction
//!
//! Projects a `Loki` custom resource into the StatefulSet the platform
//! actually runs. Pure: no client, no I/O, deterministic for a fixed input.

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, ContainerPort, EmptyDirVolumeSource, HTTPGetAction,
    PersistentVolumeClaim, PersistentVolumeClaimSpec, PodSpec, PodTemplateSpec, Probe,
    ResourceRequirements, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use std::collections::BTreeMap;

use crate::crd::{Loki, LokiResources, LokiSpec, API_GROUP, API_VERSION};
use crate::error::OperatorError;

/// Fixed container port of the log store
pub const CONTAINER_PORT: i32 = 3100;

/// Name of the fixed container port
pub const PORT_NAME: &str = "http-metrics";

/// Mount path of the main configuration volume
pub const CONFIG_MOUNT_PATH: &str = "/etc/loki";

/// Mount path of the alerting-rules volume
pub const RULES_MOUNT_PATH: &str = "/etc/loki/rules";

/// Mount path of the working-directory volume
pub const DATA_MOUNT_PATH: &str = "/data";

/// Backing mode of the `data` volume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataVolumeMode {
    /// Node-local scratch space, lost on rescheduling
    #[default]
    Ephemeral,
    /// A volume claim template sized from `spec.storage`
    PersistentClaim,
}

impl std::str::FromStr for DataVolumeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ephemeral" => Ok(DataVolumeMode::Ephemeral),
            "persistent" => Ok(DataVolumeMode::PersistentClaim),
            other => Err(format!("unknown data volume mode: {other}")),
        }
    }
}

/// Liveness/readiness probe settings, applied only when configured
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOptions {
    pub initial_delay_seconds: i32,
    pub timeout_seconds: i32,
    pub period_seconds: i32,
    pub success_threshold: i32,
    pub failure_threshold: i32,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self {
            initial_delay_seconds: 45,
            timeout_seconds: 1,
            period_seconds: 10,
            success_threshold: 1,
            failure_threshold: 3,
        }
    }
}

impl ProbeOptions {
    /// HTTP readiness check against the log store's `/ready` endpoint
    fn http_ready_probe(&self) -> Probe {
        Probe {
            initial_delay_seconds: Some(self.initial_delay_seconds),
            timeout_seconds: Some(self.timeout_seconds),
            period_seconds: Some(self.period_seconds),
            success_threshold: Some(self.success_threshold),
            failure_threshold: Some(self.failure_threshold),
            http_get: Some(HTTPGetAction {
                path: Some("/ready".to_string()),
                port: IntOrString::Int(CONTAINER_PORT),
                scheme: Some("HTTP".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

/// Structural knobs of the generated workload
///
/// Everything here is operator deployment configuration, never taken from
/// the custom resource.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkloadOptions {
    pub data_volume: DataVolumeMode,
    /// ConfigMap mounted at [`CONFIG_MOUNT_PATH`]
    pub config_map_name: String,
    /// Shared alerting-rules ConfigMap mounted at [`RULES_MOUNT_PATH`]
    pub rules_config_map: String,
    pub probes: Option<ProbeOptions>,
}

impl Default for WorkloadOptions {
    fn default() -> Self {
        Self {
            data_volume: DataVolumeMode::Ephemeral,
            config_map_name: "loki-config".to_string(),
            rules_config_map: "logs-alert".to_string(),
            probes: None,
        }
    }
}

/// Builds the desired StatefulSet for one `Loki` instance
#[derive(Debug, Clone)]
pub struct WorkloadBuilder<'a> {
    /// Workload object name; may carry the dry-run suffix
    name: String,
    namespace: String,
    /// Name of the owning custom resource, independent of `name`
    owner_name: String,
    owner_uid: String,
    labels: BTreeMap<String, String>,
    spec: &'a LokiSpec,
    options: &'a WorkloadOptions,
}

impl<'a> WorkloadBuilder<'a> {
    /// Capture identity, labels and spec from the custom resource
    pub fn from_resource(
        loki: &'a Loki,
        options: &'a WorkloadOptions,
    ) -> Result<Self, OperatorError> {
        let name = loki
            .metadata
            .name
            .clone()
            .ok_or_else(|| OperatorError::invalid_spec("<unnamed>", "missing metadata.name"))?;
        let namespace = loki.metadata.namespace.clone().ok_or_else(|| {
            OperatorError::invalid_spec(name.clone(), "missing metadata.namespace")
        })?;
        let owner_uid = loki.metadata.uid.clone().ok_or_else(|| {
            OperatorError::invalid_spec(format!("{namespace}/{name}"), "missing metadata.uid")
        })?;
        let labels = loki.metadata.labels.clone().unwrap_or_default();

        Ok(Self {
            owner_name: name.clone(),
            name,
            namespace,
            owner_uid,
            labels,
            spec: &loki.spec,
            options,
        })
    }

    /// Override the workload object name (used for dry-run materialization)
    ///
    /// The owner reference keeps pointing at the original custom resource.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Produce the StatefulSet descriptor
    pub fn build(&self) -> Result<StatefulSet, OperatorError> {
        let identity = format!("{}/{}", self.namespace, self.owner_name);
        if self.spec.image.trim().is_empty() {
            return Err(OperatorError::invalid_spec(identity, "image must not be empty"));
        }
        if self.spec.replicas < 0 {
            return Err(OperatorError::invalid_spec(
                identity,
                format!("replicas must be non-negative, got {}", self.spec.replicas),
            ));
        }

        Ok(StatefulSet {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                namespace: Some(self.namespace.clone()),
                labels: Some(self.labels.clone()),
                owner_references: Some(vec![self.owner_reference()]),
                ..Default::default()
            },
            spec: Some(StatefulSetSpec {
                // Stable across dry-run materializations, which rename the object
                service_name: self.owner_name.clone(),
                replicas: Some(self.spec.replicas),
                selector: LabelSelector {
                    match_labels: Some(self.labels.clone()),
                    ..Default::default()
                },
                template: self.pod_template(),
                volume_claim_templates: self.claim_templates(),
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    fn owner_reference(&self) -> OwnerReference {
        OwnerReference {
            api_version: format!("{API_GROUP}/{API_VERSION}"),
            kind: "Loki".to_string(),
            name: self.owner_name.clone(),
            uid: self.owner_uid.clone(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }

    fn resources(&self) -> ResourceRequirements {
        ResourceRequirements {
            limits: Some(quantities(&self.spec.resources.limits)),
            requests: Some(quantities(&self.spec.resources.requests)),
            ..Default::default()
        }
    }

    fn ports(&self) -> Vec<ContainerPort> {
        vec![ContainerPort {
            container_port: CONTAINER_PORT,
            name: Some(PORT_NAME.to_string()),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]
    }

    fn container(&self) -> Container {
        Container {
            name: self.name.clone(),
            image: Some(self.spec.image.clone()),
            image_pull_policy: Some("IfNotPresent".to_string()),
            resources: Some(self.resources()),
            ports: Some(self.ports()),
            liveness_probe: self.options.probes.as_ref().map(ProbeOptions::http_ready_probe),
            readiness_probe: self.options.probes.as_ref().map(ProbeOptions::http_ready_probe),
            volume_mounts: Some(vec![
                VolumeMount {
                    mount_path: CONFIG_MOUNT_PATH.to_string(),
                    name: "config".to_string(),
                    ..Default::default()
                },
                VolumeMount {
                    mount_path: RULES_MOUNT_PATH.to_string(),
                    name: "rules".to_string(),
                    ..Default::default()
                },
                VolumeMount {
                    mount_path: DATA_MOUNT_PATH.to_string(),
                    name: "data".to_string(),
                    ..Default::default()
                },
            ]),
            ..Default::default()
        }
    }

    fn volumes(&self) -> Vec<Volume> {
        let mut volumes = vec![
            Volume {
                name: "config".to_string(),
                config_map: Some(ConfigMapVolumeSource {
                    name: Some(self.options.config_map_name.clone()),
                    default_mode: Some(420),
                    ..Default::default()
                }),
                ..Default::default()
            },
            Volume {
                name: "rules".to_string(),
                config_map: Some(ConfigMapVolumeSource {
                    name: Some(self.options.rules_config_map.clone()),
                    default_mode: Some(420),
                    ..Default::default()
                }),
                ..Default::default()
            },
        ];

        // A claim-backed data volume comes from the claim template instead
        if self.options.data_volume == DataVolumeMode::Ephemeral {
            volumes.push(Volume {
                name: "data".to_string(),
                empty_dir: Some(EmptyDirVolumeSource::default()),
                ..Default::default()
            });
        }

        volumes
    }

    fn pod_template(&self) -> PodTemplateSpec {
        PodTemplateSpec {
            metadata: Some(ObjectMeta {
                name: Some(self.name.clone()),
                namespace: Some(self.namespace.clone()),
                labels: Some(self.labels.clone()),
                ..Default::default()
            }),
            spec: Some(PodSpec {
                containers: vec![self.container()],
                volumes: Some(self.volumes()),
                ..Default::default()
            }),
        }
    }

    fn claim_templates(&self) -> Option<Vec<PersistentVolumeClaim>> {
        if self.options.data_volume != DataVolumeMode::PersistentClaim {
            return None;
        }

        Some(vec![PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some("data".to_string()),
                ..Default::default()
            },
            spec: Some(PersistentVolumeClaimSpec {
                access_modes: Some(vec!["ReadWriteOnce".to_string()]),
                resources: Some(ResourceRequirements {
                    requests: Some(BTreeMap::from([(
                        "storage".to_string(),
                        Quantity(self.spec.storage.clone()),
                    )])),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }])
    }
}

/// Strategic-merge patch updating the container's resource requirements
///
/// The container is addressed by name inside the pod template, so the patch
/// touches nothing else.
pub fn container_resources_patch(
    container_name: &str,
    resources: &LokiResources,
) -> serde_json::Value {
    serde_json::json!({
        "spec": {
            "template": {
                "spec": {
                    "containers": [{
                        "name": container_name,
                        "resources": {
                            "limits": resources.limits,
                            "requests": resources.requests,
                        }
                    }]
                }
            }
        }
    })
}

fn quantities(map: &BTreeMap<String, String>) -> BTreeMap<String, Quantity> {
    map.iter()
        .map(|(k, v)| (k.clone(), Quantity(v.clone())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_loki() -> Loki {
        let mut loki = Loki::new(
            "logs",
            LokiSpec {
                image: "loki:2.6".to_string(),
                resources: LokiResources {
                    limits: BTreeMap::from([("memory".to_string(), "1Gi".to_string())]),
                    requests: BTreeMap::from([("memory".to_string(), "512Mi".to_string())]),
                },
                storage: "10Gi".to_string(),
                replicas: 1,
            },
        );
        loki.metadata.namespace = Some("ns1".to_string());
        loki.metadata.uid = Some("abc-123".to_string());
        loki.metadata.labels = Some(BTreeMap::from([(
            "app".to_string(),
            "logs".to_string(),
        )]));
        loki
    }

    #[test]
    fn test_build_is_deterministic() {
        let loki = sample_loki();
        let options = WorkloadOptions::default();

        let first = WorkloadBuilder::from_resource(&loki, &options)
            .unwrap()
            .build()
            .unwrap();
        let second = WorkloadBuilder::from_resource(&loki, &options)
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn test_create_scenario_shape() {
        let loki = sample_loki();
        let options = WorkloadOptions::default();
        let sts = WorkloadBuilder::from_resource(&loki, &options)
            .unwrap()
            .build()
            .unwrap();

        let spec = sts.spec.as_ref().unwrap();
        let pod = spec.template.spec.as_ref().unwrap();
        assert_eq!(pod.containers.len(), 1);

        let container = &pod.containers[0];
        assert_eq!(container.name, "logs");
        assert_eq!(container.image.as_deref(), Some("loki:2.6"));

        let port = &container.ports.as_ref().unwrap()[0];
        assert_eq!(port.container_port, 3100);
        assert_eq!(port.name.as_deref(), Some("http-metrics"));

        let mount_names: Vec<_> = container
            .volume_mounts
            .as_ref()
            .unwrap()
            .iter()
            .map(|m| m.name.as_str())
            .collect();
        assert_eq!(mount_names, vec!["config", "rules", "data"]);

        let owner = &sts.metadata.owner_references.as_ref().unwrap()[0];
        assert_eq!(owner.uid, "abc-123");
        assert_eq!(owner.controller, Some(true));
    }

    #[test]
    fn test_selector_template_and_object_labels_match() {
        let loki = sample_loki();
        let options = WorkloadOptions::default();
        let sts = WorkloadBuilder::from_resource(&loki, &options)
            .unwrap()
            .build()
            .unwrap();

        let spec = sts.spec.as_ref().unwrap();
        let labels = sts.metadata.labels.as_ref().unwrap();
        assert_eq!(spec.selector.match_labels.as_ref().unwrap(), labels);
        assert_eq!(
            spec.template
                .metadata
                .as_ref()
                .unwrap()
                .labels
                .as_ref()
                .unwrap(),
            labels
        );
    }

    #[test]
    fn test_empty_image_is_rejected() {
        let mut loki = sample_loki();
        loki.spec.image = "  ".to_string();
        let options = WorkloadOptions::default();

        let err = WorkloadBuilder::from_resource(&loki, &options)
            .unwrap()
            .build()
            .unwrap_err();
        assert!(matches!(err, OperatorError::InvalidSpec { .. }));
    }

    #[test]
    fn test_negative_replicas_are_rejected() {
        let mut loki = sample_loki();
        loki.spec.replicas = -1;
        let options = WorkloadOptions::default();

        let err = WorkloadBuilder::from_resource(&loki, &options)
            .unwrap()
            .build()
            .unwrap_err();
        assert!(matches!(err, OperatorError::InvalidSpec { .. }));
    }

    #[test]
    fn test_ephemeral_mode_uses_an_empty_dir_volume() {
        let loki = sample_loki();
        let options = WorkloadOptions::default();
        let sts = WorkloadBuilder::from_resource(&loki, &options)
            .unwrap()
            .build()
            .unwrap();

        let spec = sts.spec.as_ref().unwrap();
        assert!(spec.volume_claim_templates.is_none());

        let volumes = spec.template.spec.as_ref().unwrap().volumes.as_ref().unwrap();
        let data = volumes.iter().find(|v| v.name == "data").unwrap();
        assert!(data.empty_dir.is_some());
    }

    #[test]
    fn test_persistent_mode_builds_a_claim_template() {
        let loki = sample_loki();
        let options = WorkloadOptions {
            data_volume: DataVolumeMode::PersistentClaim,
            ..Default::default()
        };
        let sts = WorkloadBuilder::from_resource(&loki, &options)
            .unwrap()
            .build()
            .unwrap();

        let spec = sts.spec.as_ref().unwrap();
        let claims = spec.volume_claim_templates.as_ref().unwrap();
        assert_eq!(claims.len(), 1);
        assert_eq!(claims[0].metadata.name.as_deref(), Some("data"));

        let requests = claims[0]
            .spec
            .as_ref()
            .unwrap()
            .resources
            .as_ref()
            .unwrap()
            .requests
            .as_ref()
            .unwrap();
        assert_eq!(requests["storage"], Quantity("10Gi".to_string()));

        // No emptyDir data volume alongside the claim
        let volumes = spec.template.spec.as_ref().unwrap().volumes.as_ref().unwrap();
        assert!(volumes.iter().all(|v| v.name != "data"));
    }

    #[test]
    fn test_probes_attach_only_when_configured() {
        let loki = sample_loki();

        let without = WorkloadBuilder::from_resource(&loki, &WorkloadOptions::default())
            .unwrap()
            .build()
            .unwrap();
        let container = &without.spec.as_ref().unwrap().template.spec.as_ref().unwrap().containers[0];
        assert!(container.liveness_probe.is_none());
        assert!(container.readiness_probe.is_none());

        let options = WorkloadOptions {
            probes: Some(ProbeOptions::default()),
            ..Default::default()
        };
        let with = WorkloadBuilder::from_resource(&loki, &options)
            .unwrap()
            .build()
            .unwrap();
        let container = &with.spec.as_ref().unwrap().template.spec.as_ref().unwrap().containers[0];
        let probe = container.readiness_probe.as_ref().unwrap();
        assert_eq!(probe.initial_delay_seconds, Some(45));
        assert_eq!(
            probe.http_get.as_ref().unwrap().port,
            IntOrString::Int(3100)
        );
    }

    #[test]
    fn test_dry_run_name_keeps_the_owner_reference() {
        let loki = sample_loki();
        let options = WorkloadOptions::default();
        let sts = WorkloadBuilder::from_resource(&loki, &options)
            .unwrap()
            .with_name("logs-new")
            .build()
            .unwrap();

        assert_eq!(sts.metadata.name.as_deref(), Some("logs-new"));
        let owner = &sts.metadata.owner_references.as_ref().unwrap()[0];
        assert_eq!(owner.name, "logs");
        assert_eq!(owner.uid, "abc-123");
        assert_eq!(sts.spec.as_ref().unwrap().service_name, "logs");
    }

    #[test]
    fn test_resources_patch_addresses_the_container_by_name() {
        let resources = LokiResources {
            limits: BTreeMap::from([("memory".to_string(), "2Gi".to_string())]),
            requests: BTreeMap::new(),
        };

        let patch = container_resources_patch("logs", &resources);
        let container = &patch["spec"]["template"]["spec"]["containers"][0];
        assert_eq!(container["name"], "logs");
        assert_eq!(container["resources"]["limits"]["memory"], "2Gi");
    }
}
