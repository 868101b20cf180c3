//! Custom resource definitions managed by the operator
//!
//! The field names and group/version are the persisted contract of existing
//! `Loki` and `LogAlert` instances and must not change shape.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// API group shared by all resources the operator owns
pub const API_GROUP: &str = "jack.experts";

/// API version of the managed resources
pub const API_VERSION: &str = "v1";

/// Declarative intent for one clustered log store
#[derive(Clone, Debug, PartialEq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "jack.experts",
    version = "v1",
    kind = "Loki",
    plural = "lokis",
    namespaced
)]
pub struct LokiSpec {
    /// Container image reference
    pub image: String,
    /// Resource requirements copied verbatim into the workload container
    pub resources: LokiResources,
    /// Capacity request for the data volume when a claim template is used
    pub storage: String,
    /// Desired replica count
    pub replicas: i32,
}

/// Pass-through resource requirements
///
/// Quantity strings are not validated here; the platform apply step is the
/// authority on quantity syntax. Missing keys are tolerated on both sides.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct LokiResources {
    #[serde(default)]
    pub limits: BTreeMap<String, String>,
    #[serde(default)]
    pub requests: BTreeMap<String, String>,
}

/// One alerting-rule document, persisted into the shared rules ConfigMap
#[derive(Clone, Debug, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "jack.experts",
    version = "v1",
    kind = "LogAlert",
    plural = "logalerts",
    namespaced
)]
pub struct LogAlertSpec {
    /// The rule document, stored as-is
    #[serde(flatten)]
    pub document: BTreeMap<String, serde_json::Value>,
}
