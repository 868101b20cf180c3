//! Core data models shared across the engine

use serde::{Deserialize, Serialize};

use crate::crd::LokiResources;

/// Stable identity of a managed instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectIdentity {
    pub name: String,
    pub namespace: String,
}

impl ObjectIdentity {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }
}

impl std::fmt::Display for ObjectIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Coarse container state as reported by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStateKind {
    Waiting,
    Running,
    Terminated,
    /// No recorded state (e.g. a container that never restarted)
    Absent,
}

/// Runtime status of the workload's replica-0 container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerStatusSignal {
    pub current: ContainerStateKind,
    pub last: ContainerStateKind,
}

impl ContainerStatusSignal {
    pub fn new(current: ContainerStateKind, last: ContainerStateKind) -> Self {
        Self { current, last }
    }
}

/// Proposed resource change computed by the scaler
///
/// Carries the full resources block with `limits.memory` bumped and every
/// other dimension copied through unmodified. Applied by the loop as a merge
/// patch on the custom resource, never by the scaler itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDelta {
    pub resources: LokiResources,
}

impl ResourceDelta {
    /// Render the delta as a merge patch for the custom resource
    pub fn to_patch(&self) -> serde_json::Value {
        serde_json::json!({ "spec": { "resources": self.resources } })
    }
}

/// Outcome of an idempotent ensure-exists call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ensure {
    Created,
    AlreadyExists,
}
