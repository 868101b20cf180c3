//! Operator library for the clustered log store
//!
//! This crate provides the core functionality for:
//! - Projecting `Loki` custom resources into workload descriptors
//! - Normalizing descriptors and detecting drift via dry-run comparison
//! - Crash-triggered memory scaling
//! - The reconciliation loop driving both
//! - Health checks and observability

pub mod convergence;
pub mod crd;
pub mod error;
pub mod health;
pub mod models;
pub mod normalize;
pub mod observability;
pub mod platform;
pub mod reconciler;
pub mod rules;
pub mod scaler;
pub mod workload;

pub use convergence::{Convergence, ConvergenceComparator, DRY_RUN_NAME_SUFFIX};
pub use crd::{LogAlert, LogAlertSpec, Loki, LokiResources, LokiSpec, API_GROUP, API_VERSION};
pub use error::OperatorError;
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::{ContainerStateKind, ContainerStatusSignal, Ensure, ObjectIdentity, ResourceDelta};
pub use normalize::Normalizer;
pub use observability::{OperatorMetrics, StructuredLogger};
pub use platform::{KubePlatform, ObjectStore, RuleStore};
pub use reconciler::{Reconciler, RetryPolicy};
pub use scaler::{ResourceScaler, MEMORY_STEP};
pub use workload::{
    container_resources_patch, DataVolumeMode, ProbeOptions, WorkloadBuilder, WorkloadOptions,
};
