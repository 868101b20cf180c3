//! Crash-triggered memory scaling
//!
//! Watches the replica-0 container status for the stuck-retrying-after-kill
//! signature (current `waiting`, last `terminated`) and proposes a bumped
//! memory limit. Stateless by design: no bump history and no upper bound are
//! tracked, which is a known limitation of the heuristic.

use crate::crd::LokiResources;
use crate::models::{ContainerStateKind, ContainerStatusSignal, ResourceDelta};

/// Fixed increment applied to the memory magnitude, in the quantity's own unit
pub const MEMORY_STEP: i64 = 3;

/// Quantity units the scaler understands; anything else yields no action
pub const SUPPORTED_UNITS: [&str; 2] = ["Mi", "Gi"];

/// Computes memory increments from observed container restarts
#[derive(Debug, Clone)]
pub struct ResourceScaler {
    pub memory_step: i64,
}

impl Default for ResourceScaler {
    fn default() -> Self {
        Self {
            memory_step: MEMORY_STEP,
        }
    }
}

impl ResourceScaler {
    /// Create a scaler with a custom step
    pub fn new(memory_step: i64) -> Self {
        Self { memory_step }
    }

    /// Decide whether to grow memory for the observed signal
    ///
    /// Returns the proposed delta, or `None` when the trigger condition is
    /// not met, no memory limit is set, or the quantity uses an unsupported
    /// unit. The caller applies the delta; the scaler never does.
    pub fn scale_decision(
        &self,
        signal: &ContainerStatusSignal,
        resources: &LokiResources,
    ) -> Option<ResourceDelta> {
        if !is_crash_retry(signal) {
            return None;
        }

        let memory = resources.limits.get("memory")?;
        let bumped = self.bump_quantity(memory)?;

        let mut resources = resources.clone();
        resources.limits.insert("memory".to_string(), bumped);

        Some(ResourceDelta { resources })
    }

    /// Increment the magnitude of a `Mi`/`Gi` quantity string
    fn bump_quantity(&self, quantity: &str) -> Option<String> {
        for unit in SUPPORTED_UNITS {
            if let Some(magnitude) = quantity.strip_suffix(unit) {
                let value: i64 = magnitude.parse().ok()?;
                return Some(format!("{}{}", value + self.memory_step, unit));
            }
        }
        None
    }
}

/// The canonical out-of-memory-kill signature: the container is stuck
/// retrying after being killed.
fn is_crash_retry(signal: &ContainerStatusSignal) -> bool {
    signal.current == ContainerStateKind::Waiting && signal.last == ContainerStateKind::Terminated
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn resources(memory_limit: &str) -> LokiResources {
        LokiResources {
            limits: BTreeMap::from([
                ("memory".to_string(), memory_limit.to_string()),
                ("cpu".to_string(), "2".to_string()),
            ]),
            requests: BTreeMap::from([("memory".to_string(), "256Mi".to_string())]),
        }
    }

    fn crash_signal() -> ContainerStatusSignal {
        ContainerStatusSignal::new(ContainerStateKind::Waiting, ContainerStateKind::Terminated)
    }

    #[test]
    fn test_crash_retry_bumps_mebibytes() {
        let delta = ResourceScaler::default()
            .scale_decision(&crash_signal(), &resources("512Mi"))
            .unwrap();
        assert_eq!(delta.resources.limits["memory"], "515Mi");
    }

    #[test]
    fn test_crash_retry_bumps_gibibytes() {
        let delta = ResourceScaler::default()
            .scale_decision(&crash_signal(), &resources("1Gi"))
            .unwrap();
        assert_eq!(delta.resources.limits["memory"], "4Gi");
    }

    #[test]
    fn test_other_dimensions_pass_through_unchanged() {
        let delta = ResourceScaler::default()
            .scale_decision(&crash_signal(), &resources("512Mi"))
            .unwrap();
        assert_eq!(delta.resources.limits["cpu"], "2");
        assert_eq!(delta.resources.requests["memory"], "256Mi");
    }

    #[test]
    fn test_running_container_yields_no_action() {
        let signal = ContainerStatusSignal::new(
            ContainerStateKind::Running,
            ContainerStateKind::Terminated,
        );
        assert!(ResourceScaler::default()
            .scale_decision(&signal, &resources("512Mi"))
            .is_none());
    }

    #[test]
    fn test_waiting_without_prior_termination_yields_no_action() {
        let signal =
            ContainerStatusSignal::new(ContainerStateKind::Waiting, ContainerStateKind::Absent);
        assert!(ResourceScaler::default()
            .scale_decision(&signal, &resources("512Mi"))
            .is_none());
    }

    #[test]
    fn test_unsupported_unit_yields_no_action() {
        assert!(ResourceScaler::default()
            .scale_decision(&crash_signal(), &resources("2048Ki"))
            .is_none());
    }

    #[test]
    fn test_unsuffixed_quantity_yields_no_action() {
        assert!(ResourceScaler::default()
            .scale_decision(&crash_signal(), &resources("536870912"))
            .is_none());
    }

    #[test]
    fn test_unparsable_magnitude_yields_no_action() {
        assert!(ResourceScaler::default()
            .scale_decision(&crash_signal(), &resources("halfMi"))
            .is_none());
    }

    #[test]
    fn test_missing_memory_limit_yields_no_action() {
        let resources = LokiResources {
            limits: BTreeMap::from([("cpu".to_string(), "2".to_string())]),
            requests: BTreeMap::new(),
        };
        assert!(ResourceScaler::default()
            .scale_decision(&crash_signal(), &resources)
            .is_none());
    }

    #[test]
    fn test_custom_step() {
        let delta = ResourceScaler::new(128)
            .scale_decision(&crash_signal(), &resources("512Mi"))
            .unwrap();
        assert_eq!(delta.resources.limits["memory"], "640Mi");
    }
}
