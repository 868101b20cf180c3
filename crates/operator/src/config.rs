//! Operator configuration

use anyhow::Result;
use operator_lib::normalize::Normalizer;
use operator_lib::reconciler::RetryPolicy;
use operator_lib::workload::{DataVolumeMode, ProbeOptions, WorkloadOptions};
use serde::Deserialize;
use std::time::Duration;

/// Operator configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OperatorConfig {
    /// Namespace the operator (and the shared rules ConfigMap) lives in
    #[serde(default = "default_operator_namespace")]
    pub operator_namespace: String,

    /// API server port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// ConfigMap holding the log store's main configuration
    #[serde(default = "default_config_map_name")]
    pub config_map_name: String,

    /// Shared ConfigMap holding the alerting-rule documents
    #[serde(default = "default_rules_config_map")]
    pub rules_config_map: String,

    /// Reconciliation pass interval in seconds
    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval_secs: u64,

    /// Scale-check interval in seconds
    #[serde(default = "default_scale_check_interval")]
    pub scale_check_interval_secs: u64,

    /// Backing mode of the data volume: "ephemeral" or "persistent"
    #[serde(default = "default_data_volume")]
    pub data_volume: String,

    /// Attach liveness/readiness probes to the workload container
    #[serde(default)]
    pub probes_enabled: bool,

    /// Comma-separated markers of platform-injected template annotations
    #[serde(default = "default_annotation_markers")]
    pub platform_annotation_markers: String,

    /// Bounded retry attempts for transport failures
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,

    /// Initial transport backoff in seconds
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_secs: u64,

    /// Backoff ceiling in seconds
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,
}

fn default_operator_namespace() -> String {
    "loki-operator".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_config_map_name() -> String {
    "loki-config".to_string()
}

fn default_rules_config_map() -> String {
    "logs-alert".to_string()
}

fn default_reconcile_interval() -> u64 {
    10
}

fn default_scale_check_interval() -> u64 {
    30
}

fn default_data_volume() -> String {
    "ephemeral".to_string()
}

fn default_annotation_markers() -> String {
    "cattle".to_string()
}

fn default_max_retry_attempts() -> u32 {
    3
}

fn default_initial_backoff() -> u64 {
    1
}

fn default_max_backoff() -> u64 {
    30
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            operator_namespace: default_operator_namespace(),
            api_port: default_api_port(),
            config_map_name: default_config_map_name(),
            rules_config_map: default_rules_config_map(),
            reconcile_interval_secs: default_reconcile_interval(),
            scale_check_interval_secs: default_scale_check_interval(),
            data_volume: default_data_volume(),
            probes_enabled: false,
            platform_annotation_markers: default_annotation_markers(),
            max_retry_attempts: default_max_retry_attempts(),
            initial_backoff_secs: default_initial_backoff(),
            max_backoff_secs: default_max_backoff(),
        }
    }
}

impl OperatorConfig {
    /// Load configuration from environment overrides
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("OPERATOR"))
            .build()?;

        Ok(config.try_deserialize().unwrap_or_default())
    }

    /// Structural knobs handed to the workload builder
    pub fn workload_options(&self) -> Result<WorkloadOptions> {
        let data_volume: DataVolumeMode =
            self.data_volume.parse().map_err(anyhow::Error::msg)?;

        Ok(WorkloadOptions {
            data_volume,
            config_map_name: self.config_map_name.clone(),
            rules_config_map: self.rules_config_map.clone(),
            probes: self.probes_enabled.then(ProbeOptions::default),
        })
    }

    /// Normalizer configured with the platform-annotation markers
    pub fn normalizer(&self) -> Normalizer {
        let markers = self
            .platform_annotation_markers
            .split(',')
            .map(str::trim)
            .filter(|marker| !marker.is_empty())
            .map(String::from)
            .collect();
        Normalizer::new(markers)
    }

    /// Retry policy for transport failures
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retry_attempts,
            initial_backoff: Duration::from_secs(self.initial_backoff_secs),
            max_backoff: Duration::from_secs(self.max_backoff_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = OperatorConfig::default();
        assert_eq!(config.operator_namespace, "loki-operator");
        assert_eq!(config.rules_config_map, "logs-alert");
        assert_eq!(config.reconcile_interval_secs, 10);
        assert_eq!(config.scale_check_interval_secs, 30);
        assert!(!config.probes_enabled);
    }

    #[test]
    fn test_default_workload_options_are_ephemeral() {
        let options = OperatorConfig::default().workload_options().unwrap();
        assert_eq!(options.data_volume, DataVolumeMode::Ephemeral);
        assert!(options.probes.is_none());
    }

    #[test]
    fn test_persistent_data_volume_parses() {
        let config = OperatorConfig {
            data_volume: "persistent".to_string(),
            ..Default::default()
        };
        let options = config.workload_options().unwrap();
        assert_eq!(options.data_volume, DataVolumeMode::PersistentClaim);
    }

    #[test]
    fn test_unknown_data_volume_is_rejected() {
        let config = OperatorConfig {
            data_volume: "hostpath".to_string(),
            ..Default::default()
        };
        assert!(config.workload_options().is_err());
    }

    #[test]
    fn test_annotation_markers_split_and_trim() {
        let config = OperatorConfig {
            platform_annotation_markers: "cattle, fleet ,".to_string(),
            ..Default::default()
        };
        // The normalizer drops annotations matching either marker
        let normalizer = config.normalizer();
        let doc = serde_json::json!({
            "spec": {"template": {"metadata": {"annotations": {
                "fleet.example.com/agent": "true",
                "team": "observability"
            }}}}
        });
        let normalized = normalizer.normalize(&doc);
        let annotations = normalized
            .pointer("/spec/template/metadata/annotations")
            .unwrap();
        assert!(annotations.get("fleet.example.com/agent").is_none());
        assert!(annotations.get("team").is_some());
    }
}
