//! Alerting-rule document rendering
//!
//! `LogAlert` resources are persisted into the shared rules ConfigMap as
//! YAML documents, one key per alert, named `<alert>.yaml`. The workload
//! mounts that map at the rules path and picks the documents up from there.

use crate::crd::LogAlertSpec;
use crate::error::OperatorError;

/// ConfigMap key under which an alert's document is stored
pub fn rule_key(alert_name: &str) -> String {
    format!("{alert_name}.yaml")
}

/// Render the alert document as YAML
pub fn render_rule_document(spec: &LogAlertSpec) -> Result<String, OperatorError> {
    Ok(serde_yaml::to_string(&spec.document)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_key_convention() {
        assert_eq!(rule_key("high-error-rate"), "high-error-rate.yaml");
    }

    #[test]
    fn test_document_renders_as_yaml() {
        let spec = LogAlertSpec {
            document: BTreeMap::from([
                (
                    "groups".to_string(),
                    serde_json::json!([{"name": "errors", "rules": []}]),
                ),
                ("interval".to_string(), serde_json::json!("1m")),
            ]),
        };

        let rendered = render_rule_document(&spec).unwrap();
        assert!(rendered.contains("groups:"));
        assert!(rendered.contains("interval: 1m"));
    }

    #[test]
    fn test_rendering_is_deterministic() {
        let spec = LogAlertSpec {
            document: BTreeMap::from([("interval".to_string(), serde_json::json!("1m"))]),
        };

        assert_eq!(
            render_rule_document(&spec).unwrap(),
            render_rule_document(&spec).unwrap()
        );
    }
}
