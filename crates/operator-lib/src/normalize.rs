//! Descriptor normalization
//!
//! Strips the server-injected and ephemeral fields from a rendered workload
//! descriptor so equality measures user-controllable intent only. Pure and
//! total: missing fields are no-ops and the input document is never mutated.

use serde_json::Value;

/// Metadata fields assigned by the platform, never part of desired intent
pub const STRIPPED_METADATA_FIELDS: [&str; 5] = [
    "creationTimestamp",
    "selfLink",
    "uid",
    "resourceVersion",
    "managedFields",
];

/// Scrubs non-semantic fields from descriptor documents
///
/// Pod-template annotations whose key contains one of the platform markers
/// are injected by cluster tooling and removed before comparison.
#[derive(Debug, Clone)]
pub struct Normalizer {
    markers: Vec<String>,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self {
            markers: vec!["cattle".to_string()],
        }
    }
}

impl Normalizer {
    /// Create a normalizer with a custom platform-annotation marker list
    pub fn new(markers: Vec<String>) -> Self {
        Self { markers }
    }

    /// Return the normalized form of a descriptor document
    pub fn normalize(&self, descriptor: &Value) -> Value {
        let mut doc = descriptor.clone();

        if let Some(metadata) = doc.get_mut("metadata").and_then(Value::as_object_mut) {
            for field in STRIPPED_METADATA_FIELDS {
                metadata.remove(field);
            }
        }

        self.strip_template_annotations(&mut doc);
        strip_empty_security_context(&mut doc);

        if let Some(root) = doc.as_object_mut() {
            root.remove("status");
        }

        doc
    }

    /// Remove platform-injected template annotations; an annotation map left
    /// (or found) empty is removed entirely, so "absent" and "emptied" compare
    /// as identical.
    fn strip_template_annotations(&self, doc: &mut Value) {
        let Some(template_metadata) = doc
            .pointer_mut("/spec/template/metadata")
            .and_then(Value::as_object_mut)
        else {
            return;
        };

        let emptied = match template_metadata
            .get_mut("annotations")
            .and_then(Value::as_object_mut)
        {
            Some(annotations) => {
                annotations
                    .retain(|key, _| !self.markers.iter().any(|marker| key.contains(marker)));
                annotations.is_empty()
            }
            None => return,
        };

        if emptied {
            template_metadata.remove("annotations");
        }
    }
}

/// A security context whose `capabilities` is present but empty carries no
/// intent; the platform defaults the whole sub-object.
fn strip_empty_security_context(doc: &mut Value) {
    let Some(containers) = doc
        .pointer_mut("/spec/template/spec/containers")
        .and_then(Value::as_array_mut)
    else {
        return;
    };

    for container in containers {
        let Some(container) = container.as_object_mut() else {
            continue;
        };

        let empty_capabilities = container
            .get("securityContext")
            .and_then(|sc| sc.get("capabilities"))
            .map(is_empty_value)
            .unwrap_or(false);

        if empty_capabilities {
            container.remove("securityContext");
        }
    }
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}
