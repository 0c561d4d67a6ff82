//! Edge representation in the artifact graph

use super::node::{Attributes, NodeRef, PropertyValue};
use serde::{Deserialize, Serialize};

/// Relationship labels the parser emits.
pub mod relationship {
    pub const ATTESTATION_FOR: &str = "ATTESTATION_FOR";
    pub const HAS_ARTIFACT: &str = "HAS_ARTIFACT";
    pub const DESCRIBES: &str = "DESCRIBES";
    pub const AFFECTS: &str = "AFFECTS";
}

/// A directed edge between two node references
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuacEdge {
    /// Relationship type (e.g., "ATTESTATION_FOR")
    pub label: String,
    /// Source node
    pub source: NodeRef,
    /// Target node
    pub target: NodeRef,
    /// Additional attributes
    #[serde(default)]
    pub attributes: Attributes,
}

impl GuacEdge {
    pub fn new(label: impl Into<String>, source: NodeRef, target: NodeRef) -> Self {
        Self {
            label: label.into(),
            source,
            target,
            attributes: Attributes::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}
