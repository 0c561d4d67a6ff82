//! Node representation in the artifact graph

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Entity labels the parser emits and the assembler indexes.
pub mod label {
    pub const ARTIFACT: &str = "Artifact";
    pub const PACKAGE: &str = "Package";
    pub const METADATA: &str = "Metadata";
    pub const ATTESTATION: &str = "Attestation";
    pub const VULNERABILITY: &str = "Vulnerability";
}

/// Typed attribute values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Array(Vec<PropertyValue>),
}

impl PropertyValue {
    /// The value as a string slice, if it is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Attribute collection. Ordered so serialized nodes are deterministic.
pub type Attributes = BTreeMap<String, PropertyValue>;

/// Reference to a node by one identifying attribute.
///
/// Edges carry references instead of node handles; the storage layer
/// resolves them through its indices.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeRef {
    pub label: String,
    pub attribute: String,
    pub value: String,
}

impl NodeRef {
    pub fn new(
        label: impl Into<String>,
        attribute: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            label: label.into(),
            attribute: attribute.into(),
            value: value.into(),
        }
    }
}

impl std::fmt::Display for NodeRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({}={})", self.label, self.attribute, self.value)
    }
}

/// A node in the artifact graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuacNode {
    /// Entity type (Artifact, Package, ...)
    pub label: String,
    /// Key/value attributes
    #[serde(default)]
    pub attributes: Attributes,
}

impl GuacNode {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            attributes: Attributes::new(),
        }
    }

    /// Add an attribute to the node
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// String value of an attribute, if present and a string
    pub fn attribute_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(PropertyValue::as_str)
    }

    /// Build a reference to this node through `attribute`.
    ///
    /// Returns `None` when the attribute is missing or not a string.
    pub fn reference(&self, attribute: &str) -> Option<NodeRef> {
        self.attribute_str(attribute)
            .map(|value| NodeRef::new(&self.label, attribute, value))
    }
}
