//! Indices the graph database needs before anything is stored

use crate::graph::label;
use std::collections::{BTreeMap, BTreeSet};

/// Label -> attributes that must be indexed.
///
/// Iteration order is deterministic (labels, then attributes, sorted).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexSpec {
    entries: BTreeMap<String, BTreeSet<String>>,
}

impl IndexSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// The attributes the parser resolves node identity through.
    pub fn required() -> Self {
        Self::new()
            .with(label::ARTIFACT, ["digest", "name"])
            .with(label::PACKAGE, ["purl", "name"])
            .with(label::METADATA, ["id"])
            .with(label::ATTESTATION, ["digest"])
            .with(label::VULNERABILITY, ["id"])
    }

    pub fn with<'a>(
        mut self,
        label: impl Into<String>,
        attributes: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        self.entries
            .entry(label.into())
            .or_default()
            .extend(attributes.into_iter().map(str::to_string));
        self
    }

    /// Every (label, attribute) pair.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().flat_map(|(label, attributes)| {
            attributes
                .iter()
                .map(move |attribute| (label.as_str(), attribute.as_str()))
        })
    }

    pub fn attributes(&self, label: &str) -> Option<&BTreeSet<String>> {
        self.entries.get(label)
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
