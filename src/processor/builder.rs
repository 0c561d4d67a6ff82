//! Document tree construction

use super::ProcessError;
use crate::document::{Document, DocumentTree, FormatHint};
use serde_json::Value;

/// Key whose array marks a JSON document as a bundle of documents
pub const BUNDLE_KEY: &str = "documents";

/// Turns one raw document into a document tree.
pub trait TreeBuilder: Send + Sync {
    fn build_tree(&self, document: &Document) -> Result<DocumentTree, ProcessError>;
}

/// Unpacks JSON bundles into child documents.
///
/// A JSON object carrying a `documents` array becomes a tree whose
/// children are the array elements, unpacked recursively. Everything else
/// is a leaf.
#[derive(Debug, Default, Clone, Copy)]
pub struct BundleTreeBuilder;

impl BundleTreeBuilder {
    pub fn new() -> Self {
        Self
    }

    fn parse_json(document: &Document) -> Result<Option<Value>, ProcessError> {
        match document.format {
            FormatHint::Json => serde_json::from_slice(&document.blob)
                .map(Some)
                .map_err(|error| ProcessError::MalformedJson {
                    document: document.source().to_string(),
                    error,
                }),
            // Sniff unhinted documents; a failed sniff just means "not JSON".
            FormatHint::Unknown => Ok(serde_json::from_slice(&document.blob).ok()),
            FormatHint::Xml => Ok(None),
        }
    }

    fn build(&self, document: &Document, value: Option<Value>) -> Result<DocumentTree, ProcessError> {
        let elements = match value {
            Some(Value::Object(mut map)) => match map.remove(BUNDLE_KEY) {
                Some(Value::Array(elements)) => elements,
                _ => return Ok(DocumentTree::leaf(document.clone())),
            },
            _ => return Ok(DocumentTree::leaf(document.clone())),
        };

        let mut children = Vec::with_capacity(elements.len());
        for (index, element) in elements.into_iter().enumerate() {
            let blob = serde_json::to_vec(&element).map_err(ProcessError::Encode)?;
            let child = Document::new(
                blob,
                FormatHint::Json,
                &document.source_information.collector,
                format!("{}#{}", document.source(), index),
            );
            children.push(self.build(&child, Some(element))?);
        }

        Ok(DocumentTree::bundle(document.clone(), children))
    }
}

impl TreeBuilder for BundleTreeBuilder {
    fn build_tree(&self, document: &Document) -> Result<DocumentTree, ProcessError> {
        let value = Self::parse_json(document)?;
        self.build(document, value)
    }
}
