//! Documents and document trees: the payloads that travel on the bus

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Encoding the collector guessed for a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatHint {
    Json,
    Xml,
    Unknown,
}

impl FormatHint {
    /// Guess the format from a file extension
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("json") => Self::Json,
            Some("xml") => Self::Xml,
            _ => Self::Unknown,
        }
    }
}

/// Where a document came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceInformation {
    /// Name of the collector that found it
    pub collector: String,
    /// Origin path (or `<parent>#<index>` for embedded documents)
    pub source: String,
}

/// One raw artifact document. Immutable once emitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub blob: Vec<u8>,
    pub format: FormatHint,
    pub source_information: SourceInformation,
}

impl Document {
    pub fn new(
        blob: impl Into<Vec<u8>>,
        format: FormatHint,
        collector: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            blob: blob.into(),
            format,
            source_information: SourceInformation {
                collector: collector.into(),
                source: source.into(),
            },
        }
    }

    /// Origin path of the document
    pub fn source(&self) -> &str {
        &self.source_information.source
    }

    /// Encode for the raw-document topic
    pub fn to_payload(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_payload(payload: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(payload)
    }
}

/// Structured form of one document, with embedded documents as children
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentTree {
    pub document: Document,
    #[serde(default)]
    pub children: Vec<DocumentTree>,
    /// Set for bundles, which stay bundles even with no embedded documents
    #[serde(default)]
    pub bundle: bool,
}

impl DocumentTree {
    /// A tree with no embedded documents
    pub fn leaf(document: Document) -> Self {
        Self {
            document,
            children: Vec::new(),
            bundle: false,
        }
    }

    /// A bundle unpacked into `children`
    pub fn bundle(document: Document, children: Vec<DocumentTree>) -> Self {
        Self {
            document,
            children,
            bundle: true,
        }
    }

    pub fn is_bundle(&self) -> bool {
        self.bundle
    }

    /// Total number of documents in the tree, root included
    pub fn len(&self) -> usize {
        1 + self.children.iter().map(DocumentTree::len).sum::<usize>()
    }

    /// Encode for the processed-document topic
    pub fn to_payload(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_payload(payload: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(source: &str, body: &str) -> Document {
        Document::new(body.as_bytes(), FormatHint::Json, "file", source)
    }

    #[test]
    fn format_hint_from_extension() {
        assert_eq!(FormatHint::from_path(Path::new("a/sbom.JSON")), FormatHint::Json);
        assert_eq!(FormatHint::from_path(Path::new("a/pom.xml")), FormatHint::Xml);
        assert_eq!(FormatHint::from_path(Path::new("a/README")), FormatHint::Unknown);
        assert_eq!(FormatHint::from_path(Path::new("a/events.jsonl")), FormatHint::Unknown);
    }

    #[test]
    fn format_hint_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&FormatHint::Json).unwrap(), "\"json\"");
    }

    #[test]
    fn document_payload_roundtrip() {
        let d = doc("docs/a.json", r#"{"k":"v"}"#);
        let back = Document::from_payload(&d.to_payload().unwrap()).unwrap();
        assert_eq!(d, back);
    }

    #[test]
    fn nested_tree_payload_roundtrip() {
        let tree = DocumentTree::bundle(
            doc("bundle.json", r#"{"documents":[{},{"documents":[{}]}]}"#),
            vec![
                DocumentTree::leaf(doc("bundle.json#0", "{}")),
                DocumentTree::bundle(
                    doc("bundle.json#1", r#"{"documents":[{}]}"#),
                    vec![DocumentTree::leaf(doc("bundle.json#1#0", "{}"))],
                ),
            ],
        );
        assert_eq!(tree.len(), 4);

        let back = DocumentTree::from_payload(&tree.to_payload().unwrap()).unwrap();
        assert_eq!(tree, back);
    }

    #[test]
    fn tree_without_children_field_decodes_as_leaf() {
        let payload = serde_json::json!({
            "document": {
                "blob": [123, 125],
                "format": "json",
                "source_information": { "collector": "file", "source": "x.json" }
            }
        });
        let tree: DocumentTree = serde_json::from_value(payload).unwrap();
        assert!(tree.children.is_empty());
        assert!(!tree.is_bundle());
        assert_eq!(tree.document.blob, b"{}".to_vec());
    }
}
