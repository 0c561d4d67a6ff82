//! Document parsing: document trees to graph fragments
//!
//! Recognized shapes, checked in this order:
//! - in-toto statements (`_type` mentions in-toto)
//! - SPDX documents (`spdxVersion`)
//! - OSV vulnerability records (`id` plus an `affected` array)

use crate::document::{Document, DocumentTree};
use crate::graph::{label, relationship, Graph, GuacEdge, GuacNode, NodeRef};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Why a document could not be turned into graph fragments
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("document {document} is not valid json: {error}")]
    NotJson {
        document: String,
        #[source]
        error: serde_json::Error,
    },

    #[error("document {0} has no recognized format")]
    Unrecognized(String),

    #[error("document {document} is invalid: {reason}")]
    Invalid { document: String, reason: String },
}

/// Turns one document tree into graph fragments.
pub trait DocumentParser: Send + Sync {
    fn parse(&self, tree: &DocumentTree) -> Result<Vec<Graph>, ParseError>;
}

/// Parser for supply-chain documents.
///
/// Produces one fragment per leaf of the tree, depth first. Bundles
/// (trees with children) contribute no fragment of their own.
#[derive(Debug, Clone, Default)]
pub struct ArtifactParser {
    verifier_key_id: Option<String>,
}

impl ArtifactParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark attestations signed by `key_id` as verified by it.
    pub fn with_verifier_key_id(mut self, key_id: Option<String>) -> Self {
        self.verifier_key_id = key_id;
        self
    }

    fn collect(&self, tree: &DocumentTree, out: &mut Vec<Graph>) -> Result<(), ParseError> {
        if !tree.is_bundle() && tree.children.is_empty() {
            out.push(self.parse_document(&tree.document)?);
            return Ok(());
        }
        for child in &tree.children {
            self.collect(child, out)?;
        }
        Ok(())
    }

    fn parse_document(&self, document: &Document) -> Result<Graph, ParseError> {
        let value: Value =
            serde_json::from_slice(&document.blob).map_err(|error| ParseError::NotJson {
                document: document.source().to_string(),
                error,
            })?;
        let object = value
            .as_object()
            .ok_or_else(|| ParseError::Unrecognized(document.source().to_string()))?;

        let is_statement = object
            .get("_type")
            .and_then(Value::as_str)
            .map(|t| t.contains("in-toto"))
            .unwrap_or(false);

        if is_statement {
            self.parse_statement(document, object)
        } else if object.contains_key("spdxVersion") {
            parse_spdx(document, object)
        } else if object.get("id").and_then(Value::as_str).is_some()
            && object.get("affected").map(Value::is_array).unwrap_or(false)
        {
            parse_osv(document, object)
        } else {
            Err(ParseError::Unrecognized(document.source().to_string()))
        }
    }

    fn parse_statement(&self, document: &Document, statement: &Map<String, Value>) -> Result<Graph, ParseError> {
        let subjects = statement
            .get("subject")
            .and_then(Value::as_array)
            .ok_or_else(|| invalid(document, "statement has no subject array"))?;

        let mut artifacts = Vec::new();
        for subject in subjects {
            let name = subject.get("name").and_then(Value::as_str);
            let digests = subject
                .get("digest")
                .and_then(Value::as_object)
                .ok_or_else(|| invalid(document, "subject has no digest"))?;

            for (algorithm, value) in digests {
                let value = value
                    .as_str()
                    .ok_or_else(|| invalid(document, "subject digest is not a string"))?;
                artifacts.push((name, format!("{}:{}", algorithm.to_lowercase(), value)));
            }
        }

        let predicate_type = statement.get("predicateType").and_then(Value::as_str);
        let digest = match statement.get("digest").and_then(Value::as_str) {
            Some(digest) => digest.to_string(),
            None => statement_digest(predicate_type, artifacts.iter().map(|(_, d)| d.as_str())),
        };

        let mut attestation = GuacNode::new(label::ATTESTATION)
            .with_attribute("digest", digest.clone())
            .with_attribute("source", document.source());
        if let Some(predicate_type) = predicate_type {
            attestation = attestation.with_attribute("predicate_type", predicate_type);
        }
        if let Some(key_id) = self.signed_by_verifier(statement) {
            attestation = attestation.with_attribute("verified_by", key_id);
        }
        let attestation_ref = NodeRef::new(label::ATTESTATION, "digest", digest);

        let mut graph = Graph::new().with_node(attestation);
        for (name, artifact_digest) in artifacts {
            let mut artifact = GuacNode::new(label::ARTIFACT).with_attribute("digest", artifact_digest.clone());
            if let Some(name) = name {
                artifact = artifact.with_attribute("name", name);
            }
            graph = graph.with_node(artifact).with_edge(GuacEdge::new(
                relationship::ATTESTATION_FOR,
                attestation_ref.clone(),
                NodeRef::new(label::ARTIFACT, "digest", artifact_digest),
            ));
        }

        Ok(graph)
    }

    fn signed_by_verifier(&self, statement: &Map<String, Value>) -> Option<String> {
        let key_id = self.verifier_key_id.as_deref()?;
        statement
            .get("signatures")
            .and_then(Value::as_array)?
            .iter()
            .any(|sig| sig.get("keyid").and_then(Value::as_str) == Some(key_id))
            .then(|| key_id.to_string())
    }
}

impl DocumentParser for ArtifactParser {
    fn parse(&self, tree: &DocumentTree) -> Result<Vec<Graph>, ParseError> {
        let mut fragments = Vec::new();
        self.collect(tree, &mut fragments)?;
        Ok(fragments)
    }
}

fn invalid(document: &Document, reason: &str) -> ParseError {
    ParseError::Invalid {
        document: document.source().to_string(),
        reason: reason.to_string(),
    }
}

/// Digest identifying a statement that carries none of its own.
///
/// Hashes the predicate type and the sorted subject digests, one per line,
/// so formatting and subject order do not change the identity.
fn statement_digest<'a>(predicate_type: Option<&str>, subjects: impl Iterator<Item = &'a str>) -> String {
    let mut subjects: Vec<&str> = subjects.collect();
    subjects.sort_unstable();
    subjects.dedup();

    let mut hasher = Sha256::new();
    hasher.update(predicate_type.unwrap_or_default().as_bytes());
    for subject in subjects {
        hasher.update(b"\n");
        hasher.update(subject.as_bytes());
    }
    format!("sha256:{:x}", hasher.finalize())
}

/// Package node plus the reference edges should use for it: by purl when
/// known, otherwise by name.
fn package(name: Option<&str>, purl: Option<&str>) -> Option<(GuacNode, NodeRef)> {
    let mut node = GuacNode::new(label::PACKAGE);
    if let Some(name) = name {
        node = node.with_attribute("name", name);
    }
    if let Some(purl) = purl {
        node = node.with_attribute("purl", purl);
    }
    let reference = node.reference("purl").or_else(|| node.reference("name"))?;
    Some((node, reference))
}

fn parse_spdx(document: &Document, spdx: &Map<String, Value>) -> Result<Graph, ParseError> {
    let id = spdx
        .get("documentNamespace")
        .or_else(|| spdx.get("SPDXID"))
        .and_then(Value::as_str)
        .ok_or_else(|| invalid(document, "SPDX document has no namespace or SPDXID"))?;

    let mut metadata = GuacNode::new(label::METADATA)
        .with_attribute("id", id)
        .with_attribute("source", document.source());
    if let Some(version) = spdx.get("spdxVersion").and_then(Value::as_str) {
        metadata = metadata.with_attribute("spdx_version", version);
    }
    if let Some(name) = spdx.get("name").and_then(Value::as_str) {
        metadata = metadata.with_attribute("name", name);
    }
    let metadata_ref = NodeRef::new(label::METADATA, "id", id);
    let mut graph = Graph::new().with_node(metadata);

    let packages = spdx.get("packages").and_then(Value::as_array);
    for pkg in packages.into_iter().flatten() {
        let purl = pkg
            .get("externalRefs")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .find(|r| r.get("referenceType").and_then(Value::as_str) == Some("purl"))
            .and_then(|r| r.get("referenceLocator"))
            .and_then(Value::as_str);
        let name = pkg.get("name").and_then(Value::as_str);

        let (mut node, package_ref) = package(name, purl)
            .ok_or_else(|| invalid(document, "SPDX package has neither name nor purl"))?;
        if let Some(version) = pkg.get("versionInfo").and_then(Value::as_str) {
            node = node.with_attribute("version", version);
        }
        graph = graph.with_node(node).with_edge(GuacEdge::new(
            relationship::DESCRIBES,
            metadata_ref.clone(),
            package_ref.clone(),
        ));

        let checksums = pkg.get("checksums").and_then(Value::as_array);
        for checksum in checksums.into_iter().flatten() {
            let (Some(algorithm), Some(value)) = (
                checksum.get("algorithm").and_then(Value::as_str),
                checksum.get("checksumValue").and_then(Value::as_str),
            ) else {
                continue;
            };
            let digest = format!("{}:{}", algorithm.to_lowercase(), value);
            let mut artifact = GuacNode::new(label::ARTIFACT).with_attribute("digest", digest.clone());
            if let Some(name) = name {
                artifact = artifact.with_attribute("name", name);
            }
            graph = graph.with_node(artifact).with_edge(GuacEdge::new(
                relationship::HAS_ARTIFACT,
                package_ref.clone(),
                NodeRef::new(label::ARTIFACT, "digest", digest),
            ));
        }
    }

    Ok(graph)
}

fn parse_osv(document: &Document, osv: &Map<String, Value>) -> Result<Graph, ParseError> {
    let id = osv
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| invalid(document, "vulnerability has no id"))?;

    let mut vulnerability = GuacNode::new(label::VULNERABILITY).with_attribute("id", id);
    if let Some(summary) = osv.get("summary").and_then(Value::as_str) {
        vulnerability = vulnerability.with_attribute("summary", summary);
    }
    let vulnerability_ref = NodeRef::new(label::VULNERABILITY, "id", id);
    let mut graph = Graph::new().with_node(vulnerability);

    let affected = osv.get("affected").and_then(Value::as_array);
    for entry in affected.into_iter().flatten() {
        let pkg = entry.get("package");
        let name = pkg.and_then(|p| p.get("name")).and_then(Value::as_str);
        let purl = pkg.and_then(|p| p.get("purl")).and_then(Value::as_str);
        let Some((node, package_ref)) = package(name, purl) else {
            continue;
        };
        graph = graph.with_node(node).with_edge(GuacEdge::new(
            relationship::AFFECTS,
            vulnerability_ref.clone(),
            package_ref,
        ));
    }

    Ok(graph)
}
