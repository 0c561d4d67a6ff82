//! Shared fixtures and doubles for the pipeline integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use guac_pipeline::ingestor::GraphSink;
use guac_pipeline::storage::{GraphClient, StoreResult, StoreSummary};
use guac_pipeline::{Graph, StoreError};
use std::path::Path;
use std::sync::{Arc, Mutex};

pub const STATEMENT: &str = r#"{
  "_type": "https://in-toto.io/Statement/v0.1",
  "predicateType": "https://slsa.dev/provenance/v0.2",
  "subject": [{ "name": "app.tar", "digest": { "sha256": "aa11" } }],
  "signatures": [{ "keyid": "key-1" }]
}"#;

pub const SBOM: &str = r#"{
  "spdxVersion": "SPDX-2.3",
  "SPDXID": "SPDXRef-DOCUMENT",
  "documentNamespace": "https://example.com/app-1",
  "name": "app",
  "packages": [{
    "name": "left-pad",
    "versionInfo": "1.3.0",
    "externalRefs": [{ "referenceType": "purl", "referenceLocator": "pkg:npm/left-pad@1.3.0" }],
    "checksums": [{ "algorithm": "SHA256", "checksumValue": "bb22" }]
  }]
}"#;

pub const ADVISORY: &str = r#"{
  "id": "GHSA-xxxx-1",
  "summary": "prototype pollution",
  "affected": [{ "package": { "purl": "pkg:npm/left-pad@1.3.0" } }]
}"#;

/// Write `files` (name, contents) under `dir`.
pub fn write_documents(dir: &Path, files: &[(&str, &str)]) {
    std::fs::create_dir_all(dir).unwrap();
    for (name, contents) in files {
        std::fs::write(dir.join(name), contents).unwrap();
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Index(String, String),
    Store(Graph),
}

/// Records every call, then forwards it to `inner`.
pub struct RecordingClient<C> {
    inner: Arc<C>,
    calls: Mutex<Vec<Call>>,
}

impl<C: GraphClient> RecordingClient<C> {
    pub fn new(inner: Arc<C>) -> Self {
        Self {
            inner,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn stores(&self) -> Vec<Graph> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Store(graph) => Some(graph),
                Call::Index(..) => None,
            })
            .collect()
    }
}

impl<C: GraphClient> GraphClient for RecordingClient<C> {
    fn create_index(&self, label: &str, attribute: &str) -> StoreResult<()> {
        self.calls
            .lock()
            .unwrap()
            .push(Call::Index(label.to_string(), attribute.to_string()));
        self.inner.create_index(label, attribute)
    }

    fn store_graph(&self, graph: &Graph) -> StoreResult<StoreSummary> {
        self.calls.lock().unwrap().push(Call::Store(graph.clone()));
        self.inner.store_graph(graph)
    }
}

/// Graph sink that accepts or rejects every batch.
#[derive(Default)]
pub struct ScriptedSink {
    pub reject: bool,
    pub batches: Mutex<Vec<Vec<Graph>>>,
}

#[async_trait]
impl GraphSink for ScriptedSink {
    async fn store(&self, fragments: Vec<Graph>) -> Result<(), StoreError> {
        if self.reject {
            return Err(StoreError::Rejected("graph database unavailable".to_string()));
        }
        self.batches.lock().unwrap().push(fragments);
        Ok(())
    }
}
