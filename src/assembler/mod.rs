//! Graph assembler: merges fragments and writes them to the graph database
//!
//! The assembler owns the database client. Construction bootstraps every
//! required index; an assembler that exists is ready to store.

mod index;

pub use index::IndexSpec;

use crate::config::DatabaseOptions;
use crate::graph::Graph;
use crate::ingestor::GraphSink;
use crate::storage::{AuthToken, GraphClient, SqliteGraphClient, StoreError, StoreSummary};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Lifecycle of an assembler. There is no way back to `Uninitialized`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblerState {
    /// Indices not yet created
    Uninitialized,
    /// Every index exists; stores are accepted
    Ready,
}

pub struct Assembler {
    client: Arc<dyn GraphClient>,
    indices: IndexSpec,
    state: AssemblerState,
}

impl Assembler {
    /// Connect to the database described by `options` and create the
    /// required indices.
    pub fn new(options: &DatabaseOptions) -> Result<Self, StoreError> {
        let credentials = &options.credentials;
        let token = AuthToken::basic(&credentials.user, &credentials.pass, &credentials.realm);
        let client = SqliteGraphClient::connect(&options.address, &token)?;
        Self::with_client(Arc::new(client), IndexSpec::required())
    }

    /// Wrap an existing client and create `indices` on it.
    ///
    /// Fails on the first index that cannot be created.
    pub fn with_client(client: Arc<dyn GraphClient>, indices: IndexSpec) -> Result<Self, StoreError> {
        let mut assembler = Self {
            client,
            indices,
            state: AssemblerState::Uninitialized,
        };
        assembler.bootstrap_indices()?;
        Ok(assembler)
    }

    fn bootstrap_indices(&mut self) -> Result<(), StoreError> {
        for (label, attribute) in self.indices.iter() {
            self.client.create_index(label, attribute)?;
            debug!(label = %label, attribute = %attribute, "Created index");
        }
        self.state = AssemblerState::Ready;
        info!(indices = self.indices.len(), "Graph indices ready");
        Ok(())
    }

    pub fn state(&self) -> AssemblerState {
        self.state
    }

    pub fn indices(&self) -> &IndexSpec {
        &self.indices
    }

    /// Merge `fragments` in input order and issue one store call.
    ///
    /// Store errors are returned as the client reported them.
    #[instrument(name = "store", skip_all, fields(fragments = fragments.len()))]
    pub fn store_fragments(&self, fragments: Vec<Graph>) -> Result<StoreSummary, StoreError> {
        let merged = Graph::merge(fragments);
        info!(
            nodes = merged.node_count(),
            edges = merged.edge_count(),
            "Storing merged graph"
        );
        self.client.store_graph(&merged)
    }
}

#[async_trait]
impl GraphSink for Assembler {
    async fn store(&self, fragments: Vec<Graph>) -> Result<(), StoreError> {
        let summary = self.store_fragments(fragments)?;
        debug!(
            created = summary.nodes_created,
            merged = summary.nodes_merged,
            edges = summary.edges_written,
            "Store call committed"
        );
        Ok(())
    }
}
