//! guac-pipeline: bus-backed document pipeline for an artifact knowledge graph
//!
//! Documents are collected from a source, published on a durable bus,
//! turned into document trees, parsed into graph fragments and stored in
//! a graph database.
//!
//! # Core Concepts
//!
//! - **Document**: one raw input unit plus where it came from
//! - **DocumentTree**: a document with any embedded sub-documents
//! - **Graph**: nodes and edges contributed by one document tree
//! - **Bus**: durable topics connecting the stages, at-least-once delivery
//!
//! # Example
//!
//! ```
//! use guac_pipeline::{Graph, GuacNode};
//!
//! let left = Graph::new().with_node(GuacNode::new("Artifact").with_attribute("digest", "sha256:aa"));
//! let right = Graph::new().with_node(GuacNode::new("Package").with_attribute("name", "left-pad"));
//! assert_eq!(Graph::merge([left, right]).node_count(), 2);
//! ```

pub mod assembler;
pub mod bus;
pub mod collector;
pub mod config;
pub mod document;
mod graph;
pub mod ingestor;
pub mod pipeline;
pub mod processor;
pub mod storage;

pub use assembler::{Assembler, AssemblerState, IndexSpec};
pub use document::{Document, DocumentTree, FormatHint};
pub use graph::{label, relationship, Attributes, Graph, GuacEdge, GuacNode, NodeRef, PropertyValue};
pub use pipeline::{Pipeline, PipelineError, PipelineReport, StageOutcome};
pub use storage::{GraphClient, SqliteGraphClient, StoreError};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
