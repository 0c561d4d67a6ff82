//! Graph database clients
//!
//! The assembler talks to storage through the `GraphClient` trait.
//! `SqliteGraphClient` keeps the graph in a single SQLite file.

mod sqlite;
mod traits;

pub use sqlite::SqliteGraphClient;
pub use traits::{AuthToken, GraphClient, StoreError, StoreResult, StoreSummary};
