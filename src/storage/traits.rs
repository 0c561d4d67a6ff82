//! Graph database client trait definitions

use crate::graph::Graph;
use std::fmt;
use thiserror::Error;

/// Errors that can occur talking to the graph database
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unable to connect to graph database at {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("invalid identifier `{0}`: expected letters, digits and single underscores")]
    InvalidIdentifier(String),

    #[error("graph rejected: {0}")]
    Rejected(String),
}

/// Result type for graph database operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Credentials presented to the graph database.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken {
    principal: String,
    credentials: String,
    realm: String,
}

impl AuthToken {
    /// Basic username/password token scoped to `realm`.
    pub fn basic(
        principal: impl Into<String>,
        credentials: impl Into<String>,
        realm: impl Into<String>,
    ) -> Self {
        Self {
            principal: principal.into(),
            credentials: credentials.into(),
            realm: realm.into(),
        }
    }

    pub fn principal(&self) -> &str {
        &self.principal
    }

    pub fn realm(&self) -> &str {
        &self.realm
    }

    pub fn has_credentials(&self) -> bool {
        !self.credentials.is_empty()
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthToken")
            .field("principal", &self.principal)
            .field("credentials", &"<redacted>")
            .field("realm", &self.realm)
            .finish()
    }
}

/// What a `store_graph` call changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreSummary {
    /// Nodes inserted, including stubs created for edge endpoints.
    pub nodes_created: usize,
    /// Nodes that matched an existing node on an indexed attribute.
    pub nodes_merged: usize,
    /// Edges inserted or updated.
    pub edges_written: usize,
}

/// Connection to a graph database.
///
/// Implementations must make `create_index` idempotent and apply a
/// `store_graph` call atomically.
pub trait GraphClient: Send + Sync {
    /// Ensure an index on `attribute` exists for nodes labelled `label`.
    fn create_index(&self, label: &str, attribute: &str) -> StoreResult<()>;

    /// Write every node and edge of `graph` in one transaction.
    fn store_graph(&self, graph: &Graph) -> StoreResult<StoreSummary>;
}

/// Letters, digits and single underscores; must not start with a digit.
pub(crate) fn validate_identifier(ident: &str) -> StoreResult<&str> {
    let valid = !ident.is_empty()
        && !ident.starts_with(|c: char| c.is_ascii_digit())
        && ident.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !ident.contains("__");
    if valid {
        Ok(ident)
    } else {
        Err(StoreError::InvalidIdentifier(ident.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers() {
        assert!(validate_identifier("Artifact").is_ok());
        assert!(validate_identifier("predicate_type").is_ok());
        for bad in ["", "1abc", "a b", "x;DROP", "a__b", "na-me"] {
            assert!(
                matches!(validate_identifier(bad), Err(StoreError::InvalidIdentifier(_))),
                "{bad:?} accepted"
            );
        }
    }

    #[test]
    fn auth_token_debug_hides_credentials() {
        let token = AuthToken::basic("neo4j", "s3cret", "guac");
        let shown = format!("{:?}", token);
        assert!(shown.contains("neo4j"));
        assert!(!shown.contains("s3cret"));
        assert!(token.has_credentials());
    }
}
