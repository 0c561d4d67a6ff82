//! Pipeline options, validated once at startup
//!
//! `RawOptions` is what the command line (or a test) hands over;
//! `PipelineOptions::validate` turns it into the immutable value every
//! component is constructed from.

use std::path::PathBuf;
use thiserror::Error;

/// Default logical namespace inside the graph database
pub const DEFAULT_REALM: &str = "guac";

/// Configuration errors, surfaced before any stage starts
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("key must be passed in as a pem file")]
    KeyNotPem,

    #[error("expected positional argument for file_path")]
    MissingPath,

    #[error("expected exactly one positional argument, got {0}")]
    TooManyPaths(usize),

    #[error("database address must not be empty")]
    EmptyDatabaseAddress,

    #[error("realm must not be empty")]
    EmptyRealm,
}

/// Unvalidated options as collected from flags and environment
#[derive(Debug, Clone, Default)]
pub struct RawOptions {
    pub db_addr: String,
    pub user: String,
    pub pass: String,
    pub realm: String,
    pub key_path: Option<String>,
    pub key_id: Option<String>,
    pub bus_path: PathBuf,
    pub recreate_stream: bool,
    pub follow: bool,
    pub args: Vec<String>,
}

/// Username/password pair scoped to a realm.
///
/// The password is redacted from `Debug` output.
#[derive(Clone, PartialEq)]
pub struct Credentials {
    pub user: String,
    pub pass: String,
    pub realm: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("pass", &"<redacted>")
            .field("realm", &self.realm)
            .finish()
    }
}

/// Reference to a PEM-encoded verification key
#[derive(Debug, Clone, PartialEq)]
pub struct VerifierKey {
    /// Path to the pem file
    pub path: PathBuf,
    /// ID related to the key being stored
    pub id: Option<String>,
}

/// Graph database connection parameters
#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseOptions {
    pub address: String,
    pub credentials: Credentials,
}

/// Validated, immutable pipeline configuration
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOptions {
    pub database: DatabaseOptions,
    pub verifier: Option<VerifierKey>,
    /// Folder with documents to collect
    pub source_path: PathBuf,
    /// Location of the durable bus
    pub bus_path: PathBuf,
    /// Drop queued messages before the run. Never for production.
    pub recreate_stream: bool,
    /// Keep subscriber loops alive after collection
    pub follow: bool,
}

impl PipelineOptions {
    /// Validate raw options.
    ///
    /// The key path must carry a `pem` suffix; the key id is only kept
    /// when a key path is given. Exactly one positional path is required.
    pub fn validate(raw: RawOptions) -> Result<Self, ConfigError> {
        let verifier = match raw.key_path.filter(|p| !p.is_empty()) {
            Some(path) if path.ends_with("pem") => Some(VerifierKey {
                path: PathBuf::from(path),
                id: raw.key_id.filter(|id| !id.is_empty()),
            }),
            Some(_) => return Err(ConfigError::KeyNotPem),
            None => None,
        };

        let source_path = match raw.args.as_slice() {
            [] => return Err(ConfigError::MissingPath),
            [path] => PathBuf::from(path),
            more => return Err(ConfigError::TooManyPaths(more.len())),
        };

        if raw.db_addr.trim().is_empty() {
            return Err(ConfigError::EmptyDatabaseAddress);
        }
        if raw.realm.trim().is_empty() {
            return Err(ConfigError::EmptyRealm);
        }

        Ok(Self {
            database: DatabaseOptions {
                address: raw.db_addr,
                credentials: Credentials {
                    user: raw.user,
                    pass: raw.pass,
                    realm: raw.realm,
                },
            },
            verifier,
            source_path,
            bus_path: raw.bus_path,
            recreate_stream: raw.recreate_stream,
            follow: raw.follow,
        })
    }

    /// Configured verifier key id, if any
    pub fn verifier_key_id(&self) -> Option<&str> {
        self.verifier.as_ref().and_then(|k| k.id.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw() -> RawOptions {
        RawOptions {
            db_addr: "graph.db".to_string(),
            user: "neo4j".to_string(),
            pass: "s3cret".to_string(),
            realm: DEFAULT_REALM.to_string(),
            bus_path: PathBuf::from("bus.db"),
            args: vec!["docs".to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn valid_options_without_key() {
        let opts = PipelineOptions::validate(raw()).unwrap();
        assert_eq!(opts.source_path, PathBuf::from("docs"));
        assert_eq!(opts.database.credentials.realm, "guac");
        assert!(opts.verifier.is_none());
        assert!(!opts.recreate_stream);
    }

    #[test]
    fn pem_key_is_accepted_with_id() {
        let opts = PipelineOptions::validate(RawOptions {
            key_path: Some("keys/cosign.pem".to_string()),
            key_id: Some("cosign".to_string()),
            ..raw()
        })
        .unwrap();
        let key = opts.verifier.as_ref().unwrap();
        assert_eq!(key.path, PathBuf::from("keys/cosign.pem"));
        assert_eq!(opts.verifier_key_id(), Some("cosign"));
    }

    #[test]
    fn non_pem_key_is_rejected() {
        let err = PipelineOptions::validate(RawOptions {
            key_path: Some("keys/cosign.key".to_string()),
            ..raw()
        })
        .unwrap_err();
        assert_eq!(err, ConfigError::KeyNotPem);
    }

    #[test]
    fn key_id_without_path_is_dropped() {
        let opts = PipelineOptions::validate(RawOptions {
            key_id: Some("orphan".to_string()),
            ..raw()
        })
        .unwrap();
        assert!(opts.verifier.is_none());
        assert_eq!(opts.verifier_key_id(), None);
    }

    #[test]
    fn missing_path_is_rejected() {
        let err = PipelineOptions::validate(RawOptions { args: vec![], ..raw() }).unwrap_err();
        assert_eq!(err, ConfigError::MissingPath);
    }

    #[test]
    fn extra_paths_are_rejected() {
        let err = PipelineOptions::validate(RawOptions {
            args: vec!["a".to_string(), "b".to_string()],
            ..raw()
        })
        .unwrap_err();
        assert_eq!(err, ConfigError::TooManyPaths(2));
    }

    #[test]
    fn empty_realm_is_rejected() {
        let err = PipelineOptions::validate(RawOptions {
            realm: " ".to_string(),
            ..raw()
        })
        .unwrap_err();
        assert_eq!(err, ConfigError::EmptyRealm);
    }

    #[test]
    fn credentials_debug_redacts_password() {
        let opts = PipelineOptions::validate(raw()).unwrap();
        let debug = format!("{:?}", opts.database.credentials);
        assert!(debug.contains("neo4j"));
        assert!(!debug.contains("s3cret"));
    }
}
