//! Error handling for catalog operations.

use std::path::PathBuf;

use pkgdb_core::retry::Transient;
use thiserror::Error;

use crate::versions::RangeError;

/// Invalid combinations of [crate::PkgQueryArgs].
#[derive(Debug, Error)]
pub enum PkgQueryError {
    #[error("queries may not mix 'name' with 'pname', 'version', or 'semver'")]
    NameWithPnameOrVersion,
    #[error("queries may not mix 'version' and 'semver'")]
    VersionWithSemver,
    #[error(transparent)]
    InvalidSemver(#[from] RangeError),
}

#[derive(Debug, Error)]
pub enum CatalogError {
    /// The catalog could not be reached or failed to answer.
    /// Retrying may succeed.
    #[error("catalog is unavailable: {0}")]
    Unavailable(String),
    #[error("invalid package query")]
    InvalidQuery(#[from] PkgQueryError),
    #[error("catalog has no snapshot of input '{input}' at revision '{rev}'")]
    MissingSnapshot { input: String, rev: String },
    #[error("failed to read catalog snapshot '{}'", path.display())]
    ReadSnapshot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse catalog snapshot '{}'", path.display())]
    ParseSnapshot {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to read catalog cache '{}'", path.display())]
    ReadCache {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("catalog rejected the request: {status}: {detail}")]
    Rejected { status: u16, detail: String },
    #[error("{0}")]
    Other(String),
}

impl Transient for CatalogError {
    fn is_transient(&self) -> bool {
        matches!(self, CatalogError::Unavailable(_))
    }
}
