//! Package catalogs and the package query engine.
//!
//! This crate provides:
//! - the package metadata types shared by the resolver and the lockfile
//! - version coercion and semantic version range matching
//! - [PkgQuery], conjunctive filtering and deterministic ranking of packages
//! - catalog clients for local snapshots, a remote service and tests
//! - [CatalogCache], an explicit cache of search results

mod cache;
mod client;
mod config;
mod error;
mod mock;
mod query;
mod types;
pub mod versions;

#[cfg(any(test, feature = "tests"))]
pub mod test_helpers;

pub use cache::CatalogCache;
pub use client::{
    CatalogSnapshot,
    Client,
    ClientTrait,
    HttpCatalog,
    SnapshotCatalog,
    snapshot_path,
};
pub use config::{CatalogClientConfig, CatalogSource};
pub use error::{CatalogError, PkgQueryError};
pub use mock::{MockClient, Request as MockRequest, Response as MockResponse};
pub use query::PkgQuery;
pub use types::*;
