//! Configuration types for catalog client construction.

use std::collections::BTreeMap;
use std::path::PathBuf;

/// Where packages are searched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogSource {
    /// A directory of catalog snapshots, one `<rev>.json` per input revision.
    Snapshots(PathBuf),
    /// A remote catalog service.
    Remote(CatalogClientConfig),
}

/// Configuration for the HTTP catalog client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogClientConfig {
    /// Base URL for the catalog API.
    pub catalog_url: String,
    /// Additional headers to include in requests.
    pub extra_headers: BTreeMap<String, String>,
    /// User agent to send with requests.
    pub user_agent: Option<String>,
}

impl CatalogClientConfig {
    pub fn new(catalog_url: impl Into<String>) -> Self {
        Self {
            catalog_url: catalog_url.into(),
            extra_headers: BTreeMap::new(),
            user_agent: None,
        }
    }
}
