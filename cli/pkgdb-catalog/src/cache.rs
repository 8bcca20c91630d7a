//! Search results remembered per catalog source and pinned input revision.
//!
//! The packages of a pinned revision only change when the catalog is
//! rescraped, so results can be reused until the caller clears the cache.
//! The cache is an explicit value owned by the caller;
//! nothing is cached behind its back.

use std::collections::BTreeMap;
use std::path::Path;

use fslock::LockFile;
use pkgdb_core::{SerializeError, serialize_atomically, traceable_path};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::CatalogError;
use crate::types::{CatalogPackage, LockedInput, PkgQueryArgs};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogCache {
    /// [crate::ClientTrait::source_id] of the catalog that produced the results
    #[serde(default)]
    source: String,
    /// rev -> serialized query -> results
    entries: BTreeMap<String, BTreeMap<String, Vec<CatalogPackage>>>,
}

fn query_key(args: &PkgQueryArgs) -> String {
    // field order is fixed and sets are ordered, so this is canonical
    serde_json::to_string(args).unwrap_or_default()
}

impl CatalogCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty cache for results of the catalog identified by `source`
    pub fn for_source(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            entries: BTreeMap::new(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn get(&self, input: &LockedInput, args: &PkgQueryArgs) -> Option<&[CatalogPackage]> {
        self.entries
            .get(&input.rev)?
            .get(&query_key(args))
            .map(Vec::as_slice)
    }

    /// Remember `results` for `args`.
    ///
    /// Empty results are not kept, a package missing today may be
    /// scraped tomorrow.
    pub fn insert(&mut self, input: &LockedInput, args: &PkgQueryArgs, results: Vec<CatalogPackage>) {
        if results.is_empty() {
            return;
        }
        self.entries
            .entry(input.rev.clone())
            .or_default()
            .insert(query_key(args), results);
    }

    /// Drop all results for the revision of `input`
    pub fn invalidate(&mut self, input: &LockedInput) {
        if self.entries.remove(&input.rev).is_some() {
            debug!(input = %input.name, rev = %input.rev, "invalidated cached catalog results");
        }
    }

    /// Drop everything
    pub fn clear(&mut self) {
        if !self.entries.is_empty() {
            debug!(source = %self.source, "cleared cached catalog results");
        }
        self.entries.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Read the results of `source` from a cache written with
    /// [CatalogCache::save].
    ///
    /// A missing file is an empty cache.
    /// A file that cannot be parsed or that holds results of another
    /// catalog is discarded, the cache is only an optimization.
    pub fn load(path: impl AsRef<Path>, source: &str) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::for_source(source));
            },
            Err(source) => {
                return Err(CatalogError::ReadCache {
                    path: path.to_path_buf(),
                    source,
                });
            },
        };
        match serde_json::from_str::<Self>(&contents) {
            Ok(cache) if cache.source == source => Ok(cache),
            Ok(cache) => {
                debug!(
                    path = traceable_path(path),
                    cached = %cache.source,
                    source,
                    "discarding catalog cache of another catalog"
                );
                Ok(Self::for_source(source))
            },
            Err(e) => {
                debug!(path = traceable_path(path), %e, "discarding unreadable catalog cache");
                Ok(Self::for_source(source))
            },
        }
    }

    pub fn save(&self, path: impl AsRef<Path>, lock: LockFile) -> Result<(), SerializeError> {
        serialize_atomically(self, &path.as_ref(), lock)
    }
}
