use std::path::{Path, PathBuf};

use pkgdb_catalog::{CatalogCache, Client, ClientTrait, System};
use pkgdb_core::{SerializeError, acquire_lock, traceable_path};
use pkgdb_manifest::{Lockfile, LockfileDiff, Manifest, ManifestError};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::providers::lock_manifest::{LockOptions, ManifestResolver, ResolveError};
use crate::providers::registry::{Fetcher, InputFetcher};
use crate::providers::transaction::{LockfileTransaction, TransactionError};

/// Name of the catalog search cache in [Pkgdb::cache_dir]
pub const CATALOG_CACHE_FILE: &str = "catalog-cache.json";

/// The context of one `pkgdb` invocation.
///
/// A [Pkgdb] owns the resolver and with it the caches shared by every
/// operation of the invocation.
/// The search cache is loaded from [Pkgdb::cache_dir] on creation and
/// written back with [Pkgdb::save_cache].
#[derive(Debug)]
pub struct Pkgdb<C = Client, F = Fetcher> {
    pub cache_dir: PathBuf,
    /// The system this process runs on
    pub system: System,
    pub resolver: ManifestResolver<C, F>,
}

#[derive(Debug, Error)]
pub enum PkgdbError {
    #[error("failed to read manifest '{}'", path.display())]
    ReadManifest {
        path: PathBuf,
        #[source]
        source: ManifestError,
    },
    #[error(transparent)]
    Transaction(#[from] TransactionError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("failed to write catalog cache")]
    SaveCache(#[source] SerializeError),
}

/// The result of locking a manifest
#[derive(Debug)]
pub struct LockOutcome {
    pub lockfile: Lockfile,
    /// Changes relative to the previous lockfile
    pub diff: LockfileDiff,
    /// Whether the lockfile on disk changed
    pub written: bool,
}

impl<C: ClientTrait, F: InputFetcher> Pkgdb<C, F> {
    pub fn new(cache_dir: impl Into<PathBuf>, system: impl Into<System>, resolver: ManifestResolver<C, F>) -> Self {
        let cache_dir = cache_dir.into();
        let cache_path = cache_dir.join(CATALOG_CACHE_FILE);
        let source = resolver.catalog().source_id();
        let cache = CatalogCache::load(&cache_path, &source).unwrap_or_else(|err| {
            warn!(%err, path = traceable_path(&cache_path), "ignoring unreadable catalog cache");
            CatalogCache::for_source(source)
        });
        Self {
            cache_dir,
            system: system.into(),
            resolver: resolver.with_catalog_cache(cache),
        }
    }

    pub fn catalog_cache_path(&self) -> PathBuf {
        self.cache_dir.join(CATALOG_CACHE_FILE)
    }

    /// Lock the manifest at `manifest_path` into `lockfile_path`.
    ///
    /// Reading the previous lockfile, resolving and writing the new one
    /// happen while holding the lockfile's advisory lock.
    #[instrument(skip(self, options), fields(
        manifest = traceable_path(manifest_path),
        lockfile = traceable_path(lockfile_path),
    ))]
    pub async fn lock_file(
        &mut self,
        manifest_path: &Path,
        lockfile_path: &Path,
        options: &LockOptions,
    ) -> Result<LockOutcome, PkgdbError> {
        let manifest = Manifest::read(manifest_path).map_err(|source| PkgdbError::ReadManifest {
            path: manifest_path.to_path_buf(),
            source,
        })?;

        let transaction = LockfileTransaction::begin(lockfile_path)?;
        let lockfile = self
            .resolver
            .lock(&manifest, transaction.existing(), options)
            .await?;

        let previous = transaction
            .existing()
            .cloned()
            .unwrap_or_else(|| Lockfile::new(manifest.clone()));
        let diff = LockfileDiff::new(&previous, &lockfile);
        let written = transaction.commit(&lockfile)?;
        debug!(written, changes = diff.iter_changed().count(), "locked");

        Ok(LockOutcome {
            lockfile,
            diff,
            written,
        })
    }

    /// Forget cached search results, in memory and on disk with the next
    /// [Pkgdb::save_cache]
    pub fn refresh_catalog(&mut self) {
        self.resolver.clear_catalog_cache();
    }

    /// Persist the catalog search cache for the next invocation
    pub fn save_cache(&self) -> Result<(), PkgdbError> {
        let cache = self.resolver.catalog_cache();
        let path = self.catalog_cache_path();
        // an emptied cache still replaces the stale file
        if cache.is_empty() && !path.exists() {
            return Ok(());
        }
        std::fs::create_dir_all(&self.cache_dir)
            .map_err(|e| PkgdbError::SaveCache(SerializeError::OpenTmpFile(e)))?;
        let lock = acquire_lock(&path).map_err(PkgdbError::SaveCache)?;
        cache.save(&path, lock).map_err(PkgdbError::SaveCache)
    }
}
