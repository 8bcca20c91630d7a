//! Read, relock and write a lockfile as one transaction.
//!
//! The lockfile is guarded by an advisory lock on `<lockfile>.lock`
//! for the whole sequence, and written atomically,
//! so concurrent invocations neither interleave nor leave a partial file.

use std::path::{Path, PathBuf};

use fslock::LockFile;
use pkgdb_core::{SerializeError, acquire_lock, serialize_atomically, traceable_path};
use pkgdb_manifest::{Lockfile, LockfileError};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("failed to lock '{}'", path.display())]
    Lock {
        path: PathBuf,
        #[source]
        source: SerializeError,
    },
    /// The existing lockfile cannot be read.
    /// It is never treated as empty, that would silently drop its pins.
    #[error("existing lockfile '{}' is invalid", path.display())]
    ReadExisting {
        path: PathBuf,
        #[source]
        source: LockfileError,
    },
    #[error("failed to write lockfile '{}'", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: SerializeError,
    },
}

/// Exclusive access to a lockfile until committed or dropped
pub struct LockfileTransaction {
    path: PathBuf,
    lock: LockFile,
    existing: Option<Lockfile>,
}

impl std::fmt::Debug for LockfileTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockfileTransaction")
            .field("path", &self.path)
            .field("existing", &self.existing.is_some())
            .finish_non_exhaustive()
    }
}

impl LockfileTransaction {
    /// Wait for exclusive access to `path` and read the lockfile there,
    /// if there is one.
    pub fn begin(path: impl AsRef<Path>) -> Result<Self, TransactionError> {
        let path = path.as_ref().to_path_buf();
        let lock = acquire_lock(&path).map_err(|source| TransactionError::Lock {
            path: path.clone(),
            source,
        })?;

        let existing = if path.exists() {
            let lockfile = Lockfile::read_from_file(&path).map_err(|source| {
                TransactionError::ReadExisting {
                    path: path.clone(),
                    source,
                }
            })?;
            debug!(path = traceable_path(&path), "read existing lockfile");
            Some(lockfile)
        } else {
            None
        };

        Ok(Self {
            path,
            lock,
            existing,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn existing(&self) -> Option<&Lockfile> {
        self.existing.as_ref()
    }

    /// Write `lockfile` and release the lock.
    ///
    /// Returns whether anything was written,
    /// an unchanged lockfile is left untouched.
    pub fn commit(self, lockfile: &Lockfile) -> Result<bool, TransactionError> {
        if self.existing.as_ref() == Some(lockfile) {
            debug!(path = traceable_path(&self.path), "lockfile unchanged");
            return Ok(false);
        }
        serialize_atomically(lockfile, &self.path, self.lock).map_err(|source| {
            TransactionError::Write {
                path: self.path.clone(),
                source,
            }
        })?;
        debug!(path = traceable_path(&self.path), "wrote lockfile");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use pkgdb_core::lock_path;
    use pkgdb_manifest::Manifest;
    use pretty_assertions::assert_eq;

    use super::*;

    fn lockfile() -> Lockfile {
        let manifest: Manifest = pkgdb_test_utils::manifests::HELLO.parse().unwrap();
        Lockfile::new(manifest)
    }

    #[test]
    fn commit_writes_and_rereads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.lock");

        let transaction = LockfileTransaction::begin(&path).unwrap();
        assert!(transaction.existing().is_none());
        assert!(transaction.commit(&lockfile()).unwrap());

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.ends_with("}\n"));

        let transaction = LockfileTransaction::begin(&path).unwrap();
        assert_eq!(transaction.existing(), Some(&lockfile()));
        assert!(!transaction.commit(&lockfile()).unwrap());
        assert!(lock_path(&path).exists());
    }

    #[test]
    fn corrupt_lockfile_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.lock");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            LockfileTransaction::begin(&path),
            Err(TransactionError::ReadExisting { .. })
        ));

        std::fs::write(&path, r#"{ "lockfile-version": 7 }"#).unwrap();
        let err = LockfileTransaction::begin(&path).unwrap_err();
        assert!(matches!(err, TransactionError::ReadExisting {
            source: LockfileError::UnsupportedVersion(7),
            ..
        }));
        // the corrupt file is left alone
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            r#"{ "lockfile-version": 7 }"#
        );
    }

    #[test]
    fn transactions_are_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.lock");
        let first = LockfileTransaction::begin(&path).unwrap();

        let handle = std::thread::spawn({
            let path = path.clone();
            move || {
                let second = LockfileTransaction::begin(&path).unwrap();
                second.existing().cloned()
            }
        });
        // the second transaction waits until the first is committed
        first.commit(&lockfile()).unwrap();
        assert_eq!(handle.join().unwrap(), Some(lockfile()));
    }
}
