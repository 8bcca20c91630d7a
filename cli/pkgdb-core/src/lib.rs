pub mod data;
pub mod retry;
mod version;

use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use fslock::LockFile;
use serde::Serialize;
use tracing::debug;
pub use version::Version;

/// Suffix of the advisory lock placed next to a guarded file.
pub const LOCK_SUFFIX: &str = "lock";

#[derive(Debug, thiserror::Error)]
pub enum SerializeError {
    #[error("file stored in an invalid location: {0}")]
    InvalidLocation(PathBuf),
    #[error("failed to acquire lock {0}")]
    AcquireLock(PathBuf, #[source] std::io::Error),
    #[error("failed to open temporary file")]
    OpenTmpFile(#[source] std::io::Error),
    #[error("failed to rename temporary file")]
    RenameTmpFile(#[source] tempfile::PersistError),
    #[error("failed to write temporary file")]
    WriteTmpFile(#[source] serde_json::Error),
    #[error("failed to flush temporary file")]
    FlushTmpFile(#[source] std::io::Error),
}

/// Path of the advisory lock guarding `path`, i.e. `<path>.lock`
pub fn lock_path(path: impl AsRef<Path>) -> PathBuf {
    let mut lock = path.as_ref().as_os_str().to_owned();
    lock.push(".");
    lock.push(LOCK_SUFFIX);
    PathBuf::from(lock)
}

/// Block until the advisory lock for `path` is held.
///
/// The lock is released when the returned [LockFile] is dropped.
/// Callers that read, modify and write `path` should hold the lock for the
/// whole sequence and hand it to [serialize_atomically] at the end.
pub fn acquire_lock(path: impl AsRef<Path>) -> Result<LockFile, SerializeError> {
    let lock_path = lock_path(&path);
    let mut lock = LockFile::open(&lock_path)
        .map_err(|e| SerializeError::AcquireLock(lock_path.clone(), e))?;
    debug!(path = traceable_path(&lock_path), "waiting for lock");
    lock.lock()
        .map_err(|e| SerializeError::AcquireLock(lock_path.clone(), e))?;
    debug!(path = traceable_path(&lock_path), "acquired lock");
    Ok(lock)
}

/// Serialize a value and write it to disk atomically.
///
/// First the value is written to a temporary file,
/// and then it is renamed so the write appears atomic.
/// This also takes a [LockFile] argument to ensure that the write can only be
/// performed when the lock is acquired.
/// It is a bug if you pass a [LockFile] that doesn't correspond to the file, as
/// that is essentially bypassing the lock.
/// `path` must have a parent directory.
pub fn serialize_atomically<T>(
    value: &T,
    path: &impl AsRef<Path>,
    _lock: LockFile,
) -> Result<(), SerializeError>
where
    T: ?Sized + Serialize,
{
    let parent = path
        .as_ref()
        .parent()
        .ok_or(SerializeError::InvalidLocation(path.as_ref().to_path_buf()))?;
    // `Path::parent` returns `Some("")` for bare file names
    let parent = if parent.as_os_str().is_empty() {
        Path::new(".")
    } else {
        parent
    };
    let temp_file = tempfile::NamedTempFile::new_in(parent).map_err(SerializeError::OpenTmpFile)?;

    let mut writer = BufWriter::new(&temp_file);
    serde_json::to_writer_pretty(&mut writer, value).map_err(SerializeError::WriteTmpFile)?;
    writer.write_all(b"\n").map_err(SerializeError::FlushTmpFile)?;
    writer.flush().map_err(SerializeError::FlushTmpFile)?;
    drop(writer);

    temp_file
        .persist(path.as_ref())
        .map_err(SerializeError::RenameTmpFile)?;
    Ok(())
}

/// Returns a `tracing`-compatible form of a [Path]
pub fn traceable_path(p: impl AsRef<Path>) -> impl tracing::Value {
    let path = p.as_ref();
    path.display().to_string()
}

#[cfg(test)]
mod tests {
    use std::fs;

    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn lock_path_appends_suffix() {
        assert_eq!(
            lock_path("/env/manifest.lock"),
            PathBuf::from("/env/manifest.lock.lock")
        );
    }

    #[test]
    fn serialize_atomically_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "garbage").unwrap();

        let lock = acquire_lock(&path).unwrap();
        serialize_atomically(&json!({"a": 1}), &path, lock).unwrap();

        let written = fs::read_to_string(&path).unwrap();
        assert_eq!(written, "{\n  \"a\": 1\n}\n");
        // no temporary files left behind
        let entries = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().into_string().unwrap())
            .filter(|name| !name.ends_with(LOCK_SUFFIX))
            .collect::<Vec<_>>();
        assert_eq!(entries, vec!["state.json".to_string()]);
    }

    #[test]
    fn serialize_atomically_rejects_root() {
        let dir = tempfile::tempdir().unwrap();
        let lock = acquire_lock(dir.path().join("x")).unwrap();
        let err = serialize_atomically(&json!(null), &"/", lock).unwrap_err();
        assert!(matches!(err, SerializeError::InvalidLocation(_)));
    }
}
