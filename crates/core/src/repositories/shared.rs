//! Filesystem helpers shared by the file-backed stores.

use crate::error::{AccessError, AccessResult};
use pipa_uuid::ShardableUuid;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

pub(crate) fn ensure_dir(dir: &Path) -> AccessResult<()> {
    fs::create_dir_all(dir).map_err(AccessError::DirCreation)
}

/// Reads a file, returning `None` if it does not exist.
pub(crate) fn read_optional(path: &Path) -> AccessResult<Option<String>> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(Some(contents)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(AccessError::FileRead(e)),
    }
}

/// Replaces `path` with `contents` so readers see either the old or the new file, never a
/// partial write.
///
/// The data is written to a uniquely named sibling, synced, then renamed over `path`.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> AccessResult<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }

    let tmp = temp_path(path);
    let mut file = File::create(&tmp).map_err(AccessError::FileWrite)?;
    file.write_all(contents).map_err(AccessError::FileWrite)?;
    file.sync_all().map_err(AccessError::FileWrite)?;
    drop(file);

    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        AccessError::FileWrite(e)
    })
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".{}.tmp", ShardableUuid::new()));
    path.with_file_name(name)
}

/// An advisory OS lock on an open file, released on drop.
///
/// Locks coordinate separate processes as well as threads holding separate handles.
pub(crate) struct FileLock<'a> {
    file: &'a File,
}

impl<'a> FileLock<'a> {
    pub(crate) fn exclusive(file: &'a File) -> AccessResult<Self> {
        file.lock().map_err(AccessError::FileLock)?;
        Ok(Self { file })
    }

    pub(crate) fn shared(file: &'a File) -> AccessResult<Self> {
        file.lock_shared().map_err(AccessError::FileLock)?;
        Ok(Self { file })
    }
}

impl Drop for FileLock<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            tracing::warn!(error = %e, "failed to release file lock");
        }
    }
}

/// A lock file guarding a store's read-modify-write cycles.
#[derive(Debug)]
pub(crate) struct LockFile {
    file: File,
}

impl LockFile {
    pub(crate) fn open(path: &Path) -> AccessResult<Self> {
        if let Some(parent) = path.parent() {
            ensure_dir(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .map_err(AccessError::FileLock)?;
        Ok(Self { file })
    }

    pub(crate) fn exclusive(&self) -> AccessResult<FileLock<'_>> {
        FileLock::exclusive(&self.file)
    }

    pub(crate) fn shared(&self) -> AccessResult<FileLock<'_>> {
        FileLock::shared(&self.file)
    }
}
