//! Atomic I/O operations with file locking
//!
//! Every durable record in the workspace (cache entries, installed-plugin
//! state, registry manifests) goes through [`write_atomic`] or, when the
//! caller already holds the record's lock, [`replace_file`]. Directory
//! payloads are staged next to their destination and swapped in with
//! [`replace_dir`], so readers observe either the old or the new tree.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use fs2::FileExt;

use crate::{Error, Result};

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Build a hidden sibling path of `path` that is unique within this process.
///
/// The sibling lives in the same directory, which keeps the final rename on a
/// single filesystem.
pub fn unique_sibling(path: &Path, tag: &str) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);
    path.with_file_name(format!(".{}.{}.{}.{}", name, std::process::id(), seq, tag))
}

/// Advisory exclusive lock guarding one record path.
///
/// The lock is taken on a `.<name>.lock` sidecar so the record itself can be
/// replaced by rename while the lock is held. Released on drop.
#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// The record path this lock guards.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!(path = %self.path.display(), "Failed to release lock: {}", e);
        }
    }
}

fn lock_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.lock", name))
}

/// Acquire an exclusive lock for the record at `path`, blocking until it is
/// available.
pub fn lock_exclusive(path: &Path) -> Result<FileLock> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }
    let sidecar = lock_path(path);
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&sidecar)
        .map_err(|e| Error::io(&sidecar, e))?;
    file.lock_exclusive().map_err(|_| Error::LockFailed {
        path: path.to_path_buf(),
    })?;
    Ok(FileLock {
        file,
        path: path.to_path_buf(),
    })
}

/// Write content atomically to a file with locking.
///
/// Uses write-to-temp-then-rename strategy to prevent partial writes.
/// Acquires an advisory lock to prevent concurrent writers.
pub fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let _lock = lock_exclusive(path)?;
    replace_file(path, content)
}

/// Replace a file's content via temp-file-then-rename without taking the
/// record lock. Callers must hold [`lock_exclusive`] for `path`.
pub fn replace_file(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }

    let temp_path = unique_sibling(path, "tmp");
    let mut temp_file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&temp_path)
        .map_err(|e| Error::io(&temp_path, e))?;

    let written = temp_file
        .write_all(content)
        .and_then(|_| temp_file.sync_all());
    drop(temp_file);
    if let Err(e) = written {
        let _ = fs::remove_file(&temp_path);
        return Err(Error::io(&temp_path, e));
    }

    fs::rename(&temp_path, path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        Error::io(path, e)
    })
}

/// Read text content from a file.
pub fn read_text(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|e| Error::io(path, e))
}

/// Read text content from a file, returning `None` if it does not exist.
pub fn read_text_if_exists(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::io(path, e)),
    }
}

/// Recursively copy the contents of `source` into `destination`.
///
/// `destination` is created if missing. Symlinks are followed.
pub fn copy_dir(source: &Path, destination: &Path) -> Result<u64> {
    if !source.is_dir() {
        return Err(Error::InvalidTarget {
            path: source.to_path_buf(),
            reason: "source is not a directory".to_string(),
        });
    }
    fs::create_dir_all(destination).map_err(|e| Error::io(destination, e))?;

    let mut copied = 0;
    let mut pending = vec![(source.to_path_buf(), destination.to_path_buf())];
    while let Some((from_dir, to_dir)) = pending.pop() {
        let entries = fs::read_dir(&from_dir).map_err(|e| Error::io(&from_dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| Error::io(&from_dir, e))?;
            let from = entry.path();
            let to = to_dir.join(entry.file_name());
            if from.is_dir() {
                fs::create_dir_all(&to).map_err(|e| Error::io(&to, e))?;
                pending.push((from, to));
            } else {
                copied += fs::copy(&from, &to).map_err(|e| Error::io(&from, e))?;
            }
        }
    }
    Ok(copied)
}

/// Swap a fully staged directory into `target`.
///
/// Any existing `target` is moved aside first and removed only after the
/// staged tree is in place; if the swap fails the previous tree is restored.
pub fn replace_dir(staged: &Path, target: &Path) -> Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }

    let backup = if target.exists() {
        let backup = unique_sibling(target, "old");
        fs::rename(target, &backup).map_err(|e| Error::io(target, e))?;
        Some(backup)
    } else {
        None
    };

    if let Err(e) = fs::rename(staged, target) {
        if let Some(ref backup) = backup {
            if let Err(restore) = fs::rename(backup, target) {
                tracing::warn!(
                    target = %target.display(),
                    "Failed to restore previous directory: {}",
                    restore
                );
            }
        }
        return Err(Error::io(target, e));
    }

    if let Some(backup) = backup {
        remove_dir_if_exists(&backup)?;
    }
    Ok(())
}

/// Remove a directory tree. Missing directories are not an error.
///
/// Returns whether anything was removed.
pub fn remove_dir_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(Error::io(path, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn write_atomic_creates_parent_and_leaves_no_temp() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/record.toml");

        write_atomic(&path, b"value = 1\n").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "value = 1\n");
        let leftovers: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| n.ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty(), "temp files left: {leftovers:?}");
    }

    #[test]
    fn unique_sibling_never_repeats() {
        let path = Path::new("/tmp/a/record.toml");
        let a = unique_sibling(path, "tmp");
        let b = unique_sibling(path, "tmp");
        assert_ne!(a, b);
        assert_eq!(a.parent(), path.parent());
    }

    #[test]
    fn read_text_if_exists_returns_none_for_missing() {
        let dir = tempdir().unwrap();
        assert!(read_text_if_exists(&dir.path().join("nope")).unwrap().is_none());
    }

    #[test]
    fn copy_dir_copies_nested_files() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(src.join("Binaries/Win64")).unwrap();
        fs::write(src.join("Plugin.uplugin"), "{}").unwrap();
        fs::write(src.join("Binaries/Win64/Plugin.dll"), "bin").unwrap();

        let dst = dir.path().join("dst");
        copy_dir(&src, &dst).unwrap();

        assert!(dst.join("Plugin.uplugin").is_file());
        assert_eq!(
            fs::read_to_string(dst.join("Binaries/Win64/Plugin.dll")).unwrap(),
            "bin"
        );
    }

    #[test]
    fn replace_dir_swaps_existing_tree() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("target");
        fs::create_dir_all(&target).unwrap();
        fs::write(target.join("old.txt"), "old").unwrap();

        let staged = dir.path().join("staged");
        fs::create_dir_all(&staged).unwrap();
        fs::write(staged.join("new.txt"), "new").unwrap();

        replace_dir(&staged, &target).unwrap();

        assert!(!staged.exists());
        assert!(target.join("new.txt").is_file());
        assert!(!target.join("old.txt").exists());
    }

    #[test]
    fn remove_dir_if_exists_is_idempotent() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("gone");
        fs::create_dir_all(&target).unwrap();
        assert!(remove_dir_if_exists(&target).unwrap());
        assert!(!remove_dir_if_exists(&target).unwrap());
    }
}
