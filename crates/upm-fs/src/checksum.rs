//! SHA-256 checksum utilities
//!
//! Provides a single canonical checksum format (`sha256:<hex>`) used for
//! cache entry integrity and provenance fingerprints.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// Prefix for all checksums produced by this module
const PREFIX: &str = "sha256:";

/// Compute the SHA-256 checksum of string content.
///
/// Returns a string in the canonical format `"sha256:<hex>"`.
pub fn compute_content_checksum(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{}{:x}", PREFIX, hasher.finalize())
}

/// Compute the SHA-256 checksum of a file's contents.
pub fn compute_file_checksum(path: &Path) -> Result<String> {
    let content = std::fs::read(path).map_err(|e| Error::io(path, e))?;
    let mut hasher = Sha256::new();
    hasher.update(&content);
    Ok(format!("{}{:x}", PREFIX, hasher.finalize()))
}

/// Compute a checksum over a whole directory tree.
///
/// Files are visited in sorted relative-path order and both the path and the
/// content feed the digest, so renaming a file changes the result. Hidden
/// lock sidecars (`.*.lock`) are ignored.
pub fn compute_dir_checksum(root: &Path) -> Result<String> {
    let mut files = Vec::new();
    collect_files(root, root, &mut files)?;
    files.sort();

    let mut hasher = Sha256::new();
    for relative in files {
        let full = root.join(&relative);
        let content = std::fs::read(&full).map_err(|e| Error::io(&full, e))?;
        let name = relative.to_string_lossy().replace('\\', "/");
        hasher.update(name.as_bytes());
        hasher.update([0u8]);
        hasher.update((content.len() as u64).to_le_bytes());
        hasher.update(&content);
    }
    Ok(format!("{}{:x}", PREFIX, hasher.finalize()))
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    let entries = std::fs::read_dir(dir).map_err(|e| Error::io(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| Error::io(dir, e))?;
        let path = entry.path();
        if path.is_dir() {
            collect_files(root, &path, out)?;
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') && name.ends_with(".lock") {
            continue;
        }
        if let Ok(relative) = path.strip_prefix(root) {
            out.push(relative.to_path_buf());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_checksum_has_prefix() {
        let checksum = compute_content_checksum("hello world");
        assert!(checksum.starts_with("sha256:"));
    }

    #[test]
    fn content_checksum_known_value() {
        let checksum = compute_content_checksum("hello world");
        assert_eq!(
            checksum,
            "sha256:b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn file_checksum_matches_content_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.txt");
        std::fs::write(&path, "hello world").unwrap();

        let file_cs = compute_file_checksum(&path).unwrap();
        let content_cs = compute_content_checksum("hello world");
        assert_eq!(file_cs, content_cs);
    }

    #[test]
    fn dir_checksum_tracks_content_and_names() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("Binaries")).unwrap();
        std::fs::write(root.join("Binaries/a.dll"), "one").unwrap();
        std::fs::write(root.join("Plugin.uplugin"), "{}").unwrap();

        let first = compute_dir_checksum(root).unwrap();
        assert_eq!(first, compute_dir_checksum(root).unwrap());

        std::fs::write(root.join("Binaries/a.dll"), "two").unwrap();
        let changed = compute_dir_checksum(root).unwrap();
        assert_ne!(first, changed);

        std::fs::rename(root.join("Binaries/a.dll"), root.join("Binaries/b.dll")).unwrap();
        assert_ne!(changed, compute_dir_checksum(root).unwrap());
    }

    #[test]
    fn dir_checksum_ignores_lock_sidecars() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("data.bin"), "x").unwrap();
        let before = compute_dir_checksum(dir.path()).unwrap();
        std::fs::write(dir.path().join(".data.bin.lock"), "").unwrap();
        assert_eq!(before, compute_dir_checksum(dir.path()).unwrap());
    }
}
