//! On-disk provenance store.
//!
//! Layout:
//!
//! ```text
//! <cache>/<plugin>/<version>/<engine>/<platform>/<provenance-hash>/
//!     package/      copied plugin package
//!     icon.png      optional
//!     entry.toml    record, written last
//! ```
//!
//! Several entries can share a (plugin, version, engine, platform) key when
//! they were built against different dependency versions. A directory whose
//! `entry.toml` is missing is an interrupted store and is ignored.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use upm_fs::{checksum, io};
use upm_resolve::{BuildUnit, EngineVersion};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Record file inside each entry directory.
pub const ENTRY_FILENAME: &str = "entry.toml";
const PACKAGE_DIR: &str = "package";
const ICON_FILENAME: &str = "icon.png";

/// The slot part of a unit's identity, without provenance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    pub plugin: String,
    pub version: semver::Version,
    pub engine: EngineVersion,
    pub platform: String,
}

impl CacheKey {
    pub fn of(unit: &BuildUnit) -> Self {
        Self {
            plugin: unit.plugin.clone(),
            version: unit.version.clone(),
            engine: unit.engine,
            platform: unit.platform.clone(),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} (engine {}, {})",
            self.plugin, self.version, self.engine, self.platform
        )
    }
}

/// A freshly built package handed to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub package_dir: PathBuf,
    pub icon: Option<PathBuf>,
}

/// One stored build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub id: Uuid,
    pub unit: BuildUnit,
    pub package_dir: PathBuf,
    pub icon: Option<PathBuf>,
    /// `sha256:<hex>` over the package tree.
    pub checksum: String,
    pub built_on: DateTime<Utc>,
}

impl CacheEntry {
    pub fn key(&self) -> CacheKey {
        CacheKey::of(&self.unit)
    }

    /// An entry satisfies a unit only when the slot matches and the
    /// provenance maps are equal.
    pub fn is_hit_for(&self, unit: &BuildUnit) -> bool {
        self.unit.same_slot(unit) && self.unit.provenance == unit.provenance
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct EntryRecord {
    id: Uuid,
    checksum: String,
    built_on: DateTime<Utc>,
    #[serde(default)]
    has_icon: bool,
    unit: BuildUnit,
}

/// Durable mapping from build units to packaged artifacts.
///
/// Entries for different provenance never overwrite each other, and nothing
/// is evicted except through [`delete`](Self::delete) or
/// [`remove`](Self::remove).
pub trait ProvenanceStore: Send + Sync {
    /// Every valid entry stored under `key`.
    fn lookup(&self, key: &CacheKey) -> Result<Vec<CacheEntry>>;

    /// Insert an entry for `unit`. An existing entry with identical
    /// provenance is replaced.
    fn store(&self, unit: &BuildUnit, artifact: &Artifact) -> Result<CacheEntry>;

    fn keys(&self) -> Result<Vec<CacheKey>>;

    /// Delete every entry under `key`; returns how many were removed.
    fn delete(&self, key: &CacheKey) -> Result<usize>;

    /// Delete one entry; returns whether it existed.
    fn remove(&self, entry: &CacheEntry) -> Result<bool>;

    /// The entry whose provenance equals the unit's, if any.
    fn hit(&self, unit: &BuildUnit) -> Result<Option<CacheEntry>> {
        Ok(self
            .lookup(&CacheKey::of(unit))?
            .into_iter()
            .find(|entry| entry.is_hit_for(unit)))
    }

    /// Entries built more than `age` ago, for an external retention policy.
    fn entries_older_than(&self, age: chrono::Duration) -> Result<Vec<CacheEntry>> {
        let cutoff = Utc::now() - age;
        let mut old = Vec::new();
        for key in self.keys()? {
            old.extend(
                self.lookup(&key)?
                    .into_iter()
                    .filter(|entry| entry.built_on < cutoff),
            );
        }
        Ok(old)
    }
}

/// [`ProvenanceStore`] on a local directory tree.
#[derive(Debug, Clone)]
pub struct DiskCache {
    root: PathBuf,
}

impl DiskCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn key_dir(&self, key: &CacheKey) -> PathBuf {
        self.root
            .join(&key.plugin)
            .join(key.version.to_string())
            .join(key.engine.to_string())
            .join(&key.platform)
    }

    fn entry_dir(&self, unit: &BuildUnit) -> PathBuf {
        let fingerprint = unit.provenance_fingerprint();
        let hash = fingerprint.strip_prefix("sha256:").unwrap_or(&fingerprint);
        self.key_dir(&CacheKey::of(unit)).join(hash)
    }

    /// Load and verify one entry directory. `Ok(None)` for a directory
    /// without a record.
    fn read_entry(&self, key: &CacheKey, dir: &Path) -> Result<Option<CacheEntry>> {
        let record_path = dir.join(ENTRY_FILENAME);
        let Some(content) = io::read_text_if_exists(&record_path)? else {
            return Ok(None);
        };
        let corrupt = |reason: String| Error::CacheCorruption {
            path: dir.to_path_buf(),
            reason,
        };

        let record: EntryRecord = toml::from_str(&content).map_err(|e| corrupt(e.to_string()))?;
        if CacheKey::of(&record.unit) != *key {
            return Err(corrupt(format!("record describes {}", record.unit)));
        }
        if self.entry_dir(&record.unit) != dir {
            return Err(corrupt("record provenance does not match its location".to_string()));
        }

        let package_dir = dir.join(PACKAGE_DIR);
        if !package_dir.is_dir() {
            return Err(corrupt("package directory is missing".to_string()));
        }
        let actual = checksum::compute_dir_checksum(&package_dir)?;
        if actual != record.checksum {
            return Err(corrupt(format!(
                "checksum mismatch: recorded {}, found {}",
                record.checksum, actual
            )));
        }

        let icon = dir.join(ICON_FILENAME);
        Ok(Some(CacheEntry {
            id: record.id,
            unit: record.unit,
            package_dir,
            icon: (record.has_icon && icon.is_file()).then_some(icon),
            checksum: record.checksum,
            built_on: record.built_on,
        }))
    }
}

/// Non-hidden child directories of `path`, sorted by name. A missing
/// directory has no children.
fn child_dirs(path: &Path) -> Result<Vec<(String, PathBuf)>> {
    let entries = match fs::read_dir(path) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(upm_fs::Error::io(path, e).into()),
    };
    let mut children = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| upm_fs::Error::io(path, e))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let child = entry.path();
        if !name.starts_with('.') && child.is_dir() {
            children.push((name, child));
        }
    }
    children.sort();
    Ok(children)
}

impl ProvenanceStore for DiskCache {
    fn lookup(&self, key: &CacheKey) -> Result<Vec<CacheEntry>> {
        let mut entries = Vec::new();
        for (_, dir) in child_dirs(&self.key_dir(key))? {
            match self.read_entry(key, &dir) {
                Ok(Some(entry)) => entries.push(entry),
                Ok(None) => {
                    tracing::debug!(path = %dir.display(), "Ignoring cache directory without record");
                }
                Err(e @ Error::CacheCorruption { .. }) => {
                    tracing::warn!("{}; treating as a miss", e);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(entries)
    }

    fn store(&self, unit: &BuildUnit, artifact: &Artifact) -> Result<CacheEntry> {
        let dir = self.entry_dir(unit);
        let record_path = dir.join(ENTRY_FILENAME);
        let _lock = io::lock_exclusive(&record_path)?;

        // Drop the old record first so an interrupted store leaves no record.
        match fs::remove_file(&record_path) {
            Ok(()) => tracing::debug!(unit = %unit, "Replacing cache entry"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(upm_fs::Error::io(&record_path, e).into()),
        }

        let package_dir = dir.join(PACKAGE_DIR);
        let staging = io::unique_sibling(&package_dir, "stage");
        let staged = io::copy_dir(&artifact.package_dir, &staging)
            .and_then(|_| io::replace_dir(&staging, &package_dir));
        if let Err(e) = staged {
            let _ = io::remove_dir_if_exists(&staging);
            return Err(e.into());
        }

        let icon_path = dir.join(ICON_FILENAME);
        let icon = match &artifact.icon {
            Some(source) => {
                let bytes = fs::read(source).map_err(|e| upm_fs::Error::io(source, e))?;
                io::replace_file(&icon_path, &bytes)?;
                Some(icon_path)
            }
            None => {
                if let Err(e) = fs::remove_file(&icon_path) {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        return Err(upm_fs::Error::io(&icon_path, e).into());
                    }
                }
                None
            }
        };

        let record = EntryRecord {
            id: Uuid::new_v4(),
            checksum: checksum::compute_dir_checksum(&package_dir)?,
            built_on: Utc::now(),
            has_icon: icon.is_some(),
            unit: unit.clone(),
        };
        let content = toml::to_string_pretty(&record).map_err(|e| Error::EntrySerialize {
            unit: unit.to_string(),
            message: e.to_string(),
        })?;
        io::replace_file(&record_path, content.as_bytes())?;

        tracing::info!(unit = %unit, id = %record.id, "Stored cache entry");
        Ok(CacheEntry {
            id: record.id,
            unit: record.unit,
            package_dir,
            icon,
            checksum: record.checksum,
            built_on: record.built_on,
        })
    }

    fn keys(&self) -> Result<Vec<CacheKey>> {
        let mut keys = Vec::new();
        for (plugin, plugin_dir) in child_dirs(&self.root)? {
            for (version, version_dir) in child_dirs(&plugin_dir)? {
                let Ok(version) = semver::Version::parse(&version) else {
                    tracing::debug!(path = %version_dir.display(), "Skipping unrecognised cache directory");
                    continue;
                };
                for (engine, engine_dir) in child_dirs(&version_dir)? {
                    let Ok(engine) = EngineVersion::parse(&engine) else {
                        tracing::debug!(path = %engine_dir.display(), "Skipping unrecognised cache directory");
                        continue;
                    };
                    for (platform, _) in child_dirs(&engine_dir)? {
                        keys.push(CacheKey {
                            plugin: plugin.clone(),
                            version: version.clone(),
                            engine,
                            platform,
                        });
                    }
                }
            }
        }
        Ok(keys)
    }

    fn delete(&self, key: &CacheKey) -> Result<usize> {
        let dir = self.key_dir(key);
        let count = child_dirs(&dir)?.len();
        io::remove_dir_if_exists(&dir)?;
        if count > 0 {
            tracing::info!(key = %key, count, "Deleted cache entries");
        }
        Ok(count)
    }

    fn remove(&self, entry: &CacheEntry) -> Result<bool> {
        let dir = self.entry_dir(&entry.unit);
        {
            let record_path = dir.join(ENTRY_FILENAME);
            let _lock = io::lock_exclusive(&record_path)?;
            match fs::remove_file(&record_path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(upm_fs::Error::io(&record_path, e).into()),
            }
        }
        let removed = io::remove_dir_if_exists(&dir)?;
        if removed {
            tracing::info!(unit = %entry.unit, id = %entry.id, "Removed cache entry");
        }
        Ok(removed)
    }
}
