//! Directory-backed registry.
//!
//! ```text
//! <root>/<name>/<version>/
//!     manifest.toml
//!     source/
//!     icon.png                        optional
//!     patches/<file>                  optional
//!     binaries/<engine>/<platform>/   prebuilt packages
//! ```
//!
//! A version exists once its `manifest.toml` does. Versions are staged in a
//! hidden sibling directory and renamed into place.

use std::fs;
use std::path::{Path, PathBuf};

use upm_fs::{checksum, io};
use upm_resolve::manifest::validate_name;
use upm_resolve::{EngineVersion, PluginManifest};

use crate::error::{Error, Result};
use crate::registry::{PluginRegistry, PluginSummary, Publication, PublishReceipt};

const MANIFEST_FILE: &str = "manifest.toml";
const SOURCE_DIR: &str = "source";
const ICON_FILE: &str = "icon.png";
const PATCHES_DIR: &str = "patches";
const BINARIES_DIR: &str = "binaries";

#[derive(Debug, Clone)]
pub struct LocalRegistry {
    root: PathBuf,
}

impl LocalRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn version_dir(&self, name: &str, version: &semver::Version) -> PathBuf {
        self.root.join(name).join(version.to_string())
    }

    fn require_version(&self, name: &str, version: &semver::Version) -> Result<PathBuf> {
        validate_name(name)?;
        let dir = self.version_dir(name, version);
        if !dir.join(MANIFEST_FILE).is_file() {
            return Err(Error::not_found(format!("{name} {version}")));
        }
        Ok(dir)
    }

    fn validate_publication(publication: &Publication) -> Result<Vec<String>> {
        let name = publication.manifest.name();
        validate_name(name)?;
        let invalid = |reason: String| Error::InvalidPublication {
            name: name.to_string(),
            reason,
        };

        if !publication.source_dir.is_dir() {
            return Err(invalid(format!(
                "source directory {} does not exist",
                publication.source_dir.display()
            )));
        }
        if let Some(icon) = &publication.icon {
            if !icon.is_file() {
                return Err(invalid(format!("icon {} does not exist", icon.display())));
            }
        }

        let mut names = Vec::with_capacity(publication.patches.len());
        for patch in &publication.patches {
            let file_name = patch
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .filter(|_| patch.is_file())
                .ok_or_else(|| invalid(format!("patch {} is not a file", patch.display())))?;
            if names.contains(&file_name) {
                return Err(invalid(format!("patch {file_name} given twice")));
            }
            names.push(file_name);
        }
        Ok(names)
    }

    /// Populate a staging directory with everything a version holds.
    fn stage_version(
        publication: &Publication,
        patch_names: &[String],
        staging: &Path,
    ) -> Result<String> {
        let source = staging.join(SOURCE_DIR);
        io::copy_dir(&publication.source_dir, &source)?;

        if let Some(icon) = &publication.icon {
            let target = staging.join(ICON_FILE);
            fs::copy(icon, &target).map_err(|e| upm_fs::Error::io(icon, e))?;
        }

        if !publication.patches.is_empty() {
            let patches = staging.join(PATCHES_DIR);
            fs::create_dir_all(&patches).map_err(|e| upm_fs::Error::io(&patches, e))?;
            for (patch, name) in publication.patches.iter().zip(patch_names) {
                fs::copy(patch, patches.join(name)).map_err(|e| upm_fs::Error::io(patch, e))?;
            }
        }

        let mut manifest = publication.manifest.clone();
        if !patch_names.is_empty() {
            manifest.plugin.patches = patch_names.to_vec();
        }
        io::replace_file(&staging.join(MANIFEST_FILE), manifest.to_toml()?.as_bytes())?;

        Ok(checksum::compute_dir_checksum(&source)?)
    }
}

/// Non-hidden child directory names of `path`. A missing directory has none.
fn child_names(path: &Path) -> Result<Vec<String>> {
    let entries = match fs::read_dir(path) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(upm_fs::Error::io(path, e).into()),
    };
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| upm_fs::Error::io(path, e))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.starts_with('.') && entry.path().is_dir() {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}

impl PluginRegistry for LocalRegistry {
    fn versions(&self, name: &str) -> Result<Vec<semver::Version>> {
        validate_name(name)?;
        let plugin_dir = self.root.join(name);
        let mut versions: Vec<semver::Version> = child_names(&plugin_dir)?
            .iter()
            .filter_map(|dir| semver::Version::parse(dir).ok())
            .filter(|v| self.version_dir(name, v).join(MANIFEST_FILE).is_file())
            .collect();
        versions.sort();
        Ok(versions)
    }

    fn fetch_manifest(&self, name: &str, version: &semver::Version) -> Result<PluginManifest> {
        let path = self.require_version(name, version)?.join(MANIFEST_FILE);
        let content = io::read_text(&path)?;
        let manifest = PluginManifest::from_toml(&content).map_err(|e| Error::InvalidManifest {
            path: path.clone(),
            message: e.to_string(),
        })?;
        if manifest.name() != name || manifest.version() != version {
            return Err(Error::InvalidManifest {
                path,
                message: format!(
                    "describes {} {} instead of {name} {version}",
                    manifest.name(),
                    manifest.version()
                ),
            });
        }
        Ok(manifest)
    }

    fn fetch_source(&self, name: &str, version: &semver::Version) -> Result<PathBuf> {
        let source = self.require_version(name, version)?.join(SOURCE_DIR);
        if !source.is_dir() {
            return Err(Error::not_found(format!("source of {name} {version}")));
        }
        Ok(source)
    }

    fn fetch_artifact(
        &self,
        name: &str,
        version: &semver::Version,
        engine: &EngineVersion,
        platform: &str,
    ) -> Result<PathBuf> {
        let package = self
            .require_version(name, version)?
            .join(BINARIES_DIR)
            .join(engine.to_string())
            .join(platform);
        if !package.is_dir() {
            return Err(Error::not_found(format!(
                "{name} {version} package for engine {engine}, {platform}"
            )));
        }
        Ok(package)
    }

    fn publish(&self, publication: &Publication) -> Result<PublishReceipt> {
        let patch_names = Self::validate_publication(publication)?;
        let name = publication.manifest.name();
        let version = publication.manifest.version();
        let version_dir = self.version_dir(name, version);

        let _lock = io::lock_exclusive(&version_dir)?;
        if version_dir.join(MANIFEST_FILE).exists() {
            return Err(Error::AlreadyPublished {
                name: name.to_string(),
                version: version.clone(),
            });
        }

        let staging = io::unique_sibling(&version_dir, "stage");
        let staged = Self::stage_version(publication, &patch_names, &staging)
            .and_then(|checksum| {
                io::replace_dir(&staging, &version_dir)?;
                Ok(checksum)
            });
        let checksum = match staged {
            Ok(checksum) => checksum,
            Err(e) => {
                let _ = io::remove_dir_if_exists(&staging);
                return Err(e);
            }
        };

        tracing::info!(plugin = name, version = %version, "Published plugin");
        Ok(PublishReceipt {
            name: name.to_string(),
            version: version.clone(),
            checksum,
        })
    }

    fn publish_artifact(
        &self,
        name: &str,
        version: &semver::Version,
        engine: &EngineVersion,
        platform: &str,
        package_dir: &Path,
    ) -> Result<PathBuf> {
        validate_name(platform)?;
        let target = self
            .require_version(name, version)?
            .join(BINARIES_DIR)
            .join(engine.to_string())
            .join(platform);

        let _lock = io::lock_exclusive(&target)?;
        let staging = io::unique_sibling(&target, "stage");
        let staged = io::copy_dir(package_dir, &staging).and_then(|_| io::replace_dir(&staging, &target));
        if let Err(e) = staged {
            let _ = io::remove_dir_if_exists(&staging);
            return Err(e.into());
        }

        tracing::info!(plugin = name, version = %version, engine = %engine, platform, "Published package");
        Ok(target)
    }

    fn search(&self, term: &str) -> Result<Vec<PluginSummary>> {
        let needle = term.to_lowercase();
        let mut summaries = Vec::new();

        for name in child_names(&self.root)? {
            if validate_name(&name).is_err() {
                continue;
            }
            let versions = self.versions(&name)?;
            let Some(latest) = versions.last().cloned() else {
                continue;
            };
            let manifest = match self.fetch_manifest(&name, &latest) {
                Ok(manifest) => manifest,
                Err(e) => {
                    tracing::warn!(plugin = %name, "Skipping unreadable registry entry: {}", e);
                    continue;
                }
            };

            let description = manifest.plugin.description.clone();
            let matches = needle.is_empty()
                || name.to_lowercase().contains(&needle)
                || description
                    .as_deref()
                    .is_some_and(|d| d.to_lowercase().contains(&needle));
            if !matches {
                continue;
            }

            summaries.push(PluginSummary {
                has_icon: self.version_dir(&name, &latest).join(ICON_FILE).is_file(),
                name,
                latest,
                versions,
                description,
                author: manifest.plugin.author,
            });
        }
        Ok(summaries)
    }
}
