//! Plugin manifest parsing for `upm.toml` files.
//!
//! A manifest declares a plugin's identity, the engine versions and platforms
//! it supports, and the plugins it depends on. The canonical filename is
//! [`MANIFEST_FILENAME`]; JSON documents are accepted when the path ends in
//! `.json`.
//!
//! # Example TOML
//!
//! ```toml
//! [plugin]
//! name = "Voxels"
//! version = "1.0.0"
//! description = "Voxel terrain"
//! engine_versions = ">=5.1,<5.5"
//! platforms = ["Win64", "Linux"]
//!
//! [[dependencies]]
//! name = "MathKit"
//! version = ">=1.0.0,<2.0.0"
//!
//! [[dependencies]]
//! name = "WinOnlyHelpers"
//! platforms = ["Win64"]
//! ```

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::version::{EngineVersion, VersionConstraint};

/// Canonical manifest filename inside a plugin source tree.
pub const MANIFEST_FILENAME: &str = "upm.toml";

/// Complete plugin manifest.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PluginManifest {
    pub plugin: PluginMeta,
    /// Declared dependencies, in declaration order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<DependencyReference>,
}

/// Identity, compatibility and descriptive metadata of a plugin.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PluginMeta {
    pub name: String,
    pub version: semver::Version,
    /// Engine versions this plugin builds against.
    #[serde(default = "VersionConstraint::any")]
    pub engine_versions: VersionConstraint,
    /// Supported platforms. Empty means every platform.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub platforms: BTreeSet<String>,
    /// The plugin ships no compiled modules and never needs a build.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub content_only: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    /// Patch files applied to the source before building, in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patches: Vec<String>,
}

/// A reference from one plugin to another.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DependencyReference {
    pub name: String,
    /// `None` accepts any version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<VersionConstraint>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Platforms this reference applies to. Empty means every platform.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub platforms: BTreeSet<String>,
}

fn default_enabled() -> bool {
    true
}

impl DependencyReference {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
            enabled: true,
            platforms: BTreeSet::new(),
        }
    }

    pub fn with_version(mut self, constraint: VersionConstraint) -> Self {
        self.version = Some(constraint);
        self
    }

    /// Whether this reference participates in a resolution for `targets`.
    ///
    /// Disabled references never do. An empty platform set on either side
    /// matches everything.
    pub fn is_active_for(&self, targets: &BTreeSet<String>) -> bool {
        self.enabled && platforms_intersect(&self.platforms, targets)
    }

    /// The platforms this reference is active on within `targets`.
    /// Empty means every platform.
    pub fn active_platforms(&self, targets: &BTreeSet<String>) -> BTreeSet<String> {
        match (self.platforms.is_empty(), targets.is_empty()) {
            (true, _) => targets.clone(),
            (false, true) => self.platforms.clone(),
            (false, false) => self.platforms.intersection(targets).cloned().collect(),
        }
    }
}

/// Whether two platform sets overlap, treating empty as "every platform".
pub fn platforms_intersect(a: &BTreeSet<String>, b: &BTreeSet<String>) -> bool {
    a.is_empty() || b.is_empty() || a.intersection(b).next().is_some()
}

/// Whether a platform set admits `platform`, treating empty as "every platform".
pub fn platform_allowed(set: &BTreeSet<String>, platform: &str) -> bool {
    set.is_empty() || set.contains(platform)
}

impl PluginManifest {
    /// Create a manifest with only a name and version.
    pub fn new(name: impl Into<String>, version: semver::Version) -> Self {
        Self {
            plugin: PluginMeta {
                name: name.into(),
                version,
                engine_versions: VersionConstraint::any(),
                platforms: BTreeSet::new(),
                content_only: false,
                description: None,
                author: None,
                license: None,
                homepage: None,
                patches: Vec::new(),
            },
            dependencies: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.plugin.name
    }

    pub fn version(&self) -> &semver::Version {
        &self.plugin.version
    }

    /// Whether the plugin declares support for `engine`.
    pub fn supports_engine(&self, engine: &EngineVersion) -> bool {
        self.plugin
            .engine_versions
            .satisfies_version(&engine.to_semver())
    }

    /// Whether the plugin declares support for `platform`.
    pub fn supports_platform(&self, platform: &str) -> bool {
        platform_allowed(&self.plugin.platforms, platform)
    }

    /// Whether a build unit is needed for this plugin.
    pub fn requires_build(&self) -> bool {
        !self.plugin.content_only
    }

    /// Parse a manifest from TOML content.
    pub fn from_toml(content: &str) -> Result<Self> {
        let manifest: Self = toml::from_str(content).map_err(|e| Error::ManifestParse {
            format: "TOML".into(),
            message: e.to_string(),
        })?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Parse a manifest from JSON content.
    pub fn from_json(content: &str) -> Result<Self> {
        let manifest: Self = serde_json::from_str(content).map_err(|e| Error::ManifestParse {
            format: "JSON".into(),
            message: e.to_string(),
        })?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Load a manifest from disk. A directory is searched for
    /// [`MANIFEST_FILENAME`]; a `.json` path is read as JSON, anything else
    /// as TOML.
    pub fn load(path: &Path) -> Result<Self> {
        let file = if path.is_dir() {
            path.join(MANIFEST_FILENAME)
        } else {
            path.to_path_buf()
        };
        if !file.exists() {
            return Err(Error::ManifestNotFound(file));
        }
        let content = upm_fs::io::read_text(&file)?;
        let is_json = file
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        if is_json {
            Self::from_json(&content)
        } else {
            Self::from_toml(&content)
        }
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::ManifestSerialize(e.to_string()))
    }

    fn validate(&self) -> Result<()> {
        validate_name(&self.plugin.name)?;
        let mut seen = BTreeSet::new();
        for dep in &self.dependencies {
            validate_name(&dep.name)?;
            if dep.name == self.plugin.name {
                return Err(Error::CyclicDependency {
                    cycle: vec![dep.name.clone(), dep.name.clone()],
                });
            }
            if !seen.insert(dep.name.as_str()) {
                return Err(Error::InvalidName {
                    name: dep.name.clone(),
                    reason: "dependency declared more than once".to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Plugin names become directory names in the cache, the registry and the
/// engine's package directory.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidName {
            name: name.to_string(),
            reason: "plugin name must not be empty".to_string(),
        });
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(Error::InvalidName {
            name: name.to_string(),
            reason: "plugin name must contain only alphanumeric characters, hyphens, or underscores"
                .to_string(),
        });
    }
    Ok(())
}
