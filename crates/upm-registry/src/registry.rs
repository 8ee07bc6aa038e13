//! The registry contract.

use std::path::PathBuf;

use serde::Serialize;
use upm_resolve::{EngineVersion, PluginManifest};

use crate::error::Result;

/// Everything uploaded when publishing one plugin version.
#[derive(Debug, Clone)]
pub struct Publication {
    pub manifest: PluginManifest,
    /// Plugin source tree, copied as-is.
    pub source_dir: PathBuf,
    pub icon: Option<PathBuf>,
    /// Patch files, stored in the order given.
    pub patches: Vec<PathBuf>,
}

impl Publication {
    pub fn new(manifest: PluginManifest, source_dir: impl Into<PathBuf>) -> Self {
        Self {
            manifest,
            source_dir: source_dir.into(),
            icon: None,
            patches: Vec::new(),
        }
    }

    pub fn with_icon(mut self, icon: impl Into<PathBuf>) -> Self {
        self.icon = Some(icon.into());
        self
    }

    pub fn with_patch(mut self, patch: impl Into<PathBuf>) -> Self {
        self.patches.push(patch.into());
        self
    }
}

/// Acknowledgment of a successful publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishReceipt {
    pub name: String,
    pub version: semver::Version,
    /// `sha256:<hex>` over the stored source tree.
    pub checksum: String,
}

/// One search hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PluginSummary {
    pub name: String,
    pub latest: semver::Version,
    /// Every published version, oldest first.
    pub versions: Vec<semver::Version>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    pub has_icon: bool,
}

/// Source of published plugins.
///
/// Lookups of unknown plugins, versions or binaries fail with
/// [`Error::RemoteNotFound`](crate::Error::RemoteNotFound), except
/// [`versions`](Self::versions) which returns an empty list.
pub trait PluginRegistry: Send + Sync {
    /// Published versions of `name`, oldest first.
    fn versions(&self, name: &str) -> Result<Vec<semver::Version>>;

    fn fetch_manifest(&self, name: &str, version: &semver::Version) -> Result<PluginManifest>;

    /// Directory holding the plugin source tree.
    fn fetch_source(&self, name: &str, version: &semver::Version) -> Result<PathBuf>;

    /// Directory holding a prebuilt package for one engine and platform.
    fn fetch_artifact(
        &self,
        name: &str,
        version: &semver::Version,
        engine: &EngineVersion,
        platform: &str,
    ) -> Result<PathBuf>;

    /// Publish a new plugin version. Existing versions are never replaced.
    fn publish(&self, publication: &Publication) -> Result<PublishReceipt>;

    /// Attach a prebuilt package to an already published version,
    /// replacing any earlier package for the same engine and platform.
    fn publish_artifact(
        &self,
        name: &str,
        version: &semver::Version,
        engine: &EngineVersion,
        platform: &str,
        package_dir: &std::path::Path,
    ) -> Result<PathBuf>;

    /// Plugins whose name or description contains `term`, ignoring case,
    /// sorted by name. An empty term matches everything.
    fn search(&self, term: &str) -> Result<Vec<PluginSummary>>;
}
