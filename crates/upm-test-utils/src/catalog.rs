//! [`MemoryCatalog`]: published manifests held in memory.

use std::collections::BTreeMap;
use std::sync::Mutex;

use upm_resolve::{EngineVersion, PluginManifest, VersionQuery};

/// An in-memory set of published plugin versions.
///
/// Counts queries so tests can assert on how often the resolver asked.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    plugins: BTreeMap<String, Vec<PluginManifest>>,
    queries: Mutex<Vec<String>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a catalog from a list of manifests.
    pub fn with(manifests: impl IntoIterator<Item = PluginManifest>) -> Self {
        let mut catalog = Self::new();
        for manifest in manifests {
            catalog.add(manifest);
        }
        catalog
    }

    /// Publish `manifest`, replacing any entry with the same name and version.
    pub fn add(&mut self, manifest: PluginManifest) {
        let versions = self.plugins.entry(manifest.name().to_string()).or_default();
        versions.retain(|m| m.version() != manifest.version());
        versions.push(manifest);
    }

    pub fn get(&self, name: &str, version: &str) -> Option<&PluginManifest> {
        self.plugins
            .get(name)?
            .iter()
            .find(|m| m.version().to_string() == version)
    }

    /// Names queried so far, in query order.
    pub fn queries(&self) -> Vec<String> {
        self.queries
            .lock()
            .map(|q| q.clone())
            .unwrap_or_default()
    }
}

impl VersionQuery for MemoryCatalog {
    fn available_versions(
        &self,
        name: &str,
        _engine: &EngineVersion,
    ) -> upm_resolve::Result<Vec<PluginManifest>> {
        if let Ok(mut queries) = self.queries.lock() {
            queries.push(name.to_string());
        }
        Ok(self.plugins.get(name).cloned().unwrap_or_default())
    }
}
