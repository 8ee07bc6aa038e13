//! Resolver adapter over a registry.

use upm_resolve::{EngineVersion, PluginManifest, VersionQuery};

use crate::registry::PluginRegistry;

/// Answers resolver queries from a [`PluginRegistry`].
///
/// An unknown plugin has no versions. Any other registry failure aborts the
/// resolution as `upm_resolve::Error::Query`.
pub struct RegistryVersionQuery<R> {
    registry: R,
}

impl<R: PluginRegistry> RegistryVersionQuery<R> {
    pub fn new(registry: R) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }
}

impl<R: PluginRegistry> VersionQuery for RegistryVersionQuery<R> {
    fn available_versions(
        &self,
        name: &str,
        engine: &EngineVersion,
    ) -> upm_resolve::Result<Vec<PluginManifest>> {
        let query_error = |e: crate::Error| upm_resolve::Error::Query {
            name: name.to_string(),
            source: Box::new(e),
        };

        let versions = self.registry.versions(name).map_err(query_error)?;
        let mut manifests = Vec::with_capacity(versions.len());
        for version in &versions {
            match self.registry.fetch_manifest(name, version) {
                Ok(manifest) => manifests.push(manifest),
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(query_error(e)),
            }
        }
        tracing::debug!(plugin = name, engine = %engine, count = manifests.len(), "Queried registry");
        Ok(manifests)
    }
}

impl<R: PluginRegistry + ?Sized> PluginRegistry for &R {
    fn versions(&self, name: &str) -> crate::Result<Vec<semver::Version>> {
        (**self).versions(name)
    }

    fn fetch_manifest(&self, name: &str, version: &semver::Version) -> crate::Result<PluginManifest> {
        (**self).fetch_manifest(name, version)
    }

    fn fetch_source(&self, name: &str, version: &semver::Version) -> crate::Result<std::path::PathBuf> {
        (**self).fetch_source(name, version)
    }

    fn fetch_artifact(
        &self,
        name: &str,
        version: &semver::Version,
        engine: &EngineVersion,
        platform: &str,
    ) -> crate::Result<std::path::PathBuf> {
        (**self).fetch_artifact(name, version, engine, platform)
    }

    fn publish(&self, publication: &crate::Publication) -> crate::Result<crate::PublishReceipt> {
        (**self).publish(publication)
    }

    fn publish_artifact(
        &self,
        name: &str,
        version: &semver::Version,
        engine: &EngineVersion,
        platform: &str,
        package_dir: &std::path::Path,
    ) -> crate::Result<std::path::PathBuf> {
        (**self).publish_artifact(name, version, engine, platform, package_dir)
    }

    fn search(&self, term: &str) -> crate::Result<Vec<crate::PluginSummary>> {
        (**self).search(term)
    }
}
