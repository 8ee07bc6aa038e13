//! Where the orchestrator finds plugin sources during a session.

use std::path::PathBuf;
use std::sync::Arc;

use upm_build::{SourceLocator, SourceMap};
use upm_registry::PluginRegistry;
use upm_resolve::BuildUnit;

/// Local source directories first, then the registry.
///
/// The plugin being built or installed from disk is registered as an
/// override so it never needs publishing first. Overridden plugins never
/// take a prebuilt package from the registry.
pub struct SessionSources {
    overrides: SourceMap,
    registry: Arc<dyn PluginRegistry>,
}

impl SessionSources {
    pub fn new(registry: Arc<dyn PluginRegistry>) -> Self {
        Self {
            overrides: SourceMap::new(),
            registry,
        }
    }

    pub fn with_override(
        mut self,
        plugin: &str,
        version: semver::Version,
        dir: impl Into<PathBuf>,
    ) -> Self {
        self.overrides.insert(plugin, version, dir);
        self
    }
}

impl SourceLocator for SessionSources {
    fn locate(&self, plugin: &str, version: &semver::Version) -> upm_build::Result<PathBuf> {
        if let Ok(dir) = self.overrides.locate(plugin, version) {
            return Ok(dir);
        }
        self.registry
            .fetch_source(plugin, version)
            .map_err(|e| upm_build::Error::SourceUnavailable {
                plugin: plugin.to_string(),
                version: version.clone(),
                reason: e.to_string(),
            })
    }

    fn prebuilt(&self, unit: &BuildUnit) -> Option<PathBuf> {
        if self.overrides.locate(&unit.plugin, &unit.version).is_ok() {
            return None;
        }
        match self
            .registry
            .fetch_artifact(&unit.plugin, &unit.version, &unit.engine, &unit.platform)
        {
            Ok(dir) => Some(dir),
            Err(e) => {
                tracing::debug!(unit = %unit, "No prebuilt package: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use upm_registry::{LocalRegistry, Publication};
    use upm_test_utils::manifest;

    #[test]
    fn test_override_wins_over_registry() {
        let temp = TempDir::new().unwrap();
        let registry = LocalRegistry::new(temp.path().join("registry"));
        let source = temp.path().join("Widget");
        std::fs::create_dir_all(&source).unwrap();
        std::fs::write(source.join("Widget.uplugin"), "{}").unwrap();
        registry
            .publish(&Publication::new(manifest("Widget", "1.0.0"), &source))
            .unwrap();

        let local = temp.path().join("checkout");
        let sources = SessionSources::new(Arc::new(registry))
            .with_override("Widget", semver::Version::new(2, 0, 0), &local);

        assert_eq!(
            sources.locate("Widget", &semver::Version::new(2, 0, 0)).unwrap(),
            local
        );
        let published = sources.locate("Widget", &semver::Version::new(1, 0, 0)).unwrap();
        assert!(published.join("Widget.uplugin").is_file());
    }

    #[test]
    fn test_prebuilt_comes_from_registry_unless_overridden() {
        let temp = TempDir::new().unwrap();
        let registry = LocalRegistry::new(temp.path().join("registry"));
        let source = temp.path().join("Widget");
        std::fs::create_dir_all(&source).unwrap();
        std::fs::write(source.join("Widget.uplugin"), "{}").unwrap();
        let version = semver::Version::new(1, 0, 0);
        registry
            .publish(&Publication::new(manifest("Widget", "1.0.0"), &source))
            .unwrap();
        let engine = upm_resolve::EngineVersion::new(5, 3);
        registry
            .publish_artifact("Widget", &version, &engine, "Linux", &source)
            .unwrap();

        let unit = BuildUnit {
            plugin: "Widget".to_string(),
            version: version.clone(),
            engine,
            platform: "Linux".to_string(),
            provenance: Default::default(),
        };
        let registry: Arc<dyn PluginRegistry> = Arc::new(registry);
        let sources = SessionSources::new(Arc::clone(&registry));
        assert!(sources.prebuilt(&unit).unwrap().join("Widget.uplugin").is_file());

        let other_platform = BuildUnit {
            platform: "Win64".to_string(),
            ..unit.clone()
        };
        assert_eq!(sources.prebuilt(&other_platform), None);

        let local = SessionSources::new(registry).with_override("Widget", version, &source);
        assert_eq!(local.prebuilt(&unit), None);
    }

    #[test]
    fn test_unknown_plugin_is_source_unavailable() {
        let temp = TempDir::new().unwrap();
        let sources = SessionSources::new(Arc::new(LocalRegistry::new(temp.path())));
        let result = sources.locate("Ghost", &semver::Version::new(1, 0, 0));
        assert!(matches!(result, Err(upm_build::Error::SourceUnavailable { .. })));
    }
}
