//! [`ManifestBuilder`] for plugin manifests in tests.

use std::collections::BTreeSet;

use upm_resolve::{DependencyReference, PluginManifest, VersionConstraint};

/// Shorthand for a manifest with no dependencies.
///
/// # Panics
/// Panics if `version` is not a valid semantic version.
pub fn manifest(name: &str, version: &str) -> PluginManifest {
    ManifestBuilder::new(name, version).build()
}

/// Fluent builder over [`PluginManifest`].
///
/// # Example
///
/// ```rust
/// use upm_test_utils::ManifestBuilder;
///
/// let p = ManifestBuilder::new("P", "1.0.0")
///     .engines(">=5.0")
///     .depends("Q", ">=1.0.0, <2.0.0")
///     .build();
/// assert_eq!(p.dependencies.len(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct ManifestBuilder {
    manifest: PluginManifest,
}

fn constraint(text: &str) -> VersionConstraint {
    VersionConstraint::parse(text)
        .unwrap_or_else(|e| panic!("ManifestBuilder: bad constraint '{text}': {e}"))
}

fn platform_set(platforms: &[&str]) -> BTreeSet<String> {
    platforms.iter().map(|p| p.to_string()).collect()
}

impl ManifestBuilder {
    pub fn new(name: &str, version: &str) -> Self {
        let version = semver::Version::parse(version)
            .unwrap_or_else(|e| panic!("ManifestBuilder: bad version '{version}': {e}"));
        Self {
            manifest: PluginManifest::new(name, version),
        }
    }

    /// Restrict the supported engine versions.
    pub fn engines(mut self, range: &str) -> Self {
        self.manifest.plugin.engine_versions = constraint(range);
        self
    }

    pub fn platforms(mut self, platforms: &[&str]) -> Self {
        self.manifest.plugin.platforms = platform_set(platforms);
        self
    }

    pub fn content_only(mut self) -> Self {
        self.manifest.plugin.content_only = true;
        self
    }

    pub fn description(mut self, text: &str) -> Self {
        self.manifest.plugin.description = Some(text.to_string());
        self
    }

    /// Add a dependency. An empty `range` leaves the version unconstrained.
    pub fn depends(self, name: &str, range: &str) -> Self {
        let reference = DependencyReference::new(name);
        let reference = if range.is_empty() {
            reference
        } else {
            reference.with_version(constraint(range))
        };
        self.reference(reference)
    }

    /// Add a dependency that only applies on `platforms`.
    pub fn depends_on_platforms(self, name: &str, range: &str, platforms: &[&str]) -> Self {
        let mut reference = DependencyReference::new(name).with_version(constraint(range));
        reference.platforms = platform_set(platforms);
        self.reference(reference)
    }

    /// Add a disabled dependency.
    pub fn disabled(self, name: &str, range: &str) -> Self {
        let mut reference = DependencyReference::new(name).with_version(constraint(range));
        reference.enabled = false;
        self.reference(reference)
    }

    pub fn reference(mut self, reference: DependencyReference) -> Self {
        self.manifest.dependencies.push(reference);
        self
    }

    pub fn build(self) -> PluginManifest {
        self.manifest
    }
}
