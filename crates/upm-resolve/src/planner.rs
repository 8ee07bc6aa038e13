//! Build matrix planning.
//!
//! Expands a [`ResolvedDependencySet`] into the [`BuildUnit`]s needed for each
//! requested (engine version, platform) pair. Units come out dependency
//! first, and every unit lists the indices of the units it must wait for.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::graph::DependencyGraph;
use crate::manifest::{PluginManifest, platform_allowed};
use crate::resolver::ResolvedDependencySet;
use crate::version::EngineVersion;

/// One compilation task. Two units are the same unit only if their
/// provenance maps are equal too.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BuildUnit {
    pub plugin: String,
    pub version: semver::Version,
    pub engine: EngineVersion,
    pub platform: String,
    /// Every dependency reachable from this plugin on this platform, with the
    /// exact version the build uses. Content-only dependencies are included.
    #[serde(default)]
    pub provenance: BTreeMap<String, semver::Version>,
}

impl BuildUnit {
    /// Stable `sha256:<hex>` fingerprint of the provenance map.
    pub fn provenance_fingerprint(&self) -> String {
        let canonical: String = self
            .provenance
            .iter()
            .map(|(name, version)| format!("{name}={version}\n"))
            .collect();
        upm_fs::checksum::compute_content_checksum(&canonical)
    }

    /// Whether this unit and `other` describe the same build slot
    /// (plugin, version, engine, platform), regardless of provenance.
    pub fn same_slot(&self, other: &BuildUnit) -> bool {
        self.plugin == other.plugin
            && self.version == other.version
            && self.engine == other.engine
            && self.platform == other.platform
    }
}

impl fmt::Display for BuildUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} (engine {}, {})",
            self.plugin, self.version, self.engine, self.platform
        )
    }
}

/// Ordered build units plus the prerequisite indices of each.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildPlan {
    units: Vec<BuildUnit>,
    prerequisites: Vec<Vec<usize>>,
}

impl BuildPlan {
    pub fn units(&self) -> &[BuildUnit] {
        &self.units
    }

    /// Indices into [`units`](Self::units) that unit `index` depends on.
    pub fn prerequisites(&self, index: usize) -> &[usize] {
        self.prerequisites
            .get(index)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Indices of every unit that transitively depends on unit `index`.
    pub fn dependents(&self, index: usize) -> BTreeSet<usize> {
        let mut found = BTreeSet::new();
        let mut pending = vec![index];
        while let Some(current) = pending.pop() {
            for (candidate, prereqs) in self.prerequisites.iter().enumerate() {
                if prereqs.contains(&current) && found.insert(candidate) {
                    pending.push(candidate);
                }
            }
        }
        found
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    fn push(&mut self, unit: BuildUnit, prerequisites: Vec<usize>) -> usize {
        if let Some(existing) = self.units.iter().position(|u| *u == unit) {
            return existing;
        }
        self.units.push(unit);
        self.prerequisites.push(prerequisites);
        self.units.len() - 1
    }

    /// Append `other`, dropping units already present. Prerequisite indices
    /// are remapped so the dependency-first order still holds.
    pub fn merge(mut self, other: BuildPlan) -> BuildPlan {
        let mut remap = Vec::with_capacity(other.units.len());
        for (unit, prereqs) in other.units.into_iter().zip(other.prerequisites) {
            let mapped = prereqs.iter().map(|&i| remap[i]).collect();
            remap.push(self.push(unit, mapped));
        }
        self
    }
}

impl IntoIterator for BuildPlan {
    type Item = BuildUnit;
    type IntoIter = std::vec::IntoIter<BuildUnit>;

    fn into_iter(self) -> Self::IntoIter {
        self.units.into_iter()
    }
}

/// Plan the builds for every (engine, platform) pair.
///
/// Pairs are expanded in the order given. Within a pair units follow
/// dependency-first order with ties broken by plugin name.
///
/// # Errors
///
/// `Error::UnsupportedTarget` if a plugin that needs compiling does not
/// declare support for the pair's engine or platform.
pub fn plan(
    resolved: &ResolvedDependencySet,
    engines: &[EngineVersion],
    platforms: &[String],
) -> Result<BuildPlan> {
    let mut build_plan = BuildPlan::default();

    for engine in engines {
        for platform in platforms {
            plan_pair(resolved, engine, platform, &mut build_plan)?;
        }
    }

    tracing::debug!(
        root = resolved.root().name(),
        units = build_plan.len(),
        "Planned build matrix"
    );
    Ok(build_plan)
}

fn plan_pair(
    resolved: &ResolvedDependencySet,
    engine: &EngineVersion,
    platform: &str,
    build_plan: &mut BuildPlan,
) -> Result<()> {
    let graph = active_graph(resolved, platform);
    let order = graph.topological_sort()?;
    let mut placed: HashMap<String, usize> = HashMap::new();

    for name in order {
        let Some(manifest) = resolved.manifest(&name) else {
            continue;
        };
        if !manifest.requires_build() {
            continue;
        }
        check_target(manifest, engine, platform)?;

        let reachable = graph.transitive_dependencies(&name);
        let provenance = reachable
            .iter()
            .filter_map(|dep| resolved.version_of(dep).map(|v| (dep.clone(), v.clone())))
            .collect();
        let prerequisites = reachable
            .iter()
            .filter_map(|dep| placed.get(dep).copied())
            .collect();

        let unit = BuildUnit {
            plugin: name.clone(),
            version: manifest.version().clone(),
            engine: *engine,
            platform: platform.to_string(),
            provenance,
        };
        let index = build_plan.push(unit, prerequisites);
        placed.insert(name, index);
    }
    Ok(())
}

/// Graph of the plugins reachable from the root over edges active on
/// `platform`.
fn active_graph(resolved: &ResolvedDependencySet, platform: &str) -> DependencyGraph {
    let mut graph = DependencyGraph::new();
    let root = resolved.root().name().to_string();
    graph.add_node(root.as_str());

    let mut pending = vec![root];
    let mut visited = BTreeSet::new();
    while let Some(name) = pending.pop() {
        if !visited.insert(name.clone()) {
            continue;
        }
        for edge in resolved.dependencies_of(&name) {
            if platform_allowed(&edge.platforms, platform) {
                graph.add_edge(&name, &edge.dependency);
                pending.push(edge.dependency.clone());
            }
        }
    }
    graph
}

fn check_target(manifest: &PluginManifest, engine: &EngineVersion, platform: &str) -> Result<()> {
    let unsupported = |reason: String| Error::UnsupportedTarget {
        plugin: manifest.name().to_string(),
        version: manifest.version().clone(),
        engine: engine.to_string(),
        platform: platform.to_string(),
        reason,
    };
    if !manifest.supports_engine(engine) {
        return Err(unsupported(format!(
            "supported engine versions are {}",
            manifest.plugin.engine_versions
        )));
    }
    if !manifest.supports_platform(platform) {
        let supported: Vec<&str> = manifest.plugin.platforms.iter().map(String::as_str).collect();
        return Err(unsupported(format!(
            "supported platforms are {}",
            supported.join(", ")
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::DependencyReference;
    use crate::resolver::{VersionQuery, resolve};
    use crate::version::VersionConstraint;
    use pretty_assertions::assert_eq;

    struct Fixed(Vec<PluginManifest>);

    impl VersionQuery for Fixed {
        fn available_versions(&self, name: &str, _: &EngineVersion) -> Result<Vec<PluginManifest>> {
            Ok(self.0.iter().filter(|m| m.name() == name).cloned().collect())
        }
    }

    fn manifest(name: &str, version: &str, deps: &[&str]) -> PluginManifest {
        let mut m = PluginManifest::new(name, semver::Version::parse(version).unwrap());
        m.dependencies = deps.iter().map(|d| DependencyReference::new(*d)).collect();
        m
    }

    fn engine() -> EngineVersion {
        EngineVersion::new(5, 3)
    }

    fn resolved(root: &PluginManifest, catalog: Vec<PluginManifest>) -> ResolvedDependencySet {
        resolve(root, Fixed(catalog), &engine(), &BTreeSet::new()).unwrap()
    }

    #[test]
    fn test_dependency_precedes_dependent() {
        let root = manifest("P", "1.0.0", &["Q"]);
        let set = resolved(&root, vec![manifest("Q", "1.2.0", &[])]);

        let plan = plan(&set, &[engine()], &["Win64".to_string()]).unwrap();
        let names: Vec<&str> = plan.units().iter().map(|u| u.plugin.as_str()).collect();
        assert_eq!(names, vec!["Q", "P"]);
        assert_eq!(plan.prerequisites(1), &[0]);
        assert!(plan.prerequisites(0).is_empty());
        assert_eq!(
            plan.units()[1].provenance,
            BTreeMap::from([("Q".to_string(), semver::Version::new(1, 2, 0))])
        );
    }

    #[test]
    fn test_content_only_dependency_has_no_unit_but_counts_in_provenance() {
        let root = manifest("P", "1.0.0", &["Art"]);
        let mut art = manifest("Art", "3.0.0", &[]);
        art.plugin.content_only = true;
        let set = resolved(&root, vec![art]);

        let plan = plan(&set, &[engine()], &["Win64".to_string()]).unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.units()[0].plugin, "P");
        assert!(plan.units()[0].provenance.contains_key("Art"));
    }

    #[test]
    fn test_matrix_expands_every_pair() {
        let root = manifest("P", "1.0.0", &[]);
        let set = resolved(&root, vec![]);
        let platforms = vec!["Linux".to_string(), "Win64".to_string()];
        let engines = vec![EngineVersion::new(5, 3), EngineVersion::new(5, 4)];

        let plan = plan(&set, &engines, &platforms).unwrap();
        assert_eq!(plan.len(), 4);
        assert_eq!(plan.units()[1].platform, "Win64");
        assert_eq!(plan.units()[2].engine, EngineVersion::new(5, 4));
    }

    #[test]
    fn test_platform_scoped_dependency_only_on_its_platform() {
        let mut root = manifest("P", "1.0.0", &[]);
        let mut win = DependencyReference::new("WinHelpers");
        win.platforms.insert("Win64".to_string());
        root.dependencies.push(win);
        let set = resolve(
            &root,
            Fixed(vec![manifest("WinHelpers", "1.0.0", &[])]),
            &engine(),
            &["Linux".to_string(), "Win64".to_string()].into(),
        )
        .unwrap();

        let plan = plan(&set, &[engine()], &["Linux".to_string(), "Win64".to_string()]).unwrap();
        let rendered: Vec<String> = plan.units().iter().map(|u| format!("{}@{}", u.plugin, u.platform)).collect();
        assert_eq!(rendered, vec!["P@Linux", "WinHelpers@Win64", "P@Win64"]);
        assert!(plan.units()[0].provenance.is_empty());
    }

    #[test]
    fn test_unsupported_engine_fails_fast() {
        let mut root = manifest("P", "1.0.0", &[]);
        root.plugin.engine_versions = VersionConstraint::parse("<5.0").unwrap();
        let set = resolved(&root, vec![]);
        let result = plan(&set, &[engine()], &["Win64".to_string()]);
        assert!(matches!(result, Err(Error::UnsupportedTarget { .. })));
    }

    #[test]
    fn test_unsupported_platform_fails_fast() {
        let root = manifest("P", "1.0.0", &["Q"]);
        let mut q = manifest("Q", "1.0.0", &[]);
        q.plugin.platforms.insert("Win64".to_string());
        let set = resolved(&root, vec![q]);
        match plan(&set, &[engine()], &["Mac".to_string()]) {
            Err(Error::UnsupportedTarget { plugin, platform, .. }) => {
                assert_eq!(plugin, "Q");
                assert_eq!(platform, "Mac");
            }
            other => panic!("expected unsupported target, got {other:?}"),
        }
    }

    #[test]
    fn test_merge_deduplicates_and_remaps() {
        let root = manifest("P", "1.0.0", &["Q"]);
        let set = resolved(&root, vec![manifest("Q", "1.0.0", &[])]);
        let win = plan(&set, &[engine()], &["Win64".to_string()]).unwrap();
        let both = plan(&set, &[engine()], &["Linux".to_string(), "Win64".to_string()]).unwrap();

        let merged = win.clone().merge(both);
        assert_eq!(merged.len(), 4);
        assert_eq!(&merged.units()[..2], win.units());
        assert_eq!(merged.units()[3].plugin, "P");
        assert_eq!(merged.units()[3].platform, "Linux");
        assert_eq!(merged.prerequisites(3), &[2]);
        assert_eq!(merged.dependents(0), BTreeSet::from([1]));
    }

    #[test]
    fn test_fingerprint_tracks_provenance() {
        let mut unit = BuildUnit {
            plugin: "P".into(),
            version: semver::Version::new(1, 0, 0),
            engine: engine(),
            platform: "Win64".into(),
            provenance: BTreeMap::from([("Q".to_string(), semver::Version::new(1, 0, 0))]),
        };
        let before = unit.provenance_fingerprint();
        assert!(before.starts_with("sha256:"));
        unit.provenance.insert("Q".to_string(), semver::Version::new(1, 2, 0));
        assert_ne!(before, unit.provenance_fingerprint());
    }
}
