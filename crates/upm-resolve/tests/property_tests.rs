//! Property tests for resolution determinism and plan ordering.

use std::collections::BTreeSet;

use proptest::prelude::*;
use upm_resolve::{
    DependencyReference, EngineVersion, PluginManifest, Result, VersionConstraint, VersionQuery,
    plan, resolve,
};

#[derive(Debug)]
struct Catalog(Vec<PluginManifest>);

impl VersionQuery for Catalog {
    fn available_versions(&self, name: &str, _: &EngineVersion) -> Result<Vec<PluginManifest>> {
        Ok(self.0.iter().filter(|m| m.name() == name).cloned().collect())
    }
}

const CONSTRAINTS: &[&str] = &["*", ">=1.0.0", "<2.0.0", "^1", "~1.1", ">=1.1.0,<3.0.0", "^2"];

/// Plugins `p0..pN`; `pI` only depends on `pJ` with `J > I`, so the graph is
/// acyclic. Every plugin exists in a few versions.
fn catalog_strategy() -> impl Strategy<Value = Catalog> {
    let plugin_count = 2..6usize;
    plugin_count
        .prop_flat_map(|count| {
            let per_plugin = proptest::collection::vec(
                (
                    proptest::collection::btree_set(0..3u64, 1..3),
                    proptest::collection::vec((0..count, 0..CONSTRAINTS.len()), 0..3),
                ),
                count,
            );
            (Just(count), per_plugin)
        })
        .prop_map(|(count, per_plugin)| {
            let mut manifests = Vec::new();
            for (index, (versions, deps)) in per_plugin.into_iter().enumerate() {
                for major in versions {
                    for minor in [0u64, 1, 2] {
                        let mut m = PluginManifest::new(
                            format!("p{index}"),
                            semver::Version::new(major, minor, 0),
                        );
                        let mut seen = BTreeSet::new();
                        for &(target, constraint) in &deps {
                            if target <= index || target >= count || !seen.insert(target) {
                                continue;
                            }
                            let mut reference = DependencyReference::new(format!("p{target}"));
                            reference.version =
                                Some(VersionConstraint::parse(CONSTRAINTS[constraint]).unwrap());
                            m.dependencies.push(reference);
                        }
                        manifests.push(m);
                    }
                }
            }
            Catalog(manifests)
        })
}

proptest! {
    #[test]
    fn resolution_is_deterministic(catalog in catalog_strategy()) {
        let root = catalog.0[0].clone();
        let engine = EngineVersion::new(5, 3);
        let first = resolve(&root, &catalog, &engine, &BTreeSet::new());
        let second = resolve(&root, &catalog, &engine, &BTreeSet::new());
        match (first, second) {
            (Ok(a), Ok(b)) => prop_assert_eq!(a, b),
            (Err(a), Err(b)) => prop_assert_eq!(a.to_string(), b.to_string()),
            (a, b) => prop_assert!(false, "diverged: {:?} vs {:?}", a.is_ok(), b.is_ok()),
        }
    }

    #[test]
    fn selections_satisfy_their_referrers(catalog in catalog_strategy()) {
        let root = catalog.0[0].clone();
        let engine = EngineVersion::new(5, 3);
        if let Ok(resolved) = resolve(&root, &catalog, &engine, &BTreeSet::new()) {
            let mut referrers = vec![resolved.root()];
            referrers.extend(resolved.dependencies());
            for manifest in referrers {
                for dep in &manifest.dependencies {
                    let chosen = resolved.version_of(&dep.name).unwrap();
                    if let Some(constraint) = &dep.version {
                        prop_assert!(constraint.satisfies_version(chosen));
                    }
                }
            }
        }
    }

    #[test]
    fn plan_is_dependency_first(catalog in catalog_strategy()) {
        let root = catalog.0[0].clone();
        let engine = EngineVersion::new(5, 3);
        if let Ok(resolved) = resolve(&root, &catalog, &engine, &BTreeSet::new()) {
            let build_plan = plan(&resolved, &[engine], &["Win64".to_string()]).unwrap();
            for (index, unit) in build_plan.units().iter().enumerate() {
                for &prereq in build_plan.prerequisites(index) {
                    prop_assert!(prereq < index);
                    prop_assert!(unit.provenance.contains_key(&build_plan.units()[prereq].plugin));
                }
            }
        }
    }
}
