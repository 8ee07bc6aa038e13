//! Newest-wins dependency resolution.
//!
//! [`resolve`] walks the dependency graph of a root manifest depth first,
//! merges the constraints every referrer places on a dependency, and picks
//! the highest available version that satisfies them all. Disabled
//! references and references that do not apply to any target platform are
//! ignored.
//!
//! A later referrer can tighten a constraint after a dependency was already
//! selected. The resolver then runs another pass, seeded with what it learned,
//! until every selection is the highest version its actual referrers accept.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tokio_util::sync::CancellationToken;

use crate::error::{Error, Referrer, Result};
use crate::manifest::PluginManifest;
use crate::version::{EngineVersion, VersionConstraint};

/// Upper bound on re-selection passes before giving up.
pub const DEFAULT_MAX_PASSES: usize = 16;

/// Source of candidate manifests for a dependency name.
///
/// Implementations return every published version of `name` they know about;
/// the resolver itself discards candidates whose engine range excludes the
/// target engine.
pub trait VersionQuery {
    fn available_versions(&self, name: &str, engine: &EngineVersion) -> Result<Vec<PluginManifest>>;
}

impl<Q: VersionQuery + ?Sized> VersionQuery for &Q {
    fn available_versions(&self, name: &str, engine: &EngineVersion) -> Result<Vec<PluginManifest>> {
        (**self).available_versions(name, engine)
    }
}

/// One active dependency edge in a resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEdge {
    pub dependency: String,
    /// Platforms the edge applies to. Empty means every platform.
    pub platforms: BTreeSet<String>,
}

/// The versions chosen for one (root manifest, engine version, platform set)
/// context, together with the manifests and active edges they imply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDependencySet {
    root: PluginManifest,
    engine: EngineVersion,
    platforms: BTreeSet<String>,
    manifests: BTreeMap<String, PluginManifest>,
    edges: BTreeMap<String, Vec<ResolvedEdge>>,
}

impl ResolvedDependencySet {
    pub fn root(&self) -> &PluginManifest {
        &self.root
    }

    pub fn engine(&self) -> &EngineVersion {
        &self.engine
    }

    pub fn platforms(&self) -> &BTreeSet<String> {
        &self.platforms
    }

    /// Chosen version for each dependency (the root is not included).
    pub fn versions(&self) -> BTreeMap<String, semver::Version> {
        self.manifests
            .iter()
            .map(|(name, m)| (name.clone(), m.version().clone()))
            .collect()
    }

    pub fn version_of(&self, name: &str) -> Option<&semver::Version> {
        self.manifest(name).map(PluginManifest::version)
    }

    /// Manifest for the root or any resolved dependency.
    pub fn manifest(&self, name: &str) -> Option<&PluginManifest> {
        if name == self.root.name() {
            Some(&self.root)
        } else {
            self.manifests.get(name)
        }
    }

    /// Active dependency edges leaving `name`.
    pub fn dependencies_of(&self, name: &str) -> &[ResolvedEdge] {
        self.edges.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Resolved dependency manifests, ordered by name.
    pub fn dependencies(&self) -> impl Iterator<Item = &PluginManifest> {
        self.manifests.values()
    }

    pub fn len(&self) -> usize {
        self.manifests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.manifests.is_empty()
    }
}

/// Resolve `root` with default options.
pub fn resolve<Q: VersionQuery>(
    root: &PluginManifest,
    query: Q,
    engine: &EngineVersion,
    platforms: &BTreeSet<String>,
) -> Result<ResolvedDependencySet> {
    Resolver::new(query).resolve(root, engine, platforms)
}

/// Configurable dependency resolver.
pub struct Resolver<Q> {
    query: Q,
    max_passes: usize,
    cancel: Option<CancellationToken>,
}

impl<Q: VersionQuery> Resolver<Q> {
    pub fn new(query: Q) -> Self {
        Self {
            query,
            max_passes: DEFAULT_MAX_PASSES,
            cancel: None,
        }
    }

    pub fn with_max_passes(mut self, max_passes: usize) -> Self {
        self.max_passes = max_passes.max(1);
        self
    }

    /// Abort with [`Error::Cancelled`] once `token` fires.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn resolve(
        &self,
        root: &PluginManifest,
        engine: &EngineVersion,
        platforms: &BTreeSet<String>,
    ) -> Result<ResolvedDependencySet> {
        let mut candidates = Candidates::new(&self.query, engine);
        let mut hints: BTreeMap<String, Vec<Referrer>> = BTreeMap::new();
        let mut unstable = String::new();

        for pass in 0..self.max_passes {
            if self.cancel.as_ref().is_some_and(|c| c.is_cancelled()) {
                return Err(Error::Cancelled);
            }

            let outcome = traverse(root, platforms, &mut candidates, &hints)?;
            match outcome.first_unsettled(&mut candidates)? {
                None => {
                    tracing::debug!(
                        root = root.name(),
                        engine = %engine,
                        passes = pass + 1,
                        resolved = outcome.selected.len(),
                        "Dependency resolution settled"
                    );
                    return Ok(ResolvedDependencySet {
                        root: root.clone(),
                        engine: *engine,
                        platforms: platforms.clone(),
                        manifests: outcome.selected,
                        edges: outcome.edges,
                    });
                }
                Some(name) => {
                    tracing::debug!(dependency = %name, pass, "Re-selecting after tightened constraint");
                    unstable = name;
                    hints = outcome.constraints;
                }
            }
        }

        Err(Error::UnstableResolution {
            name: unstable,
            passes: self.max_passes,
        })
    }
}

/// Memoised, engine-filtered candidate lists, newest first.
struct Candidates<'q, Q> {
    query: &'q Q,
    engine: &'q EngineVersion,
    cache: HashMap<String, Vec<PluginManifest>>,
}

impl<'q, Q: VersionQuery> Candidates<'q, Q> {
    fn new(query: &'q Q, engine: &'q EngineVersion) -> Self {
        Self {
            query,
            engine,
            cache: HashMap::new(),
        }
    }

    fn for_name(&mut self, name: &str) -> Result<&[PluginManifest]> {
        if !self.cache.contains_key(name) {
            let mut found: Vec<PluginManifest> = self
                .query
                .available_versions(name, self.engine)?
                .into_iter()
                .filter(|m| m.name() == name && m.supports_engine(self.engine))
                .collect();
            found.sort_by(|a, b| b.version().cmp(a.version()));
            found.dedup_by(|a, b| a.version() == b.version());
            self.cache.insert(name.to_string(), found);
        }
        Ok(self.cache.get(name).map(Vec::as_slice).unwrap_or(&[]))
    }

    /// Highest candidate satisfying every constraint in `referrers`.
    fn best(&mut self, name: &str, referrers: &[Referrer]) -> Result<Option<PluginManifest>> {
        let merged = merge(referrers);
        Ok(self
            .for_name(name)?
            .iter()
            .find(|m| merged.satisfies_version(m.version()))
            .cloned())
    }

    fn conflict(&mut self, name: &str, referrers: &[Referrer]) -> Result<Error> {
        let available = self
            .for_name(name)?
            .iter()
            .map(|m| m.version().clone())
            .collect();
        Ok(Error::DependencyResolution {
            name: name.to_string(),
            engine: self.engine.to_string(),
            referrers: referrers.to_vec(),
            available,
        })
    }
}

fn merge(referrers: &[Referrer]) -> VersionConstraint {
    referrers
        .iter()
        .filter_map(|r| r.constraint.as_ref())
        .fold(VersionConstraint::any(), |acc, c| acc.intersect(c))
}

struct Frame {
    manifest: PluginManifest,
    next: usize,
}

struct PassOutcome {
    selected: BTreeMap<String, PluginManifest>,
    constraints: BTreeMap<String, Vec<Referrer>>,
    edges: BTreeMap<String, Vec<ResolvedEdge>>,
}

impl PassOutcome {
    /// First selection that is no longer the best choice for the referrers
    /// collected in this pass, or a conflict error if no choice exists.
    fn first_unsettled<Q: VersionQuery>(&self, candidates: &mut Candidates<'_, Q>) -> Result<Option<String>> {
        for (name, chosen) in &self.selected {
            let referrers = self.constraints.get(name).map(Vec::as_slice).unwrap_or(&[]);
            match candidates.best(name, referrers)? {
                Some(best) if best.version() == chosen.version() => {}
                Some(_) => return Ok(Some(name.clone())),
                None => return Err(candidates.conflict(name, referrers)?),
            }
        }
        Ok(None)
    }
}

/// One depth-first pass over the graph using an explicit frame stack.
fn traverse<Q: VersionQuery>(
    root: &PluginManifest,
    platforms: &BTreeSet<String>,
    candidates: &mut Candidates<'_, Q>,
    hints: &BTreeMap<String, Vec<Referrer>>,
) -> Result<PassOutcome> {
    let mut outcome = PassOutcome {
        selected: BTreeMap::new(),
        constraints: BTreeMap::new(),
        edges: BTreeMap::new(),
    };
    let mut stack = vec![Frame {
        manifest: root.clone(),
        next: 0,
    }];

    while let Some(frame) = stack.last_mut() {
        let Some(reference) = frame.manifest.dependencies.get(frame.next).cloned() else {
            stack.pop();
            continue;
        };
        frame.next += 1;

        if !reference.is_active_for(platforms) {
            tracing::trace!(dependency = %reference.name, "Skipping inactive reference");
            continue;
        }

        let referrer = Referrer {
            name: frame.manifest.name().to_string(),
            version: frame.manifest.version().clone(),
            constraint: reference.version.clone(),
        };
        outcome
            .edges
            .entry(referrer.name.clone())
            .or_default()
            .push(ResolvedEdge {
                dependency: reference.name.clone(),
                platforms: reference.active_platforms(platforms),
            });

        if let Some(position) = stack
            .iter()
            .position(|f| f.manifest.name() == reference.name)
        {
            let mut cycle: Vec<String> = stack[position..]
                .iter()
                .map(|f| f.manifest.name().to_string())
                .collect();
            cycle.push(reference.name.clone());
            return Err(Error::CyclicDependency { cycle });
        }

        let referrers = outcome.constraints.entry(reference.name.clone()).or_default();
        referrers.push(referrer);

        // Already selected in this pass; the end-of-pass check revisits it.
        if outcome.selected.contains_key(&reference.name) {
            continue;
        }

        let referrers = referrers.clone();
        let mut seeded = hints.get(&reference.name).cloned().unwrap_or_default();
        seeded.extend(referrers.iter().cloned());

        let choice = match candidates.best(&reference.name, &seeded)? {
            Some(m) => m,
            None => match candidates.best(&reference.name, &referrers)? {
                Some(m) => m,
                None => return Err(candidates.conflict(&reference.name, &referrers)?),
            },
        };

        tracing::debug!(
            dependency = %reference.name,
            version = %choice.version(),
            "Selected dependency version"
        );
        outcome.selected.insert(reference.name.clone(), choice.clone());
        stack.push(Frame {
            manifest: choice,
            next: 0,
        });
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[derive(Default)]
    struct Catalog {
        plugins: Vec<PluginManifest>,
    }

    impl Catalog {
        fn add(&mut self, name: &str, version: &str, deps: &[(&str, Option<&str>)]) {
            let mut manifest = PluginManifest::new(name, semver::Version::parse(version).unwrap());
            for (dep, constraint) in deps {
                let mut reference = crate::DependencyReference::new(*dep);
                reference.version = constraint.map(|c| VersionConstraint::parse(c).unwrap());
                manifest.dependencies.push(reference);
            }
            self.plugins.push(manifest);
        }

        fn get(&self, name: &str, version: &str) -> PluginManifest {
            self.plugins
                .iter()
                .find(|m| m.name() == name && m.version().to_string() == version)
                .cloned()
                .unwrap()
        }
    }

    impl VersionQuery for Catalog {
        fn available_versions(&self, name: &str, _engine: &EngineVersion) -> Result<Vec<PluginManifest>> {
            Ok(self.plugins.iter().filter(|m| m.name() == name).cloned().collect())
        }
    }

    fn engine() -> EngineVersion {
        EngineVersion::new(5, 3)
    }

    fn all_platforms() -> BTreeSet<String> {
        BTreeSet::new()
    }

    #[test]
    fn test_newest_satisfying_version_wins() {
        let mut catalog = Catalog::default();
        catalog.add("P", "1.0.0", &[("Q", Some(">=1.0.0,<2.0.0"))]);
        catalog.add("Q", "1.0.0", &[]);
        catalog.add("Q", "1.2.0", &[]);
        catalog.add("Q", "2.0.0", &[]);

        let root = catalog.get("P", "1.0.0");
        let resolved = resolve(&root, &catalog, &engine(), &all_platforms()).unwrap();
        assert_eq!(resolved.version_of("Q"), Some(&semver::Version::new(1, 2, 0)));
        assert_eq!(resolved.len(), 1);
    }

    #[test]
    fn test_cycle_names_path() {
        let mut catalog = Catalog::default();
        catalog.add("A", "1.0.0", &[("B", None)]);
        catalog.add("B", "1.0.0", &[("A", None)]);

        let root = catalog.get("A", "1.0.0");
        match resolve(&root, &catalog, &engine(), &all_platforms()) {
            Err(Error::CyclicDependency { cycle }) => assert_eq!(cycle, vec!["A", "B", "A"]),
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_conflict_names_every_referrer() {
        let mut catalog = Catalog::default();
        catalog.add("Root", "1.0.0", &[("A", None), ("B", None)]);
        catalog.add("A", "1.0.0", &[("C", Some(">=2.0.0"))]);
        catalog.add("B", "1.0.0", &[("C", Some("<2.0.0"))]);
        catalog.add("C", "1.0.0", &[]);
        catalog.add("C", "2.0.0", &[]);

        let root = catalog.get("Root", "1.0.0");
        match resolve(&root, &catalog, &engine(), &all_platforms()) {
            Err(Error::DependencyResolution { name, referrers, .. }) => {
                assert_eq!(name, "C");
                let names: Vec<&str> = referrers.iter().map(|r| r.name.as_str()).collect();
                assert_eq!(names, vec!["A", "B"]);
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn test_later_referrer_forces_reselection() {
        let mut catalog = Catalog::default();
        catalog.add("Root", "1.0.0", &[("C", None), ("A", None)]);
        catalog.add("A", "1.0.0", &[("C", Some("<2.0.0"))]);
        catalog.add("C", "1.5.0", &[]);
        catalog.add("C", "3.0.0", &[("Extra", None)]);
        catalog.add("Extra", "1.0.0", &[]);

        let root = catalog.get("Root", "1.0.0");
        let resolved = resolve(&root, &catalog, &engine(), &all_platforms()).unwrap();
        assert_eq!(resolved.version_of("C"), Some(&semver::Version::new(1, 5, 0)));
        // Only reachable through C 3.0.0, which was abandoned.
        assert!(resolved.version_of("Extra").is_none());
    }

    #[test]
    fn test_disabled_and_foreign_platform_references_skipped() {
        let mut catalog = Catalog::default();
        catalog.add("Mac", "1.0.0", &[]);
        catalog.add("Off", "1.0.0", &[]);
        let mut root = PluginManifest::new("Root", semver::Version::new(1, 0, 0));
        let mut mac = crate::DependencyReference::new("Mac");
        mac.platforms.insert("Mac".to_string());
        let mut off = crate::DependencyReference::new("Off");
        off.enabled = false;
        // Not in the catalog at all; would fail if it were consulted.
        let mut missing = crate::DependencyReference::new("Missing");
        missing.platforms.insert("Mac".to_string());
        root.dependencies = vec![mac, off, missing];

        let win: BTreeSet<String> = ["Win64".to_string()].into();
        let resolved = resolve(&root, &catalog, &engine(), &win).unwrap();
        assert!(resolved.is_empty());
        assert!(resolved.dependencies_of("Root").is_empty());
    }

    #[test]
    fn test_engine_incompatible_candidates_ignored() {
        let mut catalog = Catalog::default();
        catalog.add("Root", "1.0.0", &[("Q", None)]);
        catalog.add("Q", "1.0.0", &[]);
        catalog.add("Q", "2.0.0", &[]);
        let newest = catalog.plugins.last_mut().unwrap();
        newest.plugin.engine_versions = VersionConstraint::parse(">=5.4").unwrap();

        let root = catalog.get("Root", "1.0.0");
        let resolved = resolve(&root, &catalog, &engine(), &all_platforms()).unwrap();
        assert_eq!(resolved.version_of("Q"), Some(&semver::Version::new(1, 0, 0)));
    }

    #[test]
    fn test_missing_dependency_is_resolution_error() {
        let mut catalog = Catalog::default();
        catalog.add("Root", "1.0.0", &[("Ghost", Some("^1"))]);
        let root = catalog.get("Root", "1.0.0");
        match resolve(&root, &catalog, &engine(), &all_platforms()) {
            Err(Error::DependencyResolution { name, available, .. }) => {
                assert_eq!(name, "Ghost");
                assert!(available.is_empty());
            }
            other => panic!("expected resolution error, got {other:?}"),
        }
    }

    #[test]
    fn test_cancelled_before_first_pass() {
        let mut catalog = Catalog::default();
        catalog.add("Root", "1.0.0", &[]);
        let token = CancellationToken::new();
        token.cancel();
        let result = Resolver::new(&catalog)
            .with_cancellation(token)
            .resolve(&catalog.get("Root", "1.0.0"), &engine(), &all_platforms());
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[test]
    fn test_edges_record_active_platforms() {
        let mut catalog = Catalog::default();
        catalog.add("Shared", "1.0.0", &[]);
        catalog.add("WinOnly", "1.0.0", &[]);
        let mut root = PluginManifest::new("Root", semver::Version::new(1, 0, 0));
        root.dependencies.push(crate::DependencyReference::new("Shared"));
        let mut win_only = crate::DependencyReference::new("WinOnly");
        win_only.platforms.insert("Win64".to_string());
        root.dependencies.push(win_only);

        let targets: BTreeSet<String> = ["Linux".to_string(), "Win64".to_string()].into();
        let resolved = resolve(&root, &catalog, &engine(), &targets).unwrap();
        let edges = resolved.dependencies_of("Root");
        assert_eq!(edges.len(), 2);
        assert_eq!(edges[0].platforms, targets);
        assert_eq!(edges[1].platforms, ["Win64".to_string()].into());
    }
}
