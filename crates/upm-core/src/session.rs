//! The resolve → plan → build → install pipeline.
//!
//! A [`Session`] freezes one engine snapshot and shares one cache, registry
//! and toolchain across every operation it runs. All operations observe the
//! session's cancellation token.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use upm_build::{
    BuildReport, CoalescingCache, DiskCache, Orchestrator, OrchestratorConfig, SourceLocator,
};
use upm_engine::{
    EngineSnapshot, EngineToolchain, InstallArtifact, InstallPolicy, InstalledEngine,
    InstalledPlugin, Installer, Toolchain, VersionChange, discovery_for_host,
};
use upm_registry::{
    LocalRegistry, PluginRegistry, PluginSummary, Publication, PublishReceipt,
    RegistryVersionQuery,
};
use upm_resolve::{
    BuildPlan, EngineVersion, PluginManifest, ResolvedDependencySet, Resolver, VersionConstraint,
};

use crate::config::Settings;
use crate::error::{Error, Result};
use crate::sources::SessionSources;

/// Icon picked up by [`Session::upload`] when none is given.
const DEFAULT_ICON: &str = "Resources/Icon128.png";

/// Scratch space for toolchain output, kept inside the cache root.
const WORK_DIR: &str = ".work";

/// Where the plugin to install comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallSource {
    /// The newest published version satisfying the constraint.
    Registry {
        name: String,
        constraint: VersionConstraint,
    },
    /// A plugin source tree on disk; dependencies still come from the registry.
    Directory(PathBuf),
}

#[derive(Debug, Clone)]
pub struct InstallRequest {
    pub source: InstallSource,
    /// Engine name; the newest launcher install when absent.
    pub engine: Option<String>,
    /// Overrides the configured downgrade policy.
    pub allow_downgrade: Option<bool>,
}

impl InstallRequest {
    pub fn from_registry(name: impl Into<String>, constraint: VersionConstraint) -> Self {
        Self {
            source: InstallSource::Registry {
                name: name.into(),
                constraint,
            },
            engine: None,
            allow_downgrade: None,
        }
    }

    pub fn from_directory(dir: impl Into<PathBuf>) -> Self {
        Self {
            source: InstallSource::Directory(dir.into()),
            engine: None,
            allow_downgrade: None,
        }
    }

    pub fn on_engine(mut self, engine: impl Into<String>) -> Self {
        self.engine = Some(engine.into());
        self
    }

    pub fn allow_downgrade(mut self, allow: bool) -> Self {
        self.allow_downgrade = Some(allow);
        self
    }
}

#[derive(Debug)]
pub struct BuildOutcome {
    /// One resolution per requested engine version.
    pub resolutions: Vec<ResolvedDependencySet>,
    pub plan: BuildPlan,
    pub report: BuildReport,
}

#[derive(Debug)]
pub struct InstallOutcome {
    pub engine: InstalledEngine,
    pub root: PluginManifest,
    pub changes: Vec<VersionChange>,
    pub report: BuildReport,
}

pub struct Session {
    settings: Settings,
    engines: EngineSnapshot,
    registry: Arc<dyn PluginRegistry>,
    cache: Arc<CoalescingCache>,
    toolchain: Arc<dyn Toolchain>,
    cancel: CancellationToken,
}

impl Session {
    /// Discover engines and open the configured registry and cache.
    pub fn open(settings: Settings) -> Result<Self> {
        let discovery = discovery_for_host(&settings.engine_search_paths, None);
        let engines = EngineSnapshot::capture(&discovery)?;
        tracing::info!(engines = engines.engines().len(), "Captured engine snapshot");

        let toolchain =
            EngineToolchain::new(engines.clone()).with_configuration(&settings.configuration);
        let registry = LocalRegistry::new(&settings.registry_dir);
        Ok(Self::with_parts(
            settings,
            engines,
            Arc::new(registry),
            Arc::new(toolchain),
        ))
    }

    pub fn with_parts(
        settings: Settings,
        engines: EngineSnapshot,
        registry: Arc<dyn PluginRegistry>,
        toolchain: Arc<dyn Toolchain>,
    ) -> Self {
        let store = DiskCache::new(&settings.cache_dir);
        Self {
            cache: Arc::new(CoalescingCache::new(Arc::new(store))),
            settings,
            engines,
            registry,
            toolchain,
            cancel: CancellationToken::new(),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn engines(&self) -> &EngineSnapshot {
        &self.engines
    }

    pub fn registry(&self) -> &Arc<dyn PluginRegistry> {
        &self.registry
    }

    /// Cancelling this token stops dispatch and aborts running builds.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn platforms_or_default(&self, platforms: &[String]) -> Vec<String> {
        if platforms.is_empty() {
            self.settings.platforms.clone()
        } else {
            platforms.to_vec()
        }
    }

    /// Resolve `root`'s dependency graph against the registry.
    pub fn resolve(
        &self,
        root: &PluginManifest,
        engine: &EngineVersion,
        platforms: &[String],
    ) -> Result<ResolvedDependencySet> {
        let platforms: BTreeSet<String> = self.platforms_or_default(platforms).into_iter().collect();
        let resolver = Resolver::new(RegistryVersionQuery::new(self.registry.as_ref()))
            .with_cancellation(self.cancel.clone());
        Ok(resolver.resolve(root, engine, &platforms)?)
    }

    /// Resolve per engine version and merge the per-engine plans.
    pub fn plan(
        &self,
        root: &PluginManifest,
        engines: &[EngineVersion],
        platforms: &[String],
    ) -> Result<(Vec<ResolvedDependencySet>, BuildPlan)> {
        let platforms = self.platforms_or_default(platforms);
        let mut resolutions = Vec::with_capacity(engines.len());
        let mut merged = BuildPlan::default();
        for engine in engines {
            let resolved = self.resolve(root, engine, &platforms)?;
            let plan = upm_resolve::plan(&resolved, std::slice::from_ref(engine), &platforms)?;
            merged = merged.merge(plan);
            resolutions.push(resolved);
        }
        Ok((resolutions, merged))
    }

    /// Build the plugin in `source_dir` and every dependency it needs.
    ///
    /// With no engine versions given, the default engine's version is used.
    /// Per-unit failures are reported in the outcome, not as an error.
    pub async fn build(
        &self,
        source_dir: &Path,
        engines: &[EngineVersion],
        platforms: &[String],
    ) -> Result<BuildOutcome> {
        let root = PluginManifest::load(source_dir)?;
        let engines = if engines.is_empty() {
            vec![self.engines.select(None)?.version]
        } else {
            engines.to_vec()
        };
        let (resolutions, plan) = self.plan(&root, &engines, platforms)?;
        tracing::info!(
            plugin = root.name(),
            version = %root.version(),
            units = plan.len(),
            "Building plugin"
        );

        let sources = SessionSources::new(Arc::clone(&self.registry)).with_override(
            root.name(),
            root.version().clone(),
            source_dir,
        );
        let report = self.execute(&plan, Arc::new(sources)).await;
        Ok(BuildOutcome {
            resolutions,
            plan,
            report,
        })
    }

    async fn execute(&self, plan: &BuildPlan, sources: Arc<dyn SourceLocator>) -> BuildReport {
        let mut config = OrchestratorConfig::new(self.settings.cache_dir.join(WORK_DIR))
            .with_max_parallel(self.settings.max_parallel_builds);
        if let Some(timeout) = self.settings.build_timeout() {
            config = config.with_timeout(timeout);
        }
        let orchestrator = Orchestrator::new(
            Arc::clone(&self.cache),
            Arc::clone(&self.toolchain),
            sources,
            config,
        );
        let report = orchestrator.execute(plan, &self.cancel).await;
        tracing::info!(
            hits = report.hits(),
            built = report.built(),
            joined = report.joined(),
            downloaded = report.downloaded.len(),
            failed = report.failures.len(),
            cancelled = report.cancelled.len(),
            "Build finished"
        );
        report
    }

    /// Attach every package of a build report to its published release, so
    /// later sessions on other machines can skip the build. Packages that
    /// were themselves downloaded are not uploaded again.
    pub fn publish_packages(&self, report: &BuildReport) -> Result<Vec<PathBuf>> {
        let mut published = Vec::new();
        for completed in &report.completed {
            let unit = &completed.unit;
            if report.was_downloaded(unit) {
                continue;
            }
            let target = self.registry.publish_artifact(
                &unit.plugin,
                &unit.version,
                &unit.engine,
                &unit.platform,
                &completed.entry.package_dir,
            )?;
            published.push(target);
        }
        Ok(published)
    }

    /// Resolve, build and install a plugin with its dependencies into one
    /// engine.
    pub async fn install(&self, request: InstallRequest) -> Result<InstallOutcome> {
        let engine = self.engines.select(request.engine.as_deref())?.clone();
        let platforms = self.settings.platforms.clone();

        let (root, root_dir) = match &request.source {
            InstallSource::Registry { name, constraint } => {
                (self.find_release(name, constraint, &engine.version)?, None)
            }
            InstallSource::Directory(dir) => (PluginManifest::load(dir)?, Some(dir.clone())),
        };

        let resolved = self.resolve(&root, &engine.version, &platforms)?;
        let plan = upm_resolve::plan(&resolved, std::slice::from_ref(&engine.version), &platforms)?;

        let mut sources = SessionSources::new(Arc::clone(&self.registry));
        if let Some(dir) = root_dir {
            sources = sources.with_override(root.name(), root.version().clone(), dir);
        }
        let sources = Arc::new(sources);

        let report = self.execute(&plan, Arc::clone(&sources) as Arc<dyn SourceLocator>).await;
        if !report.is_success() {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            return Err(Error::BuildFailed {
                failed: report.failures.iter().map(|f| f.unit.to_string()).collect(),
                cancelled: report.cancelled.len(),
            });
        }

        let artifacts = install_artifacts(
            &resolved,
            &engine.version,
            &platforms,
            &report,
            sources.as_ref(),
        )?;
        let policy = InstallPolicy {
            allow_downgrade: request
                .allow_downgrade
                .unwrap_or(self.settings.allow_downgrade),
        };
        let changes = Installer::new(policy).install(&engine, &artifacts)?;
        tracing::info!(
            plugin = root.name(),
            version = %root.version(),
            engine = %engine.name,
            changes = changes.len(),
            "Install finished"
        );

        Ok(InstallOutcome {
            engine,
            root,
            changes,
            report,
        })
    }

    /// Newest published version of `name` satisfying `constraint` that
    /// declares support for `engine`.
    fn find_release(
        &self,
        name: &str,
        constraint: &VersionConstraint,
        engine: &EngineVersion,
    ) -> Result<PluginManifest> {
        let mut versions = self.registry.versions(name)?;
        versions.sort();
        for version in versions.iter().rev() {
            if !constraint.satisfies_version(version) {
                continue;
            }
            let manifest = self.registry.fetch_manifest(name, version)?;
            if manifest.supports_engine(engine) {
                return Ok(manifest);
            }
            tracing::debug!(plugin = name, version = %version, engine = %engine, "Skipping release without engine support");
        }
        Err(Error::NoMatchingVersion {
            name: name.to_string(),
            constraint: constraint.to_string(),
            engine: engine.to_string(),
        })
    }

    pub fn installed(&self, engine: Option<&str>) -> Result<Vec<InstalledPlugin>> {
        let engine = self.engines.select(engine)?;
        Ok(Installer::default().installed(engine)?)
    }

    pub fn uninstall(&self, name: &str, engine: Option<&str>) -> Result<Option<InstalledPlugin>> {
        let engine = self.engines.select(engine)?;
        Ok(Installer::default().uninstall(engine, name)?)
    }

    pub fn search(&self, term: &str) -> Result<Vec<PluginSummary>> {
        Ok(self.registry.search(term)?)
    }

    /// Publish the plugin in `source_dir`. Without an explicit icon,
    /// `Resources/Icon128.png` is used when present.
    pub fn upload(
        &self,
        source_dir: &Path,
        icon: Option<&Path>,
        patches: &[PathBuf],
    ) -> Result<PublishReceipt> {
        let manifest = PluginManifest::load(source_dir)?;
        let mut publication = Publication::new(manifest, source_dir);
        match icon {
            Some(icon) => publication = publication.with_icon(icon),
            None => {
                let default = source_dir.join(DEFAULT_ICON);
                if default.is_file() {
                    publication = publication.with_icon(default);
                }
            }
        }
        for patch in patches {
            publication = publication.with_patch(patch);
        }
        Ok(self.registry.publish(&publication)?)
    }
}

/// Turn a successful report into one install artifact per plugin of the
/// resolution. Compiled plugins use their cached packages, content-only
/// plugins their source tree.
fn install_artifacts(
    resolved: &ResolvedDependencySet,
    engine: &EngineVersion,
    platforms: &[String],
    report: &BuildReport,
    sources: &dyn SourceLocator,
) -> Result<Vec<InstallArtifact>> {
    let manifests = resolved
        .dependencies()
        .chain(std::iter::once(resolved.root()));

    let mut artifacts = Vec::new();
    for manifest in manifests {
        let packages: BTreeMap<String, PathBuf> = if manifest.requires_build() {
            report
                .completed
                .iter()
                .filter(|c| {
                    c.unit.plugin == manifest.name()
                        && &c.unit.version == manifest.version()
                        && &c.unit.engine == engine
                })
                .map(|c| (c.unit.platform.clone(), c.entry.package_dir.clone()))
                .collect()
        } else {
            let source = sources.locate(manifest.name(), manifest.version())?;
            platforms
                .iter()
                .filter(|p| manifest.supports_platform(p))
                .map(|p| (p.clone(), source.clone()))
                .collect()
        };

        if packages.is_empty() {
            return Err(Error::MissingPackage {
                plugin: manifest.name().to_string(),
                version: manifest.version().clone(),
                engine: engine.to_string(),
            });
        }
        artifacts.push(InstallArtifact {
            name: manifest.name().to_string(),
            version: manifest.version().clone(),
            packages,
        });
    }
    Ok(artifacts)
}
