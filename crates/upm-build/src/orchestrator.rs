//! Build orchestration.
//!
//! [`Orchestrator::execute`] walks a [`BuildPlan`], dispatching every unit
//! whose prerequisites are cache-resident onto a bounded worker pool. Each
//! unit goes through the [`CoalescingCache`], so cached units cost no build
//! and concurrent sessions asking for the same unit share one build.
//!
//! A failed unit cancels every unit that depends on it; unrelated branches
//! keep running.
//!
//! Sources and prebuilt packages are only consulted on a cache miss. A
//! published prebuilt package for the unit's engine and platform is taken
//! before falling back to the toolchain.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use upm_engine::{BuildRequest, Toolchain};
use upm_resolve::{BuildPlan, BuildUnit};
use uuid::Uuid;

use crate::cache::{Artifact, CacheEntry};
use crate::coalesce::{CoalescingCache, Resolution};
use crate::error::{Error, Result};

/// Relative location of the plugin icon inside a plugin source tree.
const ICON_PATH: &str = "Resources/Icon128.png";

/// Finds the source tree for a plugin version.
pub trait SourceLocator: Send + Sync {
    fn locate(&self, plugin: &str, version: &semver::Version) -> Result<PathBuf>;

    /// A published package for `unit` that can stand in for a build.
    fn prebuilt(&self, _unit: &BuildUnit) -> Option<PathBuf> {
        None
    }
}

/// A fixed (plugin, version) → source directory table.
#[derive(Debug, Clone, Default)]
pub struct SourceMap {
    sources: BTreeMap<(String, semver::Version), PathBuf>,
}

impl SourceMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, plugin: &str, version: semver::Version, dir: impl Into<PathBuf>) -> Self {
        self.insert(plugin, version, dir);
        self
    }

    pub fn insert(&mut self, plugin: &str, version: semver::Version, dir: impl Into<PathBuf>) {
        self.sources.insert((plugin.to_string(), version), dir.into());
    }
}

impl SourceLocator for SourceMap {
    fn locate(&self, plugin: &str, version: &semver::Version) -> Result<PathBuf> {
        self.sources
            .get(&(plugin.to_string(), version.clone()))
            .cloned()
            .ok_or_else(|| Error::SourceUnavailable {
                plugin: plugin.to_string(),
                version: version.clone(),
                reason: "no source directory registered".to_string(),
            })
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Upper bound on units processed at once.
    pub max_parallel: usize,
    /// Per-invocation toolchain timeout.
    pub timeout: Option<Duration>,
    /// Scratch directory for toolchain output before it enters the cache.
    pub work_dir: PathBuf,
}

impl OrchestratorConfig {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            max_parallel: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            timeout: None,
            work_dir: work_dir.into(),
        }
    }

    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[derive(Debug, Clone)]
pub struct CompletedUnit {
    pub unit: BuildUnit,
    pub entry: CacheEntry,
    pub resolution: Resolution,
}

#[derive(Debug)]
pub struct BuildFailure {
    pub unit: BuildUnit,
    pub error: Error,
}

/// Outcome of one plan execution.
#[derive(Debug, Default)]
pub struct BuildReport {
    pub completed: Vec<CompletedUnit>,
    pub failures: Vec<BuildFailure>,
    /// Units never attempted because a prerequisite failed or the session
    /// was cancelled.
    pub cancelled: Vec<BuildUnit>,
    pub toolchain_invocations: usize,
    /// Units stored from a prebuilt package instead of a toolchain run.
    pub downloaded: Vec<BuildUnit>,
}

impl BuildReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && self.cancelled.is_empty()
    }

    fn count(&self, resolution: Resolution) -> usize {
        self.completed
            .iter()
            .filter(|c| c.resolution == resolution)
            .count()
    }

    pub fn hits(&self) -> usize {
        self.count(Resolution::Hit)
    }

    pub fn built(&self) -> usize {
        self.count(Resolution::Built)
    }

    pub fn joined(&self) -> usize {
        self.count(Resolution::Joined)
    }

    pub fn was_downloaded(&self, unit: &BuildUnit) -> bool {
        self.downloaded.contains(unit)
    }

    pub fn entry_for(&self, unit: &BuildUnit) -> Option<&CacheEntry> {
        self.completed
            .iter()
            .find(|c| &c.unit == unit)
            .map(|c| &c.entry)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnitState {
    Pending,
    Running,
    Done,
    Failed,
    Cancelled,
}

/// Shared handles a unit task needs.
#[derive(Clone)]
struct UnitContext {
    cache: Arc<CoalescingCache>,
    toolchain: Arc<dyn Toolchain>,
    sources: Arc<dyn SourceLocator>,
    semaphore: Arc<Semaphore>,
    invocations: Arc<AtomicUsize>,
    downloaded: Arc<Mutex<Vec<BuildUnit>>>,
    timeout: Option<Duration>,
    work_dir: PathBuf,
    cancel: CancellationToken,
}

pub struct Orchestrator {
    cache: Arc<CoalescingCache>,
    toolchain: Arc<dyn Toolchain>,
    sources: Arc<dyn SourceLocator>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        cache: Arc<CoalescingCache>,
        toolchain: Arc<dyn Toolchain>,
        sources: Arc<dyn SourceLocator>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            cache,
            toolchain,
            sources,
            config,
        }
    }

    pub fn cache(&self) -> &Arc<CoalescingCache> {
        &self.cache
    }

    /// Run every unit of `plan`, honouring prerequisites.
    ///
    /// Never fails as a whole: per-unit failures and cancellations are
    /// reported in the [`BuildReport`].
    pub async fn execute(&self, plan: &BuildPlan, cancel: &CancellationToken) -> BuildReport {
        let units = plan.units();
        let mut states = vec![UnitState::Pending; units.len()];
        let mut entries: Vec<Option<CacheEntry>> = vec![None; units.len()];
        let mut report = BuildReport::default();

        let context = UnitContext {
            cache: Arc::clone(&self.cache),
            toolchain: Arc::clone(&self.toolchain),
            sources: Arc::clone(&self.sources),
            semaphore: Arc::new(Semaphore::new(self.config.max_parallel.max(1))),
            invocations: Arc::new(AtomicUsize::new(0)),
            downloaded: Arc::new(Mutex::new(Vec::new())),
            timeout: self.config.timeout,
            work_dir: self.config.work_dir.clone(),
            cancel: cancel.clone(),
        };
        let mut tasks: JoinSet<(usize, Result<(CacheEntry, Resolution)>)> = JoinSet::new();

        tracing::info!(units = units.len(), "Executing build plan");
        loop {
            if !cancel.is_cancelled() {
                for index in 0..units.len() {
                    if states[index] != UnitState::Pending {
                        continue;
                    }
                    let prerequisites = plan.prerequisites(index);
                    let ready: Option<Vec<(String, PathBuf)>> = prerequisites
                        .iter()
                        .map(|&p| {
                            entries[p]
                                .as_ref()
                                .map(|entry| (units[p].plugin.clone(), entry.package_dir.clone()))
                        })
                        .collect();
                    let Some(dependency_packages) = ready else {
                        continue;
                    };

                    states[index] = UnitState::Running;
                    let unit = units[index].clone();
                    let context = context.clone();
                    tasks.spawn(async move {
                        let label = unit.to_string();
                        let result = AssertUnwindSafe(run_unit(context, unit, dependency_packages))
                            .catch_unwind()
                            .await
                            .unwrap_or_else(|_| {
                                Err(Error::Task {
                                    unit: label,
                                    message: "build task panicked".to_string(),
                                })
                            });
                        (index, result)
                    });
                }
            }

            let Some(joined) = tasks.join_next().await else {
                break;
            };
            let (index, result) = match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::warn!("Build task was lost: {}", e);
                    continue;
                }
            };

            match result {
                Ok((entry, resolution)) => {
                    tracing::debug!(unit = %units[index], ?resolution, "Unit ready");
                    states[index] = UnitState::Done;
                    entries[index] = Some(entry.clone());
                    report.completed.push(CompletedUnit {
                        unit: units[index].clone(),
                        entry,
                        resolution,
                    });
                }
                Err(error) => {
                    if error.is_cancellation() {
                        states[index] = UnitState::Cancelled;
                        report.cancelled.push(units[index].clone());
                    } else {
                        tracing::warn!(unit = %units[index], "Build failed: {}", error);
                        states[index] = UnitState::Failed;
                        report.failures.push(BuildFailure {
                            unit: units[index].clone(),
                            error,
                        });
                    }
                    for dependent in plan.dependents(index) {
                        if states[dependent] == UnitState::Pending {
                            tracing::debug!(
                                unit = %units[dependent],
                                failed = %units[index],
                                "Cancelling dependent"
                            );
                            states[dependent] = UnitState::Cancelled;
                            report.cancelled.push(units[dependent].clone());
                        }
                    }
                }
            }
        }

        for (index, state) in states.iter_mut().enumerate() {
            match *state {
                UnitState::Pending => {
                    *state = UnitState::Cancelled;
                    report.cancelled.push(units[index].clone());
                }
                UnitState::Running => {
                    *state = UnitState::Failed;
                    report.failures.push(BuildFailure {
                        unit: units[index].clone(),
                        error: Error::Task {
                            unit: units[index].to_string(),
                            message: "build task did not report a result".to_string(),
                        },
                    });
                }
                _ => {}
            }
        }

        report.toolchain_invocations = context.invocations.load(Ordering::SeqCst);
        report.downloaded = std::mem::take(
            &mut *context
                .downloaded
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        tracing::info!(
            completed = report.completed.len(),
            hits = report.hits(),
            built = report.built(),
            joined = report.joined(),
            downloaded = report.downloaded.len(),
            failed = report.failures.len(),
            cancelled = report.cancelled.len(),
            "Build plan finished"
        );
        report
    }
}

async fn run_unit(
    context: UnitContext,
    unit: BuildUnit,
    dependency_packages: Vec<(String, PathBuf)>,
) -> Result<(CacheEntry, Resolution)> {
    let _permit = tokio::select! {
        _ = context.cancel.cancelled() => {
            return Err(upm_engine::Error::Cancelled { unit: unit.to_string() }.into());
        }
        permit = Arc::clone(&context.semaphore).acquire_owned() => {
            permit.map_err(|e| Error::Task { unit: unit.to_string(), message: e.to_string() })?
        }
    };

    let output_dir = context
        .work_dir
        .join(format!("{}-{}", unit.plugin, Uuid::new_v4()));

    let build_unit = unit.clone();
    let build_output = output_dir.clone();
    let sources = Arc::clone(&context.sources);
    let toolchain = Arc::clone(&context.toolchain);
    let invocations = Arc::clone(&context.invocations);
    let downloaded = Arc::clone(&context.downloaded);
    let timeout = context.timeout;
    let cancel = context.cancel.clone();
    let build = move || async move {
        if let Some(package_dir) = sources.prebuilt(&build_unit) {
            tracing::info!(unit = %build_unit, "Using prebuilt package");
            let icon = sources
                .locate(&build_unit.plugin, &build_unit.version)
                .ok()
                .and_then(|dir| find_icon(&dir));
            downloaded
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(build_unit);
            return Ok::<_, Error>(Artifact { package_dir, icon });
        }

        let source_dir = sources.locate(&build_unit.plugin, &build_unit.version)?;
        let request = BuildRequest {
            unit: build_unit,
            source_dir,
            output_dir: build_output,
            dependency_packages,
            timeout,
        };
        invocations.fetch_add(1, Ordering::SeqCst);
        tracing::info!(unit = %request.unit, "Building");
        let output = toolchain.build(&request, &cancel).await?;
        tracing::debug!(unit = %request.unit, log = %output.log, "Toolchain finished");
        Ok::<_, Error>(Artifact {
            package_dir: output.package_dir,
            icon: find_icon(&request.source_dir),
        })
    };

    let result = context.cache.get_or_build(&unit, build).await;

    match tokio::fs::remove_dir_all(&output_dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(path = %output_dir.display(), "Failed to remove build output: {}", e);
        }
    }
    result
}

fn find_icon(source_dir: &Path) -> Option<PathBuf> {
    let icon = source_dir.join(ICON_PATH);
    icon.is_file().then_some(icon)
}
