//! Plugin installation and version tracking.
//!
//! Installed plugins live in the engine's package directory, one directory
//! per plugin, with their records kept in `installed.toml` beside them:
//!
//! ```toml
//! version = "1.0"
//!
//! [plugins.Widget]
//! name = "Widget"
//! version = "1.2.0"
//! platforms = ["Linux", "Win64"]
//! installed_at = "2024-05-01T12:00:00Z"
//! ```
//!
//! The record file is only rewritten while holding its exclusive lock, and
//! every downgrade check for a batch happens before anything on disk changes.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use upm_fs::io;

use crate::engine::InstalledEngine;
use crate::error::{Error, Result};

/// Name of the record file inside an engine's package directory.
pub const INSTALLED_FILENAME: &str = "installed.toml";

const STATE_FORMAT_VERSION: &str = "1.0";

/// Current state of one plugin inside one engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledPlugin {
    pub name: String,
    pub version: semver::Version,
    #[serde(default)]
    pub platforms: BTreeSet<String>,
    pub installed_at: DateTime<Utc>,
}

/// A version transition caused by an install.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionChange {
    pub plugin: String,
    /// `None` for a fresh install.
    pub previous: Option<semver::Version>,
    pub new: semver::Version,
}

/// A built plugin ready to be installed: one package directory per platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallArtifact {
    pub name: String,
    pub version: semver::Version,
    pub packages: BTreeMap<String, PathBuf>,
}

impl InstallArtifact {
    pub fn platforms(&self) -> BTreeSet<String> {
        self.packages.keys().cloned().collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InstallPolicy {
    /// Permit replacing an installed plugin with an older version.
    pub allow_downgrade: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct InstalledState {
    version: String,
    #[serde(default)]
    plugins: BTreeMap<String, InstalledPlugin>,
}

impl InstalledState {
    fn load(path: &Path) -> Result<Self> {
        match io::read_text_if_exists(path)? {
            Some(content) => toml::from_str(&content).map_err(|e| Error::InvalidState {
                path: path.to_path_buf(),
                message: e.to_string(),
            }),
            None => Ok(Self {
                version: STATE_FORMAT_VERSION.to_string(),
                plugins: BTreeMap::new(),
            }),
        }
    }

    /// Rewrite the record file. The caller holds the record lock.
    fn store(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| Error::InvalidState {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        io::replace_file(path, content.as_bytes())?;
        Ok(())
    }
}

enum Step<'a> {
    Skip,
    Apply {
        artifact: &'a InstallArtifact,
        previous: Option<InstalledPlugin>,
    },
}

/// Installs, upgrades and removes plugins in engine instances.
#[derive(Debug, Clone, Default)]
pub struct Installer {
    policy: InstallPolicy,
}

impl Installer {
    pub fn new(policy: InstallPolicy) -> Self {
        Self { policy }
    }

    fn state_path(engine: &InstalledEngine) -> PathBuf {
        engine.package_dir().join(INSTALLED_FILENAME)
    }

    /// Installed plugins of `engine`, ordered by name.
    pub fn installed(&self, engine: &InstalledEngine) -> Result<Vec<InstalledPlugin>> {
        let state = InstalledState::load(&Self::state_path(engine))?;
        Ok(state.plugins.into_values().collect())
    }

    /// Install `artifacts` into `engine`.
    ///
    /// Returns one [`VersionChange`] per plugin actually written. Plugins
    /// already installed at the same version for every requested platform
    /// are skipped.
    ///
    /// # Errors
    ///
    /// `Error::DowngradeNotPermitted` if any artifact is older than the
    /// installed version and the policy forbids downgrades. Nothing is
    /// changed in that case.
    pub fn install(
        &self,
        engine: &InstalledEngine,
        artifacts: &[InstallArtifact],
    ) -> Result<Vec<VersionChange>> {
        let state_path = Self::state_path(engine);
        let _lock = io::lock_exclusive(&state_path)?;
        let mut state = InstalledState::load(&state_path)?;

        let steps = self.plan_steps(engine, &state, artifacts)?;

        let mut changes = Vec::new();
        for step in steps {
            let Step::Apply { artifact, previous } = step else {
                continue;
            };
            let record = self.apply(engine, artifact, previous.as_ref())?;
            state.plugins.insert(record.name.clone(), record);
            state.store(&state_path)?;

            tracing::info!(
                plugin = %artifact.name,
                version = %artifact.version,
                engine = %engine.display_name(),
                "Installed plugin"
            );
            changes.push(VersionChange {
                plugin: artifact.name.clone(),
                previous: previous.map(|p| p.version),
                new: artifact.version.clone(),
            });
        }
        Ok(changes)
    }

    /// Decide what to do with every artifact before touching the disk.
    fn plan_steps<'a>(
        &self,
        engine: &InstalledEngine,
        state: &InstalledState,
        artifacts: &'a [InstallArtifact],
    ) -> Result<Vec<Step<'a>>> {
        let mut steps = Vec::with_capacity(artifacts.len());
        for artifact in artifacts {
            if artifact.packages.is_empty() {
                return Err(Error::EmptyArtifact {
                    plugin: artifact.name.clone(),
                    version: artifact.version.clone(),
                });
            }
            upm_resolve::manifest::validate_name(&artifact.name)?;

            let previous = state.plugins.get(&artifact.name);
            if let Some(current) = previous {
                if artifact.version < current.version && !self.policy.allow_downgrade {
                    return Err(Error::DowngradeNotPermitted {
                        plugin: artifact.name.clone(),
                        installed: current.version.clone(),
                        requested: artifact.version.clone(),
                        engine: engine.display_name(),
                    });
                }
                if artifact.version == current.version
                    && artifact.platforms().is_subset(&current.platforms)
                {
                    tracing::debug!(plugin = %artifact.name, "Already up to date");
                    steps.push(Step::Skip);
                    continue;
                }
            }
            steps.push(Step::Apply {
                artifact,
                previous: previous.cloned(),
            });
        }
        Ok(steps)
    }

    /// Stage the plugin directory next to its destination and swap it in.
    ///
    /// Reinstalling the same version keeps the platforms already present.
    fn apply(
        &self,
        engine: &InstalledEngine,
        artifact: &InstallArtifact,
        previous: Option<&InstalledPlugin>,
    ) -> Result<InstalledPlugin> {
        let target = engine.package_dir().join(&artifact.name);
        let staging = io::unique_sibling(&target, "stage");

        let mut platforms = artifact.platforms();
        let same_version = previous.is_some_and(|p| p.version == artifact.version);
        let staged = (|| -> Result<()> {
            if same_version && target.is_dir() {
                io::copy_dir(&target, &staging)?;
                platforms.extend(previous.into_iter().flat_map(|p| p.platforms.iter().cloned()));
            }
            for package in artifact.packages.values() {
                io::copy_dir(package, &staging)?;
            }
            io::replace_dir(&staging, &target)?;
            Ok(())
        })();

        if let Err(e) = staged {
            let _ = io::remove_dir_if_exists(&staging);
            return Err(e);
        }

        Ok(InstalledPlugin {
            name: artifact.name.clone(),
            version: artifact.version.clone(),
            platforms,
            installed_at: Utc::now(),
        })
    }

    /// Remove a plugin from `engine`. Removing an absent plugin succeeds
    /// and returns `None`.
    pub fn uninstall(&self, engine: &InstalledEngine, name: &str) -> Result<Option<InstalledPlugin>> {
        let state_path = Self::state_path(engine);
        let _lock = io::lock_exclusive(&state_path)?;
        let mut state = InstalledState::load(&state_path)?;

        let removed = state.plugins.remove(name);
        io::remove_dir_if_exists(&engine.package_dir().join(name))?;
        if removed.is_some() {
            state.store(&state_path)?;
            tracing::info!(plugin = name, engine = %engine.display_name(), "Uninstalled plugin");
        }
        Ok(removed)
    }

    /// Install the same artifacts into several engines. Each engine's result
    /// is independent of the others.
    pub fn install_many(
        &self,
        engines: &[InstalledEngine],
        artifacts: &[InstallArtifact],
    ) -> Vec<(InstalledEngine, Result<Vec<VersionChange>>)> {
        engines
            .iter()
            .map(|engine| (engine.clone(), self.install(engine, artifacts)))
            .collect()
    }
}
