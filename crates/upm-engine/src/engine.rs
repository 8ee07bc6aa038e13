//! Installed engine model.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use upm_resolve::EngineVersion;

use crate::error::{Error, Result};
use crate::discovery::EngineDiscovery;

/// Directory name of the plugin manager's package area inside the
/// marketplace directory.
pub const PACKAGE_DIR_NAME: &str = ".UnrealPluginManager";

/// One discovered engine installation.
///
/// All derived directories are computed from `root` by path joining; nothing
/// is checked on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledEngine {
    pub name: String,
    pub version: EngineVersion,
    pub root: PathBuf,
    /// Built from source rather than installed by the launcher.
    #[serde(default)]
    pub custom_build: bool,
}

impl InstalledEngine {
    pub fn new(name: impl Into<String>, version: EngineVersion, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            version,
            root: root.into(),
            custom_build: false,
        }
    }

    pub fn custom(name: impl Into<String>, version: EngineVersion, root: impl Into<PathBuf>) -> Self {
        Self {
            custom_build: true,
            ..Self::new(name, version, root)
        }
    }

    /// `<root>/Engine`
    pub fn engine_dir(&self) -> PathBuf {
        self.root.join("Engine")
    }

    /// `<root>/Engine/Build/BatchFiles`
    pub fn build_tools_dir(&self) -> PathBuf {
        self.engine_dir().join("Build").join("BatchFiles")
    }

    /// `<root>/Engine/Plugins`
    pub fn plugin_dir(&self) -> PathBuf {
        self.engine_dir().join("Plugins")
    }

    /// `<root>/Engine/Plugins/Marketplace`
    pub fn marketplace_dir(&self) -> PathBuf {
        self.plugin_dir().join("Marketplace")
    }

    /// `<root>/Engine/Plugins/Marketplace/.UnrealPluginManager`
    pub fn package_dir(&self) -> PathBuf {
        self.marketplace_dir().join(PACKAGE_DIR_NAME)
    }

    /// The automation tool script used for plugin builds on this host.
    pub fn build_tool(&self) -> PathBuf {
        let script = if cfg!(windows) { "RunUAT.bat" } else { "RunUAT.sh" };
        self.build_tools_dir().join(script)
    }

    pub fn display_name(&self) -> String {
        if self.custom_build {
            format!("{}: Custom Build", self.name)
        } else {
            format!("{}: Installed", self.version)
        }
    }

    /// Whether this engine can build for `version`. A requested version
    /// without a patch matches any patch of the same major.minor.
    pub fn provides(&self, version: &EngineVersion) -> bool {
        self.version.major == version.major
            && self.version.minor == version.minor
            && (version.patch.is_none() || self.version.patch.unwrap_or(0) == version.patch.unwrap_or(0))
    }
}

/// A frozen enumeration of installed engines, used for one whole session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineSnapshot {
    engines: Vec<InstalledEngine>,
}

impl EngineSnapshot {
    /// Enumerate once through `discovery`. Engines are ordered newest first;
    /// duplicates of the same root are dropped.
    pub fn capture(discovery: &dyn EngineDiscovery) -> Result<Self> {
        Ok(Self::from_engines(discovery.enumerate()?))
    }

    pub fn from_engines(mut engines: Vec<InstalledEngine>) -> Self {
        engines.sort_by(|a, b| {
            b.version
                .cmp(&a.version)
                .then(a.custom_build.cmp(&b.custom_build))
                .then_with(|| a.name.cmp(&b.name))
        });
        let mut seen = std::collections::HashSet::new();
        engines.retain(|e| seen.insert(canonical_key(&e.root)));
        Self { engines }
    }

    pub fn engines(&self) -> &[InstalledEngine] {
        &self.engines
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }

    /// The engine called `name`, or with no name the newest launcher
    /// install. Falls back to the newest custom build when only custom
    /// builds exist.
    pub fn select(&self, name: Option<&str>) -> Result<&InstalledEngine> {
        match name {
            Some(name) => self
                .engines
                .iter()
                .find(|e| e.name.eq_ignore_ascii_case(name))
                .ok_or_else(|| Error::EngineNotFound {
                    name: name.to_string(),
                }),
            None => self
                .engines
                .iter()
                .find(|e| !e.custom_build)
                .or_else(|| self.engines.first())
                .ok_or(Error::NoEnginesInstalled),
        }
    }

    /// The preferred engine for building against `version`.
    pub fn for_version(&self, version: &EngineVersion) -> Result<&InstalledEngine> {
        let matching: Vec<&InstalledEngine> =
            self.engines.iter().filter(|e| e.provides(version)).collect();
        matching
            .iter()
            .find(|e| !e.custom_build)
            .or(matching.first())
            .copied()
            .ok_or_else(|| Error::EngineUnavailable {
                version: version.to_string(),
            })
    }
}

fn canonical_key(path: &Path) -> PathBuf {
    dunce::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
