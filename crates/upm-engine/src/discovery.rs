//! Locating engine installations on the host.
//!
//! Discovery is a capability chosen at startup: [`discovery_for_host`]
//! assembles the sources that make sense for the current OS and the
//! configured search paths.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use upm_resolve::EngineVersion;

use crate::engine::InstalledEngine;
use crate::error::{Error, Result};

/// Path of the version header relative to an engine root.
const VERSION_HEADER: [&str; 6] = ["Engine", "Source", "Runtime", "Launch", "Resources", "Version.h"];

/// Launcher installs: one subkey per engine version holding `InstalledDirectory`.
pub const LAUNCHER_INSTALLS_KEY: &str = r"Software\EpicGames\Unreal Engine";

/// Source builds: one value per engine, name to root directory.
pub const CUSTOM_BUILDS_KEY: &str = r"Software\Epic Games\Unreal Engine\Builds";

/// Something that can list installed engines.
pub trait EngineDiscovery: Send + Sync {
    fn enumerate(&self) -> Result<Vec<InstalledEngine>>;
}

fn version_header(root: &Path) -> PathBuf {
    VERSION_HEADER.iter().fold(root.to_path_buf(), |p, part| p.join(part))
}

static VERSION_DEFINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"#define\s+ENGINE_(MAJOR|MINOR|PATCH)_VERSION\s+(\d+)")
        .expect("Invalid version define regex")
});

/// Read an engine's version from its `Version.h` header.
///
/// Major and minor are required; patch is optional.
pub fn read_engine_version(root: &Path) -> Result<EngineVersion> {
    let header = version_header(root);
    let unreadable = |reason: String| Error::EngineVersionUnreadable {
        path: header.clone(),
        reason,
    };
    let content = match upm_fs::io::read_text_if_exists(&header)? {
        Some(content) => content,
        None => return Err(unreadable("version header not found".to_string())),
    };

    let (mut major, mut minor, mut patch) = (None, None, None);
    for captures in VERSION_DEFINE.captures_iter(&content) {
        let value: u64 = captures[2]
            .parse()
            .map_err(|_| unreadable(format!("version component out of range: {}", &captures[2])))?;
        match &captures[1] {
            "MAJOR" => major = Some(value),
            "MINOR" => minor = Some(value),
            _ => patch = Some(value),
        }
    }

    match (major, minor) {
        (Some(major), Some(minor)) => Ok(EngineVersion {
            major,
            minor,
            patch,
        }),
        _ => Err(unreadable("missing ENGINE_MAJOR_VERSION or ENGINE_MINOR_VERSION".to_string())),
    }
}

/// Whether `path` looks like an engine root.
pub fn is_engine_root(path: &Path) -> bool {
    version_header(path).is_file()
}

/// Scans search roots for engine installations.
///
/// Each root may itself be an engine or contain engines as immediate
/// children. Launcher installs are recognised by their `UE_<version>`
/// directory name; anything else is reported as a custom build named after
/// its directory.
#[derive(Debug, Clone, Default)]
pub struct DirectoryDiscovery {
    search_roots: Vec<PathBuf>,
}

impl DirectoryDiscovery {
    pub fn new(search_roots: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            search_roots: search_roots.into_iter().collect(),
        }
    }

    fn probe(&self, dir: &Path) -> Option<InstalledEngine> {
        if !is_engine_root(dir) {
            return None;
        }
        let version = match read_engine_version(dir) {
            Ok(version) => version,
            Err(e) => {
                tracing::warn!(path = %dir.display(), "Skipping engine: {}", e);
                return None;
            }
        };
        let dir_name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| dir.display().to_string());
        match dir_name.strip_prefix("UE_") {
            Some(label) => Some(InstalledEngine::new(label, version, dir)),
            None => Some(InstalledEngine::custom(dir_name, version, dir)),
        }
    }
}

impl EngineDiscovery for DirectoryDiscovery {
    fn enumerate(&self) -> Result<Vec<InstalledEngine>> {
        let mut engines = Vec::new();
        for root in &self.search_roots {
            if let Some(engine) = self.probe(root) {
                engines.push(engine);
                continue;
            }
            let entries = match std::fs::read_dir(root) {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(upm_fs::Error::io(root, e).into()),
            };
            let mut children: Vec<PathBuf> = entries
                .flatten()
                .map(|entry| entry.path())
                .filter(|path| path.is_dir())
                .collect();
            children.sort();
            engines.extend(children.iter().filter_map(|child| self.probe(child)));
        }
        tracing::debug!(count = engines.len(), "Directory discovery finished");
        Ok(engines)
    }
}

/// Host key/value store (such as the Windows registry) seen through a
/// minimal read-only interface.
pub trait KeyValueLookup: Send + Sync {
    /// Names of the subkeys directly under `key`. Missing keys yield nothing.
    fn subkeys(&self, key: &str) -> Result<Vec<String>>;
    /// A named string value under `key`.
    fn value(&self, key: &str, name: &str) -> Result<Option<String>>;
    /// Every string value directly under `key`, as `(name, value)`.
    fn values(&self, key: &str) -> Result<Vec<(String, String)>>;
}

/// Discovers engines registered in a key/value store.
///
/// Launcher installs live under [`LAUNCHER_INSTALLS_KEY`], one subkey per
/// version with an `InstalledDirectory` value. Source builds live under
/// [`CUSTOM_BUILDS_KEY`] as `name -> directory`; their version is read from
/// the engine's header.
pub struct KeyValueDiscovery {
    lookup: Box<dyn KeyValueLookup>,
    installs_key: String,
    builds_key: String,
}

impl KeyValueDiscovery {
    pub fn new(lookup: Box<dyn KeyValueLookup>) -> Self {
        Self {
            lookup,
            installs_key: LAUNCHER_INSTALLS_KEY.to_string(),
            builds_key: CUSTOM_BUILDS_KEY.to_string(),
        }
    }

    fn launcher_installs(&self) -> Result<Vec<InstalledEngine>> {
        let mut engines = Vec::new();
        for label in self.lookup.subkeys(&self.installs_key)? {
            let key = format!(r"{}\{}", self.installs_key, label);
            let Some(dir) = self.lookup.value(&key, "InstalledDirectory")? else {
                continue;
            };
            let dir = PathBuf::from(dir);
            let version = match EngineVersion::parse(&label) {
                Ok(version) => version,
                Err(_) => match read_engine_version(&dir) {
                    Ok(version) => version,
                    Err(e) => {
                        tracing::warn!(key = %key, "Skipping launcher install: {}", e);
                        continue;
                    }
                },
            };
            engines.push(InstalledEngine::new(label, version, dir));
        }
        Ok(engines)
    }

    fn custom_builds(&self) -> Result<Vec<InstalledEngine>> {
        let mut engines = Vec::new();
        for (name, dir) in self.lookup.values(&self.builds_key)? {
            let dir = PathBuf::from(dir);
            match read_engine_version(&dir) {
                Ok(version) => engines.push(InstalledEngine::custom(name, version, dir)),
                Err(e) => tracing::warn!(build = %name, "Skipping custom build: {}", e),
            }
        }
        Ok(engines)
    }
}

impl EngineDiscovery for KeyValueDiscovery {
    fn enumerate(&self) -> Result<Vec<InstalledEngine>> {
        let mut engines = self.launcher_installs()?;
        engines.extend(self.custom_builds()?);
        Ok(engines)
    }
}

/// Concatenation of several discovery sources.
#[derive(Default)]
pub struct CompositeDiscovery {
    sources: Vec<Box<dyn EngineDiscovery>>,
}

impl CompositeDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, source: impl EngineDiscovery + 'static) -> Self {
        self.sources.push(Box::new(source));
        self
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

impl EngineDiscovery for CompositeDiscovery {
    fn enumerate(&self) -> Result<Vec<InstalledEngine>> {
        let mut engines = Vec::new();
        for source in &self.sources {
            engines.extend(source.enumerate()?);
        }
        Ok(engines)
    }
}

/// Default install locations of the launcher on this host.
fn default_search_roots() -> Vec<PathBuf> {
    if cfg!(windows) {
        vec![PathBuf::from(r"C:\Program Files\Epic Games")]
    } else if cfg!(target_os = "macos") {
        vec![PathBuf::from("/Users/Shared/Epic Games")]
    } else {
        dirs::home_dir()
            .map(|home| vec![home.join("UnrealEngine")])
            .unwrap_or_default()
    }
}

/// Discovery for the current host: the configured search paths, the
/// launcher's default install location, and an optional key/value store.
pub fn discovery_for_host(
    search_paths: &[PathBuf],
    lookup: Option<Box<dyn KeyValueLookup>>,
) -> CompositeDiscovery {
    let mut roots: Vec<PathBuf> = search_paths.to_vec();
    for root in default_search_roots() {
        if !roots.contains(&root) {
            roots.push(root);
        }
    }
    let composite = CompositeDiscovery::new().with(DirectoryDiscovery::new(roots));
    match lookup {
        Some(lookup) => composite.with(KeyValueDiscovery::new(lookup)),
        None => composite,
    }
}
