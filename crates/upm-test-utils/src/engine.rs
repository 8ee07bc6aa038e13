//! [`TestEngine`]: a temporary engine installation.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use upm_engine::InstalledEngine;
use upm_resolve::EngineVersion;

/// An engine directory tree under a temporary search root.
///
/// The tree is laid out as `<search root>/UE_<version>/Engine/...` with a
/// `Version.h` carrying the version defines, so directory discovery finds it.
pub struct TestEngine {
    temp_dir: TempDir,
    version: EngineVersion,
}

impl TestEngine {
    /// # Panics
    /// Panics if `version` is not `major.minor[.patch]`.
    pub fn new(version: &str) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let version = EngineVersion::parse(version).unwrap();
        let engine = Self { temp_dir, version };
        engine.add_install(engine.version);
        engine
    }

    /// Directory to hand to directory discovery.
    pub fn search_root(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn root(&self) -> PathBuf {
        self.root_for(self.version)
    }

    fn root_for(&self, version: EngineVersion) -> PathBuf {
        self.search_root()
            .join(format!("UE_{}.{}", version.major, version.minor))
    }

    /// Lay out another engine version under the same search root.
    pub fn add_install(&self, version: EngineVersion) -> InstalledEngine {
        let root = self.root_for(version);
        let resources = root.join("Engine/Source/Runtime/Launch/Resources");
        fs::create_dir_all(&resources).unwrap();
        fs::write(
            resources.join("Version.h"),
            format!(
                "#define ENGINE_MAJOR_VERSION {}\n#define ENGINE_MINOR_VERSION {}\n#define ENGINE_PATCH_VERSION {}\n",
                version.major,
                version.minor,
                version.patch.unwrap_or(0)
            ),
        )
        .unwrap();
        let name = format!("{}.{}", version.major, version.minor);
        InstalledEngine::new(name, version, root)
    }

    pub fn engine(&self) -> InstalledEngine {
        InstalledEngine::new(
            format!("{}.{}", self.version.major, self.version.minor),
            self.version,
            self.root(),
        )
    }

    /// Write an executable build tool script into the engine.
    #[cfg(unix)]
    pub fn with_build_tool(self, script: &str) -> Self {
        use std::os::unix::fs::PermissionsExt;

        let tool = self.engine().build_tool();
        fs::create_dir_all(tool.parent().unwrap()).unwrap();
        fs::write(&tool, script).unwrap();
        fs::set_permissions(&tool, fs::Permissions::from_mode(0o755)).unwrap();
        self
    }
}
