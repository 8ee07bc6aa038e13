//! Settings resolution with a layered merge

use std::path::{Path, PathBuf};

use upm_fs::ConfigStore;

use super::settings::{APP_DIR, Settings, SettingsLayer};
use crate::error::{Error, Result};

/// File name of the global config inside the user's config directory.
pub const GLOBAL_CONFIG_FILENAME: &str = "config.toml";

/// Project config, relative to the project root.
pub const PROJECT_CONFIG_PATH: &str = ".upm/config.toml";

/// Resolves [`Settings`] by merging several sources
///
/// Layers, lowest precedence first:
/// 1. Built-in defaults
/// 2. Global config (`<config_dir>/unreal-plugin-manager/config.toml`)
/// 3. Project config (`<project>/.upm/config.toml`)
/// 4. An explicit config file, in any format [`ConfigStore`] understands
///
/// Missing global and project files are skipped. A missing explicit file is
/// an error.
#[derive(Debug, Clone)]
pub struct SettingsResolver {
    project_root: PathBuf,

    /// Override for the global config directory (used for testing).
    global_config_dir_override: Option<PathBuf>,

    explicit: Option<PathBuf>,
}

impl SettingsResolver {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
            global_config_dir_override: None,
            explicit: None,
        }
    }

    /// Use `dir` instead of the platform config directory.
    pub fn with_global_config_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.global_config_dir_override = Some(dir.into());
        self
    }

    /// Apply `path` on top of every other layer.
    pub fn with_explicit(mut self, path: impl Into<PathBuf>) -> Self {
        self.explicit = Some(path.into());
        self
    }

    fn global_config_dir(&self) -> Option<PathBuf> {
        if let Some(ref dir) = self.global_config_dir_override {
            return Some(dir.clone());
        }
        dirs::config_dir().map(|d| d.join(APP_DIR))
    }

    pub fn resolve(&self) -> Result<Settings> {
        let store = ConfigStore::new();
        let mut settings = Settings::default();

        if let Some(dir) = self.global_config_dir() {
            let path = dir.join(GLOBAL_CONFIG_FILENAME);
            if let Some(layer) = store.load_optional::<SettingsLayer>(&path)? {
                tracing::debug!(path = %path.display(), "Applying global config");
                settings.apply(layer, &dir);
            }
        }

        let project = self.project_root.join(PROJECT_CONFIG_PATH);
        if let Some(layer) = store.load_optional::<SettingsLayer>(&project)? {
            tracing::debug!(path = %project.display(), "Applying project config");
            settings.apply(layer, &self.project_root);
        }

        if let Some(ref path) = self.explicit {
            if !path.is_file() {
                return Err(Error::ConfigNotFound { path: path.clone() });
            }
            let layer: SettingsLayer = store.load(path)?;
            tracing::debug!(path = %path.display(), "Applying explicit config");
            settings.apply(layer, parent_or_current(path));
        }

        settings.validate()?;
        Ok(settings)
    }
}

fn parent_or_current(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}
