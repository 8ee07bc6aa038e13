//! Effective settings and the partial layers they are merged from

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Directory name used under the platform config and data directories.
pub(crate) const APP_DIR: &str = "unreal-plugin-manager";

/// Effective configuration of one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Root of the local plugin registry.
    pub registry_dir: PathBuf,

    /// Root of the provenance-keyed binary cache.
    pub cache_dir: PathBuf,

    /// Extra directories scanned for engine installations.
    pub engine_search_paths: Vec<PathBuf>,

    /// Upper bound on concurrently running toolchain invocations.
    pub max_parallel_builds: usize,

    /// Per-unit build timeout. `None` waits indefinitely.
    pub build_timeout_secs: Option<u64>,

    /// Build configuration passed to the engine toolchain.
    pub configuration: String,

    /// Target platforms when a command names none.
    pub platforms: Vec<String>,

    /// Permit installs that lower an installed plugin's version.
    pub allow_downgrade: bool,
}

impl Default for Settings {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR);
        Self {
            registry_dir: data_dir.join("registry"),
            cache_dir: data_dir.join("cache"),
            engine_search_paths: Vec::new(),
            max_parallel_builds: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            build_timeout_secs: Some(3600),
            configuration: "Development".to_string(),
            platforms: vec![host_platform().to_string()],
            allow_downgrade: false,
        }
    }
}

impl Settings {
    /// Overlay every value `layer` sets. Relative paths are taken relative
    /// to `base`.
    pub fn apply(&mut self, layer: SettingsLayer, base: &Path) {
        if let Some(dir) = layer.registry_dir {
            self.registry_dir = absolutize(base, dir);
        }
        if let Some(dir) = layer.cache_dir {
            self.cache_dir = absolutize(base, dir);
        }
        if let Some(paths) = layer.engine_search_paths {
            self.engine_search_paths = paths.into_iter().map(|p| absolutize(base, p)).collect();
        }
        if let Some(n) = layer.max_parallel_builds {
            self.max_parallel_builds = n;
        }
        if let Some(secs) = layer.build_timeout_secs {
            // 0 disables the timeout
            self.build_timeout_secs = (secs > 0).then_some(secs);
        }
        if let Some(configuration) = layer.configuration {
            self.configuration = configuration;
        }
        if let Some(platforms) = layer.platforms {
            self.platforms = platforms;
        }
        if let Some(allow) = layer.allow_downgrade {
            self.allow_downgrade = allow;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_parallel_builds == 0 {
            return Err(invalid("max_parallel_builds", "must be at least 1"));
        }
        if self.platforms.is_empty() {
            return Err(invalid("platforms", "at least one platform is required"));
        }
        if self.configuration.trim().is_empty() {
            return Err(invalid("configuration", "must not be empty"));
        }
        Ok(())
    }

    pub fn build_timeout(&self) -> Option<std::time::Duration> {
        self.build_timeout_secs.map(std::time::Duration::from_secs)
    }
}

/// One configuration file. Unset keys leave the lower layers in effect.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SettingsLayer {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine_search_paths: Option<Vec<PathBuf>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_parallel_builds: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platforms: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_downgrade: Option<bool>,
}

/// Engine platform name of the machine we are running on.
pub fn host_platform() -> &'static str {
    if cfg!(target_os = "windows") {
        "Win64"
    } else if cfg!(target_os = "macos") {
        "Mac"
    } else {
        "Linux"
    }
}

fn absolutize(base: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}

fn invalid(key: &str, reason: &str) -> Error {
    Error::InvalidSetting {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        settings.validate().unwrap();
        assert_eq!(settings.platforms, vec![host_platform().to_string()]);
        assert!(settings.cache_dir.ends_with("cache"));
    }

    #[test]
    fn test_apply_overrides_only_set_keys() {
        let mut settings = Settings::default();
        let before = settings.clone();
        settings.apply(
            SettingsLayer {
                max_parallel_builds: Some(3),
                platforms: Some(vec!["Win64".into(), "Linux".into()]),
                ..Default::default()
            },
            Path::new("/project"),
        );

        assert_eq!(settings.max_parallel_builds, 3);
        assert_eq!(settings.platforms, vec!["Win64".to_string(), "Linux".to_string()]);
        assert_eq!(settings.registry_dir, before.registry_dir);
        assert_eq!(settings.configuration, before.configuration);
    }

    #[test]
    fn test_relative_paths_follow_the_layer_base() {
        let mut settings = Settings::default();
        let base = std::env::temp_dir().join("project");
        settings.apply(
            SettingsLayer {
                cache_dir: Some(PathBuf::from("build-cache")),
                registry_dir: Some(base.join("abs")),
                ..Default::default()
            },
            &base,
        );
        assert_eq!(settings.cache_dir, base.join("build-cache"));
        assert_eq!(settings.registry_dir, base.join("abs"));
    }

    #[test]
    fn test_zero_timeout_disables_it() {
        let mut settings = Settings::default();
        settings.apply(
            SettingsLayer {
                build_timeout_secs: Some(0),
                ..Default::default()
            },
            Path::new("."),
        );
        assert_eq!(settings.build_timeout(), None);
    }

    #[test]
    fn test_zero_parallelism_is_rejected() {
        let settings = Settings {
            max_parallel_builds: 0,
            ..Settings::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(Error::InvalidSetting { ref key, .. }) if key == "max_parallel_builds"
        ));
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        let result: std::result::Result<SettingsLayer, _> = toml::from_str("colour = \"blue\"\n");
        assert!(result.is_err());
    }
}
