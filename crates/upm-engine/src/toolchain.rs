//! Engine toolchain invocation.
//!
//! A [`Toolchain`] turns a plugin source tree into a packaged plugin for one
//! build unit. [`EngineToolchain`] runs the engine's automation tool:
//!
//! ```text
//! RunUAT.sh BuildPlugin -Plugin=<src>/<name>.uplugin -Package=<out>
//!     -TargetPlatforms=<platform> -Configuration=<configuration>
//! ```
//!
//! A build succeeds when the tool exits with status zero and
//! `<out>/<name>.uplugin` exists.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use upm_resolve::BuildUnit;

use crate::engine::EngineSnapshot;
use crate::error::{Error, Result};

/// Everything a toolchain needs to build one unit.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub unit: BuildUnit,
    /// Plugin source tree containing `<plugin>.uplugin`.
    pub source_dir: PathBuf,
    /// Directory the packaged plugin must be written to. Created by the
    /// toolchain; must not exist beforehand.
    pub output_dir: PathBuf,
    /// Packages of the unit's dependencies, keyed by plugin name.
    pub dependency_packages: Vec<(String, PathBuf)>,
    pub timeout: Option<Duration>,
}

/// Result of a successful build.
#[derive(Debug, Clone)]
pub struct BuildOutput {
    pub package_dir: PathBuf,
    /// Combined stdout and stderr of the tool.
    pub log: String,
}

#[async_trait]
pub trait Toolchain: Send + Sync {
    /// Build one unit. Implementations must stop promptly once `cancel`
    /// fires and report [`Error::Cancelled`].
    async fn build(&self, request: &BuildRequest, cancel: &CancellationToken) -> Result<BuildOutput>;
}

/// Builds plugins with the automation tool of a discovered engine.
#[derive(Debug, Clone)]
pub struct EngineToolchain {
    engines: EngineSnapshot,
    configuration: String,
}

impl EngineToolchain {
    pub fn new(engines: EngineSnapshot) -> Self {
        Self {
            engines,
            configuration: "Development".to_string(),
        }
    }

    pub fn with_configuration(mut self, configuration: impl Into<String>) -> Self {
        self.configuration = configuration.into();
        self
    }

    /// Copy the plugin source and every dependency package into a staging
    /// tree laid out as `<stage>/Plugins/<name>/`.
    fn stage(&self, request: &BuildRequest, stage: &Path) -> Result<PathBuf> {
        let plugins = stage.join("Plugins");
        let plugin_dir = plugins.join(&request.unit.plugin);
        upm_fs::io::copy_dir(&request.source_dir, &plugin_dir)?;
        for (name, package) in &request.dependency_packages {
            upm_fs::io::copy_dir(package, &plugins.join(name))?;
        }
        Ok(plugin_dir)
    }

    fn command(&self, tool: &Path, plugin_file: &Path, request: &BuildRequest) -> Command {
        let mut command = Command::new(tool);
        command
            .arg("BuildPlugin")
            .arg(format!("-Plugin={}", plugin_file.display()))
            .arg(format!("-Package={}", request.output_dir.display()))
            .arg(format!("-TargetPlatforms={}", request.unit.platform))
            .arg(format!("-Configuration={}", self.configuration))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

#[async_trait]
impl Toolchain for EngineToolchain {
    async fn build(&self, request: &BuildRequest, cancel: &CancellationToken) -> Result<BuildOutput> {
        let unit = request.unit.to_string();
        let engine = self.engines.for_version(&request.unit.engine)?;
        let tool = engine.build_tool();
        if !tool.is_file() {
            return Err(Error::ToolNotFound { path: tool });
        }

        let stage = upm_fs::io::unique_sibling(&request.output_dir, "stage");
        let staged_plugin = self.stage(request, &stage)?;
        let plugin_file = staged_plugin.join(format!("{}.uplugin", request.unit.plugin));

        tracing::info!(unit = %unit, engine = %engine.display_name(), "Running BuildPlugin");
        let result = run_tool(
            self.command(&tool, &plugin_file, request),
            &tool,
            &unit,
            request.timeout,
            cancel,
        )
        .await;

        if let Err(e) = upm_fs::io::remove_dir_if_exists(&stage) {
            tracing::warn!(path = %stage.display(), "Failed to remove build staging: {}", e);
        }

        let (status, log) = result?;
        if !status.success() {
            return Err(Error::BuildFailed {
                unit,
                status: status.code(),
                output: log,
            });
        }

        let expected = request
            .output_dir
            .join(format!("{}.uplugin", request.unit.plugin));
        if !expected.is_file() {
            return Err(Error::MissingArtifact {
                unit,
                expected,
                output: log,
            });
        }

        Ok(BuildOutput {
            package_dir: request.output_dir.clone(),
            log,
        })
    }
}

/// Run a prepared command to completion, honouring `timeout` and `cancel`.
/// The child is killed when either fires.
async fn run_tool(
    mut command: Command,
    tool: &Path,
    unit: &str,
    timeout: Option<Duration>,
    cancel: &CancellationToken,
) -> Result<(std::process::ExitStatus, String)> {
    let child = command.spawn().map_err(|source| Error::Spawn {
        tool: tool.to_path_buf(),
        source,
    })?;

    let wait = async {
        match timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| Error::Timeout {
                    unit: unit.to_string(),
                    after: limit,
                })?,
            None => child.wait_with_output().await,
        }
        .map_err(|source| Error::Spawn {
            tool: tool.to_path_buf(),
            source,
        })
    };

    let output = tokio::select! {
        _ = cancel.cancelled() => {
            return Err(Error::Cancelled { unit: unit.to_string() });
        }
        output = wait => output?,
    };

    let mut log = String::from_utf8_lossy(&output.stdout).into_owned();
    log.push_str(&String::from_utf8_lossy(&output.stderr));
    Ok((output.status, log))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::engine::InstalledEngine;
    use rstest::rstest;
    use std::collections::BTreeMap;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;
    use upm_resolve::EngineVersion;

    fn fake_engine(root: &Path, script: &str) -> InstalledEngine {
        let engine = InstalledEngine::new("5.3", EngineVersion::new(5, 3), root);
        let tool = engine.build_tool();
        std::fs::create_dir_all(tool.parent().unwrap()).unwrap();
        std::fs::write(&tool, script).unwrap();
        std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();
        engine
    }

    fn request(temp: &TempDir) -> BuildRequest {
        let source = temp.path().join("src");
        std::fs::create_dir_all(&source).unwrap();
        std::fs::write(source.join("Widget.uplugin"), "{}").unwrap();
        BuildRequest {
            unit: BuildUnit {
                plugin: "Widget".into(),
                version: semver::Version::new(1, 0, 0),
                engine: EngineVersion::new(5, 3),
                platform: "Linux".into(),
                provenance: BTreeMap::new(),
            },
            source_dir: source,
            output_dir: temp.path().join("out"),
            dependency_packages: Vec::new(),
            timeout: Some(Duration::from_secs(30)),
        }
    }

    /// Copies the staged plugin to the package directory, like a real build.
    const PACKAGING_SCRIPT: &str = r#"#!/bin/sh
for arg in "$@"; do
  case "$arg" in
    -Plugin=*) plugin="${arg#-Plugin=}" ;;
    -Package=*) out="${arg#-Package=}" ;;
  esac
done
mkdir -p "$out"
cp "$plugin" "$out/"
echo "packaged $plugin"
"#;

    #[tokio::test]
    async fn test_successful_build_produces_package() {
        let temp = TempDir::new().unwrap();
        let engine = fake_engine(&temp.path().join("engine"), PACKAGING_SCRIPT);
        let toolchain = EngineToolchain::new(EngineSnapshot::from_engines(vec![engine]));

        let request = request(&temp);
        let output = toolchain.build(&request, &CancellationToken::new()).await.unwrap();
        assert!(output.package_dir.join("Widget.uplugin").is_file());
        assert!(output.log.contains("packaged"));
    }

    #[rstest]
    #[case::generic(1)]
    #[case::custom(3)]
    #[case::command_not_found(127)]
    #[tokio::test]
    async fn test_failing_tool_reports_status_and_output(#[case] code: i32) {
        let temp = TempDir::new().unwrap();
        let script = format!("#!/bin/sh\necho broken >&2\nexit {code}\n");
        let engine = fake_engine(&temp.path().join("engine"), &script);
        let toolchain = EngineToolchain::new(EngineSnapshot::from_engines(vec![engine]));

        match toolchain.build(&request(&temp), &CancellationToken::new()).await {
            Err(Error::BuildFailed { status, output, .. }) => {
                assert_eq!(status, Some(code));
                assert!(output.contains("broken"));
            }
            other => panic!("expected build failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_clean_exit_without_package_is_missing_artifact() {
        let temp = TempDir::new().unwrap();
        let engine = fake_engine(&temp.path().join("engine"), "#!/bin/sh\nexit 0\n");
        let toolchain = EngineToolchain::new(EngineSnapshot::from_engines(vec![engine]));

        let result = toolchain.build(&request(&temp), &CancellationToken::new()).await;
        assert!(matches!(result, Err(Error::MissingArtifact { .. })));
    }

    #[rstest]
    #[case::silent("#!/bin/sh\nsleep 10\n")]
    #[case::chatty("#!/bin/sh\necho starting\nsleep 10\n")]
    #[tokio::test]
    async fn test_timeout_is_distinct_from_failure(#[case] script: &str) {
        let temp = TempDir::new().unwrap();
        let engine = fake_engine(&temp.path().join("engine"), script);
        let toolchain = EngineToolchain::new(EngineSnapshot::from_engines(vec![engine]));

        let mut request = request(&temp);
        request.timeout = Some(Duration::from_millis(100));
        let result = toolchain.build(&request, &CancellationToken::new()).await;
        assert!(matches!(result, Err(Error::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_cancellation_stops_build() {
        let temp = TempDir::new().unwrap();
        let engine = fake_engine(&temp.path().join("engine"), "#!/bin/sh\nsleep 10\n");
        let toolchain = EngineToolchain::new(EngineSnapshot::from_engines(vec![engine]));

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });
        let result = toolchain.build(&request(&temp), &cancel).await;
        assert!(matches!(result, Err(Error::Cancelled { .. })));
    }

    #[tokio::test]
    async fn test_missing_engine_version() {
        let temp = TempDir::new().unwrap();
        let toolchain = EngineToolchain::new(EngineSnapshot::default());
        let result = toolchain.build(&request(&temp), &CancellationToken::new()).await;
        assert!(matches!(result, Err(Error::EngineUnavailable { .. })));
    }
}
