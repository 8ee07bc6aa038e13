//! [`RecordingToolchain`]: a fake build tool.

use std::collections::BTreeSet;
use std::fs;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use upm_engine::{BuildOutput, BuildRequest, Error, Result, Toolchain};
use upm_resolve::BuildUnit;

/// Writes a small fake package for every request and records each unit it
/// was asked to build.
///
/// Each package contains `<name>.uplugin`, a
/// `Binaries/<platform>/<name>.bin` listing the unit's provenance, and a
/// `deps.txt` naming the dependency packages it was handed.
#[derive(Debug, Default)]
pub struct RecordingToolchain {
    invocations: Mutex<Vec<BuildUnit>>,
    failing: BTreeSet<String>,
    delay: Option<Duration>,
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl RecordingToolchain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds of `plugin` exit with status 1.
    pub fn failing(mut self, plugin: &str) -> Self {
        self.failing.insert(plugin.to_string());
        self
    }

    /// Every build takes at least `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Units built so far, in invocation order.
    pub fn invocations(&self) -> Vec<BuildUnit> {
        self.invocations
            .lock()
            .map(|units| units.clone())
            .unwrap_or_default()
    }

    pub fn invocation_count(&self) -> usize {
        self.invocations().len()
    }

    /// Most builds that were running at the same time.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn write_package(request: &BuildRequest) -> std::io::Result<()> {
        let unit = &request.unit;
        let binaries = request.output_dir.join("Binaries").join(&unit.platform);
        fs::create_dir_all(&binaries)?;
        fs::write(
            request.output_dir.join(format!("{}.uplugin", unit.plugin)),
            format!("{} {}\n", unit.plugin, unit.version),
        )?;
        let provenance: String = unit
            .provenance
            .iter()
            .map(|(name, version)| format!("{name}={version}\n"))
            .collect();
        fs::write(binaries.join(format!("{}.bin", unit.plugin)), provenance)?;
        let deps: String = request
            .dependency_packages
            .iter()
            .map(|(name, _)| format!("{name}\n"))
            .collect();
        fs::write(request.output_dir.join("deps.txt"), deps)
    }
}

#[async_trait]
impl Toolchain for RecordingToolchain {
    async fn build(&self, request: &BuildRequest, cancel: &CancellationToken) -> Result<BuildOutput> {
        let unit = request.unit.to_string();
        if let Ok(mut invocations) = self.invocations.lock() {
            invocations.push(request.unit.clone());
        }
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let outcome = async {
            if let Some(delay) = self.delay {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(Error::Cancelled { unit: unit.clone() }),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            if self.failing.contains(&request.unit.plugin) {
                return Err(Error::BuildFailed {
                    unit: unit.clone(),
                    status: Some(1),
                    output: format!("error: {} does not compile\n", request.unit.plugin),
                });
            }
            Self::write_package(request)
                .map_err(|e| upm_fs::Error::io(&request.output_dir, e))?;
            Ok(BuildOutput {
                package_dir: request.output_dir.clone(),
                log: format!("built {unit}\n"),
            })
        }
        .await;

        self.running.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}
