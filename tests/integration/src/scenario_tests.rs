//! Scenario tests across the whole pipeline
//!
//! Each module walks one end-to-end behaviour through a real session: a
//! local registry on disk, the provenance cache on disk and a recording
//! toolchain standing in for the engine's build tool.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use tempfile::TempDir;
use upm_core::{Error, InstallRequest, Session, Settings};
use upm_engine::{EngineSnapshot, Toolchain};
use upm_registry::LocalRegistry;
use upm_resolve::{EngineVersion, PluginManifest, VersionConstraint};
use upm_test_utils::{ManifestBuilder, RecordingToolchain, TestEngine, manifest};

// =============================================================================
// Test Infrastructure
// =============================================================================

/// A registry, a cache and one engine under a temporary directory.
struct World {
    temp: TempDir,
    engine: TestEngine,
}

impl World {
    fn new() -> Self {
        Self {
            temp: TempDir::new().unwrap(),
            engine: TestEngine::new("5.3"),
        }
    }

    fn settings(&self) -> Settings {
        Settings {
            registry_dir: self.temp.path().join("registry"),
            cache_dir: self.temp.path().join("cache"),
            platforms: vec!["Win64".to_string()],
            max_parallel_builds: 4,
            ..Settings::default()
        }
    }

    /// A fresh session over the shared registry and cache.
    fn session(&self, toolchain: &Arc<RecordingToolchain>) -> Session {
        let settings = self.settings();
        Session::with_parts(
            settings.clone(),
            EngineSnapshot::from_engines(vec![self.engine.engine()]),
            Arc::new(LocalRegistry::new(&settings.registry_dir)),
            Arc::clone(toolchain) as Arc<dyn Toolchain>,
        )
    }

    fn source(&self, manifest: &PluginManifest) -> PathBuf {
        let dir = self
            .temp
            .path()
            .join("sources")
            .join(format!("{}-{}", manifest.name(), manifest.version()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("upm.toml"), manifest.to_toml().unwrap()).unwrap();
        std::fs::write(dir.join(format!("{}.uplugin", manifest.name())), "{}").unwrap();
        dir
    }

    fn publish(&self, manifests: impl IntoIterator<Item = PluginManifest>) {
        let session = self.session(&Arc::new(RecordingToolchain::new()));
        for manifest in manifests {
            let dir = self.source(&manifest);
            session.upload(&dir, None, &[]).unwrap();
        }
    }
}

fn invoked(toolchain: &RecordingToolchain) -> Vec<String> {
    toolchain
        .invocations()
        .iter()
        .map(|u| format!("{} {}", u.plugin, u.version))
        .collect()
}

fn engine_53() -> EngineVersion {
    EngineVersion::new(5, 3)
}

// =============================================================================
// M1: Resolution
// =============================================================================

mod m1_resolution {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn m1_1_newest_version_in_range_is_selected() {
        let world = World::new();
        world.publish([manifest("Q", "1.0.0"), manifest("Q", "1.2.0"), manifest("Q", "2.0.0")]);
        let p = ManifestBuilder::new("P", "1.0.0")
            .depends("Q", ">=1.0.0, <2.0.0")
            .build();

        let session = world.session(&Arc::new(RecordingToolchain::new()));
        let resolved = session.resolve(&p, &engine_53(), &[]).unwrap();
        assert_eq!(resolved.version_of("Q"), Some(&semver::Version::new(1, 2, 0)));
    }

    #[test]
    fn m1_2_resolution_is_deterministic() {
        let world = World::new();
        world.publish([
            manifest("A", "1.0.0"),
            manifest("A", "1.1.0"),
            ManifestBuilder::new("B", "2.0.0").depends("A", "^1.0").build(),
        ]);
        let root = ManifestBuilder::new("Root", "0.1.0")
            .depends("B", "*")
            .depends("A", "<1.1.0")
            .build();

        let session = world.session(&Arc::new(RecordingToolchain::new()));
        let first = session.resolve(&root, &engine_53(), &[]).unwrap();
        let second = session.resolve(&root, &engine_53(), &[]).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.version_of("A"), Some(&semver::Version::new(1, 0, 0)));
    }

    #[test]
    fn m1_3_cycle_is_rejected() {
        let world = World::new();
        world.publish([
            ManifestBuilder::new("A", "1.0.0").depends("B", "*").build(),
            ManifestBuilder::new("B", "1.0.0").depends("A", "*").build(),
        ]);
        let root = ManifestBuilder::new("Root", "1.0.0").depends("A", "*").build();

        let session = world.session(&Arc::new(RecordingToolchain::new()));
        let result = session.resolve(&root, &engine_53(), &[]);
        match result {
            Err(Error::Resolve(upm_resolve::Error::CyclicDependency { cycle })) => {
                assert!(cycle.contains(&"A".to_string()));
                assert!(cycle.contains(&"B".to_string()));
            }
            other => panic!("expected a cycle, got {other:?}"),
        }
    }

    #[test]
    fn m1_4_conflict_names_both_referrers() {
        let world = World::new();
        world.publish([
            manifest("C", "1.0.0"),
            manifest("C", "2.0.0"),
            ManifestBuilder::new("A", "1.0.0").depends("C", ">=2.0.0").build(),
            ManifestBuilder::new("B", "1.0.0").depends("C", "<2.0.0").build(),
        ]);
        let root = ManifestBuilder::new("Root", "1.0.0")
            .depends("A", "*")
            .depends("B", "*")
            .build();

        let session = world.session(&Arc::new(RecordingToolchain::new()));
        match session.resolve(&root, &engine_53(), &[]) {
            Err(Error::Resolve(upm_resolve::Error::DependencyResolution { name, referrers, .. })) => {
                assert_eq!(name, "C");
                let names: Vec<&str> = referrers.iter().map(|r| r.name.as_str()).collect();
                assert!(names.contains(&"A"), "{names:?}");
                assert!(names.contains(&"B"), "{names:?}");
            }
            other => panic!("expected a conflict, got {other:?}"),
        }
    }

    #[test]
    fn m1_5_platform_restricted_dependency_is_skipped() {
        let world = World::new();
        world.publish([manifest("WinOnly", "1.0.0")]);
        let root = ManifestBuilder::new("Root", "1.0.0")
            .depends_on_platforms("WinOnly", "*", &["Win64"])
            .depends_on_platforms("Missing", "*", &["Mac"])
            .build();

        let session = world.session(&Arc::new(RecordingToolchain::new()));
        let resolved = session
            .resolve(&root, &engine_53(), &["Win64".to_string()])
            .unwrap();
        assert!(resolved.version_of("WinOnly").is_some());
        assert!(resolved.version_of("Missing").is_none());
    }
}

// =============================================================================
// M2: Building and the provenance cache
// =============================================================================

mod m2_build {
    use super::*;
    use pretty_assertions::assert_eq;

    fn p_and_q(world: &World) -> PathBuf {
        world.publish([manifest("Q", "1.0.0"), manifest("Q", "1.2.0")]);
        world.source(
            &ManifestBuilder::new("P", "1.0.0")
                .depends("Q", ">=1.0.0, <2.0.0")
                .build(),
        )
    }

    #[tokio::test]
    async fn m2_1_dependency_first_then_warm_cache() {
        let world = World::new();
        let p = p_and_q(&world);
        let platforms = vec!["Linux".to_string()];

        let toolchain = Arc::new(RecordingToolchain::new());
        let cold = world
            .session(&toolchain)
            .build(&p, &[engine_53()], &platforms)
            .await
            .unwrap();
        assert!(cold.report.is_success());
        assert_eq!(invoked(&toolchain), vec!["Q 1.2.0", "P 1.0.0"]);

        let again = Arc::new(RecordingToolchain::new());
        let warm = world
            .session(&again)
            .build(&p, &[engine_53()], &platforms)
            .await
            .unwrap();
        assert_eq!(warm.report.toolchain_invocations, 0);
        assert_eq!(warm.report.hits(), 2);
    }

    #[tokio::test]
    async fn m2_2_new_dependency_version_invalidates_only_dependents() {
        let world = World::new();
        world.publish([manifest("Q", "1.0.0"), manifest("R", "1.0.0")]);
        let p = world.source(
            &ManifestBuilder::new("P", "1.0.0")
                .depends("Q", "^1.0")
                .depends("R", "^1.0")
                .build(),
        );

        let first = Arc::new(RecordingToolchain::new());
        world.session(&first).build(&p, &[engine_53()], &[]).await.unwrap();
        assert_eq!(first.invocation_count(), 3);

        world.publish([manifest("Q", "1.1.0")]);
        let second = Arc::new(RecordingToolchain::new());
        let report = world
            .session(&second)
            .build(&p, &[engine_53()], &[])
            .await
            .unwrap()
            .report;

        assert_eq!(invoked(&second), vec!["Q 1.1.0", "P 1.0.0"]);
        assert_eq!(report.hits(), 1);

        let store = upm_build::DiskCache::new(world.settings().cache_dir);
        let p_key = upm_build::ProvenanceStore::keys(&store)
            .unwrap()
            .into_iter()
            .find(|k| k.plugin == "P")
            .unwrap();
        let p_entries = upm_build::ProvenanceStore::lookup(&store, &p_key).unwrap();
        assert_eq!(p_entries.len(), 2, "both provenances stay cached side by side");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn m2_3_concurrent_builds_share_a_dependency_build() {
        let world = World::new();
        world.publish([manifest("Shared", "1.0.0")]);
        let a = world.source(&ManifestBuilder::new("A", "1.0.0").depends("Shared", "*").build());
        let b = world.source(&ManifestBuilder::new("B", "1.0.0").depends("Shared", "*").build());

        let toolchain = Arc::new(RecordingToolchain::new().with_delay(Duration::from_millis(100)));
        let session = world.session(&toolchain);
        let engines = [engine_53()];
        let (ra, rb) = tokio::join!(
            session.build(&a, &engines, &[]),
            session.build(&b, &engines, &[]),
        );
        assert!(ra.unwrap().report.is_success());
        assert!(rb.unwrap().report.is_success());

        let shared_builds = toolchain
            .invocations()
            .iter()
            .filter(|u| u.plugin == "Shared")
            .count();
        assert_eq!(shared_builds, 1);
        assert_eq!(toolchain.invocation_count(), 3);
    }

    #[tokio::test]
    async fn m2_4_failure_cancels_dependents_but_not_siblings() {
        let world = World::new();
        world.publish([manifest("Broken", "1.0.0"), manifest("Fine", "1.0.0")]);
        let root = world.source(
            &ManifestBuilder::new("Root", "1.0.0")
                .depends("Broken", "*")
                .depends("Fine", "*")
                .build(),
        );

        let toolchain = Arc::new(RecordingToolchain::new().failing("Broken"));
        let report = world
            .session(&toolchain)
            .build(&root, &[engine_53()], &[])
            .await
            .unwrap()
            .report;

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].unit.plugin, "Broken");
        assert_eq!(report.cancelled.len(), 1);
        assert_eq!(report.cancelled[0].plugin, "Root");
        assert_eq!(report.completed.len(), 1);
        assert_eq!(report.completed[0].unit.plugin, "Fine");
    }
}

// =============================================================================
// M3: Installation and version tracking
// =============================================================================

mod m3_install {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn m3_1_downgrade_is_rejected_and_record_kept() {
        let world = World::new();
        world.publish([manifest("P", "1.0.0"), manifest("P", "1.2.0")]);
        let session = world.session(&Arc::new(RecordingToolchain::new()));

        session
            .install(InstallRequest::from_registry(
                "P",
                VersionConstraint::parse("=1.2.0").unwrap(),
            ))
            .await
            .unwrap();

        let result = session
            .install(InstallRequest::from_registry(
                "P",
                VersionConstraint::parse("=1.0.0").unwrap(),
            ))
            .await;
        assert!(matches!(
            result,
            Err(Error::Engine(upm_engine::Error::DowngradeNotPermitted { .. }))
        ));

        let installed = session.installed(None).unwrap();
        assert_eq!(installed.len(), 1);
        assert_eq!(installed[0].version, semver::Version::new(1, 2, 0));
    }

    #[tokio::test]
    async fn m3_2_upgrade_reports_previous_version() {
        let world = World::new();
        world.publish([manifest("P", "1.0.0")]);
        let session = world.session(&Arc::new(RecordingToolchain::new()));
        session
            .install(InstallRequest::from_registry("P", VersionConstraint::any()))
            .await
            .unwrap();

        world.publish([manifest("P", "1.1.0")]);
        let outcome = session
            .install(InstallRequest::from_registry("P", VersionConstraint::any()))
            .await
            .unwrap();

        assert_eq!(outcome.changes.len(), 1);
        assert_eq!(outcome.changes[0].previous, Some(semver::Version::new(1, 0, 0)));
        assert_eq!(outcome.changes[0].new, semver::Version::new(1, 1, 0));
    }

    #[test]
    fn m3_3_install_many_is_independent_per_engine() {
        let world = World::new();
        let newer = world.engine.add_install(EngineVersion::with_patch(5, 4, 0));
        let older = world.engine.engine();

        let package = world.temp.path().join("package");
        std::fs::create_dir_all(&package).unwrap();
        std::fs::write(package.join("P.uplugin"), "{}").unwrap();
        let artifact = |version: &str| upm_engine::InstallArtifact {
            name: "P".to_string(),
            version: semver::Version::parse(version).unwrap(),
            packages: [("Win64".to_string(), package.clone())].into_iter().collect(),
        };

        let installer = upm_engine::Installer::default();
        installer.install(&newer, &[artifact("2.0.0")]).unwrap();

        let results = installer.install_many(&[older.clone(), newer.clone()], &[artifact("1.0.0")]);
        assert!(results[0].1.is_ok());
        assert!(matches!(
            results[1].1,
            Err(upm_engine::Error::DowngradeNotPermitted { .. })
        ));
        assert_eq!(installer.installed(&older).unwrap()[0].version, semver::Version::new(1, 0, 0));
        assert_eq!(installer.installed(&newer).unwrap()[0].version, semver::Version::new(2, 0, 0));
    }
}
