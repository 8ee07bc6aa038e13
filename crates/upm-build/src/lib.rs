//! Binary cache and build orchestration
//!
//! - [`cache`]: the on-disk provenance store ([`DiskCache`])
//! - [`coalesce`]: single-flight lookup-or-build per [`BuildUnit`](upm_resolve::BuildUnit)
//! - [`orchestrator`]: runs a [`BuildPlan`](upm_resolve::BuildPlan) on a bounded worker pool

pub mod cache;
pub mod coalesce;
pub mod error;
pub mod orchestrator;

pub use cache::{Artifact, CacheEntry, CacheKey, DiskCache, ENTRY_FILENAME, ProvenanceStore};
pub use coalesce::{CoalescingCache, Resolution};
pub use error::{Error, Result};
pub use orchestrator::{
    BuildFailure, BuildReport, CompletedUnit, Orchestrator, OrchestratorConfig, SourceLocator,
    SourceMap,
};
