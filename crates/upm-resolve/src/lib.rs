//! Plugin manifests, dependency resolution and build matrix planning
//!
//! This crate holds the synchronous core of the plugin manager:
//!
//! - [`manifest`]: the `upm.toml` / `.json` plugin manifest model
//! - [`version`]: version constraints and engine versions
//! - [`resolver`]: newest-wins dependency resolution for one engine/platform context
//! - [`planner`]: expansion of a resolution into ordered [`BuildUnit`]s
//! - [`graph`]: deterministic topological ordering used by the planner
//!
//! Nothing here performs builds or touches engine installations.

pub mod error;
pub mod graph;
pub mod manifest;
pub mod planner;
pub mod resolver;
pub mod version;

pub use error::{Error, Referrer, Result};
pub use graph::DependencyGraph;
pub use manifest::{DependencyReference, PluginManifest, MANIFEST_FILENAME};
pub use planner::{BuildPlan, BuildUnit, plan};
pub use resolver::{ResolvedDependencySet, ResolvedEdge, Resolver, VersionQuery, resolve};
pub use version::{EngineVersion, VersionConstraint};
