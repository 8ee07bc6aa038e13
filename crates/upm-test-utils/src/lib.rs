//! Shared test utilities for the unreal-plugin-manager workspace.
//!
//! Dev-dependency only, never published.
//!
//! # Modules
//!
//! - [`catalog`]: [`MemoryCatalog`], an in-memory [`VersionQuery`](upm_resolve::VersionQuery)
//! - [`manifest`]: [`ManifestBuilder`] for terse manifest setup
//! - [`toolchain`]: [`RecordingToolchain`], a fake build tool that records invocations
//! - [`engine`]: [`TestEngine`], a temporary engine installation layout

pub mod catalog;
pub mod engine;
pub mod manifest;
pub mod toolchain;

pub use catalog::MemoryCatalog;
pub use engine::TestEngine;
pub use manifest::{ManifestBuilder, manifest};
pub use toolchain::RecordingToolchain;
