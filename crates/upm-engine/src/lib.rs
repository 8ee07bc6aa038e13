//! Engine instances and everything that touches them
//!
//! - [`engine`]: the [`InstalledEngine`] model and per-session snapshots
//! - [`discovery`]: locating engine installations on the host
//! - [`toolchain`]: invoking the engine's plugin build tool
//! - [`installer`]: copying built plugins into an engine and tracking versions

pub mod discovery;
pub mod engine;
pub mod error;
pub mod installer;
pub mod toolchain;

pub use discovery::{
    CompositeDiscovery, DirectoryDiscovery, EngineDiscovery, KeyValueDiscovery, KeyValueLookup,
    discovery_for_host, read_engine_version,
};
pub use engine::{EngineSnapshot, InstalledEngine};
pub use error::{Error, Result};
pub use installer::{
    InstallArtifact, InstallPolicy, InstalledPlugin, Installer, VersionChange, INSTALLED_FILENAME,
};
pub use toolchain::{BuildOutput, BuildRequest, EngineToolchain, Toolchain};
