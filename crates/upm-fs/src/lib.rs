//! Filesystem primitives for the Unreal plugin manager
//!
//! Provides crash-safe writes, directory staging, content checksums and a
//! format-agnostic configuration store shared by the cache, the installer and
//! the registry.

pub mod checksum;
pub mod config;
pub mod error;
pub mod io;

pub use config::ConfigStore;
pub use error::{Error, Result};
