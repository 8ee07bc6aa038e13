//! Session layer for Unreal Plugin Manager
//!
//! Ties the workspace together:
//!
//! - [`config`]: layered [`Settings`] resolution
//! - [`session`]: the resolve → plan → build → install pipeline over one
//!   frozen engine snapshot
//! - [`sources`]: plugin source lookup for the orchestrator

pub mod config;
pub mod error;
pub mod session;
pub mod sources;

pub use config::{Settings, SettingsLayer, SettingsResolver, host_platform};
pub use error::{Error, Result};
pub use session::{BuildOutcome, InstallOutcome, InstallRequest, InstallSource, Session};
pub use sources::SessionSources;
