//! Error types for upm-core

use std::path::PathBuf;

/// Result type for session operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the session pipeline
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Fs(#[from] upm_fs::Error),

    #[error(transparent)]
    Resolve(#[from] upm_resolve::Error),

    #[error(transparent)]
    Engine(#[from] upm_engine::Error),

    #[error(transparent)]
    Build(#[from] upm_build::Error),

    #[error(transparent)]
    Registry(#[from] upm_registry::Error),

    #[error("config file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    #[error("invalid setting '{key}': {reason}")]
    InvalidSetting { key: String, reason: String },

    #[error("no published version of {name} matches {constraint} for engine {engine}")]
    NoMatchingVersion {
        name: String,
        constraint: String,
        engine: String,
    },

    /// Some units failed; nothing was installed.
    #[error("build failed for {} ({cancelled} dependent unit(s) cancelled)", .failed.join(", "))]
    BuildFailed { failed: Vec<String>, cancelled: usize },

    #[error("no built package of {plugin} {version} for engine {engine}")]
    MissingPackage {
        plugin: String,
        version: semver::Version,
        engine: String,
    },

    #[error("operation cancelled")]
    Cancelled,
}
