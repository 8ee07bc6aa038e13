use std::fmt;
use std::path::PathBuf;

use crate::version::VersionConstraint;

/// One manifest that placed a constraint on a dependency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Referrer {
    pub name: String,
    pub version: semver::Version,
    /// `None` when the reference accepts any version.
    pub constraint: Option<VersionConstraint>,
}

impl fmt::Display for Referrer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.constraint {
            Some(c) => write!(f, "{} {} requires {}", self.name, self.version, c),
            None => write!(f, "{} {} requires any version", self.name, self.version),
        }
    }
}

fn join_referrers(referrers: &[Referrer]) -> String {
    referrers
        .iter()
        .map(|r| r.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

fn join_versions(versions: &[semver::Version]) -> String {
    versions
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Errors produced while loading manifests, resolving or planning.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid version constraint '{constraint}': {reason}")]
    VersionConstraintParse { constraint: String, reason: String },

    #[error("invalid version '{version}': {source}")]
    InvalidVersion {
        version: String,
        source: semver::Error,
    },

    #[error("invalid engine version '{version}': {reason}")]
    InvalidEngineVersion { version: String, reason: String },

    #[error("invalid plugin name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    #[error("failed to parse {format} manifest: {message}")]
    ManifestParse { format: String, message: String },

    #[error("failed to serialize manifest: {0}")]
    ManifestSerialize(String),

    #[error("plugin manifest not found: {0}")]
    ManifestNotFound(PathBuf),

    #[error(transparent)]
    Fs(#[from] upm_fs::Error),

    /// No available version satisfies every referrer of `name`.
    #[error(
        "no version of '{name}' for engine {engine} satisfies all constraints ({}); available: [{}]",
        join_referrers(.referrers),
        join_versions(.available)
    )]
    DependencyResolution {
        name: String,
        engine: String,
        referrers: Vec<Referrer>,
        available: Vec<semver::Version>,
    },

    #[error("cyclic dependency: {}", .cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    #[error("resolution of '{name}' did not settle after {passes} passes")]
    UnstableResolution { name: String, passes: usize },

    #[error("version query for '{name}' failed: {source}")]
    Query {
        name: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("{plugin} {version} cannot be built for engine {engine} on {platform}: {reason}")]
    UnsupportedTarget {
        plugin: String,
        version: semver::Version,
        engine: String,
        platform: String,
        reason: String,
    },

    #[error("operation cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, Error>;
