use std::path::PathBuf;
use std::time::Duration;

fn describe_status(status: &Option<i32>) -> String {
    match status {
        Some(code) => code.to_string(),
        None => "unknown (terminated by signal)".to_string(),
    }
}

/// Errors from engine discovery, toolchain runs and installation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Fs(#[from] upm_fs::Error),

    #[error(transparent)]
    Resolve(#[from] upm_resolve::Error),

    #[error("cannot read engine version from {path}: {reason}")]
    EngineVersionUnreadable { path: PathBuf, reason: String },

    #[error("engine lookup failed for key '{key}': {message}")]
    Lookup { key: String, message: String },

    #[error("no engine named '{name}' is installed")]
    EngineNotFound { name: String },

    #[error("no engine installation found")]
    NoEnginesInstalled,

    #[error("no installed engine provides version {version}")]
    EngineUnavailable { version: String },

    #[error("build tool not found at {path}")]
    ToolNotFound { path: PathBuf },

    #[error("failed to start {tool}: {source}")]
    Spawn {
        tool: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The build tool ran and reported failure.
    #[error("build of {unit} failed with status {}", describe_status(.status))]
    BuildFailed {
        unit: String,
        status: Option<i32>,
        output: String,
    },

    /// The build tool exited cleanly but left no package behind.
    #[error("build of {unit} produced no package at {expected}")]
    MissingArtifact {
        unit: String,
        expected: PathBuf,
        output: String,
    },

    #[error("build of {unit} timed out after {after:?}")]
    Timeout { unit: String, after: Duration },

    #[error("build of {unit} was cancelled")]
    Cancelled { unit: String },

    #[error("invalid installed-plugin record at {path}: {message}")]
    InvalidState { path: PathBuf, message: String },

    #[error("refusing to downgrade {plugin} from {installed} to {requested} in engine {engine}")]
    DowngradeNotPermitted {
        plugin: String,
        installed: semver::Version,
        requested: semver::Version,
        engine: String,
    },

    #[error("artifact for {plugin} {version} has no package for any platform")]
    EmptyArtifact {
        plugin: String,
        version: semver::Version,
    },
}

impl Error {
    /// Captured tool output, when the error came from a toolchain run.
    pub fn tool_output(&self) -> Option<&str> {
        match self {
            Self::BuildFailed { output, .. } | Self::MissingArtifact { output, .. } => Some(output),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
