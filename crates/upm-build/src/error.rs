use std::path::PathBuf;
use std::sync::Arc;

/// Errors from the binary cache and build orchestration.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Fs(#[from] upm_fs::Error),

    #[error(transparent)]
    Resolve(#[from] upm_resolve::Error),

    #[error(transparent)]
    Engine(#[from] upm_engine::Error),

    /// A cache record that cannot be trusted. Lookups log these and treat
    /// the entry as a miss.
    #[error("corrupt cache entry at {path}: {reason}")]
    CacheCorruption { path: PathBuf, reason: String },

    #[error("failed to serialize cache entry for {unit}: {message}")]
    EntrySerialize { unit: String, message: String },

    #[error("no source available for {plugin} {version}: {reason}")]
    SourceUnavailable {
        plugin: String,
        version: semver::Version,
        reason: String,
    },

    #[error("build task for {unit} failed: {message}")]
    Task { unit: String, message: String },

    /// The same failure observed by every caller that joined one build.
    #[error(transparent)]
    Shared(Arc<Error>),
}

impl Error {
    /// Take back ownership of a shared error when this is the last holder.
    pub fn from_shared(error: Arc<Error>) -> Self {
        Arc::try_unwrap(error).unwrap_or_else(Error::Shared)
    }

    /// Whether the error stems from cancellation rather than a real failure.
    pub fn is_cancellation(&self) -> bool {
        match self {
            Self::Engine(upm_engine::Error::Cancelled { .. }) => true,
            Self::Resolve(upm_resolve::Error::Cancelled) => true,
            Self::Shared(inner) => inner.is_cancellation(),
            _ => false,
        }
    }

    /// Captured build tool output, if the failure came from a tool run.
    pub fn tool_output(&self) -> Option<&str> {
        match self {
            Self::Engine(e) => e.tool_output(),
            Self::Shared(inner) => inner.tool_output(),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
