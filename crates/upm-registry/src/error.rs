use std::path::PathBuf;

/// Errors from registry access.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Fs(#[from] upm_fs::Error),

    #[error(transparent)]
    Resolve(#[from] upm_resolve::Error),

    /// The registry has no such plugin, version or binary.
    #[error("{what} not found in registry")]
    RemoteNotFound { what: String },

    #[error("{name} {version} is already published")]
    AlreadyPublished {
        name: String,
        version: semver::Version,
    },

    #[error("cannot publish {name}: {reason}")]
    InvalidPublication { name: String, reason: String },

    #[error("invalid registry manifest at {path}: {message}")]
    InvalidManifest { path: PathBuf, message: String },
}

impl Error {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::RemoteNotFound { what: what.into() }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::RemoteNotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
