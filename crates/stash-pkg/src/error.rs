use std::io;
use std::sync::Arc;

use stash_cas::CasError;
use stash_hash::HashError;

/// Errors from package storage operations.
///
/// `Clone` because one build outcome is delivered to every caller that
/// joined the build.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PackageError {
    /// The package is not available: never built, failed, or removed.
    #[error("package does not exist: {0}")]
    NotExist(String),

    /// `dec_ref` without a matching `inc_ref`.
    #[error("negative reference count for package {0}")]
    NegativeRefCount(String),

    /// The builder returned an error. The package stays unbuilt.
    #[error("build of {id} failed: {reason}")]
    BuildFailed { id: String, reason: String },

    #[error("hash error: {0}")]
    Hash(#[from] HashError),

    #[error("cas error: {0}")]
    Cas(#[from] CasError),

    #[error("configuration error: {0}")]
    Config(String),

    /// A persisted package record could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(Arc<io::Error>),
}

impl From<io::Error> for PackageError {
    fn from(e: io::Error) -> Self {
        Self::Io(Arc::new(e))
    }
}

impl From<serde_json::Error> for PackageError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Result alias for package operations.
pub type PackageResult<T> = Result<T, PackageError>;
