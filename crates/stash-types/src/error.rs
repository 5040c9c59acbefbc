use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid hex string: {0}")]
    InvalidHex(String),

    #[error("invalid byte length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("invalid digest {0:?}: expected <hash>/<size>")]
    InvalidDigest(String),

    #[error("invalid platform {0:?}: expected <os>-<arch>")]
    InvalidPlatform(String),

    #[error("unknown dependency type: {0}")]
    UnknownDependencyType(String),
}
