use stash_hash::HashError;
use stash_pkg::PackageError;
use stash_types::TypeError;

/// Errors from generating and resolving derivations.
#[derive(Debug, thiserror::Error)]
pub enum GenError {
    /// Malformed input, such as an unknown dependency kind.
    #[error(transparent)]
    Type(#[from] TypeError),

    #[error(transparent)]
    Hash(#[from] HashError),

    #[error(transparent)]
    Package(#[from] PackageError),

    /// A generator could not produce its derivation.
    #[error("generator {name} failed: {reason}")]
    Generator { name: String, reason: String },
}

/// Result alias for generator operations.
pub type GenResult<T> = Result<T, GenError>;
