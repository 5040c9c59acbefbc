use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use stash_types::Digest;

/// One or more blobs are absent from the store, or failed size verification.
///
/// Carries every missing digest so a caller can batch the re-uploads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingBlobsError {
    pub digests: Vec<Digest>,
}

impl MissingBlobsError {
    pub fn new(digests: Vec<Digest>) -> Self {
        Self { digests }
    }

    pub fn single(digest: Digest) -> Self {
        Self {
            digests: vec![digest],
        }
    }
}

impl fmt::Display for MissingBlobsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "missing {} blob(s):", self.digests.len())?;
        for digest in &self.digests {
            write!(f, " {digest}")?;
        }
        Ok(())
    }
}

impl std::error::Error for MissingBlobsError {}

/// Errors from blob store operations.
///
/// `Clone` so that the outcome of one coalesced write can be handed to every
/// caller waiting on it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CasError {
    #[error(transparent)]
    MissingBlobs(#[from] MissingBlobsError),

    /// A read offset past the end of the blob.
    #[error("offset {offset} out of range for blob {digest}")]
    InvalidOffset { digest: Digest, offset: u64 },

    /// A file offered for adoption does not have the digest's size.
    #[error("cannot adopt {path:?} as {digest}: file has {actual} bytes")]
    SizeMismatch {
        path: PathBuf,
        digest: Digest,
        actual: u64,
    },

    #[error("I/O error: {0}")]
    Io(Arc<io::Error>),
}

impl From<io::Error> for CasError {
    fn from(e: io::Error) -> Self {
        Self::Io(Arc::new(e))
    }
}

impl CasError {
    pub fn missing(digest: Digest) -> Self {
        Self::MissingBlobs(MissingBlobsError::single(digest))
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Self::MissingBlobs(_))
    }
}

/// Result alias for blob store operations.
pub type CasResult<T> = Result<T, CasError>;
