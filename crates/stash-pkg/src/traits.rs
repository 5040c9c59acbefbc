use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use stash_types::{Derivation, PackageMetadata};

use crate::error::PackageResult;
use crate::prune::{self, CancelToken, PruneReport};

/// Boxed error returned by builders.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A build function. It receives the package's output directory, which is
/// empty when the builder starts.
pub type Builder<'a> = Box<dyn FnOnce(&Path) -> Result<(), BoxError> + 'a>;

/// Shared handle to one package.
pub type PackageHandle = Arc<dyn PackageHandler>;

/// Snapshot of a package's availability.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Availability {
    pub available: bool,
    /// When the package was last built or referenced. `None` when unavailable.
    pub last_used: Option<DateTime<Utc>>,
}

impl Availability {
    pub fn unavailable() -> Self {
        Self {
            available: false,
            last_used: None,
        }
    }
}

/// Lifecycle of one derivation's built output.
///
/// A package moves `Unbuilt -> Building -> Available`, falling back to
/// `Unbuilt` when its builder fails. An available package may be referenced
/// any number of times and can only be removed while unreferenced; after
/// removal it may be built again.
pub trait PackageHandler: Send + Sync {
    /// The derivation ID this package is keyed by.
    fn id(&self) -> &str;

    /// The derivation this package was added with, if this storage knows it.
    fn derivation(&self) -> Option<Derivation>;

    fn metadata(&self) -> PackageMetadata;

    /// Where the built output lives.
    fn output_directory(&self) -> &Path;

    /// Where the builder may write logs.
    fn logging_directory(&self) -> &Path;

    /// Run `builder` unless the package is already available.
    ///
    /// At most one builder runs per package at a time. Callers that arrive
    /// while a build is in flight block until it finishes and receive its
    /// outcome instead of running their own builder.
    fn build(&self, builder: Builder<'_>) -> PackageResult<()>;

    /// Take a reference, refreshing the last-used time. Fails with
    /// [`PackageError::NotExist`](crate::PackageError::NotExist) if the
    /// package is not available.
    fn inc_ref(&self) -> PackageResult<()>;

    /// Release a reference taken with [`inc_ref`](Self::inc_ref).
    fn dec_ref(&self) -> PackageResult<()>;

    /// Remove the built output if the package is available and unreferenced.
    /// Returns whether anything was removed; a referenced package is not an
    /// error.
    fn try_remove(&self) -> PackageResult<bool>;

    /// Non-blocking availability query.
    fn available(&self) -> Availability;

    /// References currently held through this handle.
    fn ref_count(&self) -> usize;
}

/// A collection of packages keyed by derivation ID.
pub trait Storage: Send + Sync {
    /// Handle for `id`, created on first use. Repeated calls return the same
    /// handle.
    fn get(&self, id: &str) -> PackageHandle;

    /// Record a derivation and return the handle for its ID.
    fn add(&self, derivation: Derivation, metadata: PackageMetadata) -> PackageResult<PackageHandle>;

    /// Every package this storage knows about, sorted by ID.
    fn packages(&self) -> PackageResult<Vec<PackageHandle>>;

    /// Remove available, unreferenced packages unused for longer than `ttl`,
    /// oldest first, attempting at most `max` removals (`0` for no limit).
    fn prune(&self, cancel: &CancelToken, ttl: Duration, max: usize) -> PackageResult<PruneReport> {
        Ok(prune::prune(self.packages()?, cancel, ttl, max))
    }
}
