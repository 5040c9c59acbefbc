//! Scoped package references.

use std::collections::HashSet;
use std::path::Path;

use tracing::warn;

use crate::error::PackageResult;
use crate::traits::{PackageHandle, Storage};

/// A reference to an available package, released on drop.
pub struct PackageLease {
    handle: PackageHandle,
}

impl PackageLease {
    /// Take a reference on `handle`.
    pub fn acquire(handle: &PackageHandle) -> PackageResult<Self> {
        handle.inc_ref()?;
        Ok(Self {
            handle: handle.clone(),
        })
    }

    pub fn handle(&self) -> &PackageHandle {
        &self.handle
    }

    pub fn id(&self) -> &str {
        self.handle.id()
    }

    pub fn output_directory(&self) -> &Path {
        self.handle.output_directory()
    }
}

impl std::fmt::Debug for PackageLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackageLease")
            .field("id", &self.handle.id())
            .finish()
    }
}

impl Drop for PackageLease {
    fn drop(&mut self) {
        if let Err(e) = self.handle.dec_ref() {
            warn!(id = self.handle.id(), error = %e, "failed to release package reference");
        }
    }
}

/// Shorthand for [`PackageLease::acquire`].
pub fn lease(handle: &PackageHandle) -> PackageResult<PackageLease> {
    PackageLease::acquire(handle)
}

/// Lease `handle` and, transitively, every runtime dependency named in the
/// packages' metadata. Each package is leased once. If any of them is not
/// available, the leases taken so far are released and the error returned.
pub fn lease_with_runtime(
    storage: &dyn Storage,
    handle: &PackageHandle,
) -> PackageResult<Vec<PackageLease>> {
    let mut leases = Vec::new();
    let mut seen = HashSet::new();
    let mut pending = vec![handle.clone()];
    while let Some(pkg) = pending.pop() {
        if !seen.insert(pkg.id().to_string()) {
            continue;
        }
        leases.push(PackageLease::acquire(&pkg)?);
        for dep in pkg.metadata().dependencies {
            if !seen.contains(&dep) {
                pending.push(storage.get(&dep));
            }
        }
    }
    Ok(leases)
}
