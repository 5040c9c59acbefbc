//! Package lifecycle for stash.
//!
//! A package is the built output of one derivation, keyed by its derivation
//! ID. This crate coordinates building each package at most once, reference
//! counting packages in use, and pruning idle ones:
//!
//! - [`PackageHandler`] / [`Storage`]: the backend-neutral contract
//! - [`LocalStorage`]: on-disk packages with cross-process file locking
//! - [`MemoryStorage`]: in-memory bookkeeping for tests and embedding
//! - [`PackageLease`]: scoped references
//! - [`prune`]: best-effort eviction of idle packages

mod build;
pub mod config;
pub mod error;
pub mod lease;
pub mod local;
pub mod memory;
pub mod prune;
pub mod traits;

pub use config::StorageConfig;
pub use error::{PackageError, PackageResult};
pub use lease::{lease, lease_with_runtime, PackageLease};
pub use local::{LocalPackage, LocalStorage};
pub use memory::{MemoryPackage, MemoryStorage};
pub use prune::{CancelToken, PruneReport};
pub use traits::{Availability, BoxError, Builder, PackageHandle, PackageHandler, Storage};

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;
    use std::time::Duration;

    use stash_cas::LocalCas;
    use stash_types::{Derivation, Digest, PackageMetadata};
    use tempfile::TempDir;

    fn fetch_foo() -> Derivation {
        Derivation::new("fetch-foo", "linux-amd64".parse().unwrap(), "url-fetch")
            .with_arg("https://example/foo.tgz")
    }

    /// A stand-in for `url-fetch`: publishes the payload to the blob store
    /// and materializes it into the output directory.
    fn fetch<'a>(
        cas: &'a LocalCas,
        fetches: &'a AtomicUsize,
        started: &'a Barrier,
    ) -> Builder<'a> {
        Box::new(move |out: &Path| -> Result<(), BoxError> {
            fetches.fetch_add(1, Ordering::SeqCst);
            started.wait();
            thread::sleep(Duration::from_millis(100));
            let digest = cas.put(b"foo archive bytes")?;
            cas.link_to(&digest, &out.join("foo.tgz"))?;
            Ok(())
        })
    }

    #[test]
    fn fetch_foo_builds_once_and_lands_in_the_cas() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path()).unwrap();
        let pkg = storage
            .add(fetch_foo(), PackageMetadata::with_version("1.0"))
            .unwrap();
        assert_eq!(pkg.id(), stash_hash::derivation_id(&fetch_foo()).unwrap());

        let fetches = AtomicUsize::new(0);
        let started = Barrier::new(2);
        let never = Barrier::new(1);
        let cas = storage.cas().clone();

        thread::scope(|s| {
            let first = s.spawn(|| pkg.build(fetch(&cas, &fetches, &started)));
            // Wait until the first fetch is mid-flight, then build again.
            started.wait();
            pkg.build(fetch(&cas, &fetches, &never)).unwrap();
            assert!(pkg.available().available);
            first.join().unwrap().unwrap();
        });

        assert_eq!(fetches.load(Ordering::SeqCst), 1);
        let digest = Digest::of(b"foo archive bytes");
        assert!(storage.cas().has(&digest));
        assert_eq!(
            fs::read(pkg.output_directory().join("foo.tgz")).unwrap(),
            b"foo archive bytes"
        );
    }

    #[test]
    fn storages_are_interchangeable_behind_the_trait() {
        let dir = TempDir::new().unwrap();
        let backends: Vec<Arc<dyn Storage>> = vec![
            Arc::new(LocalStorage::new(dir.path().join("local")).unwrap()),
            Arc::new(MemoryStorage::new(dir.path().join("memory"))),
        ];
        for storage in backends {
            let pkg = storage.add(fetch_foo(), PackageMetadata::default()).unwrap();
            assert!(Arc::ptr_eq(&pkg, &storage.get(pkg.id())));
            pkg.build(Box::new(|out: &Path| -> Result<(), BoxError> {
                fs::write(out.join("foo.tgz"), b"x")?;
                Ok(())
            }))
            .unwrap();

            let lease = lease(&pkg).unwrap();
            assert!(!pkg.try_remove().unwrap());
            drop(lease);

            let report = storage.prune(&CancelToken::new(), Duration::ZERO, 0).unwrap();
            assert_eq!(report.removed, 1);
            assert!(!pkg.available().available);
        }
    }
}
