//! LocalCas: sharded on-disk blob store.

use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use stash_types::Digest;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::CasConfig;
use crate::error::{CasError, CasResult, MissingBlobsError};
use crate::flight::Singleflight;

/// A bounded reader over one blob.
pub type BlobReader = io::Take<File>;

/// Write counters, for observing deduplication.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CasStats {
    /// Blobs physically written from memory.
    pub blobs_written: u64,
    /// Files moved into the store by [`LocalCas::adopt`].
    pub blobs_adopted: u64,
    /// Writes or adoptions skipped because the blob was already present or
    /// another caller was already storing it.
    pub dedup_hits: u64,
}

#[derive(Default)]
struct Counters {
    blobs_written: AtomicU64,
    blobs_adopted: AtomicU64,
    dedup_hits: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Filesystem-backed content-addressable store.
///
/// A blob is stored at `{root}/{first two hex chars}/{full hex hash}`. Writes
/// land in `{root}/tmp` first and are renamed into place, so a blob path
/// either holds complete content or nothing, barring external tampering,
/// which size verification catches.
pub struct LocalCas {
    config: CasConfig,
    writes: Singleflight<Digest, CasResult<()>>,
    counters: Counters,
}

impl std::fmt::Debug for LocalCas {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalCas")
            .field("root", &self.config.root)
            .finish_non_exhaustive()
    }
}

impl LocalCas {
    /// Open the store, creating the shard directories, the staging area and
    /// the empty blob as needed.
    pub fn new(config: CasConfig) -> CasResult<Self> {
        fs::create_dir_all(config.staging_dir())?;
        for shard in 0..=u8::MAX {
            fs::create_dir_all(config.root.join(format!("{shard:02x}")))?;
        }

        let cas = Self {
            config,
            writes: Singleflight::new(),
            counters: Counters::default(),
        };
        let empty = Digest::empty();
        if !cas.has(&empty) {
            File::create(cas.blob_path(&empty))?;
        }
        debug!(root = %cas.config.root.display(), "opened local cas");
        Ok(cas)
    }

    pub fn at_path(root: impl Into<PathBuf>) -> CasResult<Self> {
        Self::new(CasConfig::new(root))
    }

    pub fn config(&self) -> &CasConfig {
        &self.config
    }

    pub fn root(&self) -> &Path {
        &self.config.root
    }

    /// Where the blob for `digest` lives, whether or not it is present.
    pub fn blob_path(&self, digest: &Digest) -> PathBuf {
        self.config
            .root
            .join(digest.hash.shard())
            .join(digest.hash.to_hex())
    }

    /// File metadata of a present, size-verified blob.
    pub fn stat(&self, digest: &Digest) -> CasResult<fs::Metadata> {
        match fs::metadata(self.blob_path(digest)) {
            Ok(meta) if meta.is_file() && meta.len() == digest.size => Ok(meta),
            Ok(meta) => {
                debug!(%digest, actual = meta.len(), "blob size mismatch");
                Err(CasError::missing(*digest))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(CasError::missing(*digest)),
            Err(e) => Err(e.into()),
        }
    }

    /// Whether `digest` is present with the right size.
    pub fn has(&self, digest: &Digest) -> bool {
        match self.stat(digest) {
            Ok(_) => true,
            Err(CasError::MissingBlobs(_)) => false,
            Err(e) => {
                warn!(%digest, error = %e, "stat failed, treating blob as missing");
                false
            }
        }
    }

    /// The subset of `digests` not present in the store, in input order.
    pub fn find_missing(&self, digests: &[Digest]) -> Vec<Digest> {
        digests.iter().filter(|d| !self.has(d)).copied().collect()
    }

    /// Like [`find_missing`](Self::find_missing), as an error when non-empty.
    pub fn require(&self, digests: &[Digest]) -> CasResult<()> {
        let missing = self.find_missing(digests);
        if missing.is_empty() {
            Ok(())
        } else {
            Err(MissingBlobsError::new(missing).into())
        }
    }

    /// Open a blob for reading, starting at `offset`.
    ///
    /// A `limit` of zero means "to the end"; larger limits are clamped to the
    /// remaining length. An offset equal to the size yields an empty reader.
    pub fn open(&self, digest: &Digest, offset: u64, limit: u64) -> CasResult<BlobReader> {
        let mut file = match File::open(self.blob_path(digest)) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(CasError::missing(*digest));
            }
            Err(e) => return Err(e.into()),
        };
        // Check the handle we will read from, not the path.
        if file.metadata()?.len() != digest.size {
            return Err(CasError::missing(*digest));
        }
        if offset > digest.size {
            return Err(CasError::InvalidOffset {
                digest: *digest,
                offset,
            });
        }
        let remaining = digest.size - offset;
        let limit = if limit == 0 { remaining } else { limit.min(remaining) };
        file.seek(SeekFrom::Start(offset))?;
        Ok(file.take(limit))
    }

    /// Read a whole blob into memory.
    pub fn get(&self, digest: &Digest) -> CasResult<Vec<u8>> {
        let mut reader = self.open(digest, 0, 0)?;
        let mut data = Vec::with_capacity(digest.size as usize);
        reader.read_to_end(&mut data)?;
        if data.len() as u64 != digest.size {
            // Truncated under us between the size check and the read.
            return Err(CasError::missing(*digest));
        }
        Ok(data)
    }

    /// Store `data`, returning its digest.
    ///
    /// Storing content that is already present is a no-op, and concurrent
    /// stores of the same content share one physical write.
    pub fn put(&self, data: &[u8]) -> CasResult<Digest> {
        let digest = Digest::of(data);
        if self.has(&digest) {
            Counters::bump(&self.counters.dedup_hits);
            debug!(%digest, "blob already present");
            return Ok(digest);
        }

        let (result, led) = self.writes.run(digest, || self.write_blob(&digest, data));
        if !led {
            Counters::bump(&self.counters.dedup_hits);
        }
        result.map(|()| digest)
    }

    /// Move an existing file into the store as `digest`.
    ///
    /// The file's size is checked against the digest but its content is not
    /// rehashed; callers adopt files they produced themselves. The source is
    /// consumed either way: moved into place, or deleted when the blob is
    /// already present.
    pub fn adopt(&self, digest: &Digest, path: &Path) -> CasResult<()> {
        let actual = fs::metadata(path)?.len();
        if actual != digest.size {
            return Err(CasError::SizeMismatch {
                path: path.to_path_buf(),
                digest: *digest,
                actual,
            });
        }

        let (result, led) = self.writes.run(*digest, || self.adopt_file(digest, path));
        result?;
        if !led {
            // Someone else stored this content while we waited.
            Counters::bump(&self.counters.dedup_hits);
            remove_if_present(path)?;
        }
        Ok(())
    }

    /// Materialize a blob at `dest`, creating parent directories.
    ///
    /// `fs::copy` uses copy-on-write clones where the platform and
    /// filesystem offer them.
    pub fn link_to(&self, digest: &Digest, dest: &Path) -> CasResult<()> {
        self.stat(digest)?;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        let copied = match fs::copy(self.blob_path(digest), dest) {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(CasError::missing(*digest));
            }
            Err(e) => return Err(e.into()),
        };
        if copied != digest.size {
            remove_if_present(dest)?;
            return Err(CasError::missing(*digest));
        }
        debug!(%digest, dest = %dest.display(), "materialized blob");
        Ok(())
    }

    pub fn stats(&self) -> CasStats {
        CasStats {
            blobs_written: self.counters.blobs_written.load(Ordering::Relaxed),
            blobs_adopted: self.counters.blobs_adopted.load(Ordering::Relaxed),
            dedup_hits: self.counters.dedup_hits.load(Ordering::Relaxed),
        }
    }

    fn staging_path(&self) -> PathBuf {
        self.config.staging_dir().join(Uuid::now_v7().to_string())
    }

    fn write_blob(&self, digest: &Digest, data: &[u8]) -> CasResult<()> {
        // A previous flight may have finished between our check and our turn.
        if self.has(digest) {
            Counters::bump(&self.counters.dedup_hits);
            return Ok(());
        }

        let staging = self.staging_path();
        let written = (|| -> io::Result<()> {
            let mut file = File::create(&staging)?;
            file.write_all(data)?;
            if self.config.sync_writes {
                file.sync_all()?;
            }
            fs::rename(&staging, self.blob_path(digest))
        })();
        if let Err(e) = written {
            let _ = fs::remove_file(&staging);
            return Err(e.into());
        }

        Counters::bump(&self.counters.blobs_written);
        debug!(%digest, "wrote blob");
        Ok(())
    }

    fn adopt_file(&self, digest: &Digest, path: &Path) -> CasResult<()> {
        if self.has(digest) {
            Counters::bump(&self.counters.dedup_hits);
            remove_if_present(path)?;
            debug!(%digest, "discarded duplicate adoption");
            return Ok(());
        }

        let dest = self.blob_path(digest);
        match fs::rename(path, &dest) {
            Ok(()) => {}
            Err(e) if e.raw_os_error() == Some(libc::EXDEV) => {
                // Different filesystem: copy into staging so the final
                // rename stays atomic.
                let staging = self.staging_path();
                let moved = fs::copy(path, &staging).and_then(|_| fs::rename(&staging, &dest));
                if let Err(e) = moved {
                    let _ = fs::remove_file(&staging);
                    return Err(e.into());
                }
                fs::remove_file(path)?;
            }
            Err(e) => return Err(e.into()),
        }

        Counters::bump(&self.counters.blobs_adopted);
        debug!(%digest, "adopted blob");
        Ok(())
    }
}

fn remove_if_present(path: &Path) -> CasResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use std::thread;
    use tempfile::TempDir;

    fn test_cas() -> (TempDir, LocalCas) {
        let dir = TempDir::new().unwrap();
        let cas = LocalCas::new(CasConfig::new(dir.path().join("cas")).with_sync_writes(false))
            .unwrap();
        (dir, cas)
    }

    #[test]
    fn layout_has_every_shard_and_the_empty_blob() {
        let (_dir, cas) = test_cas();
        assert!(cas.root().join("00").is_dir());
        assert!(cas.root().join("ff").is_dir());
        assert!(cas.root().join("tmp").is_dir());
        assert!(cas.has(&Digest::empty()));
        assert_eq!(cas.get(&Digest::empty()).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn reopening_keeps_content() {
        let dir = TempDir::new().unwrap();
        let digest = LocalCas::at_path(dir.path()).unwrap().put(b"kept").unwrap();
        let reopened = LocalCas::at_path(dir.path()).unwrap();
        assert_eq!(reopened.get(&digest).unwrap(), b"kept");
    }

    #[test]
    fn put_get_stat() {
        let (_dir, cas) = test_cas();
        let digest = cas.put(b"hello world").unwrap();
        assert_eq!(digest, Digest::of(b"hello world"));
        assert_eq!(cas.get(&digest).unwrap(), b"hello world");
        assert_eq!(cas.stat(&digest).unwrap().len(), 11);
        assert!(cas
            .blob_path(&digest)
            .starts_with(cas.root().join(digest.hash.shard())));
    }

    #[test]
    fn unreadable_blob_counts_as_absent() {
        let (_dir, cas) = test_cas();
        let digest = cas.put(b"shadowed").unwrap();
        // A file where the shard directory should be: stat fails with
        // something other than NotFound.
        let shard = cas.root().join(digest.hash.shard());
        fs::remove_dir_all(&shard).unwrap();
        fs::write(&shard, b"not a directory").unwrap();

        assert!(matches!(cas.stat(&digest), Err(CasError::Io(_))));
        assert!(!cas.has(&digest));
        assert_eq!(cas.find_missing(&[digest]), vec![digest]);
    }

    #[test]
    fn repeated_put_writes_once() {
        let (_dir, cas) = test_cas();
        cas.put(b"same").unwrap();
        cas.put(b"same").unwrap();
        let stats = cas.stats();
        assert_eq!(stats.blobs_written, 1);
        assert_eq!(stats.dedup_hits, 1);
    }

    #[test]
    fn concurrent_puts_write_once() {
        let (_dir, cas) = test_cas();
        let cas = Arc::new(cas);
        let n = 16;
        let barrier = Arc::new(Barrier::new(n));
        let data = vec![7u8; 256 * 1024];

        let handles: Vec<_> = (0..n)
            .map(|_| {
                let (cas, barrier, data) = (cas.clone(), barrier.clone(), data.clone());
                thread::spawn(move || {
                    barrier.wait();
                    cas.put(&data).unwrap()
                })
            })
            .collect();
        let digests: Vec<Digest> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert!(digests.iter().all(|d| *d == digests[0]));
        assert_eq!(cas.stats().blobs_written, 1);
        assert_eq!(cas.get(&digests[0]).unwrap(), data);
        assert_eq!(fs::read_dir(cas.config().staging_dir()).unwrap().count(), 0);
    }

    #[test]
    fn truncated_blob_reads_as_missing() {
        let (_dir, cas) = test_cas();
        let digest = cas.put(b"0123456789").unwrap();
        fs::write(cas.blob_path(&digest), b"01234").unwrap();

        assert!(!cas.has(&digest));
        assert!(cas.stat(&digest).unwrap_err().is_missing());
        assert!(cas.open(&digest, 0, 0).unwrap_err().is_missing());
        assert!(cas.get(&digest).unwrap_err().is_missing());
    }

    #[test]
    fn truncated_blob_is_rewritten_by_put() {
        let (_dir, cas) = test_cas();
        let digest = cas.put(b"0123456789").unwrap();
        fs::write(cas.blob_path(&digest), b"").unwrap();
        cas.put(b"0123456789").unwrap();
        assert_eq!(cas.get(&digest).unwrap(), b"0123456789");
        assert_eq!(cas.stats().blobs_written, 2);
    }

    #[test]
    fn find_missing_and_require() {
        let (_dir, cas) = test_cas();
        let present = cas.put(b"here").unwrap();
        let absent = Digest::of(b"not here");
        assert_eq!(cas.find_missing(&[present, absent]), vec![absent]);
        assert!(cas.require(&[present]).is_ok());
        match cas.require(&[absent, present]) {
            Err(CasError::MissingBlobs(e)) => assert_eq!(e.digests, vec![absent]),
            other => panic!("expected missing blobs, got {other:?}"),
        }
    }

    #[test]
    fn open_with_offset_and_limit() {
        let (_dir, cas) = test_cas();
        let digest = cas.put(b"0123456789").unwrap();
        let read = |offset, limit| {
            let mut out = String::new();
            cas.open(&digest, offset, limit)
                .unwrap()
                .read_to_string(&mut out)
                .unwrap();
            out
        };
        assert_eq!(read(0, 0), "0123456789");
        assert_eq!(read(3, 4), "3456");
        assert_eq!(read(8, 100), "89");
        assert_eq!(read(10, 0), "");
        assert!(matches!(
            cas.open(&digest, 11, 0),
            Err(CasError::InvalidOffset { offset: 11, .. })
        ));
    }

    #[test]
    fn adopt_moves_the_file() {
        let (dir, cas) = test_cas();
        let src = dir.path().join("built.bin");
        fs::write(&src, b"artifact").unwrap();
        let digest = Digest::of(b"artifact");

        cas.adopt(&digest, &src).unwrap();
        assert!(!src.exists());
        assert_eq!(cas.get(&digest).unwrap(), b"artifact");
        assert_eq!(cas.stats().blobs_adopted, 1);
    }

    #[test]
    fn adopting_present_content_discards_the_source() {
        let (dir, cas) = test_cas();
        let digest = cas.put(b"artifact").unwrap();
        let src = dir.path().join("again.bin");
        fs::write(&src, b"artifact").unwrap();

        cas.adopt(&digest, &src).unwrap();
        assert!(!src.exists());
        assert_eq!(cas.stats().blobs_adopted, 0);
        assert_eq!(cas.stats().dedup_hits, 1);
    }

    #[test]
    fn adopt_rejects_size_mismatch() {
        let (dir, cas) = test_cas();
        let src = dir.path().join("short.bin");
        fs::write(&src, b"art").unwrap();
        let err = cas.adopt(&Digest::of(b"artifact"), &src).unwrap_err();
        assert!(matches!(err, CasError::SizeMismatch { actual: 3, .. }));
        assert!(src.exists());
    }

    #[test]
    fn concurrent_adopts_keep_one_copy() {
        let (dir, cas) = test_cas();
        let cas = Arc::new(cas);
        let n = 8;
        let barrier = Arc::new(Barrier::new(n));
        let digest = Digest::of(b"shared output");

        let handles: Vec<_> = (0..n)
            .map(|i| {
                let src = dir.path().join(format!("out-{i}"));
                fs::write(&src, b"shared output").unwrap();
                let (cas, barrier) = (cas.clone(), barrier.clone());
                thread::spawn(move || {
                    barrier.wait();
                    cas.adopt(&digest, &src).unwrap();
                    src
                })
            })
            .collect();
        for h in handles {
            assert!(!h.join().unwrap().exists());
        }
        assert_eq!(cas.stats().blobs_adopted, 1);
        assert_eq!(cas.get(&digest).unwrap(), b"shared output");
    }

    #[test]
    fn link_to_copies_out() {
        let (dir, cas) = test_cas();
        let digest = cas.put(b"payload").unwrap();
        let dest = dir.path().join("out/nested/file");
        cas.link_to(&digest, &dest).unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"payload");
        // The store keeps its own copy.
        assert!(cas.has(&digest));
    }

    #[test]
    fn link_to_missing_blob() {
        let (dir, cas) = test_cas();
        let err = cas
            .link_to(&Digest::of(b"ghost"), &dir.path().join("x"))
            .unwrap_err();
        assert!(err.is_missing());
        assert!(!dir.path().join("x").exists());
    }
}
