//! LocalStorage: packages on the local filesystem.
//!
//! Layout:
//! ```text
//! {base}/
//! ├── cas/                  # blob store shared by builders
//! └── pkgs/
//!     └── <id>/
//!         ├── lock            # advisory file lock
//!         ├── content/        # build output
//!         ├── logs/
//!         ├── derivation.json
//!         ├── metadata.json
//!         └── stamp.json      # present iff the package is available
//! ```
//!
//! Exclusion between processes uses the `lock` file: a build holds it
//! exclusively, every referencing handle holds it shared, and removal only
//! proceeds if it can take it exclusively without waiting.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock, TryLockError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use fs4::FileExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use stash_cas::{LocalCas, Singleflight};
use stash_types::{Derivation, PackageMetadata};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::build::{dir_name, remove_dir_if_present, run_builder};
use crate::config::StorageConfig;
use crate::error::{PackageError, PackageResult};
use crate::prune::{self, CancelToken, PruneReport};
use crate::traits::{Availability, Builder, PackageHandle, PackageHandler, Storage};

const LOCK_FILE: &str = "lock";
const CONTENT_DIR: &str = "content";
const LOGS_DIR: &str = "logs";
const DERIVATION_FILE: &str = "derivation.json";
const METADATA_FILE: &str = "metadata.json";
const STAMP_FILE: &str = "stamp.json";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
struct Stamp {
    built_at: DateTime<Utc>,
    last_used: DateTime<Utc>,
}

#[derive(Default)]
struct Refs {
    count: usize,
    /// Open lock file holding a shared lock while `count > 0`.
    shared: Option<File>,
}

/// One package directory.
pub struct LocalPackage {
    id: String,
    dir: PathBuf,
    content: PathBuf,
    logs: PathBuf,
    derivation: RwLock<Option<Derivation>>,
    metadata: RwLock<Option<PackageMetadata>>,
    refs: Mutex<Refs>,
    builds: Singleflight<(), PackageResult<()>>,
}

impl LocalPackage {
    fn new(id: &str, packages_dir: &Path) -> Self {
        let dir = packages_dir.join(dir_name(id));
        Self {
            id: id.to_string(),
            content: dir.join(CONTENT_DIR),
            logs: dir.join(LOGS_DIR),
            dir,
            derivation: RwLock::new(None),
            metadata: RwLock::new(None),
            refs: Mutex::new(Refs::default()),
            builds: Singleflight::new(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.dir
    }

    fn open_lock(&self) -> io::Result<File> {
        fs::create_dir_all(&self.dir)?;
        OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(self.dir.join(LOCK_FILE))
    }

    fn read_stamp(&self) -> PackageResult<Option<Stamp>> {
        match fs::read(self.dir.join(STAMP_FILE)) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Replace the stamp atomically.
    fn write_stamp(&self, stamp: &Stamp) -> PackageResult<()> {
        write_json_atomic(&self.dir.join(STAMP_FILE), stamp)
    }

    fn is_available(&self) -> bool {
        self.available().available
    }

    fn record(&self, derivation: Derivation, metadata: PackageMetadata) -> PackageResult<()> {
        fs::create_dir_all(&self.dir)?;
        let drv_path = self.dir.join(DERIVATION_FILE);
        if !drv_path.exists() {
            write_json_atomic(&drv_path, &derivation)?;
        }
        write_json_atomic(&self.dir.join(METADATA_FILE), &metadata)?;
        *self.derivation.write().expect("lock poisoned") = Some(derivation);
        *self.metadata.write().expect("lock poisoned") = Some(metadata);
        Ok(())
    }

    fn read_record<T: DeserializeOwned>(&self, file: &str) -> Option<T> {
        let bytes = fs::read(self.dir.join(file)).ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(id = %self.id, file, error = %e, "ignoring unreadable package record");
                None
            }
        }
    }

    /// The exclusive part of a build: runs in the single in-process flight.
    fn build_exclusive(&self, builder: Builder<'_>) -> PackageResult<()> {
        if self.is_available() {
            debug!(id = %self.id, "package already available");
            return Ok(());
        }

        let lock = self.open_lock()?;
        FileExt::lock_exclusive(&lock)?;
        if self.is_available() {
            debug!(id = %self.id, "package built by another process");
            return Ok(());
        }

        run_builder(&self.id, &self.content, &self.logs, builder)?;
        let now = Utc::now();
        self.write_stamp(&Stamp {
            built_at: now,
            last_used: now,
        })
        // `lock` drops here, releasing the exclusive lock.
    }

    fn touch(&self) -> PackageResult<()> {
        if let Some(mut stamp) = self.read_stamp()? {
            stamp.last_used = Utc::now();
            self.write_stamp(&stamp)?;
        }
        Ok(())
    }
}

impl PackageHandler for LocalPackage {
    fn id(&self) -> &str {
        &self.id
    }

    fn derivation(&self) -> Option<Derivation> {
        if let Some(drv) = self.derivation.read().expect("lock poisoned").clone() {
            return Some(drv);
        }
        let drv: Derivation = self.read_record(DERIVATION_FILE)?;
        *self.derivation.write().expect("lock poisoned") = Some(drv.clone());
        Some(drv)
    }

    fn metadata(&self) -> PackageMetadata {
        if let Some(meta) = self.metadata.read().expect("lock poisoned").clone() {
            return meta;
        }
        self.read_record(METADATA_FILE).unwrap_or_default()
    }

    fn output_directory(&self) -> &Path {
        &self.content
    }

    fn logging_directory(&self) -> &Path {
        &self.logs
    }

    fn build(&self, builder: Builder<'_>) -> PackageResult<()> {
        let (result, led) = self.builds.run((), || self.build_exclusive(builder));
        if !led {
            debug!(id = %self.id, ok = result.is_ok(), "joined in-flight build");
        }
        result
    }

    fn inc_ref(&self) -> PackageResult<()> {
        let mut refs = self.refs.lock().expect("lock poisoned");
        if refs.count == 0 {
            if !self.is_available() {
                return Err(PackageError::NotExist(self.id.clone()));
            }
            let lock = self.open_lock()?;
            FileExt::lock_shared(&lock)?;
            // A removal may have won the race for the lock.
            if !self.is_available() {
                return Err(PackageError::NotExist(self.id.clone()));
            }
            refs.shared = Some(lock);
        }
        refs.count += 1;
        debug!(id = %self.id, refs = refs.count, "package referenced");
        if let Err(e) = self.touch() {
            warn!(id = %self.id, error = %e, "could not refresh last-used time");
        }
        Ok(())
    }

    fn dec_ref(&self) -> PackageResult<()> {
        let mut refs = self.refs.lock().expect("lock poisoned");
        if refs.count == 0 {
            return Err(PackageError::NegativeRefCount(self.id.clone()));
        }
        refs.count -= 1;
        if refs.count == 0 {
            refs.shared = None;
        }
        debug!(id = %self.id, refs = refs.count, "package released");
        Ok(())
    }

    fn try_remove(&self) -> PackageResult<bool> {
        // A reference may be parked on the file lock while holding `refs`.
        let refs = match self.refs.try_lock() {
            Ok(refs) => refs,
            Err(TryLockError::WouldBlock) => {
                debug!(id = %self.id, "reference in progress, not removing");
                return Ok(false);
            }
            Err(TryLockError::Poisoned(_)) => panic!("lock poisoned"),
        };
        if refs.count > 0 || !self.is_available() {
            return Ok(false);
        }

        let lock = self.open_lock()?;
        match FileExt::try_lock_exclusive(&lock) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                debug!(id = %self.id, "package locked by another process");
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        }
        if !self.is_available() {
            return Ok(false);
        }

        // Unpublish first so no reader sees a half-deleted package as available.
        fs::remove_file(self.dir.join(STAMP_FILE))?;
        remove_dir_if_present(&self.content)?;
        remove_dir_if_present(&self.logs)?;
        info!(id = %self.id, "removed package");
        Ok(true)
    }

    fn available(&self) -> Availability {
        match self.read_stamp() {
            Ok(Some(stamp)) => Availability {
                available: true,
                last_used: Some(stamp.last_used),
            },
            Ok(None) => Availability::unavailable(),
            Err(e) => {
                warn!(id = %self.id, error = %e, "unreadable stamp, treating package as unavailable");
                Availability::unavailable()
            }
        }
    }

    fn ref_count(&self) -> usize {
        self.refs.lock().expect("lock poisoned").count
    }
}

fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> PackageResult<()> {
    let json = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension(format!("{}.tmp", Uuid::now_v7()));
    fs::write(&tmp, json)?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}

/// Filesystem-backed [`Storage`].
///
/// Handles are cached per ID, so every caller in this process shares one
/// handle (and one in-flight build) per package. Separate processes, or
/// separate `LocalStorage` values over the same directory, coordinate through
/// file locks.
pub struct LocalStorage {
    packages_dir: PathBuf,
    cas: Arc<LocalCas>,
    handles: Mutex<HashMap<String, Arc<LocalPackage>>>,
}

impl LocalStorage {
    /// Open storage under `config.base_dir`, including its blob store.
    pub fn from_config(config: &StorageConfig) -> PackageResult<Self> {
        let packages_dir = config.packages_dir();
        fs::create_dir_all(&packages_dir)?;
        let cas = LocalCas::new(config.cas_config())?;
        info!(base = %config.base_dir.display(), "opened package storage");
        Ok(Self {
            packages_dir,
            cas: Arc::new(cas),
            handles: Mutex::new(HashMap::new()),
        })
    }

    pub fn new(base_dir: impl Into<PathBuf>) -> PackageResult<Self> {
        Self::from_config(&StorageConfig::with_base_dir(base_dir))
    }

    /// The blob store builders can publish into and materialize from.
    pub fn cas(&self) -> &Arc<LocalCas> {
        &self.cas
    }

    pub fn packages_dir(&self) -> &Path {
        &self.packages_dir
    }

    /// The concrete handle for `id`.
    pub fn package(&self, id: &str) -> Arc<LocalPackage> {
        let mut handles = self.handles.lock().expect("lock poisoned");
        handles
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(LocalPackage::new(id, &self.packages_dir)))
            .clone()
    }

    /// Drop cached handles that nobody else holds, for packages that are
    /// neither available nor referenced.
    fn forget_idle(&self) {
        let mut handles = self.handles.lock().expect("lock poisoned");
        let before = handles.len();
        handles.retain(|_, pkg| {
            Arc::strong_count(pkg) > 1 || pkg.ref_count() > 0 || pkg.is_available()
        });
        debug!(forgotten = before - handles.len(), "dropped idle package handles");
    }
}

impl Storage for LocalStorage {
    fn get(&self, id: &str) -> PackageHandle {
        self.package(id)
    }

    fn add(&self, derivation: Derivation, metadata: PackageMetadata) -> PackageResult<PackageHandle> {
        let id = stash_hash::derivation_id(&derivation)?;
        let pkg = self.package(&id);
        pkg.record(derivation, metadata)?;
        Ok(pkg)
    }

    /// Available packages on disk plus every handle this storage holds.
    /// Directories left behind by removed packages are not listed.
    fn packages(&self) -> PackageResult<Vec<PackageHandle>> {
        let handles = self.handles.lock().expect("lock poisoned");
        let mut ids: Vec<String> = handles.keys().cloned().collect();
        for entry in fs::read_dir(&self.packages_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() || !entry.path().join(STAMP_FILE).exists() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if !handles.keys().any(|id| dir_name(id) == name) {
                    ids.push(name.to_string());
                }
            }
        }
        drop(handles);
        ids.sort();
        Ok(ids.iter().map(|id| self.get(id)).collect())
    }

    fn prune(&self, cancel: &CancelToken, ttl: Duration, max: usize) -> PackageResult<PruneReport> {
        let report = prune::prune(self.packages()?, cancel, ttl, max);
        self.forget_idle();
        Ok(report)
    }
}
