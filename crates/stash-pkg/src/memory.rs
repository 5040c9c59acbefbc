use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use stash_cas::Singleflight;
use stash_types::{Derivation, PackageMetadata};
use tracing::debug;

use crate::build::{dir_name, remove_dir_if_present, run_builder};
use crate::error::{PackageError, PackageResult};
use crate::traits::{Availability, Builder, PackageHandle, PackageHandler, Storage};

#[derive(Default)]
struct State {
    last_used: Option<DateTime<Utc>>,
    refs: usize,
}

impl State {
    fn available(&self) -> bool {
        self.last_used.is_some()
    }
}

/// A package whose bookkeeping lives in memory.
pub struct MemoryPackage {
    id: String,
    content: PathBuf,
    logs: PathBuf,
    derivation: RwLock<Option<Derivation>>,
    metadata: RwLock<PackageMetadata>,
    state: Mutex<State>,
    builds: Singleflight<(), PackageResult<()>>,
}

impl MemoryPackage {
    fn new(id: &str, root: &Path) -> Self {
        let dir = root.join(dir_name(id));
        Self {
            id: id.to_string(),
            content: dir.join("content"),
            logs: dir.join("logs"),
            derivation: RwLock::new(None),
            metadata: RwLock::new(PackageMetadata::default()),
            state: Mutex::new(State::default()),
            builds: Singleflight::new(),
        }
    }

    fn build_once(&self, builder: Builder<'_>) -> PackageResult<()> {
        if self.state.lock().expect("lock poisoned").available() {
            return Ok(());
        }
        run_builder(&self.id, &self.content, &self.logs, builder)?;
        self.state.lock().expect("lock poisoned").last_used = Some(Utc::now());
        Ok(())
    }
}

impl PackageHandler for MemoryPackage {
    fn id(&self) -> &str {
        &self.id
    }

    fn derivation(&self) -> Option<Derivation> {
        self.derivation.read().expect("lock poisoned").clone()
    }

    fn metadata(&self) -> PackageMetadata {
        self.metadata.read().expect("lock poisoned").clone()
    }

    fn output_directory(&self) -> &Path {
        &self.content
    }

    fn logging_directory(&self) -> &Path {
        &self.logs
    }

    fn build(&self, builder: Builder<'_>) -> PackageResult<()> {
        self.builds.run((), || self.build_once(builder)).0
    }

    fn inc_ref(&self) -> PackageResult<()> {
        let mut state = self.state.lock().expect("lock poisoned");
        if !state.available() {
            return Err(PackageError::NotExist(self.id.clone()));
        }
        state.refs += 1;
        state.last_used = Some(Utc::now());
        Ok(())
    }

    fn dec_ref(&self) -> PackageResult<()> {
        let mut state = self.state.lock().expect("lock poisoned");
        if state.refs == 0 {
            return Err(PackageError::NegativeRefCount(self.id.clone()));
        }
        state.refs -= 1;
        Ok(())
    }

    fn try_remove(&self) -> PackageResult<bool> {
        let mut state = self.state.lock().expect("lock poisoned");
        if state.refs > 0 || !state.available() {
            return Ok(false);
        }
        state.last_used = None;
        remove_dir_if_present(&self.content)?;
        remove_dir_if_present(&self.logs)?;
        debug!(id = %self.id, "removed package");
        Ok(true)
    }

    fn available(&self) -> Availability {
        let state = self.state.lock().expect("lock poisoned");
        Availability {
            available: state.available(),
            last_used: state.last_used,
        }
    }

    fn ref_count(&self) -> usize {
        self.state.lock().expect("lock poisoned").refs
    }
}

/// In-memory [`Storage`] for tests and embedding.
///
/// Availability and reference counts are not persisted, but builders still
/// get real directories under `root`.
pub struct MemoryStorage {
    root: PathBuf,
    packages: Mutex<HashMap<String, Arc<MemoryPackage>>>,
}

impl MemoryStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            packages: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.packages.lock().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Override the last-used time of an available package.
    pub fn set_last_used(&self, id: &str, at: DateTime<Utc>) -> PackageResult<()> {
        let pkg = self.package(id);
        let mut state = pkg.state.lock().expect("lock poisoned");
        if !state.available() {
            return Err(PackageError::NotExist(id.to_string()));
        }
        state.last_used = Some(at);
        Ok(())
    }

    fn package(&self, id: &str) -> Arc<MemoryPackage> {
        self.packages
            .lock()
            .expect("lock poisoned")
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(MemoryPackage::new(id, &self.root)))
            .clone()
    }
}

impl Storage for MemoryStorage {
    fn get(&self, id: &str) -> PackageHandle {
        self.package(id)
    }

    fn add(&self, derivation: Derivation, metadata: PackageMetadata) -> PackageResult<PackageHandle> {
        let id = stash_hash::derivation_id(&derivation)?;
        let pkg = self.package(&id);
        *pkg.derivation.write().expect("lock poisoned") = Some(derivation);
        *pkg.metadata.write().expect("lock poisoned") = metadata;
        Ok(pkg)
    }

    fn packages(&self) -> PackageResult<Vec<PackageHandle>> {
        let packages = self.packages.lock().expect("lock poisoned");
        let mut ids: Vec<&String> = packages.keys().collect();
        ids.sort();
        Ok(ids
            .into_iter()
            .map(|id| packages[id].clone() as PackageHandle)
            .collect())
    }
}
