use std::sync::Arc;

use stash_pkg::{PackageHandle, Storage};
use stash_types::{Platform, PlatformTriple};
use tracing::debug;

use crate::error::GenResult;
use crate::generator::{Dependency, Generator, ResolvedDependency};
use crate::platform::resolve_platforms;

/// The platforms being generated for, plus the storage derivations land in.
///
/// Contexts are cheap to clone. Resolving a dependency derives a child
/// context with the dependency's triple and the same storage; nothing about
/// the current platforms is global.
#[derive(Clone)]
pub struct BuildContext {
    platforms: PlatformTriple,
    storage: Arc<dyn Storage>,
}

impl BuildContext {
    pub fn new(platforms: PlatformTriple, storage: Arc<dyn Storage>) -> Self {
        Self { platforms, storage }
    }

    /// A context building natively for the current machine.
    pub fn native(storage: Arc<dyn Storage>) -> Self {
        Self::new(PlatformTriple::uniform(Platform::current()), storage)
    }

    pub fn platforms(&self) -> &PlatformTriple {
        &self.platforms
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// A context for `platforms` sharing this context's storage.
    pub fn with_platforms(&self, platforms: PlatformTriple) -> Self {
        Self {
            platforms,
            storage: Arc::clone(&self.storage),
        }
    }

    /// Run `generator` for this context's platforms and add its derivation
    /// to storage.
    pub fn generate(&self, generator: &dyn Generator) -> GenResult<PackageHandle> {
        let generated = generator.generate(self)?;
        let package = self
            .storage
            .add(generated.derivation, generated.metadata)?;
        debug!(
            generator = generator.name(),
            id = package.id(),
            platforms = %self.platforms,
            "generated derivation"
        );
        Ok(package)
    }

    /// Generate `dep` for the triple its kind derives from ours.
    pub fn resolve(&self, dep: &Dependency) -> GenResult<ResolvedDependency> {
        let platforms = resolve_platforms(&self.platforms, dep.kind);
        let package = self
            .with_platforms(platforms.clone())
            .generate(dep.generator.as_ref())?;
        Ok(ResolvedDependency {
            kind: dep.kind,
            platforms,
            id: package.id().to_string(),
            package,
            runtime: dep.runtime,
        })
    }

    /// Resolve `deps` in declaration order.
    pub fn resolve_all(&self, deps: &[Dependency]) -> GenResult<Vec<ResolvedDependency>> {
        deps.iter().map(|dep| self.resolve(dep)).collect()
    }
}

impl std::fmt::Debug for BuildContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildContext")
            .field("platforms", &self.platforms)
            .finish_non_exhaustive()
    }
}
