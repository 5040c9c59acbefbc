use std::fmt;
use std::sync::Arc;

use stash_pkg::PackageHandle;
use stash_types::{DependencyKind, Derivation, PackageMetadata, PlatformTriple};

use crate::context::BuildContext;
use crate::error::GenResult;

/// What a generator produces: a derivation and its advisory metadata.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Generated {
    pub derivation: Derivation,
    pub metadata: PackageMetadata,
}

impl Generated {
    pub fn new(derivation: Derivation) -> Self {
        Self {
            derivation,
            metadata: PackageMetadata::default(),
        }
    }

    pub fn with_metadata(mut self, metadata: PackageMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Produces a derivation for the platforms of a [`BuildContext`].
///
/// Generators resolve their own dependencies through the context, so the
/// same generator yields different derivations for different triples.
pub trait Generator: Send + Sync {
    /// Human-readable name for logs.
    fn name(&self) -> &str;

    fn generate(&self, ctx: &BuildContext) -> GenResult<Generated>;
}

/// An edge from a dependent to the generator of one of its dependencies.
#[derive(Clone)]
pub struct Dependency {
    pub kind: DependencyKind,
    pub generator: Arc<dyn Generator>,
    /// Whether the dependency must stay available while the dependent is used.
    pub runtime: bool,
}

impl Dependency {
    pub fn new(kind: DependencyKind, generator: Arc<dyn Generator>) -> Self {
        Self {
            kind,
            generator,
            runtime: false,
        }
    }

    /// Parse `kind` by name, e.g. `"build->host"`.
    pub fn parse(kind: &str, generator: Arc<dyn Generator>) -> GenResult<Self> {
        Ok(Self::new(kind.parse()?, generator))
    }

    pub fn runtime(mut self) -> Self {
        self.runtime = true;
        self
    }
}

impl fmt::Debug for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dependency")
            .field("kind", &self.kind)
            .field("generator", &self.generator.name())
            .field("runtime", &self.runtime)
            .finish()
    }
}

/// A dependency after generation: its platforms and stored package.
#[derive(Clone)]
pub struct ResolvedDependency {
    pub kind: DependencyKind,
    pub platforms: PlatformTriple,
    pub id: String,
    pub package: PackageHandle,
    pub runtime: bool,
}

impl fmt::Debug for ResolvedDependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedDependency")
            .field("kind", &self.kind)
            .field("platforms", &self.platforms)
            .field("id", &self.id)
            .field("runtime", &self.runtime)
            .finish_non_exhaustive()
    }
}
