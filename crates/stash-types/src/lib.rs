//! Foundation types for stash, a content-addressable build cache.
//!
//! Every other stash crate depends on `stash-types`.
//!
//! # Key Types
//!
//! - [`Hash`] — BLAKE3 content hash
//! - [`Digest`] — `(hash, size)` pair identifying a blob in the CAS
//! - [`Platform`] / [`PlatformTriple`] — cross-compile platform identifiers
//! - [`DependencyKind`] — which triple slots a dependency inherits
//! - [`Derivation`] — immutable description of one build step
//! - [`PackageMetadata`] — advisory data attached by a generator

pub mod derivation;
pub mod digest;
pub mod error;
pub mod platform;

pub use derivation::{Derivation, PackageMetadata};
pub use digest::{Digest, Hash};
pub use error::TypeError;
pub use platform::{DependencyKind, Platform, PlatformTriple};
