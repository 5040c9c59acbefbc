//! Derivation generation for stash.
//!
//! A [`Generator`] turns a [`BuildContext`] (the `(build, host, target)`
//! platforms plus a package [`Storage`](stash_pkg::Storage)) into a
//! derivation. Dependencies are edges tagged with a
//! [`DependencyKind`](stash_types::DependencyKind); resolving one derives the
//! dependency's triple from the dependent's, generates it in a child context
//! and records its ID as an input. The derivation graph is assembled bottom
//! up, one content-addressed ID at a time.

pub mod context;
pub mod error;
pub mod generator;
pub mod platform;
pub mod template;

pub use context::BuildContext;
pub use error::{GenError, GenResult};
pub use generator::{Dependency, Generated, Generator, ResolvedDependency};
pub use platform::{resolve_kind, resolve_platforms};
pub use template::TemplateGenerator;
