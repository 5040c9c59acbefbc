//! Stable hashing for stash.
//!
//! Turns a structured build description into a deterministic identifier:
//! the same semantic content always yields the same [`Hash`], across
//! processes and platforms, regardless of field population order or map
//! insertion order.
//!
//! - [`Message`] / [`Value`] — the structured data model being hashed
//! - [`TypeRegistry`] — explicitly constructed schema table used to validate
//!   fields and unwrap polymorphic [`AnyValue`] payloads
//! - [`StableHasher`] — the hashing algorithm
//! - [`derivation_id`] — identifiers for [`Derivation`]s
//!
//! [`Hash`]: stash_types::Hash
//! [`Derivation`]: stash_types::Derivation

pub mod derivation;
pub mod error;
pub mod hasher;
pub mod message;
pub mod registry;

pub use derivation::{derivation_id, derivation_id_with, ToMessage, DERIVATION_TYPE, PLATFORM_TYPE};
pub use error::{HashError, HashResult};
pub use hasher::StableHasher;
pub use message::{AnyValue, MapKey, Message, Value};
pub use registry::{MessageSchema, TypeRegistry};
