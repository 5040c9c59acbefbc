//! Derivation identifiers.

use stash_types::{Derivation, Hash, Platform};
use tracing::debug;

use crate::error::HashResult;
use crate::hasher::StableHasher;
use crate::message::{Message, Value};
use crate::registry::{MessageSchema, TypeRegistry};

pub const DERIVATION_TYPE: &str = "stash.Derivation";
pub const PLATFORM_TYPE: &str = "stash.Platform";

/// Conversion into the hasher's message model.
pub trait ToMessage {
    fn to_message(&self) -> Message;
}

impl ToMessage for Platform {
    fn to_message(&self) -> Message {
        Message::new(PLATFORM_TYPE)
            .with(1, self.os())
            .with(2, self.arch())
    }
}

/// `fixed_output` is deliberately absent: it overrides the identity instead
/// of contributing to it.
impl ToMessage for Derivation {
    fn to_message(&self) -> Message {
        Message::new(DERIVATION_TYPE)
            .with(1, self.name())
            .with(2, self.platform().to_message())
            .with(3, self.builder())
            .with(4, Value::list(self.args()))
            .with(5, Value::list(self.env()))
            .with(6, Value::list(self.inputs()))
    }
}

impl TypeRegistry {
    /// A registry holding the schemas of stash's own messages.
    pub fn builtin() -> Self {
        Self::new()
            .with(
                MessageSchema::new(PLATFORM_TYPE)
                    .field(1, "os")
                    .field(2, "arch"),
            )
            .with(
                MessageSchema::new(DERIVATION_TYPE)
                    .field(1, "name")
                    .field(2, "platform")
                    .field(3, "builder")
                    .field(4, "args")
                    .field(5, "env")
                    .field(6, "inputs"),
            )
    }
}

/// Compute the identifier of a derivation: `<name>-<hex hash>`.
///
/// The name prefix is for humans reading directory listings and logs. With a
/// fixed output the hash part depends on the declared output hash alone, so
/// two differently named derivations of the same fixed output share it.
pub fn derivation_id(derivation: &Derivation) -> HashResult<String> {
    derivation_id_with(&TypeRegistry::builtin(), derivation)
}

/// Like [`derivation_id`], validating against a caller-provided registry.
pub fn derivation_id_with(registry: &TypeRegistry, derivation: &Derivation) -> HashResult<String> {
    let hash = match derivation.fixed_output() {
        Some(fixed) => {
            let mut hasher = blake3::Hasher::new();
            hasher.update(b"fixed-output:");
            hasher.update(fixed.as_bytes());
            Hash::from_bytes(*hasher.finalize().as_bytes())
        }
        None => StableHasher::new(registry).hash(&derivation.to_message())?,
    };
    let id = format!("{}-{}", derivation.name(), hash.to_hex());
    debug!(id = %id, fixed = derivation.fixed_output().is_some(), "computed derivation id");
    Ok(id)
}
