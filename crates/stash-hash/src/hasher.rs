//! The stable hashing algorithm.
//!
//! # Encoding
//!
//! A message is written as the count of its populated fields followed by
//! `(tag, value)` pairs in ascending tag order. Fields holding a zero value
//! are skipped entirely. Each value starts with a one-byte kind marker:
//!
//! | kind | body |
//! |---|---|
//! | bool | one byte |
//! | int / uint / double | 8 bytes little-endian (`f64::to_bits` for doubles) |
//! | string / bytes | `u64` LE length, then the raw bytes |
//! | message | nested message encoding |
//! | list | `u64` LE count, then each element in order |
//! | map | `u64` LE count, then `(key, value)` pairs sorted by key |
//! | any | the concrete message's type name (as a string), then its encoding |
//!
//! Map keys are encoded like scalar values. Tags are `u32` LE.

use stash_types::Hash;

use crate::error::{HashError, HashResult};
use crate::message::{MapKey, Message, Value};
use crate::registry::TypeRegistry;

const KIND_BOOL: u8 = 0x01;
const KIND_INT: u8 = 0x02;
const KIND_UINT: u8 = 0x03;
const KIND_DOUBLE: u8 = 0x04;
const KIND_STRING: u8 = 0x05;
const KIND_BYTES: u8 = 0x06;
const KIND_MESSAGE: u8 = 0x07;
const KIND_LIST: u8 = 0x08;
const KIND_MAP: u8 = 0x09;
const KIND_ANY: u8 = 0x0a;

/// Deepest message nesting the hasher will follow.
pub const MAX_DEPTH: usize = 64;

/// Deterministic hasher for [`Message`]s.
///
/// Borrows the [`TypeRegistry`] used to validate fields and to unwrap
/// [`Value::Any`] payloads.
#[derive(Clone, Copy, Debug)]
pub struct StableHasher<'r> {
    registry: &'r TypeRegistry,
}

impl<'r> StableHasher<'r> {
    pub fn new(registry: &'r TypeRegistry) -> Self {
        Self { registry }
    }

    /// Hash a message into a fresh BLAKE3 digest.
    pub fn hash(&self, message: &Message) -> HashResult<Hash> {
        let mut hasher = blake3::Hasher::new();
        self.hash_into(&mut hasher, message)?;
        Ok(Hash::from_bytes(*hasher.finalize().as_bytes()))
    }

    /// Feed a message into an existing hasher.
    ///
    /// On error the hasher has absorbed a prefix of the encoding and must be
    /// discarded.
    pub fn hash_into(&self, hasher: &mut blake3::Hasher, message: &Message) -> HashResult<()> {
        self.write_message(hasher, message, 0)
    }

    fn write_message(&self, h: &mut blake3::Hasher, message: &Message, depth: usize) -> HashResult<()> {
        if depth >= MAX_DEPTH {
            return Err(HashError::TooDeep(MAX_DEPTH));
        }

        let schema = self.registry.schema(message.type_name());
        let mut populated = Vec::with_capacity(message.len());
        for (tag, value) in message.fields() {
            let declared = schema.map_or(true, |s| s.has_field(tag));
            if !declared || matches!(value, Value::Unknown(_)) {
                return Err(HashError::UnknownField {
                    message: message.type_name().to_string(),
                    tag,
                });
            }
            if !value.is_default() {
                populated.push((tag, value));
            }
        }

        write_len(h, populated.len());
        for (tag, value) in populated {
            h.update(&tag.to_le_bytes());
            self.write_value(h, message.type_name(), tag, value, depth)?;
        }
        Ok(())
    }

    fn write_value(
        &self,
        h: &mut blake3::Hasher,
        owner: &str,
        tag: u32,
        value: &Value,
        depth: usize,
    ) -> HashResult<()> {
        match value {
            Value::Bool(b) => {
                h.update(&[KIND_BOOL, u8::from(*b)]);
            }
            Value::Int(i) => {
                h.update(&[KIND_INT]);
                h.update(&i.to_le_bytes());
            }
            Value::Uint(u) => {
                h.update(&[KIND_UINT]);
                h.update(&u.to_le_bytes());
            }
            Value::Double(d) => {
                h.update(&[KIND_DOUBLE]);
                h.update(&d.to_bits().to_le_bytes());
            }
            Value::String(s) => {
                h.update(&[KIND_STRING]);
                write_bytes(h, s.as_bytes());
            }
            Value::Bytes(b) => {
                h.update(&[KIND_BYTES]);
                write_bytes(h, b);
            }
            Value::Message(m) => {
                h.update(&[KIND_MESSAGE]);
                self.write_message(h, m, depth + 1)?;
            }
            Value::List(items) => {
                h.update(&[KIND_LIST]);
                write_len(h, items.len());
                for item in items {
                    self.write_value(h, owner, tag, item, depth + 1)?;
                }
            }
            Value::Map(entries) => {
                let mut sorted: Vec<&(MapKey, Value)> = entries.iter().collect();
                sorted.sort_by(|a, b| a.0.cmp(&b.0));
                if let Some(dup) = sorted.windows(2).find(|w| w[0].0 == w[1].0) {
                    return Err(HashError::DuplicateMapKey {
                        message: owner.to_string(),
                        tag,
                        key: dup[0].0.to_string(),
                    });
                }
                h.update(&[KIND_MAP]);
                write_len(h, sorted.len());
                for (key, value) in sorted {
                    write_key(h, key);
                    self.write_value(h, owner, tag, value, depth + 1)?;
                }
            }
            Value::Any(any) => {
                let concrete = self.registry.unpack(any)?;
                h.update(&[KIND_ANY]);
                write_bytes(h, concrete.type_name().as_bytes());
                self.write_message(h, &concrete, depth + 1)?;
            }
            Value::Unknown(_) => {
                return Err(HashError::UnknownField {
                    message: owner.to_string(),
                    tag,
                });
            }
        }
        Ok(())
    }
}

fn write_len(h: &mut blake3::Hasher, len: usize) {
    h.update(&(len as u64).to_le_bytes());
}

fn write_bytes(h: &mut blake3::Hasher, bytes: &[u8]) {
    write_len(h, bytes.len());
    h.update(bytes);
}

fn write_key(h: &mut blake3::Hasher, key: &MapKey) {
    match key {
        MapKey::Bool(b) => {
            h.update(&[KIND_BOOL, u8::from(*b)]);
        }
        MapKey::Int(i) => {
            h.update(&[KIND_INT]);
            h.update(&i.to_le_bytes());
        }
        MapKey::Uint(u) => {
            h.update(&[KIND_UINT]);
            h.update(&u.to_le_bytes());
        }
        MapKey::String(s) => {
            h.update(&[KIND_STRING]);
            write_bytes(h, s.as_bytes());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::AnyValue;
    use crate::registry::MessageSchema;
    use proptest::prelude::*;

    fn hash(message: &Message) -> HashResult<Hash> {
        StableHasher::new(&TypeRegistry::new()).hash(message)
    }

    fn registry() -> TypeRegistry {
        TypeRegistry::new()
            .with(MessageSchema::new("test.Outer").field(1, "name").field(2, "payload"))
            .with(MessageSchema::new("test.Inner").field(1, "value"))
    }

    #[test]
    fn population_order_does_not_matter() {
        let a = Message::new("t").with(1, "x").with(2, 5i64).with(3, true);
        let b = Message::new("t").with(3, true).with(1, "x").with(2, 5i64);
        assert_eq!(hash(&a).unwrap(), hash(&b).unwrap());
    }

    #[test]
    fn default_fields_are_ignored() {
        let bare = Message::new("t").with(1, "x");
        let padded = Message::new("t")
            .with(1, "x")
            .with(2, 0i64)
            .with(3, "")
            .with(4, false)
            .with(5, Value::list(Vec::<String>::new()));
        assert_eq!(hash(&bare).unwrap(), hash(&padded).unwrap());
    }

    #[test]
    fn negative_zero_is_not_a_default() {
        let bare = Message::new("t");
        assert_eq!(
            hash(&bare).unwrap(),
            hash(&Message::new("t").with(1, 0.0f64)).unwrap()
        );
        assert_ne!(
            hash(&bare).unwrap(),
            hash(&Message::new("t").with(1, -0.0f64)).unwrap()
        );
    }

    #[test]
    fn list_order_matters() {
        let a = Message::new("t").with(1, Value::list(["a", "b"]));
        let b = Message::new("t").with(1, Value::list(["b", "a"]));
        assert_ne!(hash(&a).unwrap(), hash(&b).unwrap());
    }

    #[test]
    fn map_order_does_not_matter() {
        let a = Message::new("t").with(1, Value::map([("a", 1i64), ("b", 2i64)]));
        let b = Message::new("t").with(1, Value::map([("b", 2i64), ("a", 1i64)]));
        assert_eq!(hash(&a).unwrap(), hash(&b).unwrap());
    }

    #[test]
    fn duplicate_map_keys_are_rejected() {
        let msg = Message::new("t").with(1, Value::map([(1i64, "x"), (1i64, "y")]));
        assert!(matches!(
            hash(&msg),
            Err(HashError::DuplicateMapKey { tag: 1, .. })
        ));
    }

    #[test]
    fn string_boundaries_are_unambiguous() {
        let a = Message::new("t").with(1, Value::list(["ab", "c"]));
        let b = Message::new("t").with(1, Value::list(["a", "bc"]));
        assert_ne!(hash(&a).unwrap(), hash(&b).unwrap());
    }

    #[test]
    fn nested_messages_are_delimited() {
        let a = Message::new("t")
            .with(1, Message::new("n").with(2, "x"))
            .with(3, "y");
        let b = Message::new("t").with(1, Message::new("n").with(2, "x").with(3, "y"));
        assert_ne!(hash(&a).unwrap(), hash(&b).unwrap());
    }

    #[test]
    fn kinds_are_distinguished() {
        let int = Message::new("t").with(1, 1i64);
        let uint = Message::new("t").with(1, 1u64);
        let string = Message::new("t").with(1, "1");
        let bytes = Message::new("t").with(1, b"1".to_vec());
        let hashes = [&int, &uint, &string, &bytes].map(|m| hash(m).unwrap());
        for i in 0..hashes.len() {
            for j in i + 1..hashes.len() {
                assert_ne!(hashes[i], hashes[j]);
            }
        }
    }

    #[test]
    fn undeclared_field_is_an_error() {
        let reg = registry();
        let msg = Message::new("test.Outer").with(1, "x").with(9, "surprise");
        assert_eq!(
            StableHasher::new(&reg).hash(&msg),
            Err(HashError::UnknownField {
                message: "test.Outer".into(),
                tag: 9
            })
        );
    }

    #[test]
    fn unknown_payload_is_an_error_even_without_schema() {
        let msg = Message::new("t").with(4, Value::Unknown(vec![1, 2, 3]));
        assert!(matches!(hash(&msg), Err(HashError::UnknownField { tag: 4, .. })));
    }

    #[test]
    fn any_hashes_the_concrete_message() {
        let reg = registry();
        let hasher = StableHasher::new(&reg);
        let inner = Message::new("test.Inner").with(1, "v");

        let packed = Message::new("test.Outer").with(2, AnyValue::pack(&inner).unwrap());
        let mut repacked = AnyValue::pack(&inner).unwrap();
        repacked.type_url = "example.com/other/prefix/test.Inner".into();
        let other_wrapper = Message::new("test.Outer").with(2, repacked);

        assert_eq!(
            hasher.hash(&packed).unwrap(),
            hasher.hash(&other_wrapper).unwrap()
        );

        let different = Message::new("test.Outer").with(
            2,
            AnyValue::pack(&Message::new("test.Inner").with(1, "w")).unwrap(),
        );
        assert_ne!(hasher.hash(&packed).unwrap(), hasher.hash(&different).unwrap());
    }

    #[test]
    fn any_of_unregistered_type_fails() {
        let msg = Message::new("t").with(1, AnyValue::pack(&Message::new("x.Y")).unwrap());
        assert_eq!(hash(&msg), Err(HashError::UnknownMessageType("x.Y".into())));
    }

    #[test]
    fn deep_nesting_is_rejected() {
        let mut msg = Message::new("t").with(1, "leaf");
        for _ in 0..MAX_DEPTH {
            msg = Message::new("t").with(1, msg);
        }
        assert_eq!(hash(&msg), Err(HashError::TooDeep(MAX_DEPTH)));
    }

    #[test]
    fn hash_into_matches_hash() {
        let reg = TypeRegistry::new();
        let hasher = StableHasher::new(&reg);
        let msg = Message::new("t").with(1, "x");
        let mut h = blake3::Hasher::new();
        hasher.hash_into(&mut h, &msg).unwrap();
        assert_eq!(
            Hash::from_bytes(*h.finalize().as_bytes()),
            hasher.hash(&msg).unwrap()
        );
    }

    proptest! {
        #[test]
        fn map_insertion_order_never_leaks(
            entries in prop::collection::btree_map(".{0,8}", any::<i64>(), 0..16)
        ) {
            let forward: Vec<(String, i64)> = entries.clone().into_iter().collect();
            let reverse: Vec<(String, i64)> = entries.into_iter().rev().collect();
            let a = Message::new("t").with(1, Value::map(forward));
            let b = Message::new("t").with(1, Value::map(reverse));
            prop_assert_eq!(hash(&a).unwrap(), hash(&b).unwrap());
        }

        #[test]
        fn field_population_order_never_leaks(
            fields in prop::collection::btree_map(1u32..64, any::<u64>(), 0..16)
        ) {
            let mut a = Message::new("t");
            for (tag, v) in fields.iter() {
                a.set(*tag, *v);
            }
            let mut b = Message::new("t");
            for (tag, v) in fields.iter().rev() {
                b.set(*tag, *v);
            }
            prop_assert_eq!(hash(&a).unwrap(), hash(&b).unwrap());
        }
    }
}
