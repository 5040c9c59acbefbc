use std::collections::{BTreeMap, HashMap};

use crate::error::{HashError, HashResult};
use crate::message::{AnyValue, Message};

/// The declared fields of one message type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageSchema {
    full_name: String,
    fields: BTreeMap<u32, String>,
}

impl MessageSchema {
    pub fn new(full_name: impl Into<String>) -> Self {
        Self {
            full_name: full_name.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Declare a field.
    pub fn field(mut self, tag: u32, name: impl Into<String>) -> Self {
        self.fields.insert(tag, name.into());
        self
    }

    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    pub fn has_field(&self, tag: u32) -> bool {
        self.fields.contains_key(&tag)
    }

    pub fn field_name(&self, tag: u32) -> Option<&str> {
        self.fields.get(&tag).map(String::as_str)
    }
}

/// Lookup table of message schemas.
///
/// Registries are plain values built by the caller and handed to the hasher;
/// nothing is registered globally. Messages whose type has a schema are
/// checked field by field; messages without one are hashed as-is.
#[derive(Clone, Debug, Default)]
pub struct TypeRegistry {
    schemas: HashMap<String, MessageSchema>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a schema, returning the one it replaced.
    pub fn register(&mut self, schema: MessageSchema) -> Option<MessageSchema> {
        self.schemas.insert(schema.full_name.clone(), schema)
    }

    pub fn with(mut self, schema: MessageSchema) -> Self {
        self.register(schema);
        self
    }

    pub fn schema(&self, type_name: &str) -> Option<&MessageSchema> {
        self.schemas.get(type_name)
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    /// Decode an `Any` payload into its concrete message.
    ///
    /// The payload's type must be registered and the decoded message must
    /// carry that same type name.
    pub fn unpack(&self, any: &AnyValue) -> HashResult<Message> {
        let type_name = any.type_name();
        if !self.schemas.contains_key(type_name) {
            return Err(HashError::UnknownMessageType(type_name.to_string()));
        }
        let message: Message =
            serde_json::from_slice(&any.value).map_err(|e| HashError::InvalidAny {
                type_url: any.type_url.clone(),
                reason: e.to_string(),
            })?;
        if message.type_name() != type_name {
            return Err(HashError::InvalidAny {
                type_url: any.type_url.clone(),
                reason: format!("payload is a {}", message.type_name()),
            });
        }
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> TypeRegistry {
        TypeRegistry::new().with(MessageSchema::new("pkg.Inner").field(1, "name"))
    }

    #[test]
    fn schema_lookup() {
        let reg = registry();
        let schema = reg.schema("pkg.Inner").unwrap();
        assert!(schema.has_field(1));
        assert!(!schema.has_field(2));
        assert_eq!(schema.field_name(1), Some("name"));
        assert!(reg.schema("pkg.Other").is_none());
    }

    #[test]
    fn register_replaces() {
        let mut reg = registry();
        let old = reg.register(MessageSchema::new("pkg.Inner").field(2, "other"));
        assert!(old.unwrap().has_field(1));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn unpack_roundtrip() {
        let inner = Message::new("pkg.Inner").with(1, "x");
        let any = AnyValue::pack(&inner).unwrap();
        assert_eq!(registry().unpack(&any).unwrap(), inner);
    }

    #[test]
    fn unpack_unknown_type() {
        let any = AnyValue::pack(&Message::new("pkg.Nope")).unwrap();
        assert_eq!(
            registry().unpack(&any),
            Err(HashError::UnknownMessageType("pkg.Nope".into()))
        );
    }

    #[test]
    fn unpack_rejects_garbage_and_mismatched_types() {
        let garbage = AnyValue {
            type_url: "type.stash.build/pkg.Inner".into(),
            value: b"not json".to_vec(),
        };
        assert!(matches!(
            registry().unpack(&garbage),
            Err(HashError::InvalidAny { .. })
        ));

        let mut lying = AnyValue::pack(&Message::new("pkg.Other")).unwrap();
        lying.type_url = "type.stash.build/pkg.Inner".into();
        assert!(matches!(
            registry().unpack(&lying),
            Err(HashError::InvalidAny { .. })
        ));
    }
}
