//! The structured data model fed to the stable hasher.
//!
//! A [`Message`] is a typed bag of numbered fields. Fields live in a
//! `BTreeMap`, so the order in which a caller populates them never leaks into
//! the hash.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A structured record with numbered fields.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    type_name: String,
    #[serde(default)]
    fields: BTreeMap<u32, Value>,
}

impl Message {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Set a field, consuming and returning the message.
    pub fn with(mut self, tag: u32, value: impl Into<Value>) -> Self {
        self.set(tag, value);
        self
    }

    /// Set a field, replacing any previous value at `tag`.
    pub fn set(&mut self, tag: u32, value: impl Into<Value>) {
        self.fields.insert(tag, value.into());
    }

    pub fn get(&self, tag: u32) -> Option<&Value> {
        self.fields.get(&tag)
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// All fields in ascending tag order.
    pub fn fields(&self) -> impl Iterator<Item = (u32, &Value)> {
        self.fields.iter().map(|(tag, value)| (*tag, value))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// A field value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Uint(u64),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),
    Message(Message),
    /// A repeated field. Element order is significant.
    List(Vec<Value>),
    /// A map field. Entry order is not significant.
    Map(Vec<(MapKey, Value)>),
    /// A polymorphic payload, unwrapped through the registry before hashing.
    Any(AnyValue),
    /// Raw data for a field the producer did not recognise.
    Unknown(Vec<u8>),
}

impl Value {
    pub fn list<I, V>(items: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::List(items.into_iter().map(Into::into).collect())
    }

    pub fn map<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<MapKey>,
        V: Into<Value>,
    {
        Self::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Whether this value is the zero value of its kind. Zero values are
    /// indistinguishable from absent fields and contribute nothing to a hash.
    /// Messages and `Any` payloads are always considered present.
    pub fn is_default(&self) -> bool {
        match self {
            Self::Bool(b) => !b,
            Self::Int(i) => *i == 0,
            Self::Uint(u) => *u == 0,
            // Only +0.0; -0.0 is a distinct value.
            Self::Double(d) => d.to_bits() == 0,
            Self::String(s) => s.is_empty(),
            Self::Bytes(b) => b.is_empty(),
            Self::List(items) => items.is_empty(),
            Self::Map(entries) => entries.is_empty(),
            Self::Message(_) | Self::Any(_) | Self::Unknown(_) => false,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Self::Uint(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&String> for Value {
    fn from(v: &String) -> Self {
        Self::String(v.clone())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl From<Message> for Value {
    fn from(v: Message) -> Self {
        Self::Message(v)
    }
}

impl From<AnyValue> for Value {
    fn from(v: AnyValue) -> Self {
        Self::Any(v)
    }
}

/// A map key. Keys sort numerically for integers and lexicographically (by
/// UTF-8 bytes) for strings.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MapKey {
    Bool(bool),
    Int(i64),
    Uint(u64),
    String(String),
}

impl fmt::Display for MapKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Uint(u) => write!(f, "{u}"),
            Self::String(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<bool> for MapKey {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for MapKey {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u64> for MapKey {
    fn from(v: u64) -> Self {
        Self::Uint(v)
    }
}

impl From<&str> for MapKey {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for MapKey {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

/// A packed message of a dynamically named type.
///
/// `value` is the JSON encoding of the packed [`Message`]; `type_url` names
/// its type, with the type name as the final path segment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnyValue {
    pub type_url: String,
    pub value: Vec<u8>,
}

impl AnyValue {
    pub const TYPE_URL_PREFIX: &'static str = "type.stash.build";

    /// Pack a message under the default type URL prefix.
    pub fn pack(message: &Message) -> Result<Self, serde_json::Error> {
        Ok(Self {
            type_url: format!("{}/{}", Self::TYPE_URL_PREFIX, message.type_name()),
            value: serde_json::to_vec(message)?,
        })
    }

    /// The type name this payload claims to carry.
    pub fn type_name(&self) -> &str {
        self.type_url
            .rsplit_once('/')
            .map(|(_, name)| name)
            .unwrap_or(&self.type_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_iterate_in_tag_order() {
        let msg = Message::new("t").with(3, "c").with(1, "a").with(2, "b");
        let tags: Vec<u32> = msg.fields().map(|(tag, _)| tag).collect();
        assert_eq!(tags, vec![1, 2, 3]);
    }

    #[test]
    fn set_replaces_existing_value() {
        let mut msg = Message::new("t").with(1, 5i64);
        msg.set(1, 7i64);
        assert_eq!(msg.get(1), Some(&Value::Int(7)));
        assert_eq!(msg.len(), 1);
    }

    #[test]
    fn default_values() {
        assert!(Value::from(false).is_default());
        assert!(Value::from(0i64).is_default());
        assert!(Value::from("").is_default());
        assert!(Value::list(Vec::<String>::new()).is_default());
        assert!(!Value::from("x").is_default());
        assert!(!Value::from(Message::new("empty")).is_default());
        assert!(!Value::Unknown(vec![]).is_default());
    }

    #[test]
    fn map_keys_order_numerically_and_lexicographically() {
        let mut keys = vec![MapKey::Int(10), MapKey::Int(-2), MapKey::Int(3)];
        keys.sort();
        assert_eq!(keys, vec![MapKey::Int(-2), MapKey::Int(3), MapKey::Int(10)]);

        let mut keys = vec![MapKey::from("b"), MapKey::from("B"), MapKey::from("a")];
        keys.sort();
        assert_eq!(
            keys,
            vec![MapKey::from("B"), MapKey::from("a"), MapKey::from("b")]
        );
    }

    #[test]
    fn any_type_name_is_last_segment() {
        let any = AnyValue::pack(&Message::new("pkg.Inner")).unwrap();
        assert_eq!(any.type_url, "type.stash.build/pkg.Inner");
        assert_eq!(any.type_name(), "pkg.Inner");

        let bare = AnyValue {
            type_url: "pkg.Bare".into(),
            value: vec![],
        };
        assert_eq!(bare.type_name(), "pkg.Bare");
    }
}
