//! Errors raised while computing stable hashes.
//!
//! Every variant means the input cannot be hashed deterministically. Callers
//! must abort identifier computation rather than fall back to a guess.

/// Errors that can occur while hashing a message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HashError {
    /// A field tag not declared by the message's schema, or an opaque
    /// unknown-field payload.
    #[error("unknown field {tag} in message {message}")]
    UnknownField { message: String, tag: u32 },

    /// An `Any` payload names a message type the registry does not know.
    #[error("unknown message type: {0}")]
    UnknownMessageType(String),

    /// An `Any` payload could not be decoded into its declared type.
    #[error("invalid Any payload for {type_url}: {reason}")]
    InvalidAny { type_url: String, reason: String },

    /// The same key appears twice in one map field.
    #[error("duplicate map key {key} in field {tag} of {message}")]
    DuplicateMapKey {
        message: String,
        tag: u32,
        key: String,
    },

    /// Nesting exceeds the hasher's recursion limit.
    #[error("message nesting exceeds {0} levels")]
    TooDeep(usize),
}

/// Convenience alias for hashing results.
pub type HashResult<T> = Result<T, HashError>;
