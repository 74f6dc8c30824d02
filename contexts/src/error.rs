//! Error types for context sanitization.

use thiserror::Error;

/// Errors raised while building a context entry.
///
/// Both variants correspond to a malformed key or value being rejected at
/// construction time. They are fatal to the call that produced them, never
/// to the set being modified.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContextError {
    /// The key was empty after trimming or contained control characters.
    #[error("Invalid context key: {0:?}")]
    InvalidKey(String),

    /// The value was empty after trimming or contained control characters.
    #[error("Invalid context value for key '{key}': {value:?}")]
    InvalidValue { key: String, value: String },
}

/// A specialized Result type for context operations.
pub type Result<T> = std::result::Result<T, ContextError>;
