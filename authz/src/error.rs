//! Error types for holders, tracks and query construction.
//!
//! Resolution itself never fails: a missing group is reported through
//! [`crate::resolver::Resolution::missing_groups`] and the branch is skipped.
//! [`AuthzError::UnknownGroup`] is only returned by operations that need the
//! group to exist, such as track promotion.

use contexts::ContextError;
use nodes::NodeError;
use thiserror::Error;

/// Errors raised by holder, track and lookup operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    /// A group referenced by name is not loaded.
    #[error("Unknown group: {0}")]
    UnknownGroup(String),

    /// A group name is empty or contains whitespace.
    #[error("Invalid group name: {0:?}")]
    InvalidGroupName(String),

    /// A track name is invalid or a track operation is out of range.
    #[error("Invalid track operation: {0}")]
    InvalidTrack(String),

    /// The group is not part of the track.
    #[error("Group {group} is not on track {track}")]
    NotOnTrack { track: String, group: String },

    #[error(transparent)]
    Node(#[from] NodeError),

    #[error(transparent)]
    Context(#[from] ContextError),
}

/// A specialized Result type for holder and track operations.
pub type Result<T> = std::result::Result<T, AuthzError>;

/// Lowercases a group or track name and rejects empty names and whitespace.
pub(crate) fn normalize_name(name: &str) -> Option<String> {
    let name = name.trim().to_lowercase();
    if name.is_empty() || name.chars().any(char::is_whitespace) {
        None
    } else {
        Some(name)
    }
}
