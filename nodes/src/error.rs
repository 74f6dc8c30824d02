use contexts::ContextError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, NodeError>;

/// Errors raised while building nodes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// The payload is not valid for the node type, e.g. an empty permission.
    #[error("Node construction failed: {0}")]
    Construction(String),

    /// A serialized node key was empty.
    #[error("Invalid node key: {0:?}")]
    InvalidKey(String),

    /// A context attached to the node was malformed.
    #[error("Invalid node context: {0}")]
    Context(#[from] ContextError),
}
