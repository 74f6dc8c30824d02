//! Flat serialized form of a node, used by storage collaborators.

use chrono::{DateTime, Utc};
use contexts::{ContextSet, ImmutableContextSet};
use serde::{Deserialize, Serialize};

use crate::builder::NodeBuilder;
use crate::error::NodeError;
use crate::node::Node;

fn default_value() -> bool {
    true
}

/// `(key, value, expiry, contexts)`, the shape storage layers persist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub key: String,
    #[serde(default = "default_value")]
    pub value: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "ContextSet::is_empty")]
    pub context: ImmutableContextSet,
}

impl From<Node> for NodeRecord {
    fn from(node: Node) -> Self {
        Self {
            key: node.key(),
            value: node.value,
            expiry: node.expiry,
            context: node.context,
        }
    }
}

impl TryFrom<NodeRecord> for Node {
    type Error = NodeError;

    fn try_from(record: NodeRecord) -> Result<Self, Self::Error> {
        if record.key.trim().is_empty() {
            return Err(NodeError::InvalidKey(record.key));
        }
        let builder = NodeBuilder::for_key(&record.key)
            .value(record.value)
            .context(record.context);
        match record.expiry {
            Some(expiry) => builder.expiry(expiry).build(),
            None => builder.build(),
        }
    }
}
