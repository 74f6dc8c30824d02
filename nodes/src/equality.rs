use serde::{Deserialize, Serialize};

use crate::node::Node;

/// Selects which fields take part when two nodes are compared.
///
/// The type, payload and context are always compared. `Exact` additionally
/// compares value and expiry; the other predicates drop one or both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeEqualityPredicate {
    Exact,
    IgnoreValue,
    IgnoreExpiry,
    IgnoreValueOrExpiry,
}

impl NodeEqualityPredicate {
    pub fn are_equal(self, a: &Node, b: &Node) -> bool {
        if a.kind != b.kind || a.context != b.context {
            return false;
        }
        match self {
            NodeEqualityPredicate::Exact => a.value == b.value && a.expiry == b.expiry,
            NodeEqualityPredicate::IgnoreValue => a.expiry == b.expiry,
            NodeEqualityPredicate::IgnoreExpiry => a.value == b.value,
            NodeEqualityPredicate::IgnoreValueOrExpiry => true,
        }
    }
}
