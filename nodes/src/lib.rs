//! Nodes: the typed, context-scoped, optionally expiring settings attached to
//! users and groups.
//!
//! A [`Node`] is built with a [`NodeBuilder`] and stored in a [`NodeMap`]. Each
//! node has a canonical string key (see [`Node::key`]) and serializes as a
//! [`NodeRecord`].

pub mod builder;
pub mod equality;
pub mod error;
mod key;
pub mod node;
pub mod node_map;
pub mod record;
pub mod tristate;

pub use builder::NodeBuilder;
pub use equality::NodeEqualityPredicate;
pub use error::{NodeError, Result};
pub use node::{
    ChatMeta, ChatMetaType, Node, NodeKind, NodeType, Permission, RegexPattern, Specificity,
};
pub use node_map::{DataMutateResult, NodeMap, TemporaryMergeBehaviour, TemporaryMutateResult};
pub use record::NodeRecord;
pub use tristate::Tristate;
