//! Context sets: multi-valued key/value tags describing where a node applies.
//!
//! A query carries the contexts of the subject being checked (its server, its
//! world, ...) and every node carries the contexts it requires. A node applies
//! when the query's set [`ContextSet::satisfies`] the node's set.

pub mod context_set;
pub mod error;

pub use context_set::{
    sanitize_key, sanitize_value, Context, ContextSet, ImmutableContextSet, MutableContextSet,
};
pub use error::{ContextError, Result};
