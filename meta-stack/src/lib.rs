//! Meta stacking: combines prefix, suffix and meta nodes from a resolved node
//! list into display values.

pub mod accumulator;
pub mod definition;
pub mod error;

pub use accumulator::{MetaAccumulator, MetaData};
pub use definition::{
    DuplicateRemoval, MetaStackDefinition, MetaStackElement, Selector, PREFIX_STACK, SUFFIX_STACK,
};
pub use error::{MetaStackError, Result};
