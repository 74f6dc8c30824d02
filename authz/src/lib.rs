//! Permission holders, query options and inheritance resolution.
//!
//! This crate sits between the node model and the cache:
//!
//! - [`QueryOptions`] describe how a lookup is performed (contextual or not,
//!   which [`Flag`]s apply, typed extension options).
//! - [`PermissionHolder`] is a user or group with its enduring and transient
//!   node collections.
//! - [`resolver::resolve`] walks a holder's inheritance graph through a
//!   [`GroupLookup`] and produces an ordered [`Resolution`].
//! - [`Track`] is an ordered promotion chain of groups.
//!
//! # Example
//!
//! ```rust
//! use authz::{resolver, DataType, PermissionHolder, QueryOptions};
//! use chrono::Utc;
//! use nodes::{NodeBuilder, Tristate};
//! use std::collections::HashMap;
//! use std::sync::Arc;
//!
//! let admin = PermissionHolder::group("admin").unwrap();
//! admin.add_node(DataType::Normal, NodeBuilder::permission("server.*").build().unwrap());
//!
//! let user = PermissionHolder::user(uuid::Uuid::new_v4());
//! user.add_node(DataType::Normal, NodeBuilder::inheritance("admin").build().unwrap());
//!
//! let mut groups = HashMap::new();
//! groups.insert("admin".to_string(), Arc::new(admin));
//!
//! let query = QueryOptions::non_contextual();
//! let resolution = resolver::resolve(&user, &query, &groups, Utc::now());
//! assert_eq!(resolution.permission_value("server.restart", &query), Tristate::True);
//! ```

pub mod error;
pub mod holder;
pub mod query;
pub mod resolver;
pub mod track;

pub use error::{AuthzError, Result};
pub use holder::{DataType, HolderId, PermissionHolder};
pub use query::{Flag, OptionKey, OptionValue, QueryMode, QueryOptions, QueryOptionsBuilder};
pub use resolver::{GroupLookup, Resolution, ResolvedNode};
pub use track::Track;
