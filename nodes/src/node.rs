//! The node envelope and its type-specific payloads.

use chrono::{DateTime, Utc};
use contexts::{ContextSet, ImmutableContextSet};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::builder::NodeBuilder;
use crate::equality::NodeEqualityPredicate;
use crate::key;
use crate::record::NodeRecord;

/// The type tag of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Permission,
    RegexPermission,
    Inheritance,
    Prefix,
    Suffix,
    Meta,
    Weight,
    DisplayName,
}

impl NodeType {
    /// Returns true if `node` carries this type tag.
    pub fn matches(self, node: &Node) -> bool {
        node.node_type() == self
    }

    /// Prefix or suffix.
    pub fn is_chat_meta(self) -> bool {
        matches!(self, NodeType::Prefix | NodeType::Suffix)
    }

    /// Meta, prefix or suffix.
    pub fn is_meta_or_chat_meta(self) -> bool {
        self == NodeType::Meta || self.is_chat_meta()
    }

    /// Permission-like types are the ones that take part in permission lookups.
    pub fn is_permission_like(self) -> bool {
        matches!(self, NodeType::Permission | NodeType::RegexPermission)
    }
}

/// Which end of a display name a chat-meta node decorates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatMetaType {
    Prefix,
    Suffix,
}

impl ChatMetaType {
    pub fn node_type(self) -> NodeType {
        match self {
            ChatMetaType::Prefix => NodeType::Prefix,
            ChatMetaType::Suffix => NodeType::Suffix,
        }
    }

    pub(crate) fn key_prefix(self) -> &'static str {
        match self {
            ChatMetaType::Prefix => "prefix",
            ChatMetaType::Suffix => "suffix",
        }
    }
}

impl fmt::Display for ChatMetaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key_prefix())
    }
}

/// Payload of a plain permission node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Permission {
    name: String,
}

impl Permission {
    pub(crate) fn new(name: String) -> Self {
        Self { name }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `*` or anything ending in `.*`.
    pub fn is_wildcard(&self) -> bool {
        self.name == "*" || self.name.ends_with(".*")
    }

    /// Number of dot-separated segments before the wildcard: `a.b.*` is 2,
    /// `*` is 0. `None` for exact permissions.
    pub fn wildcard_level(&self) -> Option<u32> {
        if self.name == "*" {
            return Some(0);
        }
        let stem = self.name.strip_suffix(".*")?;
        Some(stem.split('.').count() as u32)
    }

    /// Returns true if this permission grants or negates `permission`, either
    /// exactly or through its wildcard.
    pub fn matches(&self, permission: &str) -> bool {
        if self.name == permission {
            return true;
        }
        if self.name == "*" {
            return true;
        }
        match self.name.strip_suffix('*') {
            Some(prefix) if prefix.ends_with('.') => {
                permission.len() > prefix.len() && permission.starts_with(prefix)
            }
            _ => false,
        }
    }
}

/// Payload of a regex permission node.
///
/// The raw pattern is always kept; `compiled` is `None` when the pattern could
/// not be parsed. Equality and hashing only consider the raw pattern.
#[derive(Debug, Clone)]
pub struct RegexPattern {
    pattern: String,
    compiled: Option<Arc<Regex>>,
}

impl RegexPattern {
    pub(crate) fn new(pattern: String) -> Self {
        let compiled = match Regex::new(&format!("^(?:{})$", pattern)) {
            Ok(regex) => Some(Arc::new(regex)),
            Err(e) => {
                tracing::warn!("Regex permission pattern {:?} does not compile: {}", pattern, e);
                None
            }
        };
        Self { pattern, compiled }
    }

    pub fn pattern_str(&self) -> &str {
        &self.pattern
    }

    /// The compiled pattern, anchored at both ends.
    pub fn pattern(&self) -> Option<&Regex> {
        self.compiled.as_deref()
    }

    /// Full-string match. An uncompilable pattern never matches.
    pub fn matches(&self, permission: &str) -> bool {
        self.pattern().is_some_and(|regex| regex.is_match(permission))
    }
}

impl PartialEq for RegexPattern {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern
    }
}

impl Eq for RegexPattern {}

impl Hash for RegexPattern {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.pattern.hash(state);
    }
}

/// Payload of a prefix or suffix node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChatMeta {
    priority: i32,
    value: String,
}

impl ChatMeta {
    pub(crate) fn new(priority: i32, value: String) -> Self {
        Self { priority, value }
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

/// Type-specific payload of a node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Permission(Permission),
    RegexPermission(RegexPattern),
    Inheritance { group: String },
    Prefix(ChatMeta),
    Suffix(ChatMeta),
    Meta { key: String, value: String },
    Weight(i32),
    DisplayName(String),
}

impl NodeKind {
    pub fn node_type(&self) -> NodeType {
        match self {
            NodeKind::Permission(_) => NodeType::Permission,
            NodeKind::RegexPermission(_) => NodeType::RegexPermission,
            NodeKind::Inheritance { .. } => NodeType::Inheritance,
            NodeKind::Prefix(_) => NodeType::Prefix,
            NodeKind::Suffix(_) => NodeType::Suffix,
            NodeKind::Meta { .. } => NodeType::Meta,
            NodeKind::Weight(_) => NodeType::Weight,
            NodeKind::DisplayName(_) => NodeType::DisplayName,
        }
    }
}

/// How specific a node is when several compete for the same permission.
///
/// Variants are ordered from least to most specific, so sorting descending
/// puts exact permissions first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Specificity {
    /// Not a permission-like node.
    None,
    Regex,
    Wildcard(u32),
    Exact,
}

/// A single typed, context-scoped, optionally expiring setting.
///
/// `==` compares every field (the EXACT predicate). Use [`Node::equals`] to
/// compare under a looser predicate, e.g. "is this the same logical setting".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "NodeRecord", into = "NodeRecord")]
pub struct Node {
    pub(crate) kind: NodeKind,
    pub(crate) value: bool,
    pub(crate) context: ImmutableContextSet,
    pub(crate) expiry: Option<DateTime<Utc>>,
}

impl Node {
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn node_type(&self) -> NodeType {
        self.kind.node_type()
    }

    /// Grant (`true`) or negation (`false`).
    pub fn value(&self) -> bool {
        self.value
    }

    pub fn is_negated(&self) -> bool {
        !self.value
    }

    /// The contexts this node requires. Empty means "applies everywhere".
    pub fn context(&self) -> &ImmutableContextSet {
        &self.context
    }

    pub fn expiry(&self) -> Option<DateTime<Utc>> {
        self.expiry
    }

    pub fn is_temporary(&self) -> bool {
        self.expiry.is_some()
    }

    /// A temporary node expires once `now` reaches its expiry.
    pub fn has_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry.is_some_and(|expiry| expiry <= now)
    }

    /// The canonical serialized key, e.g. `group.admin` or `meta.k.v`.
    pub fn key(&self) -> String {
        key::encode(&self.kind)
    }

    pub fn equals(&self, other: &Node, predicate: NodeEqualityPredicate) -> bool {
        predicate.are_equal(self, other)
    }

    /// A builder seeded with every field of this node.
    pub fn to_builder(&self) -> NodeBuilder {
        NodeBuilder::from_node(self)
    }

    pub fn as_permission(&self) -> Option<&Permission> {
        match &self.kind {
            NodeKind::Permission(permission) => Some(permission),
            _ => None,
        }
    }

    pub fn as_regex(&self) -> Option<&RegexPattern> {
        match &self.kind {
            NodeKind::RegexPermission(pattern) => Some(pattern),
            _ => None,
        }
    }

    /// The inherited group's name for inheritance nodes.
    pub fn inherited_group(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Inheritance { group } => Some(group),
            _ => None,
        }
    }

    /// The chat-meta type and payload for prefix/suffix nodes.
    pub fn as_chat_meta(&self) -> Option<(ChatMetaType, &ChatMeta)> {
        match &self.kind {
            NodeKind::Prefix(meta) => Some((ChatMetaType::Prefix, meta)),
            NodeKind::Suffix(meta) => Some((ChatMetaType::Suffix, meta)),
            _ => None,
        }
    }

    /// Key and value for meta nodes.
    pub fn as_meta(&self) -> Option<(&str, &str)> {
        match &self.kind {
            NodeKind::Meta { key, value } => Some((key, value)),
            _ => None,
        }
    }

    pub fn weight(&self) -> Option<i32> {
        match &self.kind {
            NodeKind::Weight(weight) => Some(*weight),
            _ => None,
        }
    }

    pub fn display_name(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::DisplayName(name) => Some(name),
            _ => None,
        }
    }

    pub fn is_wildcard(&self) -> bool {
        self.as_permission().is_some_and(Permission::is_wildcard)
    }

    pub fn wildcard_level(&self) -> Option<u32> {
        self.as_permission().and_then(Permission::wildcard_level)
    }

    pub fn specificity(&self) -> Specificity {
        match &self.kind {
            NodeKind::Permission(permission) => match permission.wildcard_level() {
                Some(level) => Specificity::Wildcard(level),
                None => Specificity::Exact,
            },
            NodeKind::RegexPermission(_) => Specificity::Regex,
            _ => Specificity::None,
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key(), self.value)?;
        if !self.context.is_empty() {
            write!(f, " {}", self.context)?;
        }
        if let Some(expiry) = self.expiry {
            write!(f, " (expires {})", expiry.to_rfc3339())?;
        }
        Ok(())
    }
}
