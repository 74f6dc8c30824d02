//! Per-type node builders.

use chrono::{DateTime, Duration, Utc};
use contexts::{Context, ImmutableContextSet};

use crate::error::{NodeError, Result};
use crate::key;
use crate::node::{ChatMeta, ChatMetaType, Node, NodeKind, Permission, RegexPattern};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Payload {
    Permission(String),
    Regex(String),
    Inheritance(String),
    ChatMeta(ChatMetaType, i32, String),
    Meta(String, String),
    Weight(i32),
    DisplayName(String),
}

/// Builds a [`Node`]. Payload validation happens in [`NodeBuilder::build`].
///
/// ```
/// use nodes::NodeBuilder;
///
/// let node = NodeBuilder::permission("example.foo")
///     .with_context("world", "nether")
///     .build()
///     .unwrap();
/// assert_eq!(node.key(), "example.foo");
/// ```
#[derive(Debug, Clone)]
pub struct NodeBuilder {
    payload: Payload,
    value: bool,
    context: ImmutableContextSet,
    extra_contexts: Vec<(String, String)>,
    expiry: Option<DateTime<Utc>>,
    /// Set by `expiry_after` when now plus the duration is out of range.
    unreachable_expiry: Option<Duration>,
}

impl NodeBuilder {
    fn new(payload: Payload) -> Self {
        Self {
            payload,
            value: true,
            context: ImmutableContextSet::empty(),
            extra_contexts: Vec::new(),
            expiry: None,
            unreachable_expiry: None,
        }
    }

    pub fn permission(permission: impl Into<String>) -> Self {
        Self::new(Payload::Permission(permission.into()))
    }

    pub fn regex(pattern: impl Into<String>) -> Self {
        Self::new(Payload::Regex(pattern.into()))
    }

    pub fn inheritance(group: impl Into<String>) -> Self {
        Self::new(Payload::Inheritance(group.into()))
    }

    pub fn prefix(priority: i32, prefix: impl Into<String>) -> Self {
        Self::chat_meta(ChatMetaType::Prefix, priority, prefix)
    }

    pub fn suffix(priority: i32, suffix: impl Into<String>) -> Self {
        Self::chat_meta(ChatMetaType::Suffix, priority, suffix)
    }

    pub fn chat_meta(kind: ChatMetaType, priority: i32, value: impl Into<String>) -> Self {
        Self::new(Payload::ChatMeta(kind, priority, value.into()))
    }

    pub fn meta(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(Payload::Meta(key.into(), value.into()))
    }

    pub fn weight(weight: i32) -> Self {
        Self::new(Payload::Weight(weight))
    }

    pub fn display_name(name: impl Into<String>) -> Self {
        Self::new(Payload::DisplayName(name.into()))
    }

    /// Parses a serialized node key such as `group.admin` or `prefix.10.[A]`.
    pub fn for_key(node_key: &str) -> Self {
        let payload = match key::decode(node_key) {
            key::Decoded::Permission(p) => Payload::Permission(p),
            key::Decoded::Regex(p) => Payload::Regex(p),
            key::Decoded::Inheritance(g) => Payload::Inheritance(g),
            key::Decoded::ChatMeta(kind, priority, v) => Payload::ChatMeta(kind, priority, v),
            key::Decoded::Meta(k, v) => Payload::Meta(k, v),
            key::Decoded::Weight(w) => Payload::Weight(w),
            key::Decoded::DisplayName(n) => Payload::DisplayName(n),
        };
        Self::new(payload)
    }

    pub(crate) fn from_node(node: &Node) -> Self {
        let payload = match &node.kind {
            NodeKind::Permission(p) => Payload::Permission(p.name().to_string()),
            NodeKind::RegexPermission(p) => Payload::Regex(p.pattern_str().to_string()),
            NodeKind::Inheritance { group } => Payload::Inheritance(group.clone()),
            NodeKind::Prefix(m) => {
                Payload::ChatMeta(ChatMetaType::Prefix, m.priority(), m.value().to_string())
            }
            NodeKind::Suffix(m) => {
                Payload::ChatMeta(ChatMetaType::Suffix, m.priority(), m.value().to_string())
            }
            NodeKind::Meta { key, value } => Payload::Meta(key.clone(), value.clone()),
            NodeKind::Weight(w) => Payload::Weight(*w),
            NodeKind::DisplayName(n) => Payload::DisplayName(n.clone()),
        };
        Self {
            payload,
            value: node.value,
            context: node.context.clone(),
            extra_contexts: Vec::new(),
            expiry: node.expiry,
            unreachable_expiry: None,
        }
    }

    /// Sets grant (`true`, the default) or negation (`false`).
    pub fn value(mut self, value: bool) -> Self {
        self.value = value;
        self
    }

    pub fn negated(self) -> Self {
        self.value(false)
    }

    /// Replaces the context requirement.
    pub fn context(mut self, context: ImmutableContextSet) -> Self {
        self.context = context;
        self.extra_contexts.clear();
        self
    }

    /// Adds a single context pair. Malformed pairs are reported by `build`.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_contexts.push((key.into(), value.into()));
        self
    }

    pub fn expiry(mut self, expiry: DateTime<Utc>) -> Self {
        self.expiry = Some(expiry);
        self.unreachable_expiry = None;
        self
    }

    /// Expires `duration` from now. A duration that overflows the
    /// representable date range is reported by `build`.
    pub fn expiry_after(mut self, duration: Duration) -> Self {
        match Utc::now().checked_add_signed(duration) {
            Some(expiry) => self.expiry(expiry),
            None => {
                self.expiry = None;
                self.unreachable_expiry = Some(duration);
                self
            }
        }
    }

    pub fn clear_expiry(mut self) -> Self {
        self.expiry = None;
        self.unreachable_expiry = None;
        self
    }

    pub fn build(self) -> Result<Node> {
        if let Some(duration) = self.unreachable_expiry {
            return Err(NodeError::Construction(format!(
                "expiry {} from now is out of range",
                duration
            )));
        }
        let kind = match self.payload {
            Payload::Permission(permission) => {
                let permission = permission.trim().to_lowercase();
                if permission.is_empty() {
                    return Err(NodeError::Construction(
                        "permission must not be empty".to_string(),
                    ));
                }
                if !matches!(key::decode(&permission), key::Decoded::Permission(_)) {
                    return Err(NodeError::Construction(format!(
                        "'{}' is a typed node key, not a permission",
                        permission
                    )));
                }
                NodeKind::Permission(Permission::new(permission))
            }
            Payload::Regex(pattern) => {
                if pattern.trim().is_empty() {
                    return Err(NodeError::Construction(
                        "regex pattern must not be empty".to_string(),
                    ));
                }
                NodeKind::RegexPermission(RegexPattern::new(pattern))
            }
            Payload::Inheritance(group) => {
                let group = group.trim().to_lowercase();
                if group.is_empty() || group.chars().any(char::is_whitespace) {
                    return Err(NodeError::Construction(format!(
                        "invalid group name {:?}",
                        group
                    )));
                }
                NodeKind::Inheritance { group }
            }
            Payload::ChatMeta(kind, priority, value) => {
                if value.is_empty() {
                    return Err(NodeError::Construction(format!("{} must not be empty", kind)));
                }
                let meta = ChatMeta::new(priority, value);
                match kind {
                    ChatMetaType::Prefix => NodeKind::Prefix(meta),
                    ChatMetaType::Suffix => NodeKind::Suffix(meta),
                }
            }
            Payload::Meta(key, value) => {
                let key = key.trim().to_string();
                if key.is_empty() {
                    return Err(NodeError::Construction(
                        "meta key must not be empty".to_string(),
                    ));
                }
                NodeKind::Meta { key, value }
            }
            Payload::Weight(weight) => NodeKind::Weight(weight),
            Payload::DisplayName(name) => {
                if name.trim().is_empty() {
                    return Err(NodeError::Construction(
                        "display name must not be empty".to_string(),
                    ));
                }
                NodeKind::DisplayName(name)
            }
        };

        let context = if self.extra_contexts.is_empty() {
            self.context
        } else {
            let extra = self
                .extra_contexts
                .iter()
                .map(|(k, v)| Context::new(k, v))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            ImmutableContextSet::from_contexts(self.context.iter().cloned().chain(extra))
        };

        Ok(Node {
            kind,
            value: self.value,
            context,
            expiry: self.expiry,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NodeEqualityPredicate;
    use contexts::ContextSet;

    #[test]
    fn test_rejects_empty_payloads() {
        assert!(NodeBuilder::permission("").build().is_err());
        assert!(NodeBuilder::permission("   ").build().is_err());
        assert!(NodeBuilder::regex("").build().is_err());
        assert!(NodeBuilder::inheritance("").build().is_err());
        assert!(NodeBuilder::inheritance("two words").build().is_err());
        assert!(NodeBuilder::prefix(0, "").build().is_err());
        assert!(NodeBuilder::meta("", "v").build().is_err());
        assert!(NodeBuilder::display_name(" ").build().is_err());
    }

    #[test]
    fn test_rejects_bad_context() {
        let result = NodeBuilder::permission("a.b").with_context("", "x").build();
        assert!(matches!(result, Err(NodeError::Context(_))));
    }

    #[test]
    fn test_normalizes_permission_and_group() {
        let node = NodeBuilder::permission(" Example.Foo ").build().unwrap();
        assert_eq!(node.as_permission().unwrap().name(), "example.foo");

        let node = NodeBuilder::inheritance("Admin").build().unwrap();
        assert_eq!(node.inherited_group(), Some("admin"));
    }

    #[test]
    fn test_contexts_accumulate() {
        let node = NodeBuilder::permission("a")
            .context(ImmutableContextSet::of("server", "lobby").unwrap())
            .with_context("world", "nether")
            .build()
            .unwrap();
        assert_eq!(node.context().len(), 2);
        assert!(node.context().contains("server", "lobby"));
        assert!(node.context().contains("world", "nether"));
    }

    #[test]
    fn test_meta_round_trip_through_fields() {
        let original = NodeBuilder::meta("k", "v")
            .with_context("server", "survival")
            .build()
            .unwrap();

        let (key, value) = original.as_meta().unwrap();
        let rebuilt = NodeBuilder::meta(key, value)
            .value(original.value())
            .context(original.context().clone())
            .build()
            .unwrap();

        assert!(original.equals(&rebuilt, NodeEqualityPredicate::Exact));
        assert_eq!(original, rebuilt);
    }

    #[test]
    fn test_to_builder_round_trip() {
        let original = NodeBuilder::suffix(5, " [VIP]")
            .negated()
            .with_context("world", "end")
            .expiry_after(Duration::hours(2))
            .build()
            .unwrap();
        let rebuilt = original.to_builder().build().unwrap();
        assert_eq!(original, rebuilt);

        let changed = original.to_builder().clear_expiry().value(true).build().unwrap();
        assert!(!changed.is_temporary());
        assert!(original.equals(&changed, NodeEqualityPredicate::IgnoreValueOrExpiry));
    }

    #[test]
    fn test_expiry_after_out_of_range() {
        let far = Duration::days(365 * 1_000_000);
        assert!(matches!(
            NodeBuilder::permission("a").expiry_after(far).build(),
            Err(NodeError::Construction(_))
        ));

        let node = NodeBuilder::permission("a")
            .expiry_after(far)
            .clear_expiry()
            .build()
            .unwrap();
        assert!(!node.is_temporary());
    }

    #[test]
    fn test_for_key() {
        let node = NodeBuilder::for_key("group.admin").build().unwrap();
        assert_eq!(node.inherited_group(), Some("admin"));

        let node = NodeBuilder::for_key("weight.10").negated().build().unwrap();
        assert_eq!(node.weight(), Some(10));
        assert!(node.is_negated());
    }
}
