//! Permission holders: users and groups with their node collections.

use chrono::{DateTime, Utc};
use contexts::ImmutableContextSet;
use nodes::{
    DataMutateResult, Node, NodeEqualityPredicate, NodeMap, NodeType, TemporaryMergeBehaviour,
    TemporaryMutateResult, Tristate,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::{PoisonError, RwLock};
use uuid::Uuid;

use crate::error::{normalize_name, AuthzError, Result};
use crate::query::QueryOptions;

/// Identity of a permission holder.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum HolderId {
    User(Uuid),
    Group(String),
}

impl HolderId {
    /// A group id with a normalized name.
    pub fn group(name: &str) -> Result<Self> {
        normalize_name(name)
            .map(HolderId::Group)
            .ok_or_else(|| AuthzError::InvalidGroupName(name.to_string()))
    }

    pub fn is_group(&self) -> bool {
        matches!(self, HolderId::Group(_))
    }

    pub fn group_name(&self) -> Option<&str> {
        match self {
            HolderId::Group(name) => Some(name),
            HolderId::User(_) => None,
        }
    }

    /// The uuid for users, the name for groups.
    pub fn object_name(&self) -> String {
        match self {
            HolderId::User(uuid) => uuid.to_string(),
            HolderId::Group(name) => name.clone(),
        }
    }
}

impl fmt::Display for HolderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HolderId::User(uuid) => write!(f, "user:{}", uuid),
            HolderId::Group(name) => write!(f, "group:{}", name),
        }
    }
}

/// Which of a holder's two node collections an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    /// Persisted nodes.
    #[default]
    Normal,
    /// In-memory nodes, dropped on reload.
    Transient,
}

/// A user or group and its nodes.
///
/// Each holder owns two [`NodeMap`]s: the enduring one that storage persists
/// and a transient one that only lives in memory. Both are locked
/// independently, so writing to one holder never blocks readers of another.
#[derive(Debug)]
pub struct PermissionHolder {
    id: HolderId,
    username: RwLock<Option<String>>,
    enduring: NodeMap,
    transient: NodeMap,
}

impl PermissionHolder {
    pub fn new(id: HolderId) -> Self {
        Self {
            id,
            username: RwLock::new(None),
            enduring: NodeMap::new(),
            transient: NodeMap::new(),
        }
    }

    pub fn user(uuid: Uuid) -> Self {
        Self::new(HolderId::User(uuid))
    }

    pub fn group(name: &str) -> Result<Self> {
        Ok(Self::new(HolderId::group(name)?))
    }

    pub fn id(&self) -> &HolderId {
        &self.id
    }

    pub fn object_name(&self) -> String {
        self.id.object_name()
    }

    pub fn username(&self) -> Option<String> {
        self.username
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_username(&self, username: Option<String>) {
        *self.username.write().unwrap_or_else(PoisonError::into_inner) = username;
    }

    /// A human-readable name: the cached username for users, the first
    /// display-name node for groups, falling back to the object name.
    pub fn friendly_name(&self) -> String {
        let name = match &self.id {
            HolderId::User(_) => self.username(),
            HolderId::Group(_) => self
                .own_nodes()
                .iter()
                .find_map(|node| node.display_name().map(str::to_string)),
        };
        name.unwrap_or_else(|| self.object_name())
    }

    pub fn data(&self, data_type: DataType) -> &NodeMap {
        match data_type {
            DataType::Normal => &self.enduring,
            DataType::Transient => &self.transient,
        }
    }

    /// Every own node, transient first, each collection in insertion order.
    pub fn own_nodes(&self) -> Vec<Node> {
        let mut nodes = self.transient.nodes();
        nodes.extend(self.enduring.nodes());
        nodes
    }

    /// Own nodes that apply to `query` and have not expired at `now`.
    pub fn applicable_nodes(&self, query: &QueryOptions, now: DateTime<Utc>) -> Vec<Node> {
        let mut nodes = self.transient.nodes_matching_context(|c| query.satisfies(c));
        nodes.extend(self.enduring.nodes_matching_context(|c| query.satisfies(c)));
        nodes.retain(|node| !node.has_expired(now));
        nodes
    }

    /// Groups this holder directly inherits under `query`. Negated
    /// inheritance nodes are not followed.
    pub fn parent_groups(&self, query: &QueryOptions, now: DateTime<Utc>) -> Vec<String> {
        let mut seen = HashSet::new();
        self.applicable_nodes(query, now)
            .iter()
            .filter(|node| node.value())
            .filter_map(Node::inherited_group)
            .filter(|group| seen.insert(group.to_string()))
            .map(str::to_string)
            .collect()
    }

    /// Highest applicable weight node, 0 when there is none.
    pub fn weight(&self, query: &QueryOptions, now: DateTime<Utc>) -> i32 {
        self.applicable_nodes(query, now)
            .iter()
            .filter(|node| node.value())
            .filter_map(Node::weight)
            .max()
            .unwrap_or(0)
    }

    /// Earliest expiry among all own nodes.
    pub fn earliest_expiry(&self) -> Option<DateTime<Utc>> {
        self.own_nodes().iter().filter_map(Node::expiry).min()
    }

    pub fn has_node(
        &self,
        data_type: DataType,
        node: &Node,
        predicate: NodeEqualityPredicate,
    ) -> Tristate {
        self.data(data_type).has_node(node, predicate)
    }

    pub fn add_node(&self, data_type: DataType, node: Node) -> DataMutateResult {
        self.data(data_type).add(node)
    }

    pub fn add_node_with_merge(
        &self,
        data_type: DataType,
        node: Node,
        merge: TemporaryMergeBehaviour,
    ) -> TemporaryMutateResult {
        self.data(data_type).add_with_merge(node, merge)
    }

    pub fn remove_node(&self, data_type: DataType, node: &Node) -> DataMutateResult {
        self.data(data_type).remove(node)
    }

    /// Removes every node matching `predicate`. Returns true if anything changed.
    pub fn clear_matching(&self, data_type: DataType, predicate: impl FnMut(&Node) -> bool) -> bool {
        !self.data(data_type).remove_if(None, predicate).is_empty()
    }

    /// Removes every node, or every node in exactly `context`.
    pub fn clear_nodes(&self, data_type: DataType, context: Option<&ImmutableContextSet>) -> bool {
        match context {
            None => self.data(data_type).clear(),
            Some(context) => !self.data(data_type).remove_if(Some(context), |_| true).is_empty(),
        }
    }

    /// Removes inheritance nodes, optionally only those in `context`.
    pub fn clear_parents(&self, data_type: DataType, context: Option<&ImmutableContextSet>) -> bool {
        self.clear_typed(data_type, context, |t| t == NodeType::Inheritance)
    }

    /// Removes meta, prefix and suffix nodes, optionally only those in `context`.
    pub fn clear_meta(&self, data_type: DataType, context: Option<&ImmutableContextSet>) -> bool {
        self.clear_typed(data_type, context, NodeType::is_meta_or_chat_meta)
    }

    fn clear_typed(
        &self,
        data_type: DataType,
        context: Option<&ImmutableContextSet>,
        mut wanted: impl FnMut(NodeType) -> bool,
    ) -> bool {
        !self
            .data(data_type)
            .remove_if(context, |node| wanted(node.node_type()))
            .is_empty()
    }

    /// Removes every permanent meta node whose key equals `key`
    /// (ignoring case) in exactly `context`. Temporary meta nodes stay.
    pub fn unset_meta(&self, data_type: DataType, key: &str, context: &ImmutableContextSet) -> bool {
        !self
            .data(data_type)
            .remove_if(Some(context), |node| {
                !node.is_temporary()
                    && node
                        .as_meta()
                        .is_some_and(|(meta_key, _)| meta_key.eq_ignore_ascii_case(key))
            })
            .is_empty()
    }

    /// Nodes of one collection with duplicates under
    /// [`NodeEqualityPredicate::IgnoreValueOrExpiry`] removed, first kept.
    pub fn distinct_nodes(&self, data_type: DataType) -> Vec<Node> {
        let mut seen = HashSet::new();
        self.data(data_type)
            .nodes()
            .into_iter()
            .filter(|node| seen.insert((node.kind().clone(), node.context().clone())))
            .collect()
    }

    /// Drops expired nodes from both collections, returning what was removed.
    pub fn audit_temporary_nodes(&self, now: DateTime<Utc>) -> Vec<Node> {
        let mut removed = self.enduring.remove_expired(now);
        removed.extend(self.transient.remove_expired(now));
        removed
    }

    /// Replaces the enduring nodes and clears the transient ones.
    pub fn load_nodes(&self, nodes: impl IntoIterator<Item = Node>) {
        self.enduring.replace_all(nodes);
        self.transient.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use nodes::NodeBuilder;

    fn node(builder: NodeBuilder) -> Node {
        builder.build().unwrap()
    }

    fn nether() -> ImmutableContextSet {
        ImmutableContextSet::of("world", "nether").unwrap()
    }

    #[test]
    fn test_holder_ids() {
        let id = HolderId::group("Admin").unwrap();
        assert_eq!(id, HolderId::Group("admin".to_string()));
        assert_eq!(id.to_string(), "group:admin");
        assert!(HolderId::group("bad name").is_err());

        let json = serde_json::to_value(&id).unwrap();
        assert_eq!(json, serde_json::json!({"type": "group", "id": "admin"}));
    }

    #[test]
    fn test_own_nodes_transient_first() {
        let holder = PermissionHolder::user(Uuid::new_v4());
        holder.add_node(DataType::Normal, node(NodeBuilder::permission("enduring")));
        holder.add_node(DataType::Transient, node(NodeBuilder::permission("transient")));
        let keys: Vec<String> = holder.own_nodes().iter().map(Node::key).collect();
        assert_eq!(keys, vec!["transient", "enduring"]);
    }

    #[test]
    fn test_applicable_nodes_respect_context_and_expiry() {
        let holder = PermissionHolder::user(Uuid::new_v4());
        holder.add_node(DataType::Normal, node(NodeBuilder::permission("global")));
        holder.add_node(
            DataType::Normal,
            node(NodeBuilder::permission("nether.only").context(nether())),
        );
        holder.add_node(
            DataType::Normal,
            node(NodeBuilder::permission("short").expiry_after(Duration::seconds(5))),
        );

        let query = QueryOptions::contextual(ImmutableContextSet::of("world", "end").unwrap());
        let keys: Vec<String> = holder
            .applicable_nodes(&query, Utc::now())
            .iter()
            .map(Node::key)
            .collect();
        assert_eq!(keys, vec!["global", "short"]);

        let later = Utc::now() + Duration::minutes(1);
        let keys: Vec<String> = holder
            .applicable_nodes(&QueryOptions::non_contextual(), later)
            .iter()
            .map(Node::key)
            .collect();
        assert_eq!(keys, vec!["global", "nether.only"]);
    }

    #[test]
    fn test_parents_and_weight() {
        let holder = PermissionHolder::group("mod").unwrap();
        holder.add_node(DataType::Normal, node(NodeBuilder::inheritance("default")));
        holder.add_node(DataType::Normal, node(NodeBuilder::inheritance("banned").negated()));
        holder.add_node(DataType::Normal, node(NodeBuilder::weight(10)));
        holder.add_node(DataType::Normal, node(NodeBuilder::weight(30).context(nether())));

        let query = QueryOptions::default_contextual();
        assert_eq!(holder.parent_groups(&query, Utc::now()), vec!["default"]);
        assert_eq!(holder.weight(&query, Utc::now()), 10);
        assert_eq!(holder.weight(&QueryOptions::contextual(nether()), Utc::now()), 30);

        let bare = PermissionHolder::group("bare").unwrap();
        assert_eq!(bare.weight(&query, Utc::now()), 0);
    }

    #[test]
    fn test_clear_operations() {
        let holder = PermissionHolder::group("admin").unwrap();
        holder.add_node(DataType::Normal, node(NodeBuilder::inheritance("default")));
        holder.add_node(
            DataType::Normal,
            node(NodeBuilder::inheritance("builder").context(nether())),
        );
        holder.add_node(DataType::Normal, node(NodeBuilder::prefix(10, "[A]")));
        holder.add_node(DataType::Normal, node(NodeBuilder::permission("a.b")));

        assert!(holder.clear_parents(DataType::Normal, Some(&nether())));
        assert_eq!(holder.data(DataType::Normal).len(), 3);
        assert!(holder.clear_meta(DataType::Normal, None));
        assert!(!holder.clear_meta(DataType::Normal, None));
        assert!(holder.clear_parents(DataType::Normal, None));
        assert_eq!(holder.own_nodes(), vec![node(NodeBuilder::permission("a.b"))]);
        assert!(holder.clear_nodes(DataType::Normal, None));
        assert!(holder.own_nodes().is_empty());
    }

    #[test]
    fn test_unset_meta_keeps_temporary_and_other_contexts() {
        let holder = PermissionHolder::user(Uuid::new_v4());
        let global = ImmutableContextSet::empty();
        holder.add_node(DataType::Normal, node(NodeBuilder::meta("Home", "spawn")));
        holder.add_node(
            DataType::Normal,
            node(NodeBuilder::meta("home", "nether").context(nether())),
        );
        holder.add_node(
            DataType::Normal,
            node(NodeBuilder::meta("home", "temp").expiry_after(Duration::hours(1))),
        );

        assert!(holder.unset_meta(DataType::Normal, "HOME", &global));
        let remaining: Vec<String> = holder.own_nodes().iter().map(Node::key).collect();
        assert_eq!(remaining, vec!["meta.home.nether", "meta.home.temp"]);
        assert!(!holder.unset_meta(DataType::Normal, "home", &global));
    }

    #[test]
    fn test_friendly_names() {
        let user = PermissionHolder::user(Uuid::nil());
        assert_eq!(user.friendly_name(), Uuid::nil().to_string());
        user.set_username(Some("Notch".to_string()));
        assert_eq!(user.friendly_name(), "Notch");

        let group = PermissionHolder::group("admin").unwrap();
        assert_eq!(group.friendly_name(), "admin");
        group.add_node(DataType::Normal, node(NodeBuilder::display_name("Administrators")));
        assert_eq!(group.friendly_name(), "Administrators");
    }

    #[test]
    fn test_audit_and_load() {
        let holder = PermissionHolder::user(Uuid::new_v4());
        let soon = node(NodeBuilder::permission("soon").expiry_after(Duration::seconds(10)));
        holder.add_node(DataType::Normal, soon.clone());
        holder.add_node(DataType::Transient, node(NodeBuilder::permission("t")));
        assert_eq!(holder.earliest_expiry(), soon.expiry());

        let removed = holder.audit_temporary_nodes(Utc::now() + Duration::minutes(1));
        assert_eq!(removed, vec![soon]);

        holder.load_nodes(vec![node(NodeBuilder::permission("loaded"))]);
        let keys: Vec<String> = holder.own_nodes().iter().map(Node::key).collect();
        assert_eq!(keys, vec!["loaded"]);
    }

    #[test]
    fn test_distinct_nodes() {
        let holder = PermissionHolder::user(Uuid::new_v4());
        holder.add_node(DataType::Normal, node(NodeBuilder::permission("a")));
        holder.add_node(DataType::Normal, node(NodeBuilder::permission("a").context(nether())));
        assert_eq!(holder.distinct_nodes(DataType::Normal).len(), 2);
        assert_eq!(
            holder.has_node(
                DataType::Normal,
                &node(NodeBuilder::permission("a")),
                NodeEqualityPredicate::Exact
            ),
            Tristate::True
        );
    }
}
