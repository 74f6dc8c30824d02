//! A holder's node collection, bucketed by context.

use chrono::{DateTime, Utc};
use contexts::ImmutableContextSet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::equality::NodeEqualityPredicate;
use crate::node::Node;
use crate::tristate::Tristate;

/// Outcome of a mutation on a node collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataMutateResult {
    /// The collection changed.
    Success,
    /// Nothing changed because the node was already present.
    AlreadyHas,
    /// Nothing changed because the node was not present.
    Lacks,
    /// Nothing changed because the node had already expired.
    Expired,
    /// The target of the mutation could not be found.
    Fail,
}

impl DataMutateResult {
    pub fn was_successful(self) -> bool {
        self == DataMutateResult::Success
    }
}

/// How to combine a temporary node with an existing temporary node that has
/// the same type, payload, context and value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemporaryMergeBehaviour {
    /// Extend the existing expiry by the new node's remaining duration.
    AddNewDurationToExisting,
    /// Keep whichever node expires later.
    ReplaceExistingIfDurationLonger,
    /// Leave the existing node alone and report `AlreadyHas`.
    #[default]
    FailWithAlreadyHas,
}

/// Result of an add, carrying the node that ended up in the collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemporaryMutateResult {
    pub result: DataMutateResult,
    pub merged_node: Node,
}

#[derive(Debug, Clone)]
struct Entry {
    seq: u64,
    node: Node,
}

#[derive(Debug, Default)]
struct Inner {
    buckets: BTreeMap<ImmutableContextSet, Vec<Entry>>,
    next_seq: u64,
}

impl Inner {
    fn insert(&mut self, node: Node) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.buckets
            .entry(node.context.clone())
            .or_default()
            .push(Entry { seq, node });
    }

    fn position(&self, node: &Node) -> Option<usize> {
        self.buckets.get(&node.context).and_then(|bucket| {
            bucket.iter().position(|entry| {
                NodeEqualityPredicate::IgnoreValueOrExpiry.are_equal(&entry.node, node)
            })
        })
    }

    fn retain(&mut self, mut keep: impl FnMut(&ImmutableContextSet, &Node) -> bool) -> Vec<Node> {
        let mut removed = Vec::new();
        for (context, bucket) in self.buckets.iter_mut() {
            bucket.retain(|entry| {
                if keep(context, &entry.node) {
                    true
                } else {
                    removed.push(entry.node.clone());
                    false
                }
            });
        }
        self.buckets.retain(|_, bucket| !bucket.is_empty());
        removed
    }

    fn ordered(&self, mut include: impl FnMut(&ImmutableContextSet) -> bool) -> Vec<Node> {
        let mut entries: Vec<&Entry> = self
            .buckets
            .iter()
            .filter(|(context, _)| include(context))
            .flat_map(|(_, bucket)| bucket.iter())
            .collect();
        entries.sort_by_key(|entry| entry.seq);
        entries.into_iter().map(|entry| entry.node.clone()).collect()
    }
}

/// One node collection (enduring or transient) of a permission holder.
///
/// Nodes are grouped by their context so "every node applicable to context X"
/// only visits matching buckets, and every node remembers its insertion order.
/// No two nodes equal under [`NodeEqualityPredicate::IgnoreValueOrExpiry`]
/// coexist. Reads share the lock; writes take it exclusively and only for
/// this collection.
#[derive(Debug, Default)]
pub struct NodeMap {
    inner: RwLock<Inner>,
}

impl NodeMap {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every node in insertion order.
    pub fn nodes(&self) -> Vec<Node> {
        self.read().ordered(|_| true)
    }

    /// Nodes whose context passes `include`, in insertion order.
    pub fn nodes_matching_context(
        &self,
        include: impl FnMut(&ImmutableContextSet) -> bool,
    ) -> Vec<Node> {
        self.read().ordered(include)
    }

    /// Nodes stored under exactly `context`.
    pub fn nodes_in_context(&self, context: &ImmutableContextSet) -> Vec<Node> {
        self.read().ordered(|c| c == context)
    }

    /// Snapshot grouped by context.
    pub fn immutable(&self) -> BTreeMap<ImmutableContextSet, Vec<Node>> {
        self.read()
            .buckets
            .iter()
            .map(|(context, bucket)| {
                let nodes = bucket.iter().map(|entry| entry.node.clone()).collect();
                (context.clone(), nodes)
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().buckets.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.read().buckets.is_empty()
    }

    /// The value of the stored node equal to `node` under `predicate`.
    pub fn has_node(&self, node: &Node, predicate: NodeEqualityPredicate) -> Tristate {
        let inner = self.read();
        inner
            .buckets
            .get(&node.context)
            .and_then(|bucket| bucket.iter().find(|entry| predicate.are_equal(&entry.node, node)))
            .map_or(Tristate::Undefined, |entry| Tristate::from_bool(entry.node.value))
    }

    /// Adds a node, failing with `AlreadyHas` when an equivalent node exists.
    pub fn add(&self, node: Node) -> DataMutateResult {
        self.add_with_merge(node, TemporaryMergeBehaviour::FailWithAlreadyHas)
            .result
    }

    /// Adds a node, resolving a clash with an existing node of the same
    /// identity:
    ///
    /// * identical node: `AlreadyHas`;
    /// * different value: the new node replaces the old one;
    /// * same value, existing permanent: `AlreadyHas`;
    /// * same value, new permanent: the new node replaces the temporary one;
    /// * both temporary: resolved by `merge`. `Fail` if the merged expiry
    ///   falls outside the representable range.
    pub fn add_with_merge(&self, node: Node, merge: TemporaryMergeBehaviour) -> TemporaryMutateResult {
        let now = Utc::now();
        if node.has_expired(now) {
            return TemporaryMutateResult {
                result: DataMutateResult::Expired,
                merged_node: node,
            };
        }

        let mut inner = self.write();
        let slot = inner.position(&node).and_then(|index| {
            inner
                .buckets
                .get_mut(&node.context)
                .and_then(|bucket| bucket.get_mut(index))
        });
        let Some(slot) = slot else {
            inner.insert(node.clone());
            return TemporaryMutateResult {
                result: DataMutateResult::Success,
                merged_node: node,
            };
        };

        let existing = slot.node.clone();
        let merged = if existing == node {
            Merged::Keep
        } else if existing.value != node.value {
            Merged::Expiry(node.expiry)
        } else {
            match (existing.expiry, node.expiry) {
                (None, _) => Merged::Keep,
                (Some(_), None) => Merged::Expiry(None),
                (Some(old), Some(new)) => merge_expiry(old, new, now, merge),
            }
        };

        match merged {
            Merged::Expiry(expiry) => {
                let merged = Node { expiry, ..node };
                slot.node = merged.clone();
                TemporaryMutateResult {
                    result: DataMutateResult::Success,
                    merged_node: merged,
                }
            }
            Merged::Keep => TemporaryMutateResult {
                result: DataMutateResult::AlreadyHas,
                merged_node: existing,
            },
            Merged::OutOfRange => {
                tracing::warn!("Merged expiry of {} is out of range", node.key());
                TemporaryMutateResult {
                    result: DataMutateResult::Fail,
                    merged_node: existing,
                }
            }
        }
    }

    /// Removes the node with the same type, payload and context.
    pub fn remove(&self, node: &Node) -> DataMutateResult {
        let mut inner = self.write();
        let Some(index) = inner.position(node) else {
            return DataMutateResult::Lacks;
        };
        if let Some(bucket) = inner.buckets.get_mut(&node.context) {
            bucket.remove(index);
            if bucket.is_empty() {
                inner.buckets.remove(&node.context);
            }
        }
        DataMutateResult::Success
    }

    /// Removes every node matching `predicate`, optionally limited to one
    /// exact context. Returns the removed nodes.
    pub fn remove_if(
        &self,
        context: Option<&ImmutableContextSet>,
        mut predicate: impl FnMut(&Node) -> bool,
    ) -> Vec<Node> {
        self.write().retain(|node_context, node| {
            let in_scope = context.map_or(true, |c| c == node_context);
            !(in_scope && predicate(node))
        })
    }

    /// Removes every node whose expiry has passed.
    pub fn remove_expired(&self, now: DateTime<Utc>) -> Vec<Node> {
        self.remove_if(None, |node| node.has_expired(now))
    }

    /// Removes everything, returning whether anything was removed.
    pub fn clear(&self) -> bool {
        let mut inner = self.write();
        let changed = !inner.buckets.is_empty();
        inner.buckets.clear();
        changed
    }

    /// Replaces the whole collection, e.g. after loading from storage.
    /// Expired and duplicate nodes are dropped.
    pub fn replace_all(&self, nodes: impl IntoIterator<Item = Node>) {
        let now = Utc::now();
        let mut fresh = Inner::default();
        for node in nodes {
            if node.has_expired(now) || fresh.position(&node).is_some() {
                continue;
            }
            fresh.insert(node);
        }
        *self.write() = fresh;
    }
}

/// How a clash with an existing node settles.
enum Merged {
    /// Store the incoming node with this expiry.
    Expiry(Option<DateTime<Utc>>),
    Keep,
    OutOfRange,
}

fn merge_expiry(
    old: DateTime<Utc>,
    new: DateTime<Utc>,
    now: DateTime<Utc>,
    merge: TemporaryMergeBehaviour,
) -> Merged {
    match merge {
        TemporaryMergeBehaviour::AddNewDurationToExisting => {
            match old.checked_add_signed(new.signed_duration_since(now)) {
                Some(expiry) => Merged::Expiry(Some(expiry)),
                None => Merged::OutOfRange,
            }
        }
        TemporaryMergeBehaviour::ReplaceExistingIfDurationLonger if new > old => {
            Merged::Expiry(Some(new))
        }
        TemporaryMergeBehaviour::ReplaceExistingIfDurationLonger => Merged::Keep,
        TemporaryMergeBehaviour::FailWithAlreadyHas => Merged::Keep,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NodeBuilder;
    use chrono::Duration;

    fn permission(name: &str) -> Node {
        NodeBuilder::permission(name).build().unwrap()
    }

    #[test]
    fn test_add_and_duplicate() {
        let map = NodeMap::new();
        assert_eq!(map.add(permission("a")), DataMutateResult::Success);
        assert_eq!(map.add(permission("a")), DataMutateResult::AlreadyHas);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_value_change_replaces() {
        let map = NodeMap::new();
        map.add(permission("a"));
        let negated = permission("a").to_builder().negated().build().unwrap();
        assert_eq!(map.add(negated.clone()), DataMutateResult::Success);
        assert_eq!(map.nodes(), vec![negated]);
    }

    #[test]
    fn test_expired_rejected() {
        let map = NodeMap::new();
        let node = NodeBuilder::permission("a")
            .expiry(Utc::now() - Duration::seconds(1))
            .build()
            .unwrap();
        assert_eq!(map.add(node), DataMutateResult::Expired);
        assert!(map.is_empty());
    }

    #[test]
    fn test_temporary_against_permanent() {
        let map = NodeMap::new();
        map.add(permission("a"));
        let temporary = NodeBuilder::permission("a")
            .expiry_after(Duration::hours(1))
            .build()
            .unwrap();
        assert_eq!(map.add(temporary.clone()), DataMutateResult::AlreadyHas);

        let map = NodeMap::new();
        map.add(temporary);
        assert_eq!(map.add(permission("a")), DataMutateResult::Success);
        assert!(!map.nodes()[0].is_temporary());
    }

    #[test]
    fn test_merge_behaviours() {
        let now = Utc::now();
        let existing = NodeBuilder::permission("a")
            .expiry(now + Duration::hours(2))
            .build()
            .unwrap();
        let shorter = existing.to_builder().expiry(now + Duration::hours(1)).build().unwrap();
        let longer = existing.to_builder().expiry(now + Duration::hours(3)).build().unwrap();

        let map = NodeMap::new();
        map.add(existing.clone());
        let result = map.add_with_merge(shorter.clone(), TemporaryMergeBehaviour::FailWithAlreadyHas);
        assert_eq!(result.result, DataMutateResult::AlreadyHas);
        assert_eq!(result.merged_node, existing);

        let result =
            map.add_with_merge(shorter.clone(), TemporaryMergeBehaviour::ReplaceExistingIfDurationLonger);
        assert_eq!(result.result, DataMutateResult::AlreadyHas);

        let result =
            map.add_with_merge(longer.clone(), TemporaryMergeBehaviour::ReplaceExistingIfDurationLonger);
        assert_eq!(result.result, DataMutateResult::Success);
        assert_eq!(result.merged_node, longer);

        let result = map.add_with_merge(shorter, TemporaryMergeBehaviour::AddNewDurationToExisting);
        assert_eq!(result.result, DataMutateResult::Success);
        let merged_expiry = result.merged_node.expiry().unwrap();
        assert!(merged_expiry > now + Duration::hours(3) + Duration::minutes(59));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_added_duration_out_of_range_fails() {
        let far = NodeBuilder::permission("a")
            .expiry(DateTime::<Utc>::MAX_UTC - Duration::days(1))
            .build()
            .unwrap();
        let map = NodeMap::new();
        map.add(far.clone());

        let month = NodeBuilder::permission("a")
            .expiry_after(Duration::days(30))
            .build()
            .unwrap();
        let result = map.add_with_merge(month, TemporaryMergeBehaviour::AddNewDurationToExisting);
        assert_eq!(result.result, DataMutateResult::Fail);
        assert_eq!(result.merged_node, far);
        assert_eq!(map.nodes(), vec![far]);
    }

    #[test]
    fn test_remove() {
        let map = NodeMap::new();
        map.add(permission("a"));
        let negated = permission("a").to_builder().negated().build().unwrap();
        assert_eq!(map.remove(&negated), DataMutateResult::Success);
        assert_eq!(map.remove(&negated), DataMutateResult::Lacks);
        assert!(map.is_empty());
    }

    #[test]
    fn test_context_buckets_and_order() {
        let nether = ImmutableContextSet::of("world", "nether").unwrap();
        let map = NodeMap::new();
        map.add(permission("first"));
        map.add(permission("second").to_builder().context(nether.clone()).build().unwrap());
        map.add(permission("third"));

        let keys: Vec<String> = map.nodes().iter().map(Node::key).collect();
        assert_eq!(keys, vec!["first", "second", "third"]);

        let scoped = map.nodes_in_context(&nether);
        assert_eq!(scoped.len(), 1);
        assert_eq!(map.immutable().len(), 2);

        let global: Vec<String> = map
            .nodes_matching_context(|c| c == &ImmutableContextSet::empty())
            .iter()
            .map(Node::key)
            .collect();
        assert_eq!(global, vec!["first", "third"]);
    }

    #[test]
    fn test_remove_if_scoped() {
        let nether = ImmutableContextSet::of("world", "nether").unwrap();
        let map = NodeMap::new();
        map.add(NodeBuilder::meta("k", "1").build().unwrap());
        map.add(NodeBuilder::meta("k", "2").context(nether.clone()).build().unwrap());
        map.add(permission("a").to_builder().context(nether.clone()).build().unwrap());

        let removed = map.remove_if(Some(&nether), |n| n.as_meta().is_some());
        assert_eq!(removed.len(), 1);
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_has_node() {
        let map = NodeMap::new();
        map.add(permission("a").to_builder().negated().build().unwrap());
        assert_eq!(
            map.has_node(&permission("a"), NodeEqualityPredicate::IgnoreValue),
            Tristate::False
        );
        assert_eq!(
            map.has_node(&permission("a"), NodeEqualityPredicate::Exact),
            Tristate::Undefined
        );
    }

    #[test]
    fn test_replace_all_drops_expired_and_duplicates() {
        let map = NodeMap::new();
        map.add(permission("old"));
        let expired = NodeBuilder::permission("gone")
            .expiry(Utc::now() - Duration::minutes(1))
            .build()
            .unwrap();
        map.replace_all(vec![permission("a"), permission("a"), expired]);
        assert_eq!(map.nodes(), vec![permission("a")]);
    }

    #[test]
    fn test_remove_expired() {
        let map = NodeMap::new();
        let soon = NodeBuilder::permission("soon")
            .expiry(Utc::now() + Duration::seconds(30))
            .build()
            .unwrap();
        map.add(soon.clone());
        map.add(permission("keep"));
        let removed = map.remove_expired(Utc::now() + Duration::minutes(1));
        assert_eq!(removed, vec![soon]);
        assert_eq!(map.len(), 1);
    }
}
