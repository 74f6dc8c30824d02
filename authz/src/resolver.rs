//! Inheritance resolution.
//!
//! [`resolve`] collects a holder's applicable nodes and, with
//! [`Flag::ResolveInheritance`], the nodes of every group reachable through
//! inheritance nodes. Groups are visited breadth first, so each group is
//! resolved once, at its shortest distance from the holder. A group that is
//! reached again (a diamond or a cycle) is skipped.
//!
//! The result is ordered by:
//!
//! 1. distance, ascending (own nodes are distance 0);
//! 2. weight of the contributing group, descending;
//! 3. permission specificity, descending (exact, then deeper wildcards,
//!    then shallower wildcards, then regex), across every group at the
//!    same distance and weight;
//! 4. group name, then insertion order.

use chrono::{DateTime, Utc};
use nodes::{Node, NodeEqualityPredicate, Specificity, Tristate};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

use crate::holder::{HolderId, PermissionHolder};
use crate::query::{Flag, QueryOptions};

/// Finds loaded groups by name.
///
/// Implementations must not block: a group that is not loaded is reported
/// as missing and its branch of the inheritance graph is skipped.
pub trait GroupLookup {
    fn lookup_group(&self, name: &str) -> Option<Arc<PermissionHolder>>;
}

impl GroupLookup for HashMap<String, Arc<PermissionHolder>> {
    fn lookup_group(&self, name: &str) -> Option<Arc<PermissionHolder>> {
        self.get(name).cloned()
    }
}

/// A node tagged with where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedNode {
    pub node: Node,
    /// 0 for the holder's own nodes, 1 for a direct parent, and so on.
    pub distance: u32,
    pub origin: HolderId,
}

/// The ordered outcome of a resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    pub nodes: Vec<ResolvedNode>,
    /// Every group whose nodes were included.
    pub visited_groups: BTreeSet<String>,
    /// Groups referenced by inheritance nodes that could not be found.
    pub missing_groups: Vec<String>,
    /// How many inheritance edges pointed at an already visited group.
    pub(crate) skipped_revisits: usize,
}

impl Resolution {
    /// Iterates the resolved nodes in order.
    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().map(|resolved| &resolved.node)
    }

    /// The value of the first node that decides `permission`.
    ///
    /// Exact permission nodes always take part; wildcard and regex nodes only
    /// with [`Flag::ResolveWildcards`].
    pub fn permission_value(&self, permission: &str, query: &QueryOptions) -> Tristate {
        let permission = permission.trim().to_lowercase();
        let wildcards = query.flag(Flag::ResolveWildcards);
        self.iter()
            .find(|node| decides(node, &permission, wildcards))
            .map_or(Tristate::Undefined, |node| Tristate::from_bool(node.value()))
    }

    /// The value of the first resolved node equal to `node` under `predicate`.
    pub fn inherits_node(&self, node: &Node, predicate: NodeEqualityPredicate) -> Tristate {
        self.iter()
            .find(|candidate| candidate.equals(node, predicate))
            .map_or(Tristate::Undefined, |found| Tristate::from_bool(found.value()))
    }

    /// Resolved nodes with duplicates under
    /// [`NodeEqualityPredicate::IgnoreValueOrExpiry`] collapsed, keeping the
    /// highest ranked.
    pub fn distinct(&self) -> Vec<ResolvedNode> {
        let mut seen = HashSet::new();
        self.nodes
            .iter()
            .filter(|resolved| {
                seen.insert((resolved.node.kind().clone(), resolved.node.context().clone()))
            })
            .cloned()
            .collect()
    }

    /// Earliest expiry among the resolved nodes.
    pub fn earliest_expiry(&self) -> Option<DateTime<Utc>> {
        self.iter().filter_map(Node::expiry).min()
    }
}

/// Returns true if `node` grants or negates `permission`.
pub fn decides(node: &Node, permission: &str, wildcards: bool) -> bool {
    if let Some(p) = node.as_permission() {
        if p.name() == permission {
            return true;
        }
        return wildcards && p.is_wildcard() && p.matches(permission);
    }
    wildcards && node.as_regex().is_some_and(|regex| regex.matches(permission))
}

struct Pending {
    node: Node,
    distance: u32,
    origin: HolderId,
    weight: i32,
    specificity: Specificity,
    index: usize,
}

/// Resolves `holder` under `query` at time `now`.
pub fn resolve(
    holder: &PermissionHolder,
    query: &QueryOptions,
    groups: &dyn GroupLookup,
    now: DateTime<Utc>,
) -> Resolution {
    let mut resolution = Resolution::default();
    let mut pending = Vec::new();

    let mut visited: HashSet<String> = HashSet::new();
    if let Some(name) = holder.id().group_name() {
        visited.insert(name.to_string());
    }

    collect(&mut pending, holder, query, now, 0, 0);

    if query.flag(Flag::ResolveInheritance) {
        let mut frontier = holder.parent_groups(query, now);
        let mut distance = 1;
        while !frontier.is_empty() {
            let mut next = Vec::new();
            for name in frontier {
                if !visited.insert(name.clone()) {
                    debug!("Skipping already visited group {} for {}", name, holder.id());
                    resolution.skipped_revisits += 1;
                    continue;
                }
                let Some(group) = groups.lookup_group(&name) else {
                    debug!("Group {} inherited by {} is not loaded", name, holder.id());
                    resolution.missing_groups.push(name);
                    continue;
                };
                let weight = group.weight(query, now);
                collect(&mut pending, &group, query, now, distance, weight);
                next.extend(group.parent_groups(query, now));
                resolution.visited_groups.insert(name);
            }
            frontier = next;
            distance += 1;
        }
    }

    pending.sort_by(|a, b| {
        a.distance
            .cmp(&b.distance)
            .then_with(|| b.weight.cmp(&a.weight))
            .then_with(|| b.specificity.cmp(&a.specificity))
            .then_with(|| a.origin.cmp(&b.origin))
            .then_with(|| a.index.cmp(&b.index))
    });

    resolution.nodes = pending
        .into_iter()
        .map(|p| ResolvedNode {
            node: p.node,
            distance: p.distance,
            origin: p.origin,
        })
        .collect();
    debug!(
        "Resolved {} nodes for {} from {} groups ({} revisits skipped)",
        resolution.nodes.len(),
        holder.id(),
        resolution.visited_groups.len(),
        resolution.skipped_revisits
    );
    resolution
}

fn collect(
    pending: &mut Vec<Pending>,
    holder: &PermissionHolder,
    query: &QueryOptions,
    now: DateTime<Utc>,
    distance: u32,
    weight: i32,
) {
    for node in holder.applicable_nodes(query, now) {
        let index = pending.len();
        pending.push(Pending {
            specificity: node.specificity(),
            node,
            distance,
            origin: holder.id().clone(),
            weight,
            index,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::holder::DataType;
    use contexts::ImmutableContextSet;
    use nodes::NodeBuilder;
    use uuid::Uuid;

    #[derive(Default)]
    struct Groups(HashMap<String, Arc<PermissionHolder>>);

    impl Groups {
        fn add(&mut self, name: &str, builders: Vec<NodeBuilder>) {
            let group = PermissionHolder::group(name).unwrap();
            for builder in builders {
                group.add_node(DataType::Normal, builder.build().unwrap());
            }
            self.0.insert(name.to_string(), Arc::new(group));
        }
    }

    impl GroupLookup for Groups {
        fn lookup_group(&self, name: &str) -> Option<Arc<PermissionHolder>> {
            self.0.lookup_group(name)
        }
    }

    fn user(builders: Vec<NodeBuilder>) -> PermissionHolder {
        let user = PermissionHolder::user(Uuid::new_v4());
        for builder in builders {
            user.add_node(DataType::Normal, builder.build().unwrap());
        }
        user
    }

    fn keys(resolution: &Resolution) -> Vec<String> {
        resolution.iter().map(Node::key).collect()
    }

    #[test]
    fn test_distance_ordering() {
        let mut groups = Groups::default();
        groups.add("default", vec![NodeBuilder::permission("default.perm")]);
        groups.add(
            "mod",
            vec![
                NodeBuilder::permission("mod.perm"),
                NodeBuilder::inheritance("default"),
            ],
        );
        let user = user(vec![
            NodeBuilder::inheritance("mod"),
            NodeBuilder::permission("own.perm"),
        ]);

        let resolution = resolve(&user, &QueryOptions::non_contextual(), &groups, Utc::now());
        assert_eq!(
            keys(&resolution),
            vec!["own.perm", "group.mod", "mod.perm", "group.default", "default.perm"]
        );
        let distances: Vec<u32> = resolution.nodes.iter().map(|r| r.distance).collect();
        assert_eq!(distances, vec![0, 0, 1, 1, 2]);
        assert_eq!(
            resolution.visited_groups.iter().cloned().collect::<Vec<_>>(),
            vec!["default", "mod"]
        );
    }

    #[test]
    fn test_weight_then_name_ordering() {
        let mut groups = Groups::default();
        groups.add("alpha", vec![NodeBuilder::permission("x").negated()]);
        groups.add(
            "heavy",
            vec![NodeBuilder::permission("x"), NodeBuilder::weight(50)],
        );
        groups.add("beta", vec![NodeBuilder::permission("x").negated()]);
        let user = user(vec![
            NodeBuilder::inheritance("beta"),
            NodeBuilder::inheritance("alpha"),
            NodeBuilder::inheritance("heavy"),
        ]);

        let query = QueryOptions::non_contextual();
        let resolution = resolve(&user, &query, &groups, Utc::now());
        let origins: Vec<String> = resolution
            .nodes
            .iter()
            .filter(|r| r.distance == 1)
            .map(|r| r.origin.object_name())
            .collect();
        assert_eq!(origins, vec!["heavy", "heavy", "alpha", "beta"]);
        assert_eq!(resolution.permission_value("x", &query), Tristate::True);
    }

    #[test]
    fn test_specificity_within_a_level() {
        let user = user(vec![
            NodeBuilder::permission("*"),
            NodeBuilder::permission("a.*").negated(),
            NodeBuilder::permission("a.b.*"),
            NodeBuilder::permission("a.b.c").negated(),
        ]);
        let query = QueryOptions::non_contextual();
        let resolution = resolve(&user, &query, &Groups::default(), Utc::now());

        assert_eq!(keys(&resolution), vec!["a.b.c", "a.b.*", "a.*", "*"]);
        assert_eq!(resolution.permission_value("a.b.c", &query), Tristate::False);
        assert_eq!(resolution.permission_value("a.b.d", &query), Tristate::True);
        assert_eq!(resolution.permission_value("a.x", &query), Tristate::False);
        assert_eq!(resolution.permission_value("zzz", &query), Tristate::True);
        // a.* covers descendants only
        assert_eq!(resolution.permission_value("a", &query), Tristate::True);
    }

    #[test]
    fn test_exact_beats_wildcard_across_groups() {
        let mut groups = Groups::default();
        groups.add("alpha", vec![NodeBuilder::permission("a.b.*")]);
        groups.add("beta", vec![NodeBuilder::permission("a.b.c").negated()]);
        let user = user(vec![
            NodeBuilder::inheritance("alpha"),
            NodeBuilder::inheritance("beta"),
        ]);
        let query = QueryOptions::non_contextual();
        let resolution = resolve(&user, &query, &groups, Utc::now());

        assert_eq!(
            keys(&resolution),
            vec!["group.alpha", "group.beta", "a.b.c", "a.b.*"]
        );
        assert_eq!(resolution.permission_value("a.b.c", &query), Tristate::False);
        assert_eq!(resolution.permission_value("a.b.d", &query), Tristate::True);
    }

    #[test]
    fn test_wildcards_need_flag() {
        let user = user(vec![
            NodeBuilder::permission("a.*"),
            NodeBuilder::regex("b\\.[0-9]+"),
        ]);
        let query = QueryOptions::non_contextual();
        let resolution = resolve(&user, &query, &Groups::default(), Utc::now());
        assert_eq!(resolution.permission_value("a.b", &query), Tristate::True);
        assert_eq!(resolution.permission_value("b.12", &query), Tristate::True);
        assert_eq!(resolution.permission_value("b.x", &query), Tristate::Undefined);

        let exact_only = query.to_builder().flag(Flag::ResolveWildcards, false).build();
        assert_eq!(resolution.permission_value("a.b", &exact_only), Tristate::Undefined);
        assert_eq!(resolution.permission_value("b.12", &exact_only), Tristate::Undefined);
        assert_eq!(resolution.permission_value("a.*", &exact_only), Tristate::True);
    }

    #[test]
    fn test_own_beats_inherited() {
        let mut groups = Groups::default();
        groups.add("admin", vec![NodeBuilder::permission("build")]);
        let user = user(vec![
            NodeBuilder::inheritance("admin"),
            NodeBuilder::permission("build").negated(),
        ]);
        let query = QueryOptions::non_contextual();
        let resolution = resolve(&user, &query, &groups, Utc::now());
        assert_eq!(resolution.permission_value("build", &query), Tristate::False);
    }

    #[test]
    fn test_cycles_terminate() {
        let mut groups = Groups::default();
        groups.add(
            "a",
            vec![NodeBuilder::inheritance("b"), NodeBuilder::permission("from.a")],
        );
        groups.add(
            "b",
            vec![NodeBuilder::inheritance("a"), NodeBuilder::permission("from.b")],
        );
        let user = user(vec![NodeBuilder::inheritance("a")]);

        let resolution = resolve(&user, &QueryOptions::non_contextual(), &groups, Utc::now());
        let from_a = resolution.iter().filter(|n| n.key() == "from.a").count();
        assert_eq!(from_a, 1);
        assert!(keys(&resolution).contains(&"from.b".to_string()));
        assert_eq!(resolution.skipped_revisits, 1);
    }

    #[test]
    fn test_group_does_not_inherit_itself() {
        let group = PermissionHolder::group("loop").unwrap();
        group.add_node(DataType::Normal, NodeBuilder::inheritance("loop").build().unwrap());
        let resolution = resolve(&group, &QueryOptions::non_contextual(), &Groups::default(), Utc::now());
        assert_eq!(resolution.skipped_revisits, 1);
        assert!(resolution.missing_groups.is_empty());
    }

    #[test]
    fn test_missing_groups_are_skipped() {
        let user = user(vec![
            NodeBuilder::inheritance("ghost"),
            NodeBuilder::permission("own"),
        ]);
        let query = QueryOptions::non_contextual();
        let resolution = resolve(&user, &query, &Groups::default(), Utc::now());
        assert_eq!(resolution.missing_groups, vec!["ghost"]);
        assert_eq!(resolution.permission_value("own", &query), Tristate::True);
    }

    #[test]
    fn test_inheritance_flag_off() {
        let mut groups = Groups::default();
        groups.add("admin", vec![NodeBuilder::permission("build")]);
        let user = user(vec![NodeBuilder::inheritance("admin")]);
        let query = QueryOptions::non_contextual()
            .to_builder()
            .flag(Flag::ResolveInheritance, false)
            .build();
        let resolution = resolve(&user, &query, &groups, Utc::now());
        assert_eq!(resolution.permission_value("build", &query), Tristate::Undefined);
        assert!(resolution.visited_groups.is_empty());
    }

    #[test]
    fn test_contextual_inheritance() {
        let mut groups = Groups::default();
        groups.add("nether-builder", vec![NodeBuilder::permission("build")]);
        let nether = ImmutableContextSet::of("world", "nether").unwrap();
        let user = user(vec![NodeBuilder::inheritance("nether-builder").context(nether.clone())]);

        let in_nether = QueryOptions::contextual(nether);
        let in_end = QueryOptions::contextual(ImmutableContextSet::of("world", "end").unwrap());
        let resolution = resolve(&user, &in_nether, &groups, Utc::now());
        assert_eq!(resolution.permission_value("build", &in_nether), Tristate::True);
        let resolution = resolve(&user, &in_end, &groups, Utc::now());
        assert_eq!(resolution.permission_value("build", &in_end), Tristate::Undefined);
    }

    #[test]
    fn test_expired_nodes_never_resolve() {
        let user = user(vec![NodeBuilder::permission("fly").expiry_after(chrono::Duration::seconds(1))]);
        let query = QueryOptions::non_contextual();
        let later = Utc::now() + chrono::Duration::minutes(1);
        let resolution = resolve(&user, &query, &Groups::default(), later);
        assert_eq!(resolution.permission_value("fly", &query), Tristate::Undefined);
        assert!(resolution.nodes.is_empty());
    }

    #[test]
    fn test_distinct_and_inherits_node() {
        let mut groups = Groups::default();
        groups.add("admin", vec![NodeBuilder::permission("build")]);
        let user = user(vec![
            NodeBuilder::inheritance("admin"),
            NodeBuilder::permission("build").negated(),
        ]);
        let resolution = resolve(&user, &QueryOptions::non_contextual(), &groups, Utc::now());
        let distinct = resolution.distinct();
        assert_eq!(distinct.len(), 2);
        let build = distinct.iter().find(|r| r.node.key() == "build").unwrap();
        assert!(build.node.is_negated());
        assert_eq!(build.distance, 0);

        let candidate = NodeBuilder::permission("build").build().unwrap();
        assert_eq!(
            resolution.inherits_node(&candidate, NodeEqualityPredicate::IgnoreValue),
            Tristate::False
        );
        assert_eq!(
            resolution.inherits_node(&candidate, NodeEqualityPredicate::Exact),
            Tristate::True
        );
    }

    #[test]
    fn test_deterministic() {
        let mut groups = Groups::default();
        groups.add("a", vec![NodeBuilder::permission("p.*"), NodeBuilder::permission("q")]);
        groups.add("b", vec![NodeBuilder::permission("p.x").negated()]);
        let user = user(vec![NodeBuilder::inheritance("b"), NodeBuilder::inheritance("a")]);
        let query = QueryOptions::non_contextual();
        let now = Utc::now();
        let first = resolve(&user, &query, &groups, now);
        for _ in 0..5 {
            assert_eq!(resolve(&user, &query, &groups, now), first);
        }
    }
}
