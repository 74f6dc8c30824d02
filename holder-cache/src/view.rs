//! Resolved views stored in the cache.

use authz::{resolver, Flag, GroupLookup, PermissionHolder, QueryOptions, Resolution};
use chrono::{DateTime, Utc};
use meta_stack::{MetaAccumulator, MetaData, MetaStackDefinition, PREFIX_STACK, SUFFIX_STACK};
use nodes::{RegexPattern, Tristate};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Permission lookup table built from an ordered node list.
///
/// Every permission node is indexed by its name together with its rank, so
/// a lookup only checks the queried permission, its parent wildcards and
/// `*`, then takes the best ranked hit.
#[derive(Debug, Clone, Default)]
pub struct PermissionView {
    by_name: HashMap<String, (usize, bool)>,
    regexes: Vec<(usize, RegexPattern, bool)>,
    wildcards: bool,
}

impl PermissionView {
    pub fn new(resolution: &Resolution, wildcards: bool) -> Self {
        let mut view = Self {
            wildcards,
            ..Self::default()
        };
        for (rank, node) in resolution.iter().enumerate() {
            if let Some(permission) = node.as_permission() {
                view.by_name
                    .entry(permission.name().to_string())
                    .or_insert((rank, node.value()));
            } else if let Some(pattern) = node.as_regex() {
                if wildcards && pattern.pattern().is_some() {
                    view.regexes.push((rank, pattern.clone(), node.value()));
                }
            }
        }
        view
    }

    pub fn check(&self, permission: &str) -> Tristate {
        let permission = permission.trim().to_lowercase();
        let mut best = self.by_name.get(&permission).copied();

        if self.wildcards {
            let wildcard_hits = wildcard_candidates(&permission)
                .filter_map(|candidate| self.by_name.get(&candidate).copied());
            let regex_hits = self
                .regexes
                .iter()
                .filter(|(_, pattern, _)| pattern.matches(&permission))
                .map(|(rank, _, value)| (*rank, *value));
            for hit in wildcard_hits.chain(regex_hits) {
                if best.map_or(true, |(rank, _)| hit.0 < rank) {
                    best = Some(hit);
                }
            }
        }

        best.map_or(Tristate::Undefined, |(_, value)| Tristate::from_bool(value))
    }

    /// Every permission node name with the value of its best ranked node.
    pub fn as_map(&self) -> BTreeMap<String, bool> {
        self.by_name
            .iter()
            .map(|(name, (_, value))| (name.clone(), *value))
            .collect()
    }
}

/// `a.*` and `a.b.*` for `a.b.c`, then `*`.
fn wildcard_candidates(permission: &str) -> impl Iterator<Item = String> + '_ {
    permission
        .match_indices('.')
        .filter(move |(i, _)| *i + 1 < permission.len())
        .map(move |(i, _)| format!("{}.*", &permission[..i]))
        .chain(std::iter::once("*".to_string()))
}

/// Everything the cache knows about one holder under one query.
#[derive(Debug, Clone)]
pub struct CachedView {
    resolution: Resolution,
    permissions: PermissionView,
    meta: MetaData,
    expires_at: Option<DateTime<Utc>>,
}

impl CachedView {
    /// Resolves `holder` and folds the result.
    ///
    /// Stacks passed in the query's options take precedence over the
    /// supplied defaults.
    pub fn compute(
        holder: &PermissionHolder,
        query: &QueryOptions,
        groups: &dyn GroupLookup,
        prefix_stack: &MetaStackDefinition,
        suffix_stack: &MetaStackDefinition,
        now: DateTime<Utc>,
    ) -> Self {
        let resolution = resolver::resolve(holder, query, groups, now);
        let prefix_stack = query.option(&PREFIX_STACK).unwrap_or(prefix_stack);
        let suffix_stack = query.option(&SUFFIX_STACK).unwrap_or(suffix_stack);
        let meta = MetaAccumulator::new(prefix_stack, suffix_stack).accumulate(&resolution.nodes);
        let permissions = PermissionView::new(&resolution, query.flag(Flag::ResolveWildcards));
        Self {
            expires_at: resolution.earliest_expiry(),
            resolution,
            permissions,
            meta,
        }
    }

    pub fn check_permission(&self, permission: &str) -> Tristate {
        self.permissions.check(permission)
    }

    pub fn permissions(&self) -> &PermissionView {
        &self.permissions
    }

    pub fn meta(&self) -> &MetaData {
        &self.meta
    }

    pub fn resolution(&self) -> &Resolution {
        &self.resolution
    }

    /// Groups whose nodes went into this view.
    pub fn visited_groups(&self) -> &BTreeSet<String> {
        &self.resolution.visited_groups
    }

    /// True if `group` contributed to this view, or was referenced but
    /// missing when the view was computed.
    pub fn depends_on(&self, group: &str) -> bool {
        self.resolution.visited_groups.contains(group)
            || self.resolution.missing_groups.iter().any(|g| g == group)
    }

    /// When the first temporary node in the view expires.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expiry| expiry <= now)
    }
}
