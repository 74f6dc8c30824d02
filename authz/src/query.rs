//! Query options: how a resolution should be performed.
//!
//! A [`QueryOptions`] value bundles a [`QueryMode`], the context of the
//! subject (contextual mode only), a set of [`Flag`]s and a map of typed
//! extension options. It is immutable, compares structurally and hashes, so
//! the cache layer uses it directly as a map key.

use contexts::{ContextSet, ImmutableContextSet};
use serde::{Deserialize, Serialize};
use std::any::{Any, TypeId};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::Arc;

/// Whether node contexts are matched against a query context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryMode {
    /// Only nodes whose context is satisfied by the query context apply.
    Contextual,
    /// Context is ignored and every node applies.
    NonContextual,
}

/// Boolean switches that shape a resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Flag {
    /// Follow inheritance nodes into parent groups.
    ResolveInheritance,
    /// Let wildcard and regex nodes match permissions.
    ResolveWildcards,
    /// In contextual mode, nodes with an empty context apply.
    IncludeGlobalNodes,
}

impl Flag {
    pub const ALL: [Flag; 3] = [
        Flag::ResolveInheritance,
        Flag::ResolveWildcards,
        Flag::IncludeGlobalNodes,
    ];
}

/// A typed key into the extension options map.
///
/// ```
/// use authz::{OptionKey, QueryOptions};
///
/// const SERVER_NAME: OptionKey<String> = OptionKey::new("server-name");
///
/// let options = QueryOptions::non_contextual()
///     .to_builder()
///     .option(&SERVER_NAME, "lobby".to_string())
///     .build();
/// assert_eq!(options.option(&SERVER_NAME).map(String::as_str), Some("lobby"));
/// ```
pub struct OptionKey<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> OptionKey<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for OptionKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for OptionKey<T> {}

impl<T> fmt::Debug for OptionKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("OptionKey").field(&self.name).finish()
    }
}

/// Object-safe equality and hashing for extension option values.
///
/// Implemented for every `Eq + Hash + Debug` type that is `Send + Sync`.
pub trait OptionValue: Any + Send + Sync + fmt::Debug {
    fn as_any(&self) -> &dyn Any;
    fn dyn_eq(&self, other: &dyn OptionValue) -> bool;
    fn dyn_hash(&self, state: &mut dyn Hasher);
}

impl<T> OptionValue for T
where
    T: Any + Send + Sync + fmt::Debug + Eq + Hash,
{
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn dyn_eq(&self, other: &dyn OptionValue) -> bool {
        other
            .as_any()
            .downcast_ref::<T>()
            .is_some_and(|other| self == other)
    }

    fn dyn_hash(&self, mut state: &mut dyn Hasher) {
        TypeId::of::<T>().hash(&mut state);
        self.hash(&mut state);
    }
}

/// Immutable description of a query.
#[derive(Clone)]
pub struct QueryOptions {
    mode: QueryMode,
    context: ImmutableContextSet,
    flags: BTreeSet<Flag>,
    options: BTreeMap<&'static str, Arc<dyn OptionValue>>,
}

impl QueryOptions {
    pub fn builder(mode: QueryMode) -> QueryOptionsBuilder {
        QueryOptionsBuilder {
            mode,
            context: ImmutableContextSet::empty(),
            flags: Flag::ALL.into_iter().collect(),
            options: BTreeMap::new(),
        }
    }

    /// Contextual query for `context` with every flag set.
    ///
    /// Besides inheritance and wildcards this sets
    /// [`Flag::IncludeGlobalNodes`], so nodes with no context apply.
    pub fn contextual(context: ImmutableContextSet) -> Self {
        Self::builder(QueryMode::Contextual).context(context).build()
    }

    /// Contextual query with an empty context and every flag set,
    /// [`Flag::IncludeGlobalNodes`] included.
    pub fn default_contextual() -> Self {
        Self::builder(QueryMode::Contextual).build()
    }

    /// Non-contextual query with every flag set, [`Flag::IncludeGlobalNodes`]
    /// included.
    pub fn non_contextual() -> Self {
        Self::builder(QueryMode::NonContextual).build()
    }

    pub fn to_builder(&self) -> QueryOptionsBuilder {
        QueryOptionsBuilder {
            mode: self.mode,
            context: self.context.clone(),
            flags: self.flags.clone(),
            options: self.options.clone(),
        }
    }

    pub fn mode(&self) -> QueryMode {
        self.mode
    }

    /// The query context. Always empty in non-contextual mode.
    pub fn context(&self) -> &ImmutableContextSet {
        &self.context
    }

    pub fn flag(&self, flag: Flag) -> bool {
        self.flags.contains(&flag)
    }

    pub fn flags(&self) -> &BTreeSet<Flag> {
        &self.flags
    }

    /// Typed extension data stored under `key`, if any.
    pub fn option<T: Any>(&self, key: &OptionKey<T>) -> Option<&T> {
        self.options
            .get(key.name)
            .and_then(|value| value.as_any().downcast_ref::<T>())
    }

    /// Returns true if a node requiring `required` applies to this query.
    ///
    /// Non-contextual queries accept everything. Contextual queries accept a
    /// requirement the query context satisfies; an empty requirement is only
    /// accepted with [`Flag::IncludeGlobalNodes`].
    pub fn satisfies(&self, required: &dyn ContextSet) -> bool {
        match self.mode {
            QueryMode::NonContextual => true,
            QueryMode::Contextual if required.is_empty() => self.flag(Flag::IncludeGlobalNodes),
            QueryMode::Contextual => self.context.satisfies(required),
        }
    }
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self::default_contextual()
    }
}

impl PartialEq for QueryOptions {
    fn eq(&self, other: &Self) -> bool {
        self.mode == other.mode
            && self.context == other.context
            && self.flags == other.flags
            && self.options.len() == other.options.len()
            && self
                .options
                .iter()
                .zip(other.options.iter())
                .all(|((a_key, a), (b_key, b))| a_key == b_key && a.dyn_eq(b.as_ref()))
    }
}

impl Eq for QueryOptions {}

impl Hash for QueryOptions {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.mode.hash(state);
        self.context.hash(state);
        self.flags.hash(state);
        for (key, value) in &self.options {
            key.hash(state);
            value.dyn_hash(state);
        }
    }
}

impl fmt::Debug for QueryOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryOptions")
            .field("mode", &self.mode)
            .field("context", &self.context)
            .field("flags", &self.flags)
            .field("options", &self.options)
            .finish()
    }
}

impl fmt::Display for QueryOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.mode {
            QueryMode::Contextual => write!(f, "contextual {}", self.context),
            QueryMode::NonContextual => f.write_str("non-contextual"),
        }
    }
}

/// Builder for [`QueryOptions`]. Starts with every flag set.
#[derive(Clone)]
pub struct QueryOptionsBuilder {
    mode: QueryMode,
    context: ImmutableContextSet,
    flags: BTreeSet<Flag>,
    options: BTreeMap<&'static str, Arc<dyn OptionValue>>,
}

impl QueryOptionsBuilder {
    pub fn mode(mut self, mode: QueryMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the query context. Ignored in non-contextual mode.
    pub fn context(mut self, context: impl ContextSet) -> Self {
        self.context = context.to_immutable();
        self
    }

    pub fn flag(mut self, flag: Flag, value: bool) -> Self {
        if value {
            self.flags.insert(flag);
        } else {
            self.flags.remove(&flag);
        }
        self
    }

    pub fn flags(mut self, flags: impl IntoIterator<Item = Flag>) -> Self {
        self.flags = flags.into_iter().collect();
        self
    }

    pub fn option<T: OptionValue>(mut self, key: &OptionKey<T>, value: T) -> Self {
        self.options.insert(key.name, Arc::new(value));
        self
    }

    pub fn remove_option<T>(mut self, key: &OptionKey<T>) -> Self {
        self.options.remove(key.name);
        self
    }

    pub fn build(self) -> QueryOptions {
        let context = match self.mode {
            QueryMode::Contextual => self.context,
            QueryMode::NonContextual => ImmutableContextSet::empty(),
        };
        QueryOptions {
            mode: self.mode,
            context,
            flags: self.flags,
            options: self.options,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;
    use std::collections::HashMap;

    const LABEL: OptionKey<String> = OptionKey::new("label");
    const LIMIT: OptionKey<u32> = OptionKey::new("limit");

    fn hash_of(options: &QueryOptions) -> u64 {
        let mut hasher = DefaultHasher::new();
        options.hash(&mut hasher);
        hasher.finish()
    }

    fn nether() -> ImmutableContextSet {
        ImmutableContextSet::of("world", "nether").unwrap()
    }

    #[test]
    fn test_structural_equality() {
        let a = QueryOptions::contextual(nether());
        let b = QueryOptions::builder(QueryMode::Contextual)
            .context(nether())
            .build();
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));

        let c = a.to_builder().flag(Flag::ResolveWildcards, false).build();
        assert_ne!(a, c);
    }

    #[test]
    fn test_options_participate_in_equality() {
        let base = QueryOptions::non_contextual();
        let a = base.to_builder().option(&LABEL, "x".to_string()).build();
        let b = base.to_builder().option(&LABEL, "x".to_string()).build();
        let c = base.to_builder().option(&LABEL, "y".to_string()).build();
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
        assert_ne!(a, c);
        assert_ne!(a, base);

        let mut map = HashMap::new();
        map.insert(a.clone(), 1);
        assert_eq!(map.get(&b), Some(&1));
    }

    #[test]
    fn test_typed_option_lookup() {
        let options = QueryOptions::non_contextual()
            .to_builder()
            .option(&LIMIT, 5)
            .build();
        assert_eq!(options.option(&LIMIT), Some(&5));
        assert_eq!(options.option(&LABEL), None);

        let removed = options.to_builder().remove_option(&LIMIT).build();
        assert_eq!(removed.option(&LIMIT), None);
    }

    #[test]
    fn test_same_name_different_type_does_not_downcast() {
        const LIMIT_AS_STRING: OptionKey<String> = OptionKey::new("limit");
        let options = QueryOptions::non_contextual()
            .to_builder()
            .option(&LIMIT, 5)
            .build();
        assert_eq!(options.option(&LIMIT_AS_STRING), None);
    }

    #[test]
    fn test_satisfies() {
        let query = QueryOptions::contextual(nether());
        assert!(query.satisfies(&ImmutableContextSet::empty()));
        assert!(query.satisfies(&nether()));
        assert!(!query.satisfies(&ImmutableContextSet::of("world", "end").unwrap()));

        let no_globals = query
            .to_builder()
            .flag(Flag::IncludeGlobalNodes, false)
            .build();
        assert!(!no_globals.satisfies(&ImmutableContextSet::empty()));
        assert!(no_globals.satisfies(&nether()));

        let anything = QueryOptions::non_contextual();
        assert!(anything.satisfies(&ImmutableContextSet::of("world", "end").unwrap()));
    }

    #[test]
    fn test_non_contextual_drops_context() {
        let options = QueryOptions::builder(QueryMode::NonContextual)
            .context(nether())
            .build();
        assert!(options.context().is_empty());
        assert_eq!(options, QueryOptions::non_contextual());
    }

    #[test]
    fn test_presets() {
        let contextual = QueryOptions::default_contextual();
        assert_eq!(contextual.mode(), QueryMode::Contextual);
        assert!(Flag::ALL.iter().all(|flag| contextual.flag(*flag)));
        assert_eq!(QueryOptions::default(), contextual);

        let non_contextual = QueryOptions::non_contextual();
        assert_eq!(non_contextual.mode(), QueryMode::NonContextual);
        assert_eq!(non_contextual.to_string(), "non-contextual");
        assert!(non_contextual.flag(Flag::IncludeGlobalNodes));
        assert!(QueryOptions::contextual(nether()).flag(Flag::IncludeGlobalNodes));
    }
}
