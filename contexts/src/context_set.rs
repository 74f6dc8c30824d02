use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use crate::error::{ContextError, Result};

static EMPTY: Lazy<ImmutableContextSet> = Lazy::new(|| ImmutableContextSet {
    entries: Arc::new(BTreeSet::new()),
});

/// Normalizes a context key: trimmed, lowercased, non-empty, no control characters.
pub fn sanitize_key(key: &str) -> Result<String> {
    let key = key.trim();
    if key.is_empty() || key.chars().any(char::is_control) {
        return Err(ContextError::InvalidKey(key.to_string()));
    }
    Ok(key.to_lowercase())
}

/// Normalizes a context value with the same rules as keys.
pub fn sanitize_value(key: &str, value: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() || value.chars().any(char::is_control) {
        return Err(ContextError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        });
    }
    Ok(value.to_lowercase())
}

/// A single sanitized key/value tag, e.g. `world=nether`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Context {
    key: String,
    value: String,
}

impl Context {
    /// Creates a context entry, sanitizing both halves.
    pub fn new(key: &str, value: &str) -> Result<Self> {
        let key = sanitize_key(key)?;
        let value = sanitize_value(&key, value)?;
        Ok(Self { key, value })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

/// Read operations shared by both context set variants.
pub trait ContextSet {
    /// Returns a frozen snapshot of this set.
    fn to_immutable(&self) -> ImmutableContextSet;

    /// Returns true if the exact pair is present. Malformed input is never present.
    fn contains(&self, key: &str, value: &str) -> bool;

    /// Returns true if any value is registered under `key`.
    fn contains_key(&self, key: &str) -> bool;

    /// Returns every value registered under `key`, sorted.
    fn values(&self, key: &str) -> Vec<String>;

    /// Number of key/value pairs.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true iff every pair in `required` is present in `self`.
    ///
    /// An empty requirement is satisfied by every set.
    fn satisfies(&self, required: &dyn ContextSet) -> bool {
        let required = required.to_immutable();
        let satisfied = required
            .iter()
            .all(|context| self.contains(context.key(), context.value()));
        satisfied
    }
}

/// A frozen context set. Cheap to clone, usable as a map key.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImmutableContextSet {
    entries: Arc<BTreeSet<Context>>,
}

impl ImmutableContextSet {
    /// The empty set, i.e. "applies everywhere".
    pub fn empty() -> Self {
        EMPTY.clone()
    }

    /// A set holding a single pair.
    pub fn of(key: &str, value: &str) -> Result<Self> {
        Ok(Self::from_contexts([Context::new(key, value)?]))
    }

    /// Builds a set from raw pairs, failing on the first malformed one.
    pub fn from_pairs<K, V, I>(pairs: I) -> Result<Self>
    where
        K: AsRef<str>,
        V: AsRef<str>,
        I: IntoIterator<Item = (K, V)>,
    {
        let contexts = pairs
            .into_iter()
            .map(|(k, v)| Context::new(k.as_ref(), v.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::from_contexts(contexts))
    }

    /// Builds a set from already sanitized entries.
    pub fn from_contexts(contexts: impl IntoIterator<Item = Context>) -> Self {
        let entries: BTreeSet<Context> = contexts.into_iter().collect();
        if entries.is_empty() {
            return Self::empty();
        }
        Self {
            entries: Arc::new(entries),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Context> {
        self.entries.iter()
    }

    /// Returns a mutable copy seeded with this set's pairs.
    pub fn mutable_copy(&self) -> MutableContextSet {
        MutableContextSet::from_entries(self.entries.as_ref().clone())
    }

    /// Groups the pairs by key.
    pub fn to_multimap(&self) -> BTreeMap<String, Vec<String>> {
        let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for context in self.iter() {
            map.entry(context.key.clone())
                .or_default()
                .push(context.value.clone());
        }
        map
    }

    fn contains_context(&self, context: &Context) -> bool {
        self.entries.contains(context)
    }
}

impl Default for ImmutableContextSet {
    fn default() -> Self {
        Self::empty()
    }
}

impl ContextSet for ImmutableContextSet {
    fn to_immutable(&self) -> ImmutableContextSet {
        self.clone()
    }

    fn contains(&self, key: &str, value: &str) -> bool {
        match Context::new(key, value) {
            Ok(context) => self.contains_context(&context),
            Err(_) => false,
        }
    }

    fn contains_key(&self, key: &str) -> bool {
        match sanitize_key(key) {
            Ok(key) => self.entries.iter().any(|c| c.key == key),
            Err(_) => false,
        }
    }

    fn values(&self, key: &str) -> Vec<String> {
        let Ok(key) = sanitize_key(key) else {
            return Vec::new();
        };
        self.entries
            .iter()
            .filter(|c| c.key == key)
            .map(|c| c.value.clone())
            .collect()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn satisfies(&self, required: &dyn ContextSet) -> bool {
        let required = required.to_immutable();
        if required.len() > self.len() {
            return false;
        }
        let satisfied = required.iter().all(|c| self.contains_context(c));
        satisfied
    }
}

impl fmt::Debug for ImmutableContextSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ImmutableContextSet({})", self)
    }
}

impl fmt::Display for ImmutableContextSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, context) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", context)?;
        }
        write!(f, "}}")
    }
}

impl Serialize for ImmutableContextSet {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_multimap().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ImmutableContextSet {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = BTreeMap::<String, Vec<String>>::deserialize(deserializer)?;
        let pairs = raw
            .iter()
            .flat_map(|(k, values)| values.iter().map(move |v| (k.as_str(), v.as_str())));
        ImmutableContextSet::from_pairs(pairs).map_err(serde::de::Error::custom)
    }
}

/// A context set under construction.
///
/// All operations take `&self` and synchronize on an internal lock, so a
/// single instance can be shared between threads.
#[derive(Default)]
pub struct MutableContextSet {
    entries: RwLock<BTreeSet<Context>>,
}

impl MutableContextSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn from_entries(entries: BTreeSet<Context>) -> Self {
        Self {
            entries: RwLock::new(entries),
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeSet<Context>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeSet<Context>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a pair. Adding an existing pair is a no-op.
    pub fn add(&self, key: &str, value: &str) -> Result<()> {
        let context = Context::new(key, value)?;
        self.write().insert(context);
        Ok(())
    }

    /// Adds every pair of another set.
    pub fn add_all(&self, other: &dyn ContextSet) {
        let other = other.to_immutable();
        self.write().extend(other.iter().cloned());
    }

    /// Removes a single pair, returning whether it was present.
    pub fn remove(&self, key: &str, value: &str) -> Result<bool> {
        let context = Context::new(key, value)?;
        Ok(self.write().remove(&context))
    }

    /// Removes every value registered under `key`.
    pub fn remove_all(&self, key: &str) -> Result<usize> {
        let key = sanitize_key(key)?;
        let mut entries = self.write();
        let before = entries.len();
        entries.retain(|c| c.key != key);
        Ok(before - entries.len())
    }

    pub fn clear(&self) {
        self.write().clear();
    }

    pub fn mutable_copy(&self) -> MutableContextSet {
        Self::from_entries(self.read().clone())
    }
}

impl ContextSet for MutableContextSet {
    fn to_immutable(&self) -> ImmutableContextSet {
        ImmutableContextSet::from_contexts(self.read().iter().cloned())
    }

    fn contains(&self, key: &str, value: &str) -> bool {
        match Context::new(key, value) {
            Ok(context) => self.read().contains(&context),
            Err(_) => false,
        }
    }

    fn contains_key(&self, key: &str) -> bool {
        match sanitize_key(key) {
            Ok(key) => self.read().iter().any(|c| c.key == key),
            Err(_) => false,
        }
    }

    fn values(&self, key: &str) -> Vec<String> {
        self.to_immutable().values(key)
    }

    fn len(&self) -> usize {
        self.read().len()
    }
}

impl PartialEq for MutableContextSet {
    fn eq(&self, other: &Self) -> bool {
        self.to_immutable() == other.to_immutable()
    }
}

impl fmt::Debug for MutableContextSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MutableContextSet({})", self.to_immutable())
    }
}

impl From<&ImmutableContextSet> for MutableContextSet {
    fn from(set: &ImmutableContextSet) -> Self {
        set.mutable_copy()
    }
}
