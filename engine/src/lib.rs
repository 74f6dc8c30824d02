//! Permission engine: loads holders from storage, answers permission and
//! meta queries through per-holder caches, and keeps those caches coherent
//! as nodes change.
//!
//! ```
//! use perm_engine::{DataType, NodeBuilder, PermissionEngine, QueryOptions, Tristate};
//! use perm_engine::config::EngineConfig;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> perm_engine::Result<()> {
//! let engine = PermissionEngine::with_memory_storage(EngineConfig::default())?;
//! let admin = engine.create_group("admin").await?;
//! engine
//!     .add_node(admin.id(), DataType::Normal, NodeBuilder::permission("server.*").build()?)
//!     .await;
//!
//! let user = engine.load_user(uuid::Uuid::new_v4(), Some("alice")).await?;
//! engine
//!     .add_node(user.id(), DataType::Normal, NodeBuilder::inheritance("admin").build()?)
//!     .await;
//!
//! let query = QueryOptions::non_contextual();
//! assert_eq!(
//!     engine.resolve_permission(user.id(), "server.restart", &query).await,
//!     Tristate::True
//! );
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod registry;
pub mod storage;
pub mod tracks;

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use config::{EngineConfig, InvalidationPolicy};
use events::{EngineEvent, EventBus, InvalidationScope};
use registry::HolderRegistry;
use storage::{MemoryStorage, NodeStorage};

pub use authz::{DataType, Flag, HolderId, PermissionHolder, QueryMode, QueryOptions, Track};
pub use contexts::{ContextSet, ImmutableContextSet, MutableContextSet};
pub use error::{EngineError, Result};
pub use holder_cache::{CacheStats, CachedView};
pub use meta_stack::{MetaData, MetaStackDefinition, PREFIX_STACK, SUFFIX_STACK};
pub use nodes::{
    DataMutateResult, Node, NodeBuilder, NodeEqualityPredicate, TemporaryMergeBehaviour,
    TemporaryMutateResult, Tristate,
};
pub use tracks::TrackOutcome;

use holder_cache::CacheManager;

pub struct PermissionEngine {
    config: EngineConfig,
    registry: HolderRegistry,
    cache: CacheManager,
    events: EventBus,
    storage: Arc<dyn NodeStorage>,
}

impl PermissionEngine {
    pub fn new(config: EngineConfig, storage: Arc<dyn NodeStorage>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            events: EventBus::new(config.event_capacity),
            config,
            registry: HolderRegistry::new(),
            cache: CacheManager::new(),
            storage,
        })
    }

    pub fn with_memory_storage(config: EngineConfig) -> Result<Self> {
        Self::new(config, Arc::new(MemoryStorage::new()))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &HolderRegistry {
        &self.registry
    }

    pub fn storage(&self) -> &Arc<dyn NodeStorage> {
        &self.storage
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Contextual options for `context` with the configured default flags.
    pub fn default_query_options(&self, context: ImmutableContextSet) -> QueryOptions {
        self.config.default_query_options(context)
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.cache.stats().await
    }

    pub fn get_holder(&self, id: &HolderId) -> Option<Arc<PermissionHolder>> {
        self.registry.get(id)
    }

    // Loading and persistence

    /// Loads a user's stored nodes, registering the user if needed.
    ///
    /// A user with nothing in storage is loaded with no nodes.
    pub async fn load_user(&self, uuid: Uuid, username: Option<&str>) -> Result<Arc<PermissionHolder>> {
        let id = HolderId::User(uuid);
        let nodes = self.storage.load_raw_nodes(&id).await?.unwrap_or_default();
        let holder = self.registry.get_or_insert(&id);
        holder.load_nodes(nodes);
        if let Some(username) = username {
            holder.set_username(Some(username.to_string()));
        }
        info!("Loaded {} ({} nodes)", holder.friendly_name(), holder.own_nodes().len());
        self.invalidate(&id).await;
        Ok(holder)
    }

    /// Loads a stored group. `Ok(None)` if storage has never seen it.
    pub async fn load_group(&self, name: &str) -> Result<Option<Arc<PermissionHolder>>> {
        let id = HolderId::group(name)?;
        let Some(nodes) = self.storage.load_raw_nodes(&id).await? else {
            debug!("Group {} not found in storage", id);
            return Ok(None);
        };
        let holder = self.registry.get_or_insert(&id);
        holder.load_nodes(nodes);
        info!("Loaded group {} ({} nodes)", id.object_name(), holder.own_nodes().len());
        self.invalidate(&id).await;
        Ok(Some(holder))
    }

    /// Returns the loaded group, loading it from storage or creating and
    /// saving an empty one when absent.
    pub async fn create_group(&self, name: &str) -> Result<Arc<PermissionHolder>> {
        let id = HolderId::group(name)?;
        if let Some(holder) = self.registry.get(&id) {
            return Ok(holder);
        }
        if let Some(holder) = self.load_group(name).await? {
            return Ok(holder);
        }
        let holder = self.registry.get_or_insert(&id);
        self.storage.save_raw_nodes(&id, Vec::new()).await?;
        info!("Created group {}", id.object_name());
        self.invalidate(&id).await;
        Ok(holder)
    }

    /// Loads every stored group. Returns how many were loaded.
    pub async fn load_all_groups(&self) -> Result<usize> {
        let names = self.storage.list_groups().await?;
        let mut loaded = 0;
        for name in &names {
            if self.load_group(name).await?.is_some() {
                loaded += 1;
            }
        }
        info!("Loaded {} groups", loaded);
        Ok(loaded)
    }

    /// Drops a user and its cached views from memory.
    pub async fn unload_user(&self, uuid: Uuid) -> bool {
        let id = HolderId::User(uuid);
        self.cache.remove(&id).await;
        let removed = self.registry.remove(&id).is_some();
        if removed {
            debug!("Unloaded {}", id);
        }
        removed
    }

    /// Writes a holder's enduring nodes to storage.
    pub async fn save_holder(&self, id: &HolderId) -> Result<()> {
        let holder = self
            .registry
            .get(id)
            .ok_or_else(|| EngineError::UnknownHolder(id.clone()))?;
        let nodes = holder.data(DataType::Normal).nodes();
        self.storage.save_raw_nodes(id, nodes).await
    }

    /// Re-reads a loaded holder's enduring nodes from storage and drops its
    /// transient nodes. Returns false if the holder is not loaded.
    pub async fn handle_reload_signal(&self, id: &HolderId) -> Result<bool> {
        let Some(holder) = self.registry.get(id) else {
            debug!("Ignoring reload for {}: not loaded", id);
            return Ok(false);
        };
        let nodes = self.storage.load_raw_nodes(id).await?.unwrap_or_default();
        holder.load_nodes(nodes);
        info!("Reloaded {}", id);
        self.invalidate(id).await;
        Ok(true)
    }

    // Queries

    /// The cached view of `id` under `query`, computed if needed.
    /// `None` if the holder is not loaded.
    pub async fn query(&self, id: &HolderId, query: &QueryOptions) -> Option<Arc<CachedView>> {
        self.query_at(id, query, Utc::now()).await
    }

    /// Like [`PermissionEngine::query`], evaluating expiry at `now`.
    pub async fn query_at(
        &self,
        id: &HolderId,
        query: &QueryOptions,
        now: DateTime<Utc>,
    ) -> Option<Arc<CachedView>> {
        let holder = self.registry.get(id)?;
        let cache = self.cache.cache_for(id).await;
        let view = cache
            .get_or_compute(query, now, || self.compute_view(&holder, query, now))
            .await;
        Some(view)
    }

    fn compute_view(
        &self,
        holder: &PermissionHolder,
        query: &QueryOptions,
        now: DateTime<Utc>,
    ) -> CachedView {
        let view = CachedView::compute(
            holder,
            query,
            &self.registry,
            &self.config.prefix_stack,
            &self.config.suffix_stack,
            now,
        );
        for group in &view.resolution().missing_groups {
            warn!("{} inherits group {} which is not loaded", holder.id(), group);
            self.events.publish(EngineEvent::UnknownGroup {
                holder: holder.id().clone(),
                group: group.clone(),
            });
        }
        view
    }

    pub async fn resolve_permission(
        &self,
        id: &HolderId,
        permission: &str,
        query: &QueryOptions,
    ) -> Tristate {
        match self.query(id, query).await {
            Some(view) => view.check_permission(permission),
            None => Tristate::Undefined,
        }
    }

    /// Every permission node name mapped to its effective value.
    pub async fn resolve_permissions(
        &self,
        id: &HolderId,
        query: &QueryOptions,
    ) -> BTreeMap<String, bool> {
        match self.query(id, query).await {
            Some(view) => view.permissions().as_map(),
            None => BTreeMap::new(),
        }
    }

    pub async fn resolve_meta(&self, id: &HolderId, query: &QueryOptions) -> Option<MetaData> {
        self.query(id, query).await.map(|view| view.meta().clone())
    }

    pub async fn resolve_meta_value(
        &self,
        id: &HolderId,
        key: &str,
        query: &QueryOptions,
    ) -> Option<String> {
        let view = self.query(id, query).await?;
        view.meta().meta_value(key).map(str::to_string)
    }

    pub async fn resolve_prefix(&self, id: &HolderId, query: &QueryOptions) -> Option<String> {
        self.query(id, query).await?.meta().prefix.clone()
    }

    pub async fn resolve_suffix(&self, id: &HolderId, query: &QueryOptions) -> Option<String> {
        self.query(id, query).await?.meta().suffix.clone()
    }

    /// Own nodes, transient first. Empty for an unknown holder.
    pub fn get_own_nodes(&self, id: &HolderId) -> Vec<Node> {
        self.registry
            .get(id)
            .map(|holder| holder.own_nodes())
            .unwrap_or_default()
    }

    /// Every node that applies to the holder under `query`, in resolution order.
    pub async fn resolve_inherited_nodes(&self, id: &HolderId, query: &QueryOptions) -> Vec<Node> {
        match self.query(id, query).await {
            Some(view) => view.resolution().iter().cloned().collect(),
            None => Vec::new(),
        }
    }

    /// Resolved nodes with same-identity duplicates collapsed to the
    /// highest ranked one.
    pub async fn resolve_distinct_inherited_nodes(
        &self,
        id: &HolderId,
        query: &QueryOptions,
    ) -> Vec<Node> {
        match self.query(id, query).await {
            Some(view) => view
                .resolution()
                .distinct()
                .into_iter()
                .map(|resolved| resolved.node)
                .collect(),
            None => Vec::new(),
        }
    }

    pub async fn inherits_node(
        &self,
        id: &HolderId,
        node: &Node,
        predicate: NodeEqualityPredicate,
        query: &QueryOptions,
    ) -> Tristate {
        match self.query(id, query).await {
            Some(view) => view.resolution().inherits_node(node, predicate),
            None => Tristate::Undefined,
        }
    }

    pub fn has_node(
        &self,
        id: &HolderId,
        data_type: DataType,
        node: &Node,
        predicate: NodeEqualityPredicate,
    ) -> Tristate {
        self.registry
            .get(id)
            .map_or(Tristate::Undefined, |holder| {
                holder.has_node(data_type, node, predicate)
            })
    }

    // Mutations

    /// Adds a node. Temporary nodes clashing with an existing temporary node
    /// are merged with the configured [`TemporaryMergeBehaviour`].
    pub async fn add_node(&self, id: &HolderId, data_type: DataType, node: Node) -> DataMutateResult {
        let merge = self.config.temporary_merge_behaviour;
        self.add_node_with_merge(id, data_type, node, merge)
            .await
            .result
    }

    pub async fn add_node_with_merge(
        &self,
        id: &HolderId,
        data_type: DataType,
        node: Node,
        merge: TemporaryMergeBehaviour,
    ) -> TemporaryMutateResult {
        let Some(holder) = self.registry.get(id) else {
            return TemporaryMutateResult {
                result: DataMutateResult::Fail,
                merged_node: node,
            };
        };
        let outcome = holder.add_node_with_merge(data_type, node, merge);
        if outcome.result.was_successful() {
            self.after_change(id).await;
        }
        outcome
    }

    pub async fn remove_node(&self, id: &HolderId, data_type: DataType, node: &Node) -> DataMutateResult {
        self.mutate(id, |holder| holder.remove_node(data_type, node))
            .await
    }

    /// Removes every node, or every node in exactly `context`.
    pub async fn clear_nodes(
        &self,
        id: &HolderId,
        data_type: DataType,
        context: Option<&ImmutableContextSet>,
    ) -> DataMutateResult {
        self.mutate(id, |holder| changed(holder.clear_nodes(data_type, context)))
            .await
    }

    pub async fn clear_parents(
        &self,
        id: &HolderId,
        data_type: DataType,
        context: Option<&ImmutableContextSet>,
    ) -> DataMutateResult {
        self.mutate(id, |holder| changed(holder.clear_parents(data_type, context)))
            .await
    }

    pub async fn clear_meta(
        &self,
        id: &HolderId,
        data_type: DataType,
        context: Option<&ImmutableContextSet>,
    ) -> DataMutateResult {
        self.mutate(id, |holder| changed(holder.clear_meta(data_type, context)))
            .await
    }

    pub async fn clear_matching(
        &self,
        id: &HolderId,
        data_type: DataType,
        predicate: impl FnMut(&Node) -> bool,
    ) -> DataMutateResult {
        self.mutate(id, |holder| changed(holder.clear_matching(data_type, predicate)))
            .await
    }

    /// Removes permanent meta nodes with `key` in exactly `context`.
    pub async fn unset_meta(
        &self,
        id: &HolderId,
        data_type: DataType,
        key: &str,
        context: &ImmutableContextSet,
    ) -> DataMutateResult {
        self.mutate(id, |holder| changed(holder.unset_meta(data_type, key, context)))
            .await
    }

    /// Removes expired nodes from every loaded holder. Returns how many
    /// nodes were removed.
    pub async fn audit_temporary_nodes(&self) -> usize {
        let now = Utc::now();
        let mut removed = 0;
        for holder in self.registry.holders() {
            let expired = holder.audit_temporary_nodes(now);
            if !expired.is_empty() {
                debug!("Removed {} expired nodes from {}", expired.len(), holder.id());
                removed += expired.len();
                self.after_change(holder.id()).await;
            }
        }
        removed
    }

    async fn mutate<F>(&self, id: &HolderId, f: F) -> DataMutateResult
    where
        F: FnOnce(&PermissionHolder) -> DataMutateResult,
    {
        let Some(holder) = self.registry.get(id) else {
            debug!("Mutation on {} failed: not loaded", id);
            return DataMutateResult::Fail;
        };
        let result = f(&holder);
        if result.was_successful() {
            self.after_change(id).await;
        }
        result
    }

    // Invalidation

    /// Drops the cached views of `id` and, for a group, of every holder the
    /// configured policy considers affected.
    pub async fn invalidate(&self, id: &HolderId) {
        self.cache.invalidate(id).await;
        self.events.publish(EngineEvent::Invalidated {
            scope: InvalidationScope::Holder(id.clone()),
        });

        let Some(group) = id.group_name() else {
            return;
        };
        match self.config.invalidation {
            InvalidationPolicy::Conservative => {
                self.cache.invalidate_all().await;
                self.events.publish(EngineEvent::Invalidated {
                    scope: InvalidationScope::All,
                });
            }
            InvalidationPolicy::Targeted => {
                self.cache.invalidate_dependents(group).await;
                self.events.publish(EngineEvent::Invalidated {
                    scope: InvalidationScope::DependentsOf(group.to_string()),
                });
            }
        }
    }

    pub async fn invalidate_all(&self) {
        self.cache.invalidate_all().await;
        self.events.publish(EngineEvent::Invalidated {
            scope: InvalidationScope::All,
        });
    }

    /// Invalidates after a mutation and announces it. Loads and reloads
    /// only invalidate.
    async fn after_change(&self, id: &HolderId) {
        self.invalidate(id).await;
        self.events
            .publish(EngineEvent::DataChanged { holder: id.clone() });
    }
}

fn changed(removed: bool) -> DataMutateResult {
    if removed {
        DataMutateResult::Success
    } else {
        DataMutateResult::Lacks
    }
}
