//! Persistence contract for holder nodes.

use async_trait::async_trait;
use authz::HolderId;
use nodes::{Node, NodeRecord};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::error::Result;

/// Backing store for the enduring nodes of users and groups.
///
/// Transient nodes are never passed to storage.
#[async_trait]
pub trait NodeStorage: Send + Sync {
    /// `None` when nothing was ever saved for the holder.
    async fn load_raw_nodes(&self, holder: &HolderId) -> Result<Option<Vec<Node>>>;

    /// Replaces everything stored for the holder.
    async fn save_raw_nodes(&self, holder: &HolderId, nodes: Vec<Node>) -> Result<()>;

    /// Names of every stored group.
    async fn list_groups(&self) -> Result<Vec<String>>;
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredHolder {
    holder: HolderId,
    nodes: Vec<NodeRecord>,
}

/// In-process storage, optionally seeded from or dumped to a JSON snapshot.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    holders: RwLock<HashMap<HolderId, Vec<NodeRecord>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads a snapshot produced by [`MemoryStorage::to_json`].
    pub fn from_json(json: &str) -> Result<Self> {
        let stored: Vec<StoredHolder> = serde_json::from_str(json)?;
        let holders = stored
            .into_iter()
            .map(|entry| (entry.holder, entry.nodes))
            .collect();
        Ok(Self {
            holders: RwLock::new(holders),
        })
    }

    /// Holders sorted by id.
    pub async fn to_json(&self) -> Result<String> {
        let holders = self.holders.read().await;
        let mut stored: Vec<StoredHolder> = holders
            .iter()
            .map(|(holder, nodes)| StoredHolder {
                holder: holder.clone(),
                nodes: nodes.clone(),
            })
            .collect();
        stored.sort_by(|a, b| a.holder.cmp(&b.holder));
        Ok(serde_json::to_string_pretty(&stored)?)
    }

    pub async fn len(&self) -> usize {
        self.holders.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.holders.read().await.is_empty()
    }
}

#[async_trait]
impl NodeStorage for MemoryStorage {
    async fn load_raw_nodes(&self, holder: &HolderId) -> Result<Option<Vec<Node>>> {
        let holders = self.holders.read().await;
        let Some(records) = holders.get(holder) else {
            return Ok(None);
        };
        let nodes = records
            .iter()
            .cloned()
            .map(Node::try_from)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Some(nodes))
    }

    async fn save_raw_nodes(&self, holder: &HolderId, nodes: Vec<Node>) -> Result<()> {
        let records = nodes.into_iter().map(NodeRecord::from).collect();
        self.holders.write().await.insert(holder.clone(), records);
        tracing::debug!("Saved nodes for {}", holder);
        Ok(())
    }

    async fn list_groups(&self) -> Result<Vec<String>> {
        let holders = self.holders.read().await;
        let mut groups: Vec<String> = holders
            .keys()
            .filter_map(|holder| holder.group_name().map(str::to_string))
            .collect();
        groups.sort();
        Ok(groups)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use nodes::NodeBuilder;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_save_and_load() {
        let storage = MemoryStorage::new();
        let user = HolderId::User(Uuid::new_v4());
        assert_eq!(storage.load_raw_nodes(&user).await.unwrap(), None);

        let nodes = vec![
            NodeBuilder::permission("build.place").build().unwrap(),
            NodeBuilder::inheritance("builder")
                .with_context("world", "nether")
                .build()
                .unwrap(),
            NodeBuilder::prefix(5, "[B.uilder]").negated().build().unwrap(),
        ];
        storage.save_raw_nodes(&user, nodes.clone()).await.unwrap();
        assert_eq!(storage.load_raw_nodes(&user).await.unwrap(), Some(nodes));
    }

    #[tokio::test]
    async fn test_json_snapshot() {
        let storage = MemoryStorage::new();
        let admin = HolderId::group("admin").unwrap();
        let user = HolderId::User(Uuid::new_v4());
        storage
            .save_raw_nodes(&admin, vec![NodeBuilder::weight(100).build().unwrap()])
            .await
            .unwrap();
        storage
            .save_raw_nodes(&user, vec![NodeBuilder::inheritance("admin").build().unwrap()])
            .await
            .unwrap();

        let json = storage.to_json().await.unwrap();
        let restored = MemoryStorage::from_json(&json).unwrap();
        assert_eq!(restored.len().await, 2);
        assert_eq!(restored.list_groups().await.unwrap(), vec!["admin"]);
        assert_eq!(
            restored.load_raw_nodes(&user).await.unwrap(),
            storage.load_raw_nodes(&user).await.unwrap()
        );
    }

    #[tokio::test]
    async fn test_bad_snapshot() {
        assert!(matches!(
            MemoryStorage::from_json("{\"not\": \"a list\"}"),
            Err(EngineError::Json(_))
        ));

        let json = r#"[{"holder": {"type": "group", "id": "broken"}, "nodes": [{"key": "  "}]}]"#;
        let storage = MemoryStorage::from_json(json).unwrap();
        let err = storage
            .load_raw_nodes(&HolderId::Group("broken".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Node(_)));
    }
}
