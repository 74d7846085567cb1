use crate::error::{Result, UrfsError};
use crate::node::NodeRef;
use crate::registry::Registry;
use async_trait::async_trait;
use redis::{AsyncCommands, Client};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

/// Seconds a registration stays visible without a refresh.
pub const STORAGE_NODE_TTL_SECS: u64 = 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StorageNodeEntry {
    node: NodeRef,
    registered_at: chrono::DateTime<chrono::Utc>,
}

/// Redis-based registry implementation
pub struct RedisRegistry {
    conn: Mutex<redis::aio::MultiplexedConnection>,
    prefix: String,
}

impl RedisRegistry {
    /// Create a new Redis registry client
    pub async fn new(url: &str, namespace: &str) -> Result<Self> {
        let client = Client::open(url)
            .map_err(|e| UrfsError::Config(format!("Failed to connect to Redis: {}", e)))?;

        let mut conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| UrfsError::Config(format!("Failed to connect to Redis: {}", e)))?;

        // Test with a ping
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| UrfsError::Config(format!("Redis ping failed: {}", e)))?;

        Ok(Self {
            conn: Mutex::new(conn),
            prefix: format!("urfs:{}", namespace),
        })
    }

    fn storage_key(&self, node_id: &str) -> String {
        format!("{}:storage:{}", self.prefix, node_id)
    }

    fn storage_pattern(&self) -> String {
        format!("{}:storage:*", self.prefix)
    }
}

#[async_trait]
impl Registry for RedisRegistry {
    async fn register_storage_node(&self, node: &NodeRef) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let key = self.storage_key(&node.node_id);
        let value = serde_json::to_vec(&StorageNodeEntry {
            node: node.clone(),
            registered_at: chrono::Utc::now(),
        })?;

        // Nodes must heartbeat before the TTL runs out
        let _: () = conn
            .set_ex(key, value, STORAGE_NODE_TTL_SECS)
            .await
            .map_err(|e| {
                UrfsError::Internal(format!("Failed to register storage node in Redis: {}", e))
            })?;

        Ok(())
    }

    async fn deregister_storage_node(&self, node_id: &str) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let _: () = conn.del(self.storage_key(node_id)).await.map_err(|e| {
            UrfsError::Internal(format!("Failed to deregister storage node in Redis: {}", e))
        })?;
        Ok(())
    }

    async fn storage_nodes(&self) -> Result<Vec<NodeRef>> {
        let mut conn = self.conn.lock().await;
        let pattern = self.storage_pattern();

        let keys: Vec<String> = conn.keys(&pattern).await.map_err(|e| {
            UrfsError::Internal(format!("Failed to get storage node keys from Redis: {}", e))
        })?;

        let mut nodes = Vec::new();
        for key in keys {
            if let Ok(Some(data)) = conn.get::<_, Option<Vec<u8>>>(&key).await {
                if let Ok(entry) = serde_json::from_slice::<StorageNodeEntry>(&data) {
                    nodes.push(entry.node);
                }
            }
        }

        // KEYS has no defined order; enumerate by node id.
        nodes.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        Ok(nodes)
    }
}
