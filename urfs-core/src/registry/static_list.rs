use crate::error::Result;
use crate::node::NodeRef;
use crate::registry::Registry;
use async_trait::async_trait;
use tokio::sync::RwLock;

/// Registry over a fixed, configured list of storage nodes. Enumeration order
/// is the configured order, with late registrations appended.
pub struct StaticRegistry {
    nodes: RwLock<Vec<NodeRef>>,
}

impl StaticRegistry {
    pub fn new(nodes: Vec<NodeRef>) -> Self {
        Self {
            nodes: RwLock::new(nodes),
        }
    }
}

#[async_trait]
impl Registry for StaticRegistry {
    async fn register_storage_node(&self, node: &NodeRef) -> Result<()> {
        let mut nodes = self.nodes.write().await;
        match nodes.iter_mut().find(|n| n.node_id == node.node_id) {
            Some(existing) => *existing = node.clone(),
            None => nodes.push(node.clone()),
        }
        Ok(())
    }

    async fn deregister_storage_node(&self, node_id: &str) -> Result<()> {
        self.nodes.write().await.retain(|n| n.node_id != node_id);
        Ok(())
    }

    async fn storage_nodes(&self) -> Result<Vec<NodeRef>> {
        Ok(self.nodes.read().await.clone())
    }
}
