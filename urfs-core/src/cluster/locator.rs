use super::{ContentLocator, DynStorageClient};
use crate::error::Result;
use crate::node::NodeRef;
use crate::registry::DynRegistry;
use async_trait::async_trait;
use std::sync::Arc;

/// Asks every other registered storage node whether it holds a hash.
///
/// A peer that cannot be reached is skipped with a warning: it cannot serve
/// the content either. Failing to enumerate peers is an error.
pub struct PeerContentLocator {
    registry: Arc<DynRegistry>,
    storage: Arc<DynStorageClient>,
}

impl PeerContentLocator {
    pub fn new(registry: Arc<DynRegistry>, storage: Arc<DynStorageClient>) -> Self {
        Self { registry, storage }
    }
}

#[async_trait]
impl ContentLocator for PeerContentLocator {
    async fn locate(&self, hash: &str, local: &NodeRef) -> Result<Option<NodeRef>> {
        for peer in self.registry.storage_nodes().await? {
            if peer.node_id == local.node_id {
                continue;
            }

            match self.storage.holds_object(&peer, hash).await {
                Ok(true) => return Ok(Some(peer)),
                Ok(false) => {}
                Err(error) => {
                    tracing::warn!(
                        "Skipping storage node {} in content lookup: {}",
                        peer,
                        error
                    );
                }
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MemoryEventBus;
    use crate::cluster::LocalStorageClient;
    use crate::registry::StaticRegistry;
    use crate::storage::compute_hash;
    use crate::storage_node::{StorageNode, StorageNodeOptions};
    use bytes::Bytes;

    #[tokio::test]
    async fn test_locate_finds_peer_and_skips_self() {
        let dir = tempfile::tempdir().unwrap();
        let bus = Arc::new(MemoryEventBus::new());
        let fm1 = NodeRef::new("fm1", "127.0.0.1:9001");
        let fm2 = NodeRef::new("fm2", "127.0.0.1:9002");
        let gone = NodeRef::new("fm0", "127.0.0.1:9000");

        let node = Arc::new(
            StorageNode::open(
                fm1.clone(),
                StorageNodeOptions::new(dir.path().to_path_buf()),
                bus,
            )
            .await
            .unwrap(),
        );
        let session_id = node.create_upload_session("a.txt").await.unwrap();
        node.upload_send(&session_id, Bytes::from("held")).await.unwrap();
        node.upload_save(&session_id).await.unwrap();

        let storage = Arc::new(LocalStorageClient::new());
        storage.add_node(node).await;
        let locator = PeerContentLocator::new(
            Arc::new(StaticRegistry::new(vec![gone, fm1.clone(), fm2.clone()])),
            storage,
        );

        let hash = compute_hash(b"held");
        assert_eq!(locator.locate(&hash, &fm2).await.unwrap(), Some(fm1.clone()));
        assert_eq!(locator.locate(&hash, &fm1).await.unwrap(), None);
        assert_eq!(locator.locate("missing", &fm2).await.unwrap(), None);
    }
}
