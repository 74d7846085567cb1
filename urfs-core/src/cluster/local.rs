use super::StorageClient;
use crate::error::{Result, UrfsError};
use crate::node::NodeRef;
use crate::storage_node::StorageNode;
use crate::types::{FileInfo, SessionHandle, SessionKind};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Storage client for nodes running in the same process.
#[derive(Default)]
pub struct LocalStorageClient {
    nodes: RwLock<HashMap<String, Arc<StorageNode>>>,
}

impl LocalStorageClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_node(&self, node: Arc<StorageNode>) {
        let node_id = node.node_ref().node_id.clone();
        self.nodes.write().await.insert(node_id, node);
    }

    async fn resolve(&self, node: &NodeRef) -> Result<Arc<StorageNode>> {
        self.nodes
            .read()
            .await
            .get(&node.node_id)
            .cloned()
            .ok_or_else(|| UrfsError::InvalidReference(format!("unknown storage node {}", node)))
    }
}

#[async_trait]
impl StorageClient for LocalStorageClient {
    async fn create_upload_session(&self, node: &NodeRef, name: &str) -> Result<SessionHandle> {
        let storage = self.resolve(node).await?;
        let session_id = storage.create_upload_session(name).await?;
        Ok(SessionHandle {
            session_id,
            kind: SessionKind::Upload,
            node: node.clone(),
        })
    }

    async fn create_download_session(&self, node: &NodeRef, hash: &str) -> Result<SessionHandle> {
        let storage = self.resolve(node).await?;
        let session_id = storage.create_download_session(hash).await?;
        Ok(SessionHandle {
            session_id,
            kind: SessionKind::Download,
            node: node.clone(),
        })
    }

    async fn remove_file(&self, node: &NodeRef, hash: &str) -> Result<()> {
        let storage = self.resolve(node).await?;
        storage.remove_file(hash).await?;
        Ok(())
    }

    async fn holds_object(&self, node: &NodeRef, hash: &str) -> Result<bool> {
        self.resolve(node).await?.holds_object(hash)
    }

    async fn send_chunk(&self, session: &SessionHandle, chunk: Bytes) -> Result<()> {
        let storage = self.resolve(&session.node).await?;
        storage.upload_send(&session.session_id, chunk).await
    }

    async fn finish_upload(&self, session: &SessionHandle) -> Result<FileInfo> {
        let storage = self.resolve(&session.node).await?;
        storage.upload_save(&session.session_id).await
    }

    async fn read_chunk(&self, session: &SessionHandle, size: usize) -> Result<Bytes> {
        let storage = self.resolve(&session.node).await?;
        storage.download_recv(&session.session_id, size).await
    }

    async fn close_session(&self, session: &SessionHandle) -> Result<()> {
        let storage = self.resolve(&session.node).await?;
        storage.destroy_session(&session.session_id).await;
        Ok(())
    }
}
