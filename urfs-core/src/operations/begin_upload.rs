use crate::cluster::DynStorageClient;
use crate::error::{Result, UrfsError};
use crate::index::SharedIndex;
use crate::node::NodeRef;
use crate::placement::select_storage_node;
use crate::registry::DynRegistry;
use crate::storage::normalize_object_name;
use crate::types::SessionHandle;
use std::sync::Arc;

#[derive(Clone)]
pub struct BeginUploadOperation {
    index: SharedIndex,
    registry: Arc<DynRegistry>,
    storage: Arc<DynStorageClient>,
    default_node: Option<NodeRef>,
}

#[derive(Debug, Clone)]
pub struct BeginUploadOperationRequest {
    pub name: String,
}

impl BeginUploadOperation {
    pub fn new(
        index: SharedIndex,
        registry: Arc<DynRegistry>,
        storage: Arc<DynStorageClient>,
        default_node: Option<NodeRef>,
    ) -> Self {
        Self {
            index,
            registry,
            storage,
            default_node,
        }
    }

    /// Reject names already in the index, then open an upload session on the
    /// least-loaded storage node. No bytes move before the name check.
    pub async fn run(&self, request: BeginUploadOperationRequest) -> Result<SessionHandle> {
        let name = normalize_object_name(&request.name)?;
        if self.index.read().await.contains_name(&name) {
            return Err(UrfsError::FileNameInUse(name));
        }

        let candidates = self.registry.storage_nodes().await?;
        let target = {
            let index = self.index.read().await;
            select_storage_node(&index, &candidates, self.default_node.as_ref())?
        };

        tracing::info!("Placing upload of {} on {}", name, target);
        self.storage.create_upload_session(&target, &name).await
    }
}
