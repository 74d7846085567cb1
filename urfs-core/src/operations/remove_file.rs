use crate::cluster::DynStorageClient;
use crate::error::{Result, UrfsError};
use crate::index::SharedIndex;
use std::sync::Arc;

#[derive(Clone)]
pub struct RemoveFileOperation {
    index: SharedIndex,
    storage: Arc<DynStorageClient>,
}

#[derive(Debug, Clone)]
pub struct RemoveFileOperationRequest {
    pub hash: String,
}

impl RemoveFileOperation {
    pub fn new(index: SharedIndex, storage: Arc<DynStorageClient>) -> Self {
        Self { index, storage }
    }

    /// Ask the owning storage node to delete the object. The index entry goes
    /// away when the resulting `Removed` event is applied, not here.
    pub async fn run(&self, request: RemoveFileOperationRequest) -> Result<()> {
        let owner = self
            .index
            .read()
            .await
            .get(&request.hash)
            .map(|record| record.storage_node.clone())
            .ok_or_else(|| UrfsError::FileNotFound(request.hash.clone()))?;

        tracing::info!("Removing {} from {}", request.hash, owner);
        self.storage.remove_file(&owner, &request.hash).await
    }
}
