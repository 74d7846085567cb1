use crate::cluster::DynStorageClient;
use crate::error::{Result, UrfsError};
use crate::index::SharedIndex;
use crate::types::SessionHandle;
use std::sync::Arc;

#[derive(Clone)]
pub struct BeginDownloadOperation {
    index: SharedIndex,
    storage: Arc<DynStorageClient>,
}

#[derive(Debug, Clone)]
pub struct BeginDownloadOperationRequest {
    pub hash: String,
}

impl BeginDownloadOperation {
    pub fn new(index: SharedIndex, storage: Arc<DynStorageClient>) -> Self {
        Self { index, storage }
    }

    pub async fn run(&self, request: BeginDownloadOperationRequest) -> Result<SessionHandle> {
        let owner = self
            .index
            .read()
            .await
            .get(&request.hash)
            .map(|record| record.storage_node.clone())
            .ok_or_else(|| UrfsError::FileNotFound(request.hash.clone()))?;

        self.storage
            .create_download_session(&owner, &request.hash)
            .await
    }
}
