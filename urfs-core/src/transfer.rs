//! Whole-file transfers on top of the session calls.
//!
//! Both helpers close the session on every exit path, including errors.

use crate::cluster::{DirectoryService, StorageClient};
use crate::error::{Result, UrfsError};
use crate::types::{FileInfo, SessionHandle};
use bytes::Bytes;

pub const DEFAULT_BLOCK_SIZE: usize = 1024;

/// Upload `data` as `name` in `block_size` chunks.
pub async fn upload_bytes(
    directory: &dyn DirectoryService,
    storage: &dyn StorageClient,
    name: &str,
    data: &[u8],
    block_size: usize,
) -> Result<FileInfo> {
    let block_size = checked_block_size(block_size)?;
    let session = directory.begin_upload(name).await?;
    let result = send_all(storage, &session, data, block_size).await;
    close_quietly(storage, &session).await;
    result
}

async fn send_all(
    storage: &dyn StorageClient,
    session: &SessionHandle,
    data: &[u8],
    block_size: usize,
) -> Result<FileInfo> {
    for block in data.chunks(block_size) {
        storage
            .send_chunk(session, Bytes::copy_from_slice(block))
            .await?;
    }
    storage.finish_upload(session).await
}

/// Download the file with content hash `hash`, reading `block_size` bytes at
/// a time until a short read.
pub async fn download_bytes(
    directory: &dyn DirectoryService,
    storage: &dyn StorageClient,
    hash: &str,
    block_size: usize,
) -> Result<Vec<u8>> {
    let block_size = checked_block_size(block_size)?;
    let session = directory.begin_download(hash).await?;
    let result = read_all(storage, &session, block_size).await;
    close_quietly(storage, &session).await;
    result
}

async fn read_all(
    storage: &dyn StorageClient,
    session: &SessionHandle,
    block_size: usize,
) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    loop {
        let chunk = storage.read_chunk(session, block_size).await?;
        data.extend_from_slice(&chunk);
        if chunk.len() < block_size {
            return Ok(data);
        }
    }
}

fn checked_block_size(block_size: usize) -> Result<usize> {
    if block_size == 0 {
        return Err(UrfsError::InvalidRequest(
            "block size must be positive".to_string(),
        ));
    }
    Ok(block_size)
}

async fn close_quietly(storage: &dyn StorageClient, session: &SessionHandle) {
    if let Err(error) = storage.close_session(session).await {
        tracing::warn!("Failed to close session {}: {}", session.session_id, error);
    }
}
