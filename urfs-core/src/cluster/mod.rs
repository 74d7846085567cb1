//! Seams between nodes.
//!
//! Directory nodes reach storage nodes through a `StorageClient`, replay their
//! index to joining replicas through a `ReplicaPeer`, and are themselves reached
//! by clients through a `DirectoryService`. Each seam has an in-process and an
//! HTTP implementation. Storage nodes ask a `ContentLocator` whether content is
//! already held by one of their peers before saving it.

pub mod http;
pub mod local;
pub mod locator;
pub mod replica;

use crate::error::Result;
use crate::node::NodeRef;
use crate::types::{FileInfo, FileRecord, SessionHandle};
use async_trait::async_trait;
use bytes::Bytes;

pub use http::{HttpDirectoryClient, HttpReplicaPeer, HttpStorageClient};
pub use local::LocalStorageClient;
pub use locator::PeerContentLocator;
pub use replica::BusReplicaPeer;

/// Calls a directory node makes against storage nodes, plus the session
/// calls clients make once they hold a `SessionHandle`.
#[async_trait]
pub trait StorageClient: Send + Sync {
    async fn create_upload_session(&self, node: &NodeRef, name: &str) -> Result<SessionHandle>;

    async fn create_download_session(&self, node: &NodeRef, hash: &str) -> Result<SessionHandle>;

    async fn remove_file(&self, node: &NodeRef, hash: &str) -> Result<()>;

    /// Whether `node` stores an object with content hash `hash`.
    async fn holds_object(&self, node: &NodeRef, hash: &str) -> Result<bool>;

    async fn send_chunk(&self, session: &SessionHandle, chunk: Bytes) -> Result<()>;

    async fn finish_upload(&self, session: &SessionHandle) -> Result<FileInfo>;

    /// Read up to `size` bytes; a short chunk marks the end of the object.
    async fn read_chunk(&self, session: &SessionHandle, size: usize) -> Result<Bytes>;

    /// Release the session. Safe to call more than once.
    async fn close_session(&self, session: &SessionHandle) -> Result<()>;
}

pub type DynStorageClient = dyn StorageClient;

/// Client-facing directory operations.
#[async_trait]
pub trait DirectoryService: Send + Sync {
    async fn list_files(&self) -> Result<Vec<FileInfo>>;

    async fn begin_upload(&self, name: &str) -> Result<SessionHandle>;

    async fn begin_download(&self, hash: &str) -> Result<SessionHandle>;

    async fn remove(&self, hash: &str) -> Result<()>;

    /// Peer-to-peer: `replica` has just joined and wants this node's index.
    async fn announce_replica(&self, replica: &NodeRef) -> Result<()>;
}

/// Delivers catch-up records to a joining replica.
#[async_trait]
pub trait ReplicaPeer: Send + Sync {
    async fn replay(&self, target: &NodeRef, records: &[FileRecord]) -> Result<()>;
}

pub type DynReplicaPeer = dyn ReplicaPeer;

/// Finds content stored on storage nodes other than the asking one.
#[async_trait]
pub trait ContentLocator: Send + Sync {
    /// The first storage node other than `local` that holds `hash`.
    async fn locate(&self, hash: &str, local: &NodeRef) -> Result<Option<NodeRef>>;
}

pub type DynContentLocator = dyn ContentLocator;
