//! Urfs Core - replicated file directory over content-addressed storage nodes
//!
//! - Storage nodes keep file bytes in a flat directory, hash them while they
//!   stream in, refuse content already held anywhere in the cluster and
//!   announce every save and removal
//! - Directory nodes keep an index replica fed only by those announcements and
//!   place new uploads on the least-loaded storage node
//! - New directory replicas announce themselves and are caught up by replay
//!   from their peers

pub mod bus;
pub mod cluster;
pub mod codec;
pub mod directory_node;
pub mod error;
pub mod index;
pub mod node;
pub mod operations;
pub mod placement;
pub mod registry;
pub mod session;
pub mod storage;
pub mod storage_node;
pub mod transfer;
pub mod types;
pub mod wire;

pub use bus::{
    DynEventBus, EventBus, EventBusBuilder, FileEvent, MemoryEventBus, RedisEventBus, RetryPolicy,
    Subscription, publish_with_retry,
};
pub use cluster::{
    BusReplicaPeer, ContentLocator, DirectoryService, DynContentLocator, DynReplicaPeer,
    DynStorageClient, HttpDirectoryClient, HttpReplicaPeer, HttpStorageClient,
    LocalStorageClient, PeerContentLocator, ReplicaPeer, StorageClient,
};
pub use directory_node::{DirectoryNode, DirectoryNodeDeps, DirectoryNodeOptions, ReplicaState};
pub use error::{Result, UrfsError};
pub use index::{FileIndex, SharedIndex};
pub use node::{NodeRef, NodeRole};
pub use placement::select_storage_node;
pub use registry::{DynRegistry, RedisRegistry, Registry, RegistryBuilder, StaticRegistry};
pub use storage::{ObjectIndex, ObjectStore, StoredObject, compute_hash, normalize_object_name};
pub use storage_node::{RecoveryReport, StorageNode, StorageNodeOptions};
pub use transfer::{DEFAULT_BLOCK_SIZE, download_bytes, upload_bytes};
pub use types::{FileInfo, FileRecord, SessionHandle, SessionKind};
