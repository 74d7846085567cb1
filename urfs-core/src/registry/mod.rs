//! Registry module for storage node discovery
//!
//! Provides a trait-based abstraction for different backend implementations
//! (static list, Redis, etc.)

pub mod factory;
pub mod redis;
pub mod static_list;

use crate::error::Result;
use crate::node::NodeRef;
use async_trait::async_trait;

pub use factory::RegistryBuilder;

/// Trait for registry implementations
#[async_trait]
pub trait Registry: Send + Sync {
    /// Register (or refresh) a storage node
    async fn register_storage_node(&self, node: &NodeRef) -> Result<()>;

    /// Remove a storage node from discovery
    async fn deregister_storage_node(&self, node_id: &str) -> Result<()>;

    /// All currently reachable storage nodes, in a stable enumeration order
    async fn storage_nodes(&self) -> Result<Vec<NodeRef>>;
}

/// Type alias for dynamic registry
pub type DynRegistry = dyn Registry;

pub use self::redis::RedisRegistry;
pub use static_list::StaticRegistry;
