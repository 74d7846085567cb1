use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use urfs_core::{DirectoryNodeOptions, NodeRef, Result, RetryPolicy, StorageNodeOptions, UrfsError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub node: NodeConfig,
    #[serde(default)]
    pub directory: DirectoryConfig,
    #[serde(default)]
    pub storage: Option<StorageConfig>,
    pub event_bus: EventBusConfig,
    pub registry: RegistryConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub node_id: String,
    pub bind_addr: String,
    #[serde(default)]
    pub advertise_addr: Option<String>,
}

impl NodeConfig {
    pub fn effective_address(&self) -> String {
        self.advertise_addr
            .clone()
            .unwrap_or_else(|| self.bind_addr.clone())
    }

    pub fn node_ref(&self) -> NodeRef {
        NodeRef::new(self.node_id.clone(), self.effective_address())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRefConfig {
    pub node_id: String,
    pub address: String,
}

impl From<&NodeRefConfig> for NodeRef {
    fn from(config: &NodeRefConfig) -> Self {
        NodeRef::new(config.node_id.clone(), config.address.clone())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplicaTransport {
    #[default]
    Bus,
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryConfig {
    #[serde(default)]
    pub default_storage_node: Option<NodeRefConfig>,
    #[serde(default = "default_catch_up_batch_size")]
    pub catch_up_batch_size: usize,
    #[serde(default = "default_catch_up_quiet_period_ms")]
    pub catch_up_quiet_period_ms: u64,
    #[serde(default)]
    pub replica_transport: ReplicaTransport,
}

fn default_catch_up_batch_size() -> usize {
    64
}

fn default_catch_up_quiet_period_ms() -> u64 {
    2_000
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            default_storage_node: None,
            catch_up_batch_size: default_catch_up_batch_size(),
            catch_up_quiet_period_ms: default_catch_up_quiet_period_ms(),
            replica_transport: ReplicaTransport::default(),
        }
    }
}

impl DirectoryConfig {
    pub fn options(&self) -> DirectoryNodeOptions {
        DirectoryNodeOptions {
            default_storage_node: self.default_storage_node.as_ref().map(NodeRef::from),
            catch_up_batch_size: self.catch_up_batch_size,
            catch_up_quiet_period: Duration::from_millis(self.catch_up_quiet_period_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub path: PathBuf,
    #[serde(default = "default_max_chunk_bytes")]
    pub max_chunk_bytes: usize,
    #[serde(default = "default_session_idle_timeout_secs")]
    pub session_idle_timeout_secs: u64,
    #[serde(default = "default_reaper_interval_secs")]
    pub reaper_interval_secs: u64,
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
}

fn default_max_chunk_bytes() -> usize {
    1024 * 1024
}

fn default_session_idle_timeout_secs() -> u64 {
    300
}

fn default_reaper_interval_secs() -> u64 {
    30
}

fn default_heartbeat_interval_secs() -> u64 {
    20
}

impl StorageConfig {
    pub fn options(&self, retry: &RetryPolicy) -> StorageNodeOptions {
        StorageNodeOptions {
            storage_dir: self.path.clone(),
            max_chunk_bytes: self.max_chunk_bytes,
            session_idle_timeout: Duration::from_secs(self.session_idle_timeout_secs),
            retry: retry.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBusConfig {
    pub backend: String,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub redis: Option<RedisConfig>,
}

/// Registry backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    pub backend: String,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub redis: Option<RedisConfig>,
    #[serde(default)]
    pub static_nodes: Vec<NodeRefConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

fn namespace_or_default(namespace: &Option<String>) -> &str {
    namespace
        .as_deref()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or("default")
}

impl EventBusConfig {
    pub fn namespace_or_default(&self) -> &str {
        namespace_or_default(&self.namespace)
    }
}

impl RegistryConfig {
    pub fn namespace_or_default(&self) -> &str {
        namespace_or_default(&self.namespace)
    }
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::with_name(path))
            .add_source(::config::Environment::with_prefix("URFS").separator("__"))
            .build()
            .map_err(|e| UrfsError::Config(e.to_string()))?;

        let config: Config = settings
            .try_deserialize()
            .map_err(|e| UrfsError::Config(e.to_string()))?;

        Ok(config)
    }

    pub fn storage_or_err(&self) -> Result<&StorageConfig> {
        self.storage.as_ref().ok_or_else(|| {
            UrfsError::Config("a storage section is required for the storage role".to_string())
        })
    }
}
