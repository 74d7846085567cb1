//! Event bus for index-mutation and replica-announcement topics
//!
//! Provides a trait-based abstraction over publish/subscribe transports
//! (in-process broadcast, Redis pub/sub). Delivery is at-least-once per
//! subscriber at best; consumers must apply events idempotently.

pub mod factory;
pub mod memory;
pub mod redis;

use crate::error::{Result, UrfsError};
use crate::node::NodeRef;
use crate::types::FileRecord;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub use factory::EventBusBuilder;
pub use memory::MemoryEventBus;
pub use self::redis::RedisEventBus;

/// Topic carrying `FileEvent`s.
pub const FILE_UPDATES_TOPIC: &str = "file-updates";
/// Topic carrying announcements of newly started directory replicas.
pub const FRONTEND_UPDATES_TOPIC: &str = "frontend-updates";

/// Index mutation broadcast to every directory replica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FileEvent {
    /// A storage node committed a new object.
    New(FileRecord),
    /// A storage node removed an object.
    Removed(FileRecord),
    /// Catch-up record addressed to one joining replica.
    Replay { target: String, record: FileRecord },
}

impl FileEvent {
    pub fn record(&self) -> &FileRecord {
        match self {
            Self::New(record) | Self::Removed(record) => record,
            Self::Replay { record, .. } => record,
        }
    }
}

/// Trait for event bus transports
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish an index mutation on the file-updates topic
    async fn publish_file_event(&self, event: &FileEvent) -> Result<()>;

    /// Subscribe to the file-updates topic
    async fn subscribe_file_events(&self) -> Result<Subscription<FileEvent>>;

    /// Publish a replica's reference on the frontend-updates topic
    async fn announce_replica(&self, replica: &NodeRef) -> Result<()>;

    /// Subscribe to the frontend-updates topic
    async fn subscribe_announcements(&self) -> Result<Subscription<NodeRef>>;
}

/// Type alias for dynamic event bus
pub type DynEventBus = dyn EventBus;

/// Receiving end of a topic subscription. Dropping it unsubscribes.
pub struct Subscription<T> {
    receiver: mpsc::UnboundedReceiver<T>,
    forwarder: Option<JoinHandle<()>>,
}

impl<T> Subscription<T> {
    pub fn new(receiver: mpsc::UnboundedReceiver<T>, forwarder: Option<JoinHandle<()>>) -> Self {
        Self {
            receiver,
            forwarder,
        }
    }

    /// Next message, or `None` once the topic is gone.
    pub async fn recv(&mut self) -> Option<T> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<T> {
        self.receiver.try_recv().ok()
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
    }
}

/// Bounded exponential backoff used when the bus is transiently unavailable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_backoff_ms() -> u64 {
    100
}

fn default_max_backoff_ms() -> u64 {
    2_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl RetryPolicy {
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.min(16);
        Duration::from_millis(
            self.initial_backoff_ms
                .saturating_mul(factor)
                .min(self.max_backoff_ms),
        )
    }
}

pub async fn publish_with_retry(
    bus: &DynEventBus,
    event: &FileEvent,
    policy: &RetryPolicy,
) -> Result<()> {
    let attempts = policy.max_attempts.max(1);
    let mut last_error = None;

    for attempt in 0..attempts {
        match bus.publish_file_event(event).await {
            Ok(()) => return Ok(()),
            Err(error) => {
                tracing::warn!(
                    "Publishing file event failed. attempt={}/{} hash={} error={}",
                    attempt + 1,
                    attempts,
                    event.record().hash,
                    error
                );
                last_error = Some(error);
                if attempt + 1 < attempts {
                    tokio::time::sleep(policy.backoff(attempt)).await;
                }
            }
        }
    }

    Err(UrfsError::EventBus(format!(
        "giving up after {} attempts: {}",
        attempts,
        last_error.map(|error| error.to_string()).unwrap_or_default()
    )))
}
