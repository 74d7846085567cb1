use super::{EventBus, FileEvent, Subscription};
use crate::error::{Result, UrfsError};
use crate::node::NodeRef;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{broadcast, mpsc};

const DEFAULT_CAPACITY: usize = 1024;

/// In-process event bus backed by `tokio::sync::broadcast`. Every node sharing
/// one instance sees every event, which makes it suitable for tests and
/// single-process clusters.
pub struct MemoryEventBus {
    file_updates: broadcast::Sender<FileEvent>,
    frontend_updates: broadcast::Sender<NodeRef>,
    failures_pending: AtomicUsize,
}

impl MemoryEventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (file_updates, _) = broadcast::channel(capacity);
        let (frontend_updates, _) = broadcast::channel(capacity);
        Self {
            file_updates,
            frontend_updates,
            failures_pending: AtomicUsize::new(0),
        }
    }

    /// Make the next `count` publishes fail, simulating an unavailable bus.
    pub fn fail_next_publishes(&self, count: usize) {
        self.failures_pending.store(count, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        let consumed = self
            .failures_pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |pending| {
                pending.checked_sub(1)
            })
            .is_ok();

        if consumed {
            return Err(UrfsError::EventBus("memory bus unavailable".to_string()));
        }
        Ok(())
    }
}

impl Default for MemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

fn forward<T: Clone + Send + 'static>(mut source: broadcast::Receiver<T>) -> Subscription<T> {
    let (tx, rx) = mpsc::unbounded_channel();

    let forwarder = tokio::spawn(async move {
        loop {
            match source.recv().await {
                Ok(message) => {
                    if tx.send(message).is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Subscriber lagged behind, {} events dropped", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    Subscription::new(rx, Some(forwarder))
}

#[async_trait]
impl EventBus for MemoryEventBus {
    async fn publish_file_event(&self, event: &FileEvent) -> Result<()> {
        self.check_available()?;
        tracing::trace!(event = ?event, "Publishing file event");
        // No subscribers is not an error.
        let _ = self.file_updates.send(event.clone());
        Ok(())
    }

    async fn subscribe_file_events(&self) -> Result<Subscription<FileEvent>> {
        Ok(forward(self.file_updates.subscribe()))
    }

    async fn announce_replica(&self, replica: &NodeRef) -> Result<()> {
        self.check_available()?;
        let _ = self.frontend_updates.send(replica.clone());
        Ok(())
    }

    async fn subscribe_announcements(&self) -> Result<Subscription<NodeRef>> {
        Ok(forward(self.frontend_updates.subscribe()))
    }
}
