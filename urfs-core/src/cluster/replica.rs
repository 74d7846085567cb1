use super::ReplicaPeer;
use crate::bus::{DynEventBus, FileEvent, RetryPolicy, publish_with_retry};
use crate::error::Result;
use crate::node::NodeRef;
use crate::types::FileRecord;
use async_trait::async_trait;
use std::sync::Arc;

/// Replays records as directed `Replay` events on the file-updates topic.
/// Every replica sees them; only the target applies them.
pub struct BusReplicaPeer {
    bus: Arc<DynEventBus>,
    retry: RetryPolicy,
}

impl BusReplicaPeer {
    pub fn new(bus: Arc<DynEventBus>, retry: RetryPolicy) -> Self {
        Self { bus, retry }
    }
}

#[async_trait]
impl ReplicaPeer for BusReplicaPeer {
    async fn replay(&self, target: &NodeRef, records: &[FileRecord]) -> Result<()> {
        for record in records {
            let event = FileEvent::Replay {
                target: target.node_id.clone(),
                record: record.clone(),
            };
            publish_with_retry(self.bus.as_ref(), &event, &self.retry).await?;
        }
        Ok(())
    }
}
