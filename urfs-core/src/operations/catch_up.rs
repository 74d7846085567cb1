use crate::cluster::DynReplicaPeer;
use crate::error::Result;
use crate::index::SharedIndex;
use crate::node::NodeRef;
use std::sync::Arc;

#[derive(Clone)]
pub struct CatchUpOperation {
    index: SharedIndex,
    peer: Arc<DynReplicaPeer>,
    batch_size: usize,
}

#[derive(Debug, Clone)]
pub struct CatchUpOperationRequest {
    pub target: NodeRef,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatchUpOperationResult {
    pub replayed: usize,
    pub batches: usize,
}

impl CatchUpOperation {
    pub fn new(index: SharedIndex, peer: Arc<DynReplicaPeer>, batch_size: usize) -> Self {
        Self {
            index,
            peer,
            batch_size: batch_size.max(1),
        }
    }

    /// Replay a snapshot of the local index to `target`, one batch at a time.
    /// Cancelling the task between batches leaves the target with a prefix of
    /// the snapshot, which later events and replays complete.
    pub async fn run(&self, request: CatchUpOperationRequest) -> Result<CatchUpOperationResult> {
        let mut records = self.index.read().await.records();
        records.sort_by(|a, b| a.hash.cmp(&b.hash));

        let mut result = CatchUpOperationResult::default();
        for batch in records.chunks(self.batch_size) {
            self.peer.replay(&request.target, batch).await?;
            result.replayed += batch.len();
            result.batches += 1;
            tokio::task::yield_now().await;
        }

        tracing::info!(
            "Caught up replica {}. records={} batches={}",
            request.target,
            result.replayed,
            result.batches
        );
        Ok(result)
    }
}
