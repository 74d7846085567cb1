use crate::bus::FileEvent;
use crate::index::SharedIndex;

#[derive(Clone)]
pub struct ApplyEventOperation {
    index: SharedIndex,
    local_node_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyEventOperationOutcome {
    Inserted,
    Removed,
    /// Duplicate insert or removal of an absent hash.
    Unchanged,
    /// A replay addressed to another replica.
    NotAddressed,
}

impl ApplyEventOperation {
    pub fn new(index: SharedIndex, local_node_id: String) -> Self {
        Self {
            index,
            local_node_id,
        }
    }

    /// Apply one event. Every branch is idempotent, so redelivery is harmless.
    /// There are no sequence numbers: a `Removed` that overtakes its `New` is a
    /// no-op and the late `New` still inserts. A `Removed` only drops the
    /// indexed record when it comes from the storage node that record names.
    pub async fn run(&self, event: FileEvent) -> ApplyEventOperationOutcome {
        let record = match event {
            FileEvent::Removed(record) => {
                let removed = self.index.write().await.remove(&record);
                return match removed {
                    Some(_) => {
                        tracing::info!("Index removed {}. hash={}", record.name, record.hash);
                        ApplyEventOperationOutcome::Removed
                    }
                    None => ApplyEventOperationOutcome::Unchanged,
                };
            }
            FileEvent::Replay { target, .. } if target != self.local_node_id => {
                return ApplyEventOperationOutcome::NotAddressed;
            }
            FileEvent::New(record) | FileEvent::Replay { record, .. } => record,
        };

        let mut index = self.index.write().await;
        if let Some(existing) = index.get(&record.hash) {
            if existing.storage_node.node_id != record.storage_node.node_id {
                tracing::warn!(
                    "Ignoring {} on {}: content already indexed as {} on {}. hash={}",
                    record.name,
                    record.storage_node,
                    existing.name,
                    existing.storage_node,
                    record.hash
                );
            }
            return ApplyEventOperationOutcome::Unchanged;
        }

        tracing::info!("Index added {}. hash={}", record.name, record.hash);
        index.insert(record);
        ApplyEventOperationOutcome::Inserted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::FileIndex;
    use crate::node::NodeRef;
    use crate::types::FileRecord;

    fn record(hash: &str) -> FileRecord {
        record_on(hash, "fm1")
    }

    fn record_on(hash: &str, node_id: &str) -> FileRecord {
        FileRecord {
            name: format!("{}.txt", hash),
            hash: hash.to_string(),
            storage_node: NodeRef::new(node_id, format!("{}:9000", node_id)),
        }
    }

    #[tokio::test]
    async fn test_new_twice_equals_once() {
        let index = FileIndex::shared();
        let apply = ApplyEventOperation::new(index.clone(), "fe1".to_string());

        assert_eq!(
            apply.run(FileEvent::New(record("h1"))).await,
            ApplyEventOperationOutcome::Inserted
        );
        let once = index.read().await.clone();
        assert_eq!(
            apply.run(FileEvent::New(record("h1"))).await,
            ApplyEventOperationOutcome::Unchanged
        );
        assert_eq!(*index.read().await, once);
    }

    #[tokio::test]
    async fn test_replay_only_applies_to_target() {
        let index = FileIndex::shared();
        let apply = ApplyEventOperation::new(index.clone(), "fe2".to_string());

        let elsewhere = FileEvent::Replay {
            target: "fe3".to_string(),
            record: record("h1"),
        };
        assert_eq!(
            apply.run(elsewhere).await,
            ApplyEventOperationOutcome::NotAddressed
        );
        assert!(index.read().await.is_empty());

        let mine = FileEvent::Replay {
            target: "fe2".to_string(),
            record: record("h1"),
        };
        assert_eq!(apply.run(mine).await, ApplyEventOperationOutcome::Inserted);
    }

    #[tokio::test]
    async fn test_removed_is_idempotent() {
        let index = FileIndex::shared();
        let apply = ApplyEventOperation::new(index.clone(), "fe1".to_string());
        apply.run(FileEvent::New(record("h1"))).await;

        assert_eq!(
            apply.run(FileEvent::Removed(record("h1"))).await,
            ApplyEventOperationOutcome::Removed
        );
        assert_eq!(
            apply.run(FileEvent::Removed(record("h1"))).await,
            ApplyEventOperationOutcome::Unchanged
        );
        assert!(index.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_removed_before_new_leaves_record() {
        let index = FileIndex::shared();
        let apply = ApplyEventOperation::new(index.clone(), "fe1".to_string());

        assert_eq!(
            apply.run(FileEvent::Removed(record("h1"))).await,
            ApplyEventOperationOutcome::Unchanged
        );
        assert_eq!(
            apply.run(FileEvent::New(record("h1"))).await,
            ApplyEventOperationOutcome::Inserted
        );
        assert!(index.read().await.contains_hash("h1"));
    }

    #[tokio::test]
    async fn test_removed_from_other_node_keeps_owner() {
        let index = FileIndex::shared();
        let apply = ApplyEventOperation::new(index.clone(), "fe1".to_string());
        apply.run(FileEvent::New(record_on("h1", "fm1"))).await;

        assert_eq!(
            apply.run(FileEvent::New(record_on("h1", "fm2"))).await,
            ApplyEventOperationOutcome::Unchanged
        );
        assert_eq!(
            apply.run(FileEvent::Removed(record_on("h1", "fm2"))).await,
            ApplyEventOperationOutcome::Unchanged
        );

        let index = index.read().await;
        assert_eq!(index.get("h1").unwrap().storage_node.node_id, "fm1");
    }
}
