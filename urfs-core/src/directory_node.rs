//! Directory replica.
//!
//! A directory node serves client directory calls from its own index replica
//! and keeps that replica converged with its peers:
//!
//! - on start it subscribes to file-updates and frontend-updates, then
//!   announces itself (`Joining` -> `CatchingUp`);
//! - every other replica answers the announcement by replaying its index to
//!   the newcomer;
//! - once no replay has arrived for the quiet period the replica is `Synced`.
//!
//! Index mutations only ever come from bus events; client calls never write
//! the index directly.

use crate::bus::{DynEventBus, FileEvent, Subscription};
use crate::cluster::{DirectoryService, DynReplicaPeer, DynStorageClient};
use crate::error::Result;
use crate::index::{FileIndex, SharedIndex};
use crate::node::NodeRef;
use crate::operations::{
    ApplyEventOperation, ApplyEventOperationOutcome, BeginDownloadOperation,
    BeginDownloadOperationRequest, BeginUploadOperation, BeginUploadOperationRequest,
    CatchUpOperation, CatchUpOperationRequest, ListFilesOperation, RemoveFileOperation,
    RemoveFileOperationRequest,
};
use crate::registry::DynRegistry;
use crate::types::{FileInfo, SessionHandle};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicaState {
    Joining,
    CatchingUp,
    Synced,
}

#[derive(Debug, Clone)]
pub struct DirectoryNodeOptions {
    pub default_storage_node: Option<NodeRef>,
    pub catch_up_batch_size: usize,
    pub catch_up_quiet_period: Duration,
}

impl Default for DirectoryNodeOptions {
    fn default() -> Self {
        Self {
            default_storage_node: None,
            catch_up_batch_size: 64,
            catch_up_quiet_period: Duration::from_secs(2),
        }
    }
}

/// Collaborators a directory node is wired to.
pub struct DirectoryNodeDeps {
    pub bus: Arc<DynEventBus>,
    pub registry: Arc<DynRegistry>,
    pub storage: Arc<DynStorageClient>,
    pub peer: Arc<DynReplicaPeer>,
}

pub struct DirectoryNode {
    node: NodeRef,
    index: SharedIndex,
    bus: Arc<DynEventBus>,
    options: DirectoryNodeOptions,
    state: watch::Sender<ReplicaState>,
    last_replay: Mutex<Instant>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    catch_ups: Mutex<Vec<JoinHandle<()>>>,
    list_files_operation: ListFilesOperation,
    begin_upload_operation: BeginUploadOperation,
    begin_download_operation: BeginDownloadOperation,
    remove_file_operation: RemoveFileOperation,
    apply_event_operation: ApplyEventOperation,
    catch_up_operation: CatchUpOperation,
}

impl DirectoryNode {
    pub fn new(node: NodeRef, deps: DirectoryNodeDeps, options: DirectoryNodeOptions) -> Self {
        let index = FileIndex::shared();
        let (state, _) = watch::channel(ReplicaState::Joining);

        Self {
            list_files_operation: ListFilesOperation::new(index.clone()),
            begin_upload_operation: BeginUploadOperation::new(
                index.clone(),
                deps.registry,
                deps.storage.clone(),
                options.default_storage_node.clone(),
            ),
            begin_download_operation: BeginDownloadOperation::new(
                index.clone(),
                deps.storage.clone(),
            ),
            remove_file_operation: RemoveFileOperation::new(index.clone(), deps.storage),
            apply_event_operation: ApplyEventOperation::new(index.clone(), node.node_id.clone()),
            catch_up_operation: CatchUpOperation::new(
                index.clone(),
                deps.peer,
                options.catch_up_batch_size,
            ),
            node,
            index,
            bus: deps.bus,
            options,
            state,
            last_replay: Mutex::new(Instant::now()),
            tasks: Mutex::new(Vec::new()),
            catch_ups: Mutex::new(Vec::new()),
        }
    }

    pub fn node_ref(&self) -> &NodeRef {
        &self.node
    }

    pub fn state(&self) -> ReplicaState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ReplicaState> {
        self.state.subscribe()
    }

    pub fn index(&self) -> SharedIndex {
        self.index.clone()
    }

    /// Subscribe to both topics and announce this replica. Failing to reach
    /// the bus here is fatal for the caller.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let events = self.bus.subscribe_file_events().await?;
        let announcements = self.bus.subscribe_announcements().await?;

        let mut tasks = self.tasks.lock().await;
        tasks.push(self.spawn_event_loop(events));
        tasks.push(self.spawn_announcement_loop(announcements));

        *self.last_replay.lock().await = Instant::now();
        self.bus.announce_replica(&self.node).await?;
        self.state.send_replace(ReplicaState::CatchingUp);
        tracing::info!("Directory replica {} announced, catching up", self.node);

        tasks.push(self.spawn_sync_watcher());
        Ok(())
    }

    fn spawn_event_loop(self: &Arc<Self>, mut events: Subscription<FileEvent>) -> JoinHandle<()> {
        let node = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                node.apply_event(event).await;
            }
            tracing::warn!("File-updates subscription of {} closed", node.node);
        })
    }

    fn spawn_announcement_loop(
        self: &Arc<Self>,
        mut announcements: Subscription<NodeRef>,
    ) -> JoinHandle<()> {
        let node = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(replica) = announcements.recv().await {
                node.handle_announcement(replica).await;
            }
            tracing::warn!("Frontend-updates subscription of {} closed", node.node);
        })
    }

    fn spawn_sync_watcher(self: &Arc<Self>) -> JoinHandle<()> {
        let node = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let deadline = *node.last_replay.lock().await + node.options.catch_up_quiet_period;
                if Instant::now() >= deadline {
                    break;
                }
                tokio::time::sleep_until(deadline).await;
            }
            node.state.send_replace(ReplicaState::Synced);
            tracing::info!(
                "Directory replica {} synced with {} files",
                node.node,
                node.index.read().await.len()
            );
        })
    }

    /// Apply one event from the bus or from a peer's direct replay.
    pub async fn apply_event(&self, event: FileEvent) -> ApplyEventOperationOutcome {
        let addressed_replay = matches!(
            &event,
            FileEvent::Replay { target, .. } if *target == self.node.node_id
        );
        if addressed_replay {
            *self.last_replay.lock().await = Instant::now();
        }

        self.apply_event_operation.run(event).await
    }

    /// Returns how many events changed the index.
    pub async fn apply_events(&self, events: Vec<FileEvent>) -> usize {
        let mut applied = 0;
        for event in events {
            match self.apply_event(event).await {
                ApplyEventOperationOutcome::Inserted | ApplyEventOperationOutcome::Removed => {
                    applied += 1
                }
                ApplyEventOperationOutcome::Unchanged
                | ApplyEventOperationOutcome::NotAddressed => {}
            }
        }
        applied
    }

    /// Start replaying the local index to a newly announced replica.
    pub async fn handle_announcement(&self, replica: NodeRef) {
        if replica.node_id == self.node.node_id {
            return;
        }

        tracing::info!("Replica {} announced, replaying index to it", replica);
        let operation = self.catch_up_operation.clone();
        let handle = tokio::spawn(async move {
            let request = CatchUpOperationRequest {
                target: replica.clone(),
            };
            if let Err(error) = operation.run(request).await {
                tracing::error!("Catch-up of replica {} failed: {}", replica, error);
            }
        });

        let mut catch_ups = self.catch_ups.lock().await;
        catch_ups.retain(|handle| !handle.is_finished());
        catch_ups.push(handle);
    }

    /// Drop both subscriptions and stop any catch-up in flight. Nothing is
    /// announced to peers.
    pub async fn shutdown(&self) {
        for handle in self.tasks.lock().await.drain(..) {
            handle.abort();
        }
        for handle in self.catch_ups.lock().await.drain(..) {
            handle.abort();
        }
        tracing::info!("Directory replica {} stopped", self.node);
    }
}

#[async_trait]
impl DirectoryService for DirectoryNode {
    async fn list_files(&self) -> Result<Vec<FileInfo>> {
        self.list_files_operation.run().await
    }

    async fn begin_upload(&self, name: &str) -> Result<SessionHandle> {
        self.begin_upload_operation
            .run(BeginUploadOperationRequest {
                name: name.to_string(),
            })
            .await
    }

    async fn begin_download(&self, hash: &str) -> Result<SessionHandle> {
        self.begin_download_operation
            .run(BeginDownloadOperationRequest {
                hash: hash.to_string(),
            })
            .await
    }

    async fn remove(&self, hash: &str) -> Result<()> {
        self.remove_file_operation
            .run(RemoveFileOperationRequest {
                hash: hash.to_string(),
            })
            .await
    }
    async fn announce_replica(&self, replica: &NodeRef) -> Result<()> {
        self.handle_announcement(replica.clone()).await;
        Ok(())
    }
}
