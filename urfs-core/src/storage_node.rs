use crate::bus::{DynEventBus, FileEvent, RetryPolicy, publish_with_retry};
use crate::cluster::DynContentLocator;
use crate::codec;
use crate::error::{Result, UrfsError};
use crate::node::NodeRef;
use crate::session::{DownloadSession, FinishedUpload, SessionTable, UploadSession};
use crate::storage::{ObjectIndex, ObjectStore, StoredObject, normalize_object_name};
use crate::types::{FileInfo, FileRecord};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

const OBJECT_INDEX_FILE: &str = ".objects.db";

#[derive(Debug, Clone)]
pub struct StorageNodeOptions {
    pub storage_dir: PathBuf,
    pub max_chunk_bytes: usize,
    pub session_idle_timeout: Duration,
    pub retry: RetryPolicy,
}

impl StorageNodeOptions {
    pub fn new(storage_dir: PathBuf) -> Self {
        Self {
            storage_dir,
            max_chunk_bytes: 1024 * 1024,
            session_idle_timeout: Duration::from_secs(300),
            retry: RetryPolicy::default(),
        }
    }
}

/// What startup recovery found and fixed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryReport {
    pub pending_cleared: usize,
    pub stale_rows_dropped: usize,
    pub objects_indexed: usize,
}

/// A storage node owns the bytes of the files placed on it. It runs transfer
/// sessions, keeps the hash-to-object index in step with the object directory
/// and announces every save and removal on the event bus.
///
/// An object is only kept once its event is on the bus. A save whose `New`
/// cannot be published is rolled back, and a removal whose `Removed` cannot
/// be published leaves the object in place.
pub struct StorageNode {
    node: NodeRef,
    store: ObjectStore,
    index: ObjectIndex,
    sessions: SessionTable,
    bus: Arc<DynEventBus>,
    locator: Option<Arc<DynContentLocator>>,
    commit_lock: Mutex<()>,
    options: StorageNodeOptions,
}

impl StorageNode {
    /// Open the storage directory and run startup recovery.
    pub async fn open(
        node: NodeRef,
        options: StorageNodeOptions,
        bus: Arc<DynEventBus>,
    ) -> Result<Self> {
        let store = ObjectStore::new(options.storage_dir.clone())?;
        let index = ObjectIndex::new(options.storage_dir.join(OBJECT_INDEX_FILE))?;

        let storage_node = Self {
            node,
            store,
            index,
            sessions: SessionTable::new(),
            bus,
            locator: None,
            commit_lock: Mutex::new(()),
            options,
        };

        let report = storage_node.recover().await?;
        tracing::info!(
            "Storage node {} opened at {:?}. pending_cleared={} stale_rows_dropped={} objects_indexed={}",
            storage_node.node,
            storage_node.options.storage_dir,
            report.pending_cleared,
            report.stale_rows_dropped,
            report.objects_indexed
        );

        Ok(storage_node)
    }

    /// Reject uploads whose content is already stored on a peer storage node.
    /// Without a locator, duplicate content is only detected on this node.
    pub fn with_content_locator(mut self, locator: Arc<DynContentLocator>) -> Self {
        self.locator = Some(locator);
        self
    }

    pub fn node_ref(&self) -> &NodeRef {
        &self.node
    }

    pub fn options(&self) -> &StorageNodeOptions {
        &self.options
    }

    async fn recover(&self) -> Result<RecoveryReport> {
        let _guard = self.commit_lock.lock().await;
        let mut report = RecoveryReport {
            pending_cleared: self.store.clear_pending().await?,
            ..RecoveryReport::default()
        };

        let on_disk: HashSet<String> = self.store.list_objects().await?.into_iter().collect();

        let mut indexed_names = HashSet::new();
        for object in self.index.list()? {
            if on_disk.contains(&object.name) {
                indexed_names.insert(object.name);
            } else {
                tracing::warn!(
                    "Dropping index row for missing object. name={} hash={}",
                    object.name,
                    object.hash
                );
                self.index.remove(&object.hash)?;
                report.stale_rows_dropped += 1;
            }
        }

        let mut unindexed: Vec<&String> = on_disk.difference(&indexed_names).collect();
        unindexed.sort();

        for name in unindexed {
            let (hash, size) = self.store.hash_object(name).await?;
            if let Some(existing) = self.index.get_by_hash(&hash)? {
                tracing::warn!(
                    "Object {} duplicates the content of {} and is left unindexed. hash={}",
                    name,
                    existing.name,
                    hash
                );
                continue;
            }

            self.index.insert(&StoredObject {
                hash,
                name: name.clone(),
                size,
                stored_at: chrono::Utc::now(),
            })?;
            report.objects_indexed += 1;
        }

        Ok(report)
    }

    /// Allocate an upload session writing to a fresh pending object. Name
    /// conflicts are the directory node's concern and are not checked here.
    pub async fn create_upload_session(&self, name: &str) -> Result<String> {
        let name = normalize_object_name(name)?;
        let pending = self.store.create_pending().await?;
        let session_id = self
            .sessions
            .insert_upload(UploadSession::new(name.clone(), pending))
            .await;

        tracing::info!("Upload session {} opened for {}", session_id, name);
        Ok(session_id)
    }

    pub async fn upload_send(&self, session_id: &str, chunk: Bytes) -> Result<()> {
        let session = self.sessions.upload(session_id).await?;
        let mut session = session.lock().await;
        session.send(chunk).await
    }

    /// Accept one armored chunk. A malformed chunk is rejected for this call
    /// only and the session stays open.
    pub async fn upload_send_armored(&self, session_id: &str, block: &str) -> Result<()> {
        let session = self.sessions.upload(session_id).await?;
        let chunk = match codec::unarmor(block) {
            Ok(chunk) => chunk,
            Err(error) => {
                tracing::error!("Rejected malformed chunk for session {}: {}", session_id, error);
                return Err(error);
            }
        };

        let mut session = session.lock().await;
        session.send(chunk).await
    }

    /// Finalise an upload: dedup against stored content on this node and its
    /// peers, move the object into place, index it and publish `New`.
    pub async fn upload_save(&self, session_id: &str) -> Result<FileInfo> {
        let session = self.sessions.upload(session_id).await?;
        let mut session = session.lock().await;
        let finished = session.finish().await?;

        if let Err(error) = self.check_peers(&finished).await {
            return self.reject(&mut session, &finished, error).await;
        }

        let _guard = self.commit_lock.lock().await;

        if let Some(existing) = self.index.get_by_hash(&finished.hash)? {
            tracing::warn!(
                "Upload of {} duplicates stored object {}. hash={}",
                finished.name,
                existing.name,
                finished.hash
            );
            let error = UrfsError::FileAlreadyExists(finished.hash.clone());
            return self.reject(&mut session, &finished, error).await;
        }
        if self.index.get_by_name(&finished.name)?.is_some() {
            let error = UrfsError::FileNameInUse(finished.name.clone());
            return self.reject(&mut session, &finished, error).await;
        }

        if let Err(error) = self
            .store
            .commit_pending(&finished.pending_id, &finished.name)
            .await
        {
            return self.reject(&mut session, &finished, error).await;
        }

        let stored = StoredObject {
            hash: finished.hash.clone(),
            name: finished.name.clone(),
            size: finished.size,
            stored_at: chrono::Utc::now(),
        };
        if let Err(error) = self.index.insert(&stored) {
            session.mark_failed();
            self.store.delete_object(&finished.name).await?;
            return Err(error);
        }

        let record = FileRecord {
            name: finished.name,
            hash: finished.hash,
            storage_node: self.node.clone(),
        };
        if let Err(error) = publish_with_retry(
            self.bus.as_ref(),
            &FileEvent::New(record.clone()),
            &self.options.retry,
        )
        .await
        {
            session.mark_failed();
            self.undo_commit(&stored).await;
            return Err(error);
        }

        tracing::info!(
            "Saved {} ({} bytes). hash={}",
            record.name,
            stored.size,
            record.hash
        );
        Ok(record.info())
    }

    async fn check_peers(&self, finished: &FinishedUpload) -> Result<()> {
        let Some(locator) = &self.locator else {
            return Ok(());
        };

        match locator.locate(&finished.hash, &self.node).await? {
            Some(peer) => {
                tracing::warn!(
                    "Upload of {} duplicates content stored on {}. hash={}",
                    finished.name,
                    peer,
                    finished.hash
                );
                Err(UrfsError::FileAlreadyExists(finished.hash.clone()))
            }
            None => Ok(()),
        }
    }

    async fn reject(
        &self,
        session: &mut UploadSession,
        finished: &FinishedUpload,
        error: UrfsError,
    ) -> Result<FileInfo> {
        session.mark_failed();
        self.store.discard_pending(&finished.pending_id).await?;
        Err(error)
    }

    /// Take back a commit whose `New` never reached the bus, so the same
    /// upload can be retried.
    async fn undo_commit(&self, object: &StoredObject) {
        tracing::warn!(
            "Rolling back {} after failing to publish it. hash={}",
            object.name,
            object.hash
        );
        if let Err(error) = self.index.remove(&object.hash) {
            tracing::error!("Failed to drop index row of {}: {}", object.name, error);
        }
        if let Err(error) = self.store.delete_object(&object.name).await {
            tracing::error!("Failed to delete {}: {}", object.name, error);
        }
    }

    /// Release a session. Unsaved uploads lose their pending object. Calling
    /// this on an unknown or already destroyed session is a no-op.
    pub async fn destroy_session(&self, session_id: &str) -> bool {
        let removed = self.sessions.remove(session_id).await;
        if removed {
            tracing::debug!("Session {} destroyed", session_id);
        }
        removed
    }

    pub async fn create_download_session(&self, hash: &str) -> Result<String> {
        let object = self
            .index
            .get_by_hash(hash)?
            .ok_or_else(|| UrfsError::FileNotFound(hash.to_string()))?;
        let file = self.store.open_object(&object.name).await?;

        let session_id = self
            .sessions
            .insert_download(DownloadSession::new(object.name.clone(), object.hash, file))
            .await;

        tracing::info!("Download session {} opened for {}", session_id, object.name);
        Ok(session_id)
    }

    /// Read up to `size` bytes. A short read marks the end of the object.
    pub async fn download_recv(&self, session_id: &str, size: usize) -> Result<Bytes> {
        if size == 0 {
            return Err(UrfsError::InvalidRequest(
                "read size must be positive".to_string(),
            ));
        }
        if size > self.options.max_chunk_bytes {
            return Err(UrfsError::InvalidRequest(format!(
                "read size {} exceeds limit {}",
                size, self.options.max_chunk_bytes
            )));
        }

        let session = self.sessions.download(session_id).await?;
        let mut session = session.lock().await;
        let chunk = session.recv(size).await?;
        if chunk.len() < size {
            tracing::info!(
                "Download of {} complete ({} bytes). hash={}",
                session.name(),
                session.bytes_sent(),
                session.hash()
            );
        }
        Ok(chunk)
    }

    pub fn holds_object(&self, hash: &str) -> Result<bool> {
        Ok(self.index.get_by_hash(hash)?.is_some())
    }

    /// Publish `Removed` for the object with this hash, then delete it. If
    /// the event cannot be published the object stays stored and listed.
    pub async fn remove_file(&self, hash: &str) -> Result<FileRecord> {
        let _guard = self.commit_lock.lock().await;
        let object = self
            .index
            .get_by_hash(hash)?
            .ok_or_else(|| UrfsError::FileNotFound(hash.to_string()))?;

        let record = FileRecord {
            name: object.name.clone(),
            hash: object.hash.clone(),
            storage_node: self.node.clone(),
        };
        publish_with_retry(
            self.bus.as_ref(),
            &FileEvent::Removed(record.clone()),
            &self.options.retry,
        )
        .await?;

        if !self.store.delete_object(&object.name).await? {
            tracing::warn!("Object {} was already gone from disk", object.name);
        }
        self.index.remove(hash)?;

        tracing::info!("Removed {}. hash={}", object.name, object.hash);
        Ok(record)
    }

    pub fn list_objects(&self) -> Result<Vec<StoredObject>> {
        self.index.list()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.len().await
    }

    pub async fn reap_idle_sessions(&self) -> usize {
        let reaped = self
            .sessions
            .reap_idle(self.options.session_idle_timeout)
            .await;
        for session_id in &reaped {
            tracing::info!("Reaped idle session {}", session_id);
        }
        reaped.len()
    }

    /// Periodically reap idle sessions until the returned handle is aborted.
    pub fn spawn_session_reaper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let node = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                node.reap_idle_sessions().await;
            }
        })
    }
}
