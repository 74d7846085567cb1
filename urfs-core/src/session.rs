//! Upload and download sessions owned by a storage node.
//!
//! A session is released on every exit path: an explicit `destroy`, the idle
//! reaper, or simply being dropped. Dropping an unsaved upload removes its
//! pending object.

use crate::error::{Result, UrfsError};
use crate::storage::{ContentHasher, PendingObject};
use bytes::{Bytes, BytesMut};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncReadExt;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    Open,
    Saved,
    Failed,
}

pub struct UploadSession {
    name: String,
    pending: Option<PendingObject>,
    hasher: ContentHasher,
    state: UploadState,
    last_active: Instant,
}

/// What a finished upload hands over to be committed.
pub struct FinishedUpload {
    pub name: String,
    pub pending_id: String,
    pub hash: String,
    pub size: u64,
}

impl UploadSession {
    pub fn new(name: String, pending: PendingObject) -> Self {
        Self {
            name,
            pending: Some(pending),
            hasher: ContentHasher::new(),
            state: UploadState::Open,
            last_active: Instant::now(),
        }
    }

    pub fn state(&self) -> UploadState {
        self.state
    }

    /// Append decoded chunk bytes and feed them to the running hash.
    pub async fn send(&mut self, chunk: Bytes) -> Result<()> {
        self.last_active = Instant::now();
        let pending = self.open_pending()?;
        pending.append(&chunk).await?;
        self.hasher.update(&chunk);
        tracing::debug!("Received {} bytes for {}", chunk.len(), self.name);
        Ok(())
    }

    /// Flush the pending object and finalise the hash. The pending object is
    /// handed to the caller, who must commit or discard it.
    pub async fn finish(&mut self) -> Result<FinishedUpload> {
        self.last_active = Instant::now();
        self.open_pending()?;
        let mut pending = self
            .pending
            .take()
            .ok_or_else(|| UrfsError::Internal("pending object missing".to_string()))?;

        if let Err(error) = pending.flush().await {
            self.state = UploadState::Failed;
            discard_sync(&pending.path);
            return Err(error);
        }

        let (hash, size) = std::mem::take(&mut self.hasher).finalize();
        self.state = UploadState::Saved;

        Ok(FinishedUpload {
            name: self.name.clone(),
            pending_id: pending.pending_id,
            hash,
            size,
        })
    }

    pub fn mark_failed(&mut self) {
        self.state = UploadState::Failed;
    }

    fn open_pending(&mut self) -> Result<&mut PendingObject> {
        if self.state != UploadState::Open {
            return Err(UrfsError::InvalidRequest(format!(
                "upload session for {} is already finalized",
                self.name
            )));
        }
        self.pending
            .as_mut()
            .ok_or_else(|| UrfsError::Internal("pending object missing".to_string()))
    }
}

impl Drop for UploadSession {
    fn drop(&mut self) {
        if let Some(pending) = self.pending.take() {
            tracing::debug!("Discarding unsaved upload of {}", self.name);
            discard_sync(&pending.path);
        }
    }
}

fn discard_sync(path: &Path) {
    if let Err(error) = std::fs::remove_file(path) {
        if error.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!("Failed to remove pending object {:?}: {}", path, error);
        }
    }
}

pub struct DownloadSession {
    name: String,
    hash: String,
    file: fs::File,
    sent: u64,
    last_active: Instant,
}

impl DownloadSession {
    pub fn new(name: String, hash: String, file: fs::File) -> Self {
        Self {
            name,
            hash,
            file,
            sent: 0,
            last_active: Instant::now(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Read up to `size` bytes. Only the read that reaches end of file returns
    /// fewer than `size` bytes, so a short (possibly empty) chunk marks the end
    /// of the stream.
    pub async fn recv(&mut self, size: usize) -> Result<Bytes> {
        self.last_active = Instant::now();
        let mut buf = BytesMut::zeroed(size);
        let mut filled = 0;

        while filled < size {
            let read = self.file.read(&mut buf[filled..]).await?;
            if read == 0 {
                break;
            }
            filled += read;
        }

        buf.truncate(filled);
        self.sent += filled as u64;
        tracing::debug!("Sending {} bytes of {}", filled, self.name);
        Ok(buf.freeze())
    }

    pub fn bytes_sent(&self) -> u64 {
        self.sent
    }
}

#[derive(Clone)]
enum SessionSlot {
    Upload(Arc<Mutex<UploadSession>>),
    Download(Arc<Mutex<DownloadSession>>),
}

/// Live sessions of one storage node, keyed by session id.
#[derive(Default)]
pub struct SessionTable {
    sessions: RwLock<HashMap<String, SessionSlot>>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_upload(&self, session: UploadSession) -> String {
        let id = ulid::Ulid::new().to_string();
        self.sessions
            .write()
            .await
            .insert(id.clone(), SessionSlot::Upload(Arc::new(Mutex::new(session))));
        id
    }

    pub async fn insert_download(&self, session: DownloadSession) -> String {
        let id = ulid::Ulid::new().to_string();
        self.sessions
            .write()
            .await
            .insert(id.clone(), SessionSlot::Download(Arc::new(Mutex::new(session))));
        id
    }

    pub async fn upload(&self, session_id: &str) -> Result<Arc<Mutex<UploadSession>>> {
        match self.sessions.read().await.get(session_id) {
            Some(SessionSlot::Upload(session)) => Ok(session.clone()),
            Some(SessionSlot::Download(_)) => Err(UrfsError::InvalidRequest(format!(
                "session {} is not an upload session",
                session_id
            ))),
            None => Err(UrfsError::SessionNotFound(session_id.to_string())),
        }
    }

    pub async fn download(&self, session_id: &str) -> Result<Arc<Mutex<DownloadSession>>> {
        match self.sessions.read().await.get(session_id) {
            Some(SessionSlot::Download(session)) => Ok(session.clone()),
            Some(SessionSlot::Upload(_)) => Err(UrfsError::InvalidRequest(format!(
                "session {} is not a download session",
                session_id
            ))),
            None => Err(UrfsError::SessionNotFound(session_id.to_string())),
        }
    }

    /// Forget a session. Returns false if it was already gone. Resources are
    /// released once the last in-flight call holding it returns.
    pub async fn remove(&self, session_id: &str) -> bool {
        self.sessions.write().await.remove(session_id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Drop sessions idle for longer than `timeout`. Sessions busy with a
    /// transfer right now are skipped.
    pub async fn reap_idle(&self, timeout: Duration) -> Vec<String> {
        let now = Instant::now();
        let mut sessions = self.sessions.write().await;

        let expired: Vec<String> = sessions
            .iter()
            .filter_map(|(id, slot)| {
                let last_active = match slot {
                    SessionSlot::Upload(session) => session.try_lock().ok()?.last_active,
                    SessionSlot::Download(session) => session.try_lock().ok()?.last_active,
                };
                (now.duration_since(last_active) > timeout).then(|| id.clone())
            })
            .collect();

        for id in &expired {
            sessions.remove(id);
        }

        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{ObjectStore, compute_hash};

    #[tokio::test]
    async fn test_upload_finish_hashes_all_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::new(dir.path().to_path_buf()).unwrap();
        let mut session = UploadSession::new("a.txt".to_string(), store.create_pending().await.unwrap());

        session.send(Bytes::from("hello ")).await.unwrap();
        session.send(Bytes::from("world")).await.unwrap();
        let finished = session.finish().await.unwrap();

        assert_eq!(finished.hash, compute_hash(b"hello world"));
        assert_eq!(finished.size, 11);
        assert_eq!(session.state(), UploadState::Saved);
        assert!(store.pending_path(&finished.pending_id).exists());

        let again = session.send(Bytes::from("late")).await;
        assert!(matches!(again, Err(UrfsError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_dropping_unsaved_upload_removes_pending() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::new(dir.path().to_path_buf()).unwrap();
        let pending = store.create_pending().await.unwrap();
        let path = pending.path.clone();

        let mut session = UploadSession::new("a.txt".to_string(), pending);
        session.send(Bytes::from("partial")).await.unwrap();
        assert!(path.exists());

        drop(session);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_download_short_read_marks_end() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob");
        std::fs::write(&path, vec![7u8; 10]).unwrap();

        let file = fs::File::open(&path).await.unwrap();
        let mut session = DownloadSession::new("blob".to_string(), "h".to_string(), file);

        assert_eq!(session.recv(4).await.unwrap().len(), 4);
        assert_eq!(session.recv(4).await.unwrap().len(), 4);
        assert_eq!(session.recv(4).await.unwrap().len(), 2);
        assert_eq!(session.bytes_sent(), 10);
    }

    #[tokio::test]
    async fn test_download_exact_multiple_ends_with_empty_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob");
        std::fs::write(&path, vec![1u8; 8]).unwrap();

        let file = fs::File::open(&path).await.unwrap();
        let mut session = DownloadSession::new("blob".to_string(), "h".to_string(), file);

        assert_eq!(session.recv(4).await.unwrap().len(), 4);
        assert_eq!(session.recv(4).await.unwrap().len(), 4);
        assert!(session.recv(4).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_session_table_kinds_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::new(dir.path().to_path_buf()).unwrap();
        let table = SessionTable::new();

        let id = table
            .insert_upload(UploadSession::new(
                "a.txt".to_string(),
                store.create_pending().await.unwrap(),
            ))
            .await;

        assert!(table.upload(&id).await.is_ok());
        assert!(matches!(table.download(&id).await, Err(UrfsError::InvalidRequest(_))));
        assert!(table.remove(&id).await);
        assert!(!table.remove(&id).await);
        assert!(matches!(table.upload(&id).await, Err(UrfsError::SessionNotFound(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reap_idle_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::new(dir.path().to_path_buf()).unwrap();
        let table = SessionTable::new();

        let pending = store.create_pending().await.unwrap();
        let pending_path = pending.path.clone();
        let idle = table
            .insert_upload(UploadSession::new("idle.txt".to_string(), pending))
            .await;

        tokio::time::advance(Duration::from_secs(30)).await;
        let fresh = table
            .insert_upload(UploadSession::new(
                "fresh.txt".to_string(),
                store.create_pending().await.unwrap(),
            ))
            .await;

        let reaped = table.reap_idle(Duration::from_secs(20)).await;
        assert_eq!(reaped, vec![idle]);
        assert!(table.upload(&fresh).await.is_ok());
        assert!(!pending_path.exists());
    }
}
