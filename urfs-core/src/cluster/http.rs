use super::{DirectoryService, ReplicaPeer, StorageClient};
use crate::bus::FileEvent;
use crate::codec;
use crate::error::{Result, UrfsError};
use crate::node::NodeRef;
use crate::types::{FileInfo, FileRecord, SessionHandle, SessionKind};
use crate::wire::{
    AnnounceRequest, CONTENT_TYPE_ARMORED, CONTENT_TYPE_FRAMED, CONTENT_TYPE_OCTET_STREAM,
    ChunkEncoding, DownloadRequest, ErrorResponse, ReplicaEventsRequest, ReplicaEventsResponse,
    SessionCreatedResponse, UploadRequest,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

fn build_client() -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?)
}

/// Pass successful responses through; turn error bodies back into typed
/// errors.
async fn check_response(response: reqwest::Response) -> Result<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ErrorResponse>(&body) {
        Ok(error) => Err(error.into_error()),
        Err(_) => Err(UrfsError::Http(format!(
            "remote returned non-success status {}: {}",
            status, body
        ))),
    }
}

/// Storage client speaking to storage nodes over HTTP.
#[derive(Clone)]
pub struct HttpStorageClient {
    client: reqwest::Client,
    encoding: ChunkEncoding,
}

impl HttpStorageClient {
    pub fn new() -> Result<Self> {
        Self::with_encoding(ChunkEncoding::Raw)
    }

    /// Use `encoding` for chunk bodies in both directions.
    pub fn with_encoding(encoding: ChunkEncoding) -> Result<Self> {
        Ok(Self {
            client: build_client()?,
            encoding,
        })
    }

    fn session_url(session: &SessionHandle, suffix: &str) -> String {
        format!(
            "{}/sessions/{}{}",
            session.node.base_url(),
            session.session_id,
            suffix
        )
    }

    async fn create_session<Request: serde::Serialize + Sync>(
        &self,
        node: &NodeRef,
        kind: SessionKind,
        payload: &Request,
    ) -> Result<SessionHandle> {
        let path = match kind {
            SessionKind::Upload => "uploads",
            SessionKind::Download => "downloads",
        };
        let url = format!("{}/{}", node.base_url(), path);
        let response = self.client.post(url).json(payload).send().await?;
        let created: SessionCreatedResponse = check_response(response).await?.json().await?;

        Ok(SessionHandle {
            session_id: created.session_id,
            kind,
            node: node.clone(),
        })
    }
}

#[async_trait]
impl StorageClient for HttpStorageClient {
    async fn create_upload_session(&self, node: &NodeRef, name: &str) -> Result<SessionHandle> {
        let payload = UploadRequest {
            name: name.to_string(),
        };
        self.create_session(node, SessionKind::Upload, &payload)
            .await
    }

    async fn create_download_session(&self, node: &NodeRef, hash: &str) -> Result<SessionHandle> {
        let payload = DownloadRequest {
            hash: hash.to_string(),
        };
        self.create_session(node, SessionKind::Download, &payload)
            .await
    }

    async fn remove_file(&self, node: &NodeRef, hash: &str) -> Result<()> {
        let url = format!("{}/objects/{}", node.base_url(), hash);
        let response = self.client.delete(url).send().await?;
        check_response(response).await?;
        Ok(())
    }

    async fn holds_object(&self, node: &NodeRef, hash: &str) -> Result<bool> {
        let url = format!("{}/objects/{}", node.base_url(), hash);
        let response = self.client.head(url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(false);
        }
        check_response(response).await?;
        Ok(true)
    }

    async fn send_chunk(&self, session: &SessionHandle, chunk: Bytes) -> Result<()> {
        let (content_type, body) = match self.encoding {
            ChunkEncoding::Raw => (CONTENT_TYPE_OCTET_STREAM, chunk),
            ChunkEncoding::Armored => (CONTENT_TYPE_ARMORED, Bytes::from(codec::armor(&chunk))),
            ChunkEncoding::Framed => (CONTENT_TYPE_FRAMED, codec::encode_frame(&chunk)?),
        };

        let response = self
            .client
            .put(Self::session_url(session, "/chunks"))
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(body)
            .send()
            .await?;
        check_response(response).await?;
        Ok(())
    }

    async fn finish_upload(&self, session: &SessionHandle) -> Result<FileInfo> {
        let response = self
            .client
            .post(Self::session_url(session, "/finish"))
            .send()
            .await?;
        Ok(check_response(response).await?.json().await?)
    }

    async fn read_chunk(&self, session: &SessionHandle, size: usize) -> Result<Bytes> {
        let encoding = match self.encoding {
            ChunkEncoding::Raw => "raw",
            ChunkEncoding::Armored => "armored",
            ChunkEncoding::Framed => "framed",
        };
        let response = self
            .client
            .get(Self::session_url(session, "/chunks"))
            .query(&[("size", size.to_string()), ("encoding", encoding.to_string())])
            .send()
            .await?;
        let body = check_response(response).await?.bytes().await?;

        match self.encoding {
            ChunkEncoding::Raw => Ok(body),
            ChunkEncoding::Armored => {
                let text = std::str::from_utf8(&body)
                    .map_err(|error| UrfsError::InvalidChunk(error.to_string()))?;
                codec::unarmor(text)
            }
            ChunkEncoding::Framed => {
                let mut body = body;
                codec::decode_frame(&mut body)
                    .ok_or_else(|| UrfsError::InvalidChunk("truncated frame".to_string()))
            }
        }
    }

    async fn close_session(&self, session: &SessionHandle) -> Result<()> {
        let response = self
            .client
            .delete(Self::session_url(session, ""))
            .send()
            .await?;
        check_response(response).await?;
        Ok(())
    }
}

/// Client for a remote directory node.
#[derive(Clone)]
pub struct HttpDirectoryClient {
    client: reqwest::Client,
    directory: NodeRef,
}

impl HttpDirectoryClient {
    pub fn new(directory: NodeRef) -> Result<Self> {
        Ok(Self {
            client: build_client()?,
            directory,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.directory.base_url(), path)
    }
}

#[async_trait]
impl DirectoryService for HttpDirectoryClient {
    async fn list_files(&self) -> Result<Vec<FileInfo>> {
        let response = self.client.get(self.url("/files")).send().await?;
        Ok(check_response(response).await?.json().await?)
    }

    async fn begin_upload(&self, name: &str) -> Result<SessionHandle> {
        let payload = UploadRequest {
            name: name.to_string(),
        };
        let response = self
            .client
            .post(self.url("/uploads"))
            .json(&payload)
            .send()
            .await?;
        Ok(check_response(response).await?.json().await?)
    }

    async fn begin_download(&self, hash: &str) -> Result<SessionHandle> {
        let payload = DownloadRequest {
            hash: hash.to_string(),
        };
        let response = self
            .client
            .post(self.url("/downloads"))
            .json(&payload)
            .send()
            .await?;
        Ok(check_response(response).await?.json().await?)
    }

    async fn remove(&self, hash: &str) -> Result<()> {
        let response = self
            .client
            .delete(self.url(&format!("/files/{}", hash)))
            .send()
            .await?;
        check_response(response).await?;
        Ok(())
    }

    async fn announce_replica(&self, replica: &NodeRef) -> Result<()> {
        let payload = AnnounceRequest {
            node: replica.clone(),
        };
        let response = self
            .client
            .post(self.url("/internal/replica/announce"))
            .json(&payload)
            .send()
            .await?;
        check_response(response).await?;
        Ok(())
    }
}

/// Replays records straight to the joining replica's internal endpoint.
#[derive(Clone)]
pub struct HttpReplicaPeer {
    client: reqwest::Client,
}

impl HttpReplicaPeer {
    pub fn new() -> Result<Self> {
        Ok(Self {
            client: build_client()?,
        })
    }
}

#[async_trait]
impl ReplicaPeer for HttpReplicaPeer {
    async fn replay(&self, target: &NodeRef, records: &[FileRecord]) -> Result<()> {
        let payload = ReplicaEventsRequest {
            events: records
                .iter()
                .map(|record| FileEvent::Replay {
                    target: target.node_id.clone(),
                    record: record.clone(),
                })
                .collect(),
        };

        let url = format!("{}/internal/replica/events", target.base_url());
        let response = self.client.post(url).json(&payload).send().await?;
        let applied: ReplicaEventsResponse = check_response(response).await?.json().await?;
        tracing::debug!(
            "Replica {} applied {} of {} replayed records",
            target,
            applied.applied,
            records.len()
        );
        Ok(())
    }
}
