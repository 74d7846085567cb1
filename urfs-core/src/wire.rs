//! Request and response bodies shared by the HTTP server and the HTTP clients.

use crate::bus::FileEvent;
use crate::directory_node::ReplicaState;
use crate::error::UrfsError;
use crate::node::{NodeRef, NodeRole};
use serde::{Deserialize, Serialize};

pub const CONTENT_TYPE_OCTET_STREAM: &str = "application/octet-stream";
pub const CONTENT_TYPE_ARMORED: &str = "text/plain";
pub const CONTENT_TYPE_FRAMED: &str = "application/x-urfs-frames";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: String,
    pub detail: String,
}

impl ErrorResponse {
    pub fn into_error(self) -> UrfsError {
        UrfsError::from_remote(&self.kind, self.detail)
    }
}

impl From<&UrfsError> for ErrorResponse {
    fn from(error: &UrfsError) -> Self {
        Self {
            error: error.to_string(),
            kind: error.kind().to_string(),
            detail: error.detail(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub node_id: String,
    pub role: NodeRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replica_state: Option<ReplicaState>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadRequest {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadRequest {
    pub hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCreatedResponse {
    pub session_id: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkEncoding {
    #[default]
    Raw,
    Armored,
    Framed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadChunkQuery {
    pub size: usize,
    #[serde(default)]
    pub encoding: ChunkEncoding,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnounceRequest {
    pub node: NodeRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicaEventsRequest {
    pub events: Vec<FileEvent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicaEventsResponse {
    pub applied: usize,
}
