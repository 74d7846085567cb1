use crate::node::NodeRef;
use serde::{Deserialize, Serialize};

/// Client-visible description of a stored file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileInfo {
    pub name: String,
    pub hash: String,
}

/// An index entry. Identity is the content hash; the name is informational.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub name: String,
    pub hash: String,
    pub storage_node: NodeRef,
}

impl FileRecord {
    pub fn new(info: FileInfo, storage_node: NodeRef) -> Self {
        Self {
            name: info.name,
            hash: info.hash,
            storage_node,
        }
    }

    pub fn info(&self) -> FileInfo {
        FileInfo {
            name: self.name.clone(),
            hash: self.hash.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    Upload,
    Download,
}

/// Reference to a transfer session living on a storage node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionHandle {
    pub session_id: String,
    pub kind: SessionKind,
    pub node: NodeRef,
}
