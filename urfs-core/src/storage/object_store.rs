use crate::error::{Result, UrfsError};
use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

const PENDING_DIR: &str = ".pending";
const HASH_READ_BUF: usize = 64 * 1024;

/// ObjectStore keeps one file per uploaded object, named after the client
/// filename, in a single flat directory: `{base}/{name}`.
/// Uploads in flight live in `{base}/.pending/{ulid}` until committed.
pub struct ObjectStore {
    base_path: PathBuf,
}

/// An object being written by an upload session.
pub struct PendingObject {
    pub pending_id: String,
    pub path: PathBuf,
    pub file: fs::File,
}

impl ObjectStore {
    pub fn new(base_path: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(base_path.join(PENDING_DIR))?;
        Ok(Self { base_path })
    }

    pub fn object_path(&self, name: &str) -> Result<PathBuf> {
        Ok(self.base_path.join(normalize_object_name(name)?))
    }

    pub fn pending_path(&self, pending_id: &str) -> PathBuf {
        self.base_path.join(PENDING_DIR).join(pending_id)
    }

    pub async fn create_pending(&self) -> Result<PendingObject> {
        let pending_id = ulid::Ulid::new().to_string();
        let path = self.pending_path(&pending_id);
        let file = fs::File::create(&path).await?;
        Ok(PendingObject {
            pending_id,
            path,
            file,
        })
    }

    /// Move a pending object to its final name. Fails with `FileNameInUse`
    /// if an object with that name is already stored.
    pub async fn commit_pending(&self, pending_id: &str, name: &str) -> Result<PathBuf> {
        let target = self.object_path(name)?;
        if fs::try_exists(&target).await? {
            return Err(UrfsError::FileNameInUse(name.to_string()));
        }

        fs::rename(self.pending_path(pending_id), &target).await?;
        tracing::debug!("Committed pending object {} as {:?}", pending_id, target);
        Ok(target)
    }

    pub async fn discard_pending(&self, pending_id: &str) -> Result<()> {
        let path = self.pending_path(pending_id);
        if fs::try_exists(&path).await? {
            fs::remove_file(&path).await?;
        }
        Ok(())
    }

    /// Remove every pending object. Returns how many were removed.
    pub async fn clear_pending(&self) -> Result<usize> {
        let mut removed = 0;
        let mut entries = fs::read_dir(self.base_path.join(PENDING_DIR)).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                fs::remove_file(entry.path()).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub async fn open_object(&self, name: &str) -> Result<fs::File> {
        let path = self.object_path(name)?;
        match fs::File::open(&path).await {
            Ok(file) => Ok(file),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                Err(UrfsError::FileNotFound(name.to_string()))
            }
            Err(error) => Err(error.into()),
        }
    }

    pub async fn delete_object(&self, name: &str) -> Result<bool> {
        let path = self.object_path(name)?;
        if !fs::try_exists(&path).await? {
            return Ok(false);
        }
        fs::remove_file(&path).await?;
        Ok(true)
    }

    /// Names of all committed objects.
    pub async fn list_objects(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = fs::read_dir(&self.base_path).await?;

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if !name.starts_with('.') {
                    names.push(name.to_string());
                }
            }
        }

        names.sort();
        Ok(names)
    }

    /// Hash an object by streaming it from disk.
    pub async fn hash_object(&self, name: &str) -> Result<(String, u64)> {
        let mut file = self.open_object(name).await?;
        let mut hasher = ContentHasher::new();
        let mut buf = vec![0u8; HASH_READ_BUF];

        loop {
            let read = file.read(&mut buf).await?;
            if read == 0 {
                break;
            }
            hasher.update(&buf[..read]);
        }

        Ok(hasher.finalize())
    }
}

impl PendingObject {
    pub async fn append(&mut self, data: &Bytes) -> Result<()> {
        self.file.write_all(data).await?;
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<()> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        Ok(())
    }
}

/// Running SHA-256 over the bytes of an object.
#[derive(Default)]
pub struct ContentHasher {
    hasher: Sha256,
    len: u64,
}

impl ContentHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
        self.len += data.len() as u64;
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn finalize(self) -> (String, u64) {
        (hex::encode(self.hasher.finalize()), self.len)
    }
}

pub fn compute_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Reduce a client-supplied path to the object name stored on disk: the last
/// path component. Hidden names are reserved for the store itself.
pub fn normalize_object_name(input: &str) -> Result<String> {
    let name = input
        .trim()
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();

    if name.is_empty() || name == "." || name == ".." {
        return Err(UrfsError::InvalidRequest(format!(
            "invalid file name: {:?}",
            input
        )));
    }

    if name.starts_with('.') {
        return Err(UrfsError::InvalidRequest(format!(
            "file name cannot start with '.': {}",
            name
        )));
    }

    Ok(name.to_string())
}
