use crate::error::Result;
use crate::index::SharedIndex;
use crate::types::FileInfo;

#[derive(Clone)]
pub struct ListFilesOperation {
    index: SharedIndex,
}

impl ListFilesOperation {
    pub fn new(index: SharedIndex) -> Self {
        Self { index }
    }

    pub async fn run(&self) -> Result<Vec<FileInfo>> {
        let mut files = self.index.read().await.file_infos();
        files.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.hash.cmp(&b.hash)));
        Ok(files)
    }
}
