use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaId(pub String);

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaMetadata {
    /// File name as supplied by the uploader.
    pub original_name: Option<String>,
    pub mime_type: Option<String>,
    pub size_bytes: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaEntry {
    pub id: MediaId,
    /// Stored file name (`<uuid>.<ext>`), the public handle for retrieval.
    pub file_name: String,
    pub path: PathBuf,
    pub metadata: MediaMetadata,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("invalid file name: {0}")]
    InvalidName(String),
    #[error("file not found: {0}")]
    NotFound(String),
    #[error("file too large: {size} bytes exceeds limit of {max} bytes")]
    TooLarge { size: u64, max: u64 },
    #[error("media storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait MediaStore: Send + Sync {
    /// Persist `data` under a fresh `<uuid>.<ext>` name.
    async fn store(&self, data: &[u8], metadata: MediaMetadata) -> Result<MediaEntry, MediaError>;
    /// Look up a stored file by name without reading it.
    async fn open(&self, file_name: &str) -> Result<MediaEntry, MediaError>;
    /// Read a stored file's bytes.
    async fn read(&self, file_name: &str) -> Result<(MediaEntry, Vec<u8>), MediaError> {
        let entry = self.open(file_name).await?;
        let data = tokio::fs::read(&entry.path).await?;
        Ok((entry, data))
    }
    async fn delete(&self, file_name: &str) -> Result<(), MediaError>;
    async fn list(&self) -> Result<Vec<MediaEntry>, MediaError>;
    fn name(&self) -> &str;
}
