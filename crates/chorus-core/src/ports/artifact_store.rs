//! ArtifactStore port - Blob ストレージ（ローカル FS / オブジェクトストレージ）
//!
//! 完成した音声の保存先であり、テキスト artifact の取得元でもあります。
//! `put` は上書き（upsert）なので、完了処理の再実行は安全です。

use async_trait::async_trait;

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn put(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<StoredObject, StorageError>;

    async fn get(&self, path: &str) -> Result<Vec<u8>, StorageError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub path: String,
    pub size_bytes: u64,
    /// Public URL when the store is configured with one.
    pub url: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("upload failed: {0}")]
    UploadFailed(String),
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("download failed: {0}")]
    DownloadFailed(String),
    #[error("invalid path: {0}")]
    InvalidPath(String),
}
