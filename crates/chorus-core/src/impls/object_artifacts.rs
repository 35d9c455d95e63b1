//! ObjectArtifactStore - `object_store` を使った ArtifactStore 実装
//!
//! 本番はローカル FS（`LocalFileSystem`）、テストは `InMemory` を使います。
//! Content-Type は属性を保存できるストアにだけ書きます
//! （`LocalFileSystem` は属性付きの put を拒否するため）。

use std::path::Path as FsPath;
use std::sync::Arc;

use async_trait::async_trait;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{Attribute, Attributes, ObjectStore, PutOptions, PutPayload};

use crate::ports::{ArtifactStore, StorageError, StoredObject};

pub struct ObjectArtifactStore {
    inner: Arc<dyn ObjectStore>,
    public_base_url: Option<String>,
    store_content_type: bool,
}

impl ObjectArtifactStore {
    /// `inner` must accept put attributes; see [`local`](Self::local) otherwise.
    pub fn new(inner: Arc<dyn ObjectStore>) -> Self {
        Self {
            inner,
            public_base_url: None,
            store_content_type: true,
        }
    }

    /// Files under `root` (created when missing).
    pub fn local(root: impl AsRef<FsPath>) -> Result<Self, StorageError> {
        let root = root.as_ref();
        std::fs::create_dir_all(root).map_err(|e| {
            StorageError::InvalidPath(format!("{}: {e}", root.display()))
        })?;
        let fs = LocalFileSystem::new_with_prefix(root)
            .map_err(|e| StorageError::InvalidPath(e.to_string()))?;
        Ok(Self {
            store_content_type: false,
            ..Self::new(Arc::new(fs))
        })
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemory::new()))
    }

    pub fn with_public_base_url(mut self, base: impl Into<String>) -> Self {
        self.public_base_url = Some(base.into());
        self
    }

    fn location(path: &str) -> Result<Path, StorageError> {
        Path::parse(path).map_err(|e| StorageError::InvalidPath(format!("{path}: {e}")))
    }
}

#[async_trait]
impl ArtifactStore for ObjectArtifactStore {
    async fn put(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<StoredObject, StorageError> {
        let location = Self::location(path)?;
        let size_bytes = bytes.len() as u64;

        let mut attributes = Attributes::new();
        if self.store_content_type {
            attributes.insert(Attribute::ContentType, content_type.to_string().into());
        }
        let options = PutOptions {
            attributes,
            ..PutOptions::default()
        };

        self.inner
            .put_opts(&location, PutPayload::from(bytes), options)
            .await
            .map_err(|e| StorageError::UploadFailed(e.to_string()))?;

        tracing::debug!(path, content_type, size_bytes, "Artifact stored");
        Ok(StoredObject {
            path: path.to_string(),
            size_bytes,
            url: self
                .public_base_url
                .as_ref()
                .map(|base| format!("{}/{}", base.trim_end_matches('/'), location)),
        })
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        let location = Self::location(path)?;
        let result = match self.inner.get(&location).await {
            Ok(result) => result,
            Err(object_store::Error::NotFound { .. }) => {
                return Err(StorageError::NotFound(path.to_string()));
            }
            Err(e) => return Err(StorageError::DownloadFailed(e.to_string())),
        };
        let bytes = result
            .bytes()
            .await
            .map_err(|e| StorageError::DownloadFailed(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}
