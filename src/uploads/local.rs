use std::{io::ErrorKind, path::PathBuf};

use async_trait::async_trait;
use axum::body::Bytes;
use tokio::fs;
use uuid::Uuid;

use super::{ImageFormat, ObjectStore, StoredObject, UploadError};

/// Keeps uploads on local disk, served back under `/uploads`.
pub struct LocalObjectStore {
    root: PathBuf,
    base_url: String,
    max_bytes: usize,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>, base_url: &str, max_bytes: usize) -> Self {
        Self {
            root: root.into(),
            base_url: base_url.trim_end_matches('/').to_owned(),
            max_bytes,
        }
    }

    fn path_for(&self, public_id: &str) -> Result<PathBuf, UploadError> {
        let valid = !public_id.is_empty()
            && !public_id.starts_with('.')
            && public_id.chars().all(|c| c.is_ascii_alphanumeric() || c == '.');
        if !valid {
            return Err(UploadError::InvalidId(public_id.to_owned()));
        }
        Ok(self.root.join(public_id))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    async fn upload(&self, bytes: Bytes, format: ImageFormat) -> Result<StoredObject, UploadError> {
        if bytes.len() > self.max_bytes {
            return Err(UploadError::TooLarge { limit: self.max_bytes });
        }

        let public_id = format!("{}.{}", Uuid::now_v7().simple(), format.extension());
        fs::create_dir_all(&self.root).await?;
        fs::write(self.root.join(&public_id), &bytes).await?;

        Ok(StoredObject {
            url: format!("{}/uploads/{public_id}", self.base_url),
            public_id,
        })
    }

    async fn delete(&self, public_id: &str) -> Result<bool, UploadError> {
        match fs::remove_file(self.path_for(public_id)?).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
