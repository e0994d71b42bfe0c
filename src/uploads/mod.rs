//! Image uploads. The relay only ever sees the returned URL.

mod local;

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    Json, Router, debug_handler,
    body::Bytes,
    extract::{Multipart, Path, State},
    http::StatusCode,
    routing::{delete, post},
};
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{info, warn};

use crate::{AppResult, AppState};

pub use local::LocalObjectStore;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("no file uploaded")]
    NoFile,

    #[error("unsupported image format {0:?}")]
    UnsupportedFormat(String),

    #[error("file is larger than {limit} bytes")]
    TooLarge { limit: usize },

    #[error("invalid object id {0:?}")]
    InvalidId(String),

    #[error("malformed upload: {0}")]
    Malformed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredObject {
    pub url: String,
    pub public_id: String,
}

/// Binary object storage handing back retrievable URLs.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    fn max_bytes(&self) -> usize;

    async fn upload(&self, bytes: Bytes, format: ImageFormat) -> Result<StoredObject, UploadError>;

    /// False when nothing was stored under `public_id`.
    async fn delete(&self, public_id: &str) -> Result<bool, UploadError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Jpeg,
    Png,
    Gif,
    Webp,
}

impl ImageFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "jpg",
            ImageFormat::Png => "png",
            ImageFormat::Gif => "gif",
            ImageFormat::Webp => "webp",
        }
    }

    /// Picks the format from the file name, falling back to the content type.
    pub fn detect(
        file_name: Option<&str>,
        content_type: Option<&str>,
    ) -> Result<ImageFormat, UploadError> {
        let from_name = file_name
            .and_then(|name| name.rsplit_once('.'))
            .map(|(_, ext)| ext.to_ascii_lowercase());
        let from_type = content_type
            .and_then(|ct| ct.strip_prefix("image/"))
            .map(str::to_ascii_lowercase);

        let candidate = from_name.or(from_type).unwrap_or_default();
        match candidate.as_str() {
            "jpg" | "jpeg" => Ok(ImageFormat::Jpeg),
            "png" => Ok(ImageFormat::Png),
            "gif" => Ok(ImageFormat::Gif),
            "webp" => Ok(ImageFormat::Webp),
            _ => Err(UploadError::UnsupportedFormat(candidate)),
        }
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/image", post(upload_image))
        .route("/image/{public_id}", delete(delete_image))
}

#[debug_handler(state = AppState)]
async fn upload_image(
    State(objects): State<Arc<dyn ObjectStore>>,
    mut multipart: Multipart,
) -> AppResult<Json<Value>> {
    let limit = objects.max_bytes();
    let multipart_error = |e: axum::extract::multipart::MultipartError| {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            UploadError::TooLarge { limit }
        } else {
            UploadError::Malformed(e.body_text())
        }
    };

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some("file") {
            continue;
        }

        let format = ImageFormat::detect(field.file_name(), field.content_type())?;
        let bytes = field.bytes().await.map_err(multipart_error)?;
        let stored = objects
            .upload(bytes, format)
            .await
            .inspect_err(|e| warn!("upload failed: {e}"))?;
        info!(public_id = %stored.public_id, "image uploaded");

        return Ok(Json(json!({
            "ok": true,
            "url": stored.url,
            "publicId": stored.public_id,
        })));
    }

    Err(UploadError::NoFile.into())
}

#[debug_handler(state = AppState)]
async fn delete_image(
    State(objects): State<Arc<dyn ObjectStore>>,
    Path(public_id): Path<String>,
) -> AppResult<Json<Value>> {
    let removed = objects.delete(&public_id).await?;
    Ok(Json(json!({
        "ok": true,
        "result": if removed { "ok" } else { "not found" },
    })))
}
