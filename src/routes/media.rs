use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use futures_util::TryStreamExt as _;
use sha2::{Digest, Sha256};

use crate::auth::Auth;
use crate::error::ApiError;
use crate::models::MediaType;
use crate::routes::AppState;
use crate::storage::MediaStoreError;

const MEDIA_SIZE_LIMIT: usize = 10 * 1024 * 1024; // 10 MB

const ALLOWED_MIME: &[&str] = &[
    "image/png",
    "image/jpeg",
    "image/gif",
    "image/webp",
    "video/mp4",
    "video/webm",
];

#[derive(Debug, serde::Serialize, utoipa::ToSchema)]
pub struct MediaUploadResponse {
    pub hash: String,
    pub mime: String,
    pub media_type: MediaType,
    pub size: usize,
    pub duplicate: bool, // true when upload was a duplicate (idempotent)
}

#[utoipa::path(
    post,
    path = "/api/v1/media",
    responses(
        (status = 201, description = "Media stored (new)", body = MediaUploadResponse),
        (status = 200, description = "Media already existed (idempotent)", body = MediaUploadResponse),
        (status = 415, description = "Unsupported media type"),
        (status = 413, description = "Payload too large")
    )
)]
pub async fn upload(
    auth: Auth,
    data: web::Data<AppState>,
    mut payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    use actix_web::http::StatusCode;
    if !data.limiter.allow_upload(auth.user_id()) {
        return Err(ApiError::RateLimited);
    }
    let mut bytes: Vec<u8> = Vec::new();
    while let Some(field) = payload.try_next().await.map_err(|e| {
        log::error!("multipart error: {e}");
        ApiError::Internal
    })? {
        if let Some(name) = field.content_disposition().get_name() {
            if name != "file" {
                continue;
            }
        } else {
            continue;
        }
        let mut field_stream = field;
        let mut hasher = Sha256::new();
        while let Some(chunk) = field_stream.try_next().await.map_err(|e| {
            log::error!("stream read error: {e}");
            ApiError::Internal
        })? {
            if bytes.len() + chunk.len() > MEDIA_SIZE_LIMIT {
                return Ok(HttpResponse::build(StatusCode::PAYLOAD_TOO_LARGE).finish());
            }
            hasher.update(&chunk);
            bytes.extend_from_slice(&chunk);
        }
        let hash = format!("{:x}", hasher.finalize());
        let mime = infer::get(&bytes)
            .map(|t| t.mime_type().to_string())
            .unwrap_or_else(|| "application/octet-stream".into());
        if !ALLOWED_MIME.contains(&mime.as_str()) {
            return Ok(HttpResponse::UnsupportedMediaType().finish());
        }
        let media_type = if mime.starts_with("video/") {
            MediaType::Video
        } else {
            MediaType::Image
        };
        let (status_code, duplicate) = match data.media_store.save(&hash, &mime, &bytes).await {
            Ok(()) => (StatusCode::CREATED, false),
            Err(MediaStoreError::Duplicate) => (StatusCode::OK, true),
            Err(e) => {
                log::error!("media_store save error: {e}");
                return Err(ApiError::Internal);
            }
        };
        let resp = MediaUploadResponse {
            hash,
            mime,
            media_type,
            size: bytes.len(),
            duplicate,
        };
        return Ok(HttpResponse::build(status_code).json(resp));
    }
    Err(ApiError::validation("missing 'file' field"))
}

/// Serve a stored blob by hash (public; used for avatars, post media and
/// chat attachments).
pub async fn fetch(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let hash = path.into_inner();
    if hash.len() < 2 {
        return Err(ApiError::NotFound);
    }
    match data.media_store.load(&hash).await {
        Ok((bytes, mime)) => Ok(HttpResponse::Ok()
            .insert_header(("Content-Type", mime))
            .body(bytes)),
        Err(MediaStoreError::NotFound) => Err(ApiError::NotFound),
        Err(e) => {
            log::error!("media_store load error: {e}");
            Err(ApiError::Internal)
        }
    }
}
