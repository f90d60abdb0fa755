//! Serves images held by the local media backend, streaming file bodies
//! rather than buffering them in memory.

use crate::{errors::AppError, services::local_store::StoredMedia, state::AppState};
use axum::{
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::Response,
};
use tokio_util::io::ReaderStream;

/// `GET /media/{*key}`: stream a stored image.
pub async fn get_media(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Response, AppError> {
    let store = state
        .local_media
        .as_ref()
        .ok_or_else(|| AppError::not_found("media is not served by this instance"))?;

    let media = store
        .open(&key)
        .await
        .map_err(|err| AppError::internal(err.to_string()))?
        .ok_or_else(|| AppError::not_found(format!("media `{}` not found", key)))?;

    let mut headers = HeaderMap::new();
    set_media_headers(&mut headers, &media);

    let body = Body::from_stream(ReaderStream::new(media.file));
    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    *response.headers_mut() = headers;
    Ok(response)
}

fn set_media_headers(headers: &mut HeaderMap, media: &StoredMedia) {
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(media.format.mime_type()),
    );
    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from_str(&media.size_bytes.to_string())
            .unwrap_or_else(|_| HeaderValue::from_static("0")),
    );
    // Objects are never rewritten in place; a new image gets a new id.
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("public, max-age=31536000, immutable"),
    );
}
