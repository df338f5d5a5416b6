//! Resolves signed links produced by the local store and streams the payload.

use crate::{errors::AppError, models::object::Object, state::AppState};
use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::Response,
};
use serde::Deserialize;

/// IMF-fixdate, the preferred HTTP date format.
const HTTP_DATE: &str = "%a, %d %b %Y %H:%M:%S GMT";

#[derive(Debug, Deserialize)]
pub struct SignedQuery {
    pub expires: i64,
    pub signature: String,
}

/// `GET /download/{token}?expires=&signature=`
pub async fn download(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Query(q): Query<SignedQuery>,
) -> Result<Response, AppError> {
    let reader = state
        .store
        .open_signed(&token, q.expires, &q.signature)
        .await?;

    let mut response = Response::new(Body::from_stream(reader.body));
    *response.status_mut() = StatusCode::OK;
    set_object_headers(response.headers_mut(), &reader.object);
    Ok(response)
}

fn set_object_headers(headers: &mut HeaderMap, meta: &Object) {
    let content_type = meta
        .content_type
        .clone()
        .unwrap_or_else(|| "application/octet-stream".into());
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );

    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from(meta.size_bytes.max(0)),
    );

    if let Some(etag) = meta.etag.as_ref() {
        let quoted = format!("\"{}\"", etag);
        if let Ok(value) = HeaderValue::from_str(&quoted) {
            headers.insert(header::ETAG, value);
        }
    }

    let last_modified = meta.last_modified.format(HTTP_DATE).to_string();
    if let Ok(value) = HeaderValue::from_str(&last_modified) {
        headers.insert(header::LAST_MODIFIED, value);
    }

    // Suggest the object's own file name to browsers.
    if let Some(name) = meta.key.rsplit('/').next().filter(|n| !n.is_empty()) {
        let disposition = format!("attachment; filename=\"{}\"", name.replace('"', ""));
        if let Ok(value) = HeaderValue::from_str(&disposition) {
            headers.insert(header::CONTENT_DISPOSITION, value);
        }
    }
}
