//! Handlers for the authenticated caller's own files.
//! Every handler opens the caller's namespace, creating it on first use.

use crate::{
    errors::AppError,
    handlers::identity::AuthIdentity,
    models::file_entry::FileEntry,
    services::{
        context::RequestContext,
        user_storage::{MoveOutcome, UserScopedStorage},
    },
    state::{AppState, DIRECT_LINK_TTL},
};
use axum::{
    Json,
    extract::{Multipart, Query, State},
    http::{HeaderName, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::{StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::io;

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";
const HX_REDIRECT: HeaderName = HeaderName::from_static("hx-redirect");

#[derive(Debug, Deserialize)]
pub struct PathQuery {
    pub path: String,
}

#[derive(Debug, Deserialize)]
pub struct MoveRequest {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Serialize)]
pub struct WhoamiResponse {
    pub identity: String,
    pub feed_url: String,
    pub share_url: String,
}

#[derive(Debug, Serialize)]
pub struct MoveResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

async fn open_own(
    state: &AppState,
    ctx: &RequestContext,
    identity: &str,
) -> Result<UserScopedStorage, AppError> {
    Ok(state.storage.open_storage(ctx, identity, true).await?)
}

/// File names are flat; a separator would create nested keys.
fn ensure_flat_name(name: &str) -> Result<(), AppError> {
    if name.is_empty() {
        return Err(AppError::bad_request("file name must not be empty"));
    }
    if name.contains('/') {
        return Err(AppError::bad_request(format!(
            "file name `{}` must not contain '/'",
            name
        )));
    }
    if name == "." || name == ".." || name.chars().any(char::is_control) {
        return Err(AppError::bad_request(format!(
            "`{}` is not a valid file name",
            name.escape_debug()
        )));
    }
    Ok(())
}

/// `GET /api/whoami`
pub async fn whoami(
    State(state): State<AppState>,
    AuthIdentity(identity): AuthIdentity,
) -> Result<Json<WhoamiResponse>, AppError> {
    let ctx = state.request_context();
    let storage = open_own(&state, &ctx, &identity).await?;
    let meta = storage.get_metadata(&ctx).await?;
    Ok(Json(WhoamiResponse {
        feed_url: state.feed_url(&meta.email, meta.link_secret()),
        share_url: state.share_url(&meta.email, meta.link_secret()),
        identity: meta.email,
    }))
}

/// `GET /api/files` — the caller's files, newest first.
pub async fn list_files(
    State(state): State<AppState>,
    AuthIdentity(identity): AuthIdentity,
) -> Result<Json<Vec<FileEntry>>, AppError> {
    let ctx = state.request_context();
    let storage = open_own(&state, &ctx, &identity).await?;
    let listing = storage.list_files(&ctx).await?;
    Ok(Json(listing))
}

/// `POST /api/upload` — streams the multipart part named `file` into the
/// namespace under its client-supplied file name.
pub async fn upload_file(
    State(state): State<AppState>,
    AuthIdentity(identity): AuthIdentity,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::bad_request(format!("can't parse multipart form: {}", err)))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let file_name = field.file_name().unwrap_or_default().to_string();
        ensure_flat_name(&file_name)?;
        let content_type = field
            .content_type()
            .filter(|ct| !ct.is_empty())
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_string();

        let ctx = state.request_context();
        let storage = open_own(&state, &ctx, &identity).await?;
        let body = field.map_err(io::Error::other).boxed();
        storage.upload(&ctx, &file_name, &content_type, body).await?;

        tracing::debug!(identity = %storage.identity(), file = %file_name, "file uploaded");
        return Ok((
            StatusCode::OK,
            [(HX_REDIRECT, HeaderValue::from_static("/"))],
            "ok",
        )
            .into_response());
    }

    Err(AppError::bad_request("multipart form has no `file` part"))
}

/// `DELETE /api/delete?path=`
pub async fn delete_file(
    State(state): State<AppState>,
    AuthIdentity(identity): AuthIdentity,
    Query(q): Query<PathQuery>,
) -> Result<StatusCode, AppError> {
    ensure_flat_name(&q.path)?;
    let ctx = state.request_context();
    let storage = open_own(&state, &ctx, &identity).await?;
    storage.delete(&ctx, &q.path).await?;
    Ok(StatusCode::OK)
}

/// `POST /api/move` — rename a file. A copy that could not drop its source
/// is reported in the body, not as a failure.
pub async fn move_file(
    State(state): State<AppState>,
    AuthIdentity(identity): AuthIdentity,
    Json(req): Json<MoveRequest>,
) -> Result<Json<MoveResponse>, AppError> {
    ensure_flat_name(&req.from)?;
    ensure_flat_name(&req.to)?;

    let ctx = state.request_context();
    let storage = open_own(&state, &ctx, &identity).await?;
    match storage.move_file(&ctx, &req.from, &req.to).await {
        MoveOutcome::Moved => Ok(Json(MoveResponse {
            status: "moved",
            warning: None,
        })),
        MoveOutcome::CopiedButOldNotDeleted(err) => {
            tracing::warn!(identity = %identity, error = ?err, "move left the source in place");
            Ok(Json(MoveResponse {
                status: "copied",
                warning: Some(err.to_string()),
            }))
        }
        MoveOutcome::Failed(err) => Err(err.into()),
    }
}

/// `GET /api/link?path=` — short-lived download link for one file.
pub async fn download_link(
    State(state): State<AppState>,
    AuthIdentity(identity): AuthIdentity,
    Query(q): Query<PathQuery>,
) -> Result<Response, AppError> {
    ensure_flat_name(&q.path)?;
    let ctx = state.request_context();
    let storage = open_own(&state, &ctx, &identity).await?;
    let link = storage
        .generate_download_link(&ctx, &q.path, DIRECT_LINK_TTL)
        .await?;

    let location = HeaderValue::from_str(&link)
        .map_err(|err| AppError::internal(format!("link is not a valid header value: {}", err)))?;
    Ok((
        StatusCode::OK,
        [
            (HX_REDIRECT, location),
            (header::CONTENT_TYPE, HeaderValue::from_static("text/uri-list")),
        ],
        link,
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        handlers::download_handlers::{SignedQuery, download},
        services::{
            link_signer::parse_link,
            testing::{body, local_store},
        },
        state::test_state,
    };
    use crate::services::{backend::ObjectBackend, testing::read_body};
    use axum::{
        body::Body,
        extract::{FromRequest, Path},
        http::Request,
    };

    const BOUNDARY: &str = "sharefile-boundary";

    /// One multipart part: field name, optional file name and content type.
    struct Part<'a> {
        name: &'a str,
        file_name: Option<&'a str>,
        content_type: Option<&'a str>,
        data: &'a str,
    }

    async fn multipart(parts: &[Part<'_>]) -> Multipart {
        let mut form = String::new();
        for part in parts {
            form.push_str(&format!("--{BOUNDARY}\r\n"));
            form.push_str(&format!("Content-Disposition: form-data; name=\"{}\"", part.name));
            if let Some(file_name) = part.file_name {
                form.push_str(&format!("; filename=\"{file_name}\""));
            }
            form.push_str("\r\n");
            if let Some(content_type) = part.content_type {
                form.push_str(&format!("Content-Type: {content_type}\r\n"));
            }
            form.push_str(&format!("\r\n{}\r\n", part.data));
        }
        form.push_str(&format!("--{BOUNDARY}--\r\n"));

        let request = Request::builder()
            .method("POST")
            .uri("/api/upload")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(form))
            .unwrap();
        Multipart::from_request(request, &()).await.unwrap()
    }

    fn caller() -> AuthIdentity {
        AuthIdentity("a@example.com".to_string())
    }

    async fn upload(state: &AppState, path: &str, content: &str) {
        let ctx = state.request_context();
        let storage = open_own(state, &ctx, "a@example.com").await.unwrap();
        storage
            .upload(&ctx, path, "text/plain", body(content))
            .await
            .unwrap();
    }

    #[test]
    fn flat_names_only() {
        assert!(ensure_flat_name("report.pdf").is_ok());
        assert_eq!(
            ensure_flat_name("a/b.txt").unwrap_err().status,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ensure_flat_name("").unwrap_err().status,
            StatusCode::BAD_REQUEST
        );
        for name in [".", "..", "tab\there", "nul\0"] {
            assert_eq!(
                ensure_flat_name(name).unwrap_err().status,
                StatusCode::BAD_REQUEST,
                "{name:?}"
            );
        }
        assert!(ensure_flat_name("..hidden").is_ok());
    }

    #[tokio::test]
    async fn upload_streams_the_file_part() {
        let (_dir, store) = local_store().await;
        let state = test_state(store.clone());
        let form = multipart(&[
            Part {
                name: "note",
                file_name: None,
                content_type: None,
                data: "not a file",
            },
            Part {
                name: "file",
                file_name: Some("notes.txt"),
                content_type: Some("text/plain"),
                data: "hello world",
            },
        ])
        .await;

        let response = upload_file(State(state.clone()), caller(), form).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[HX_REDIRECT], "/");

        let reader = store.get("a@example.com/files/notes.txt").await.unwrap();
        assert_eq!(reader.object.content_type.as_deref(), Some("text/plain"));
        assert_eq!(read_body(reader).await, b"hello world");

        let Json(listing) = list_files(State(state), caller()).await.unwrap();
        let paths: Vec<&str> = listing.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, ["notes.txt"]);
    }

    #[tokio::test]
    async fn upload_without_content_type_is_octet_stream() {
        let (_dir, store) = local_store().await;
        let state = test_state(store.clone());
        let form = multipart(&[Part {
            name: "file",
            file_name: Some("blob.bin"),
            content_type: None,
            data: "raw",
        }])
        .await;

        upload_file(State(state), caller(), form).await.unwrap();
        let object = store
            .head("a@example.com/files/blob.bin")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(object.content_type.as_deref(), Some(DEFAULT_CONTENT_TYPE));
        assert_eq!(object.size_bytes, 3);
    }

    #[tokio::test]
    async fn upload_rejects_nested_names_and_missing_part() {
        let (_dir, store) = local_store().await;
        let state = test_state(store.clone());

        let nested = multipart(&[Part {
            name: "file",
            file_name: Some("dir/evil.txt"),
            content_type: Some("text/plain"),
            data: "x",
        }])
        .await;
        let status = upload_file(State(state.clone()), caller(), nested)
            .await
            .err()
            .map(|e| e.status);
        assert_eq!(status, Some(StatusCode::BAD_REQUEST));

        let no_file = multipart(&[Part {
            name: "other",
            file_name: Some("a.txt"),
            content_type: None,
            data: "x",
        }])
        .await;
        let status = upload_file(State(state), caller(), no_file)
            .await
            .err()
            .map(|e| e.status);
        assert_eq!(status, Some(StatusCode::BAD_REQUEST));

        assert!(store.list("a@example.com/files/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn dot_paths_are_bad_requests() {
        let (_dir, store) = local_store().await;
        let state = test_state(store);

        let deleted = delete_file(
            State(state.clone()),
            caller(),
            Query(PathQuery {
                path: "..".to_string(),
            }),
        )
        .await
        .err()
        .map(|e| e.status);
        assert_eq!(deleted, Some(StatusCode::BAD_REQUEST));

        let linked = download_link(
            State(state.clone()),
            caller(),
            Query(PathQuery {
                path: ".".to_string(),
            }),
        )
        .await
        .err()
        .map(|e| e.status);
        assert_eq!(linked, Some(StatusCode::BAD_REQUEST));

        let moved = move_file(
            State(state),
            caller(),
            Json(MoveRequest {
                from: "..".to_string(),
                to: "b.txt".to_string(),
            }),
        )
        .await
        .err()
        .map(|e| e.status);
        assert_eq!(moved, Some(StatusCode::BAD_REQUEST));
    }

    #[tokio::test]
    async fn whoami_creates_namespace_with_stable_links() {
        let (_dir, store) = local_store().await;
        let state = test_state(store);

        let Json(first) = whoami(State(state.clone()), caller()).await.unwrap();
        let Json(second) = whoami(State(state), caller()).await.unwrap();

        assert_eq!(first.identity, "a@example.com");
        assert!(first.feed_url.starts_with("http://files.test/rss/a@example.com/"));
        assert!(first.share_url.starts_with("http://files.test/share/a@example.com/"));
        assert_eq!(first.feed_url, second.feed_url);
    }

    #[tokio::test]
    async fn link_resolves_through_download_route() {
        let (_dir, store) = local_store().await;
        let state = test_state(store);
        upload(&state, "a.txt", "hello").await;

        let response = download_link(
            State(state.clone()),
            caller(),
            Query(PathQuery {
                path: "a.txt".to_string(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/uri-list");
        let redirect = response.headers()[HX_REDIRECT].to_str().unwrap().to_string();
        let link = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(link, redirect.as_bytes());

        let (token, expires, signature) = parse_link(&redirect).unwrap();
        let response = download(
            State(state),
            Path(token),
            Query(SignedQuery { expires, signature }),
        )
        .await
        .unwrap();
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "5");
        let payload = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&payload[..], b"hello");
    }

    #[tokio::test]
    async fn move_renames_within_namespace() {
        let (_dir, store) = local_store().await;
        let state = test_state(store);
        upload(&state, "a.txt", "hello").await;

        let Json(moved) = move_file(
            State(state.clone()),
            caller(),
            Json(MoveRequest {
                from: "a.txt".to_string(),
                to: "b.txt".to_string(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(moved.status, "moved");
        assert!(moved.warning.is_none());

        let Json(listing) = list_files(State(state), caller()).await.unwrap();
        let paths: Vec<&str> = listing.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, ["b.txt"]);
    }

    #[tokio::test]
    async fn moving_a_missing_file_is_not_found() {
        let (_dir, store) = local_store().await;
        let state = test_state(store);

        let status = move_file(
            State(state),
            caller(),
            Json(MoveRequest {
                from: "ghost.txt".to_string(),
                to: "b.txt".to_string(),
            }),
        )
        .await
        .err()
        .map(|e| e.status);
        assert_eq!(status, Some(StatusCode::NOT_FOUND));
    }

    #[tokio::test]
    async fn delete_removes_file_and_is_idempotent() {
        let (_dir, store) = local_store().await;
        let state = test_state(store);
        upload(&state, "a.txt", "hello").await;

        for _ in 0..2 {
            let status = delete_file(
                State(state.clone()),
                caller(),
                Query(PathQuery {
                    path: "a.txt".to_string(),
                }),
            )
            .await
            .unwrap();
            assert_eq!(status, StatusCode::OK);
        }

        let Json(listing) = list_files(State(state), caller()).await.unwrap();
        assert!(listing.is_empty());
    }

    #[tokio::test]
    async fn shutdown_aborts_storage_work() {
        let (_dir, store) = local_store().await;
        let state = test_state(store);
        state.shutdown.cancel();

        let status = list_files(State(state), caller())
            .await
            .err()
            .map(|e| e.status);
        assert_eq!(status, Some(StatusCode::SERVICE_UNAVAILABLE));
    }
}
