//! Defines routes for the file sharing service.
//!
//! ## Structure
//! - **Probes**
//!   - `GET    /healthz`, `GET /readyz`
//!
//! - **Caller's own files** (identity from the trusted auth header)
//!   - `GET    /api/whoami` — identity plus feed and share links
//!   - `GET    /api/files`  — listing, newest first
//!   - `POST   /api/upload` — multipart upload of the `file` part
//!   - `DELETE /api/delete?path=`
//!   - `POST   /api/move`   — JSON `{from, to}`
//!   - `GET    /api/link?path=` — short-lived download link
//!
//! - **Secret-gated public views**
//!   - `GET    /rss/{identity}/{secret}`
//!   - `GET    /share/{identity}/{secret}`
//!
//! - **Signed downloads**
//!   - `GET    /download/{token}?expires=&signature=`

use crate::{
    handlers::{
        download_handlers::download,
        feed_handlers::{rss_feed, share_listing},
        file_handlers::{delete_file, download_link, list_files, move_file, upload_file, whoami},
        health_handlers::{healthz, readyz},
    },
    services::link_signer::DOWNLOAD_ROUTE,
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
};

/// Build and return the router carrying `AppState` to all handlers.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/api/whoami", get(whoami))
        .route("/api/files", get(list_files))
        // uploads are streamed to disk, so the default 2 MB cap does not apply
        .route(
            "/api/upload",
            post(upload_file).layer(DefaultBodyLimit::disable()),
        )
        .route("/api/delete", delete(delete_file))
        .route("/api/move", post(move_file))
        .route("/api/link", get(download_link))
        .route("/rss/{identity}/{secret}", get(rss_feed))
        .route("/share/{identity}/{secret}", get(share_listing))
        .route(&format!("{}/{{token}}", DOWNLOAD_ROUTE), get(download))
}
