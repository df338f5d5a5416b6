//! Public, secret-gated views of a namespace: the RSS feed and the share
//! listing. Neither creates a namespace.

use crate::{
    errors::AppError,
    models::file_entry::FileEntry,
    services::{context::RequestContext, user_storage::UserScopedStorage},
    state::AppState,
};
use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderValue, header},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use subtle::ConstantTimeEq;

/// One file of a feed or share listing with a ready-to-use link.
#[derive(Debug, Serialize)]
pub struct SharedFile {
    pub path: String,
    pub link: String,
    pub size: u64,
    pub size_human: String,
    pub last_modified: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ShareResponse {
    pub identity: String,
    pub files: Vec<SharedFile>,
}

/// Open `identity` and check `secret` against its record.
async fn open_shared(
    state: &AppState,
    ctx: &RequestContext,
    identity: &str,
    secret: &str,
) -> Result<UserScopedStorage, AppError> {
    let storage = state.storage.open_storage(ctx, identity, false).await?;
    let meta = storage.get_metadata(ctx).await?;
    if !secret_matches(meta.link_secret(), secret) {
        tracing::debug!(identity = %identity, "rejected feed secret");
        return Err(AppError::unauthorized("invalid secret"));
    }
    Ok(storage)
}

async fn shared_files(
    state: &AppState,
    ctx: &RequestContext,
    storage: &UserScopedStorage,
) -> Result<Vec<SharedFile>, AppError> {
    let listing = storage.list_files(ctx).await?;
    let mut files = Vec::with_capacity(listing.len());
    for FileEntry {
        path,
        last_modified,
        size,
    } in listing
    {
        let link = storage
            .generate_download_link(ctx, &path, state.settings.feed_link_ttl)
            .await?;
        files.push(SharedFile {
            size_human: human_size(size),
            path,
            link,
            size,
            last_modified,
        });
    }
    Ok(files)
}

/// `GET /rss/{identity}/{secret}`
pub async fn rss_feed(
    State(state): State<AppState>,
    Path((identity, secret)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let ctx = state.request_context();
    let storage = open_shared(&state, &ctx, &identity, &secret).await?;
    let files = shared_files(&state, &ctx, &storage).await?;
    let xml = render_feed(&identity, &state.settings.public_url, &files, Utc::now());

    Ok((
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/rss+xml"),
        )],
        xml,
    )
        .into_response())
}

/// `GET /share/{identity}/{secret}`
pub async fn share_listing(
    State(state): State<AppState>,
    Path((identity, secret)): Path<(String, String)>,
) -> Result<Json<ShareResponse>, AppError> {
    let ctx = state.request_context();
    let storage = open_shared(&state, &ctx, &identity, &secret).await?;
    let files = shared_files(&state, &ctx, &storage).await?;
    Ok(Json(ShareResponse { identity, files }))
}

fn secret_matches(expected: &str, given: &str) -> bool {
    // Slices of different length compare unequal.
    expected.as_bytes().ct_eq(given.as_bytes()).into()
}

fn render_feed(identity: &str, site: &str, files: &[SharedFile], now: DateTime<Utc>) -> String {
    let mut xml = String::from(r#"<?xml version="1.0" encoding="UTF-8"?><rss version="2.0"><channel>"#);
    xml.push_str(&format!(
        "<title>Share File Of {}</title>",
        xml_escape(identity)
    ));
    xml.push_str(&format!("<link>{}</link>", xml_escape(site)));
    xml.push_str("<description>Shared files</description>");
    xml.push_str(&format!(
        "<managingEditor>{} ({})</managingEditor>",
        xml_escape(identity),
        xml_escape(identity)
    ));
    xml.push_str(&format!(
        "<pubDate>{}</pubDate>",
        now.to_rfc2822()
    ));

    for file in files {
        xml.push_str("<item>");
        xml.push_str(&format!("<title>{}</title>", xml_escape(&file.path)));
        xml.push_str(&format!("<link>{}</link>", xml_escape(&file.link)));
        xml.push_str(&format!(
            "<pubDate>{}</pubDate>",
            file.last_modified.to_rfc2822()
        ));
        xml.push_str("</item>");
    }

    xml.push_str("</channel></rss>");
    xml
}

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// Binary-unit size with up to two decimals, e.g. `1.50 KiB`.
fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["bytes", "KiB", "MiB", "GiB"];
    if bytes == 0 {
        return "0 bytes".to_string();
    }

    let mut unit = 0;
    let mut value = bytes as f64;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    let formatted = format!("{:.2}", value);
    let formatted = formatted.strip_suffix(".00").unwrap_or(&formatted);
    format!("{} {}", formatted, UNITS[unit])
}
