//! Represents an object stored in the backing object store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Index record of a single object.
///
/// The struct describes a stored payload, not the payload bytes themselves.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq, Eq)]
pub struct Object {
    /// Full object key, e.g. `a@example.com/files/notes.txt`.
    pub key: String,

    /// Content type (MIME type) supplied at upload time.
    pub content_type: Option<String>,

    /// Size in bytes.
    pub size_bytes: i64,

    /// Hex MD5 of the payload.
    pub etag: Option<String>,

    /// Timestamp of the last write (upload or copy).
    pub last_modified: DateTime<Utc>,
}
