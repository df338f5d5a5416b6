//! Namespace-relative view of one user file.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// One entry of a namespace listing. Built fresh on every listing call.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct FileEntry {
    /// Path relative to the namespace's file area.
    pub path: String,
    pub last_modified: DateTime<Utc>,
    pub size: u64,
}
