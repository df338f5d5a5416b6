//! Operations on one identity's namespace.
//!
//! File objects live under `{identity}/files/`; callers only ever see paths
//! relative to that prefix. Callers are expected to hand in contained paths
//! (the HTTP layer refuses `/` in file names); leading separators are
//! stripped here.

use crate::{
    models::{file_entry::FileEntry, metadata::Metadata},
    services::{
        backend::{ByteStream, ObjectBackend},
        context::RequestContext,
        error::{StorageError, StorageResult},
        storage_factory::fetch_metadata,
    },
};
use std::{sync::Arc, time::Duration};

pub const FILES_DIR: &str = "files";

/// Result of a two-phase move (copy, then delete the source).
#[derive(Debug)]
pub enum MoveOutcome {
    /// The object now lives only at the new path.
    Moved,
    /// The copy succeeded but the old path could not be removed, so the
    /// object exists at both paths. Holds a [`StorageError::MoveDeleteFailed`].
    CopiedButOldNotDeleted(StorageError),
    /// Nothing changed.
    Failed(StorageError),
}

impl MoveOutcome {
    pub fn into_result(self) -> StorageResult<()> {
        match self {
            MoveOutcome::Moved => Ok(()),
            MoveOutcome::CopiedButOldNotDeleted(err) | MoveOutcome::Failed(err) => Err(err),
        }
    }
}

/// Handle bound to a single namespace. Holds no mutable state; clones share
/// the backend.
#[derive(Clone)]
pub struct UserScopedStorage {
    backend: Arc<dyn ObjectBackend>,
    identity: String,
    metadata: Metadata,
}

impl UserScopedStorage {
    pub(crate) fn new(backend: Arc<dyn ObjectBackend>, metadata: Metadata) -> Self {
        Self {
            backend,
            identity: metadata.email.clone(),
            metadata,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// The record as it was when the namespace was opened.
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn files_prefix(&self) -> String {
        format!("{}/{}/", self.identity, FILES_DIR)
    }

    fn file_key(&self, path: &str) -> String {
        format!("{}{}", self.files_prefix(), path.trim_start_matches('/'))
    }

    /// Re-read the stored record. Never migrates.
    pub async fn get_metadata(&self, ctx: &RequestContext) -> StorageResult<Metadata> {
        fetch_metadata(self.backend.as_ref(), ctx, &self.identity)
            .await?
            .ok_or_else(|| StorageError::NamespaceNotFound(self.identity.clone()))
    }

    /// Stream `body` to `path`, replacing whatever was there.
    pub async fn upload(
        &self,
        ctx: &RequestContext,
        path: &str,
        content_type: &str,
        body: ByteStream<'_>,
    ) -> StorageResult<()> {
        let key = self.file_key(path);
        let stored = ctx.run(self.backend.put(&key, content_type, body)).await?;
        stored.map_err(|source| StorageError::UploadFailed { key, source })?;
        Ok(())
    }

    /// Remove `path`. Removing a path that does not exist succeeds.
    pub async fn delete(&self, ctx: &RequestContext, path: &str) -> StorageResult<()> {
        let key = self.file_key(path);
        let deleted = ctx.run(self.backend.delete(&key)).await?;
        deleted.map_err(|source| StorageError::DeleteFailed { key, source })
    }

    /// Copy `old_path` to `new_path`, then delete `old_path`. Not atomic.
    pub async fn move_file(&self, ctx: &RequestContext, old_path: &str, new_path: &str) -> MoveOutcome {
        let from = self.file_key(old_path);
        let to = self.file_key(new_path);
        if from == to {
            return MoveOutcome::Moved;
        }

        let copied = ctx.run(self.backend.copy(&from, &to)).await;
        match copied {
            Ok(Ok(_)) => {}
            Ok(Err(source)) => {
                return MoveOutcome::Failed(StorageError::CopyFailed { from, to, source });
            }
            Err(interrupted) => return MoveOutcome::Failed(interrupted.into()),
        }

        let deleted = ctx.run(self.backend.delete(&from)).await;
        let cause = match deleted {
            Ok(Ok(())) => return MoveOutcome::Moved,
            Ok(Err(source)) => StorageError::DeleteFailed {
                key: from.clone(),
                source,
            },
            Err(interrupted) => interrupted.into(),
        };
        MoveOutcome::CopiedButOldNotDeleted(StorageError::MoveDeleteFailed {
            from,
            to,
            source: Box::new(cause),
        })
    }

    /// Signed retrieval URL for `path`, valid for `expiration`. The object is
    /// not required to exist.
    pub async fn generate_download_link(
        &self,
        ctx: &RequestContext,
        path: &str,
        expiration: Duration,
    ) -> StorageResult<String> {
        ctx.check()?;
        let key = self.file_key(path);
        self.backend
            .presign_get(&key, expiration)
            .map_err(|source| StorageError::SignFailed { key, source })
    }

    /// Every file in the namespace, newest first.
    pub async fn list_files(&self, ctx: &RequestContext) -> StorageResult<Vec<FileEntry>> {
        let prefix = self.files_prefix();
        let listed = ctx.run(self.backend.list(&prefix)).await?;
        let objects = listed.map_err(|source| StorageError::ListFailed {
            prefix: prefix.clone(),
            source,
        })?;

        let mut listing: Vec<FileEntry> = objects
            .into_iter()
            .filter_map(|obj| {
                let path = obj.key.strip_prefix(&prefix)?.to_string();
                Some(FileEntry {
                    path,
                    last_modified: obj.last_modified,
                    size: u64::try_from(obj.size_bytes).unwrap_or(0),
                })
            })
            .collect();
        newest_first(&mut listing);
        Ok(listing)
    }
}

/// Sort by last-modified descending. Stable, so equal timestamps keep the
/// store's listing order.
fn newest_first(listing: &mut [FileEntry]) {
    listing.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));
}
