//! Opens per-identity namespaces.
//!
//! Each namespace lives under `{identity}/` in the object store and is
//! described by `{identity}/metadata.json`. Opening a namespace reads that
//! record (creating it on first access when allowed), migrates stale records
//! to the current schema and persists the result before handing out a
//! [`UserScopedStorage`].

use crate::{
    models::metadata::{METADATA_CONTENT_TYPE, METADATA_FILE, Metadata, MetadataError},
    services::{
        backend::{BackendError, ObjectBackend},
        context::RequestContext,
        error::{StorageError, StorageResult},
        user_storage::UserScopedStorage,
    },
};
use bytes::Bytes;
use futures::StreamExt;
use std::{io, sync::Arc};
use tracing::{debug, info};

/// Upper bound for a metadata document. Anything larger is not ours.
pub const MAX_METADATA_BYTES: usize = 64 * 1024;

pub fn metadata_key(identity: &str) -> String {
    format!("{identity}/{METADATA_FILE}")
}

/// Namespace keys become the first path segment of every object key.
fn ensure_identity_valid(identity: &str) -> StorageResult<()> {
    let invalid = identity.is_empty()
        || identity == "."
        || identity == ".."
        || identity.contains('/')
        || identity.chars().any(char::is_control);
    if invalid {
        return Err(StorageError::InvalidIdentity(identity.to_string()));
    }
    Ok(())
}

/// Read and validate the metadata record of `identity`.
///
/// `Ok(None)` means the namespace has no record yet.
pub(crate) async fn fetch_metadata(
    backend: &dyn ObjectBackend,
    ctx: &RequestContext,
    identity: &str,
) -> StorageResult<Option<Metadata>> {
    let key = metadata_key(identity);
    let read = ctx
        .run(async {
            let reader = backend.get(&key).await?;
            reader.read_to_vec(MAX_METADATA_BYTES).await
        })
        .await?;

    let bytes = match read {
        Ok(bytes) => bytes,
        Err(err) if err.is_not_found() => return Ok(None),
        Err(BackendError::TooLarge { limit, .. }) => {
            return Err(StorageError::CorruptMetadata {
                identity: identity.to_string(),
                source: MetadataError::TooLarge { limit },
            });
        }
        Err(source) => {
            return Err(StorageError::MetadataReadFailed {
                identity: identity.to_string(),
                source,
            });
        }
    };

    let meta = Metadata::decode(&bytes).map_err(|source| StorageError::CorruptMetadata {
        identity: identity.to_string(),
        source,
    })?;
    if meta.email != identity {
        return Err(StorageError::IdentityMismatch {
            expected: identity.to_string(),
            found: meta.email,
        });
    }
    Ok(Some(meta))
}

/// Hands out [`UserScopedStorage`] handles. Cheap to clone.
#[derive(Clone)]
pub struct StorageFactory {
    backend: Arc<dyn ObjectBackend>,
}

impl StorageFactory {
    pub fn new(backend: Arc<dyn ObjectBackend>) -> Self {
        Self { backend }
    }

    /// Open the namespace of `identity`.
    ///
    /// With `auto_create` a missing record is created. Two first accesses
    /// racing on a backend without conditional writes may both create a
    /// record; the store's last writer decides which secret survives.
    pub async fn open_storage(
        &self,
        ctx: &RequestContext,
        identity: &str,
        auto_create: bool,
    ) -> StorageResult<UserScopedStorage> {
        ensure_identity_valid(identity)?;

        let meta = match fetch_metadata(self.backend.as_ref(), ctx, identity).await? {
            Some(meta) => meta,
            None if auto_create => self.create_metadata(ctx, identity).await?,
            None => return Err(StorageError::NamespaceNotFound(identity.to_string())),
        };
        let meta = self.migrate_metadata(ctx, meta).await?;

        Ok(UserScopedStorage::new(self.backend.clone(), meta))
    }

    async fn create_metadata(&self, ctx: &RequestContext, identity: &str) -> StorageResult<Metadata> {
        let key = metadata_key(identity);
        let meta = Metadata::new(identity);
        let bytes = meta
            .encode()
            .map_err(|source| StorageError::MetadataEncodeFailed {
                identity: identity.to_string(),
                source,
            })?;

        let created = ctx
            .run(self.backend.put_if_absent(&key, METADATA_CONTENT_TYPE, Bytes::from(bytes)))
            .await?;
        let created = created.map_err(|source| StorageError::MetadataCreateFailed {
            identity: identity.to_string(),
            source,
        })?;
        if created {
            info!("created metadata for namespace {}", identity);
            return Ok(meta);
        }

        // Someone else created the record first; theirs wins.
        debug!("metadata for namespace {} created concurrently, re-reading", identity);
        fetch_metadata(self.backend.as_ref(), ctx, identity)
            .await?
            .ok_or_else(|| StorageError::MetadataCreateFailed {
                identity: identity.to_string(),
                source: BackendError::NotFound(key),
            })
    }

    /// Bring `meta` to the current schema and persist it. On failure nothing
    /// is written and the stored record keeps its old version.
    async fn migrate_metadata(&self, ctx: &RequestContext, meta: Metadata) -> StorageResult<Metadata> {
        if !meta.needs_migration() {
            return Ok(meta);
        }
        let identity = meta.email.clone();
        let from_version = meta.version;
        let migrated = meta.migrate_to_current();
        let bytes = migrated
            .encode()
            .map_err(|source| StorageError::MetadataEncodeFailed {
                identity: identity.clone(),
                source,
            })?;

        let key = metadata_key(&identity);
        let body = futures::stream::once(async move { Ok::<_, io::Error>(Bytes::from(bytes)) }).boxed();
        let persisted = ctx
            .run(self.backend.put(&key, METADATA_CONTENT_TYPE, body))
            .await?;
        persisted.map_err(|source| StorageError::MigrationFailed {
            identity: identity.clone(),
            source,
        })?;

        info!(
            "migrated metadata of namespace {} from version {} to {}",
            identity, from_version, migrated.version
        );
        Ok(migrated)
    }
}
