//! The object store seam.
//!
//! Everything above this trait speaks in flat string keys; everything below
//! it is a concrete store. [`crate::services::local_backend::LocalObjectStore`]
//! is the store shipped with the service.

use crate::{models::object::Object, services::link_signer::LinkError};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt, stream::BoxStream};
use std::{fmt, io, time::Duration};
use thiserror::Error;

/// Streaming object payload.
pub type ByteStream<'a> = BoxStream<'a, io::Result<Bytes>>;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("object `{0}` not found")]
    NotFound(String),
    #[error("invalid object key `{0}`")]
    InvalidKey(String),
    #[error("object `{key}` exceeds {limit} bytes")]
    TooLarge { key: String, limit: usize },
    #[error(transparent)]
    Link(#[from] LinkError),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl BackendError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, BackendError::NotFound(_))
    }
}

pub type BackendResult<T> = Result<T, BackendError>;

/// An object record together with its payload stream.
///
/// Dropping the reader releases the underlying file or connection.
pub struct ObjectReader {
    pub object: Object,
    pub body: ByteStream<'static>,
}

impl fmt::Debug for ObjectReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectReader")
            .field("object", &self.object)
            .finish_non_exhaustive()
    }
}

impl ObjectReader {
    /// Buffer the whole payload. Only meant for small objects such as
    /// metadata documents; fails once more than `limit` bytes arrive.
    pub async fn read_to_vec(self, limit: usize) -> BackendResult<Vec<u8>> {
        let key = self.object.key;
        let mut buf = Vec::new();
        let mut body = self.body;
        while let Some(chunk) = body.try_next().await? {
            if buf.len() + chunk.len() > limit {
                return Err(BackendError::TooLarge { key, limit });
            }
            buf.extend_from_slice(&chunk);
        }
        Ok(buf)
    }
}

#[async_trait]
pub trait ObjectBackend: Send + Sync {
    /// Object record, or `None` when the key is absent.
    async fn head(&self, key: &str) -> BackendResult<Option<Object>>;

    /// Open an object for streaming. Absent keys yield `NotFound`.
    async fn get(&self, key: &str) -> BackendResult<ObjectReader>;

    /// Store `body` under `key`, replacing any existing object.
    async fn put(
        &self,
        key: &str,
        content_type: &str,
        body: ByteStream<'_>,
    ) -> BackendResult<Object>;

    /// Create `key` only if it does not exist yet. Returns whether this call
    /// created it.
    ///
    /// The default is a plain check-then-put: two racing callers may both
    /// observe absence and the last writer wins. Stores with a conditional
    /// write primitive should override it.
    async fn put_if_absent(&self, key: &str, content_type: &str, body: Bytes) -> BackendResult<bool> {
        if self.head(key).await?.is_some() {
            return Ok(false);
        }
        let body = futures::stream::once(async move { Ok(body) }).boxed();
        self.put(key, content_type, body).await?;
        Ok(true)
    }

    /// Remove `key`. Removing an absent key succeeds.
    async fn delete(&self, key: &str) -> BackendResult<()>;

    /// Server-side copy. The destination gets a fresh last-modified time.
    async fn copy(&self, from: &str, to: &str) -> BackendResult<Object>;

    /// Every object whose key starts with `prefix`, in ascending key order.
    async fn list(&self, prefix: &str) -> BackendResult<Vec<Object>>;

    /// Signed retrieval URL for `key`, valid for `expiration`. Does not check
    /// that the object exists.
    fn presign_get(&self, key: &str, expiration: Duration) -> BackendResult<String>;
}
