//! Fixtures shared by the service tests.

use crate::{
    models::object::Object,
    services::{
        backend::{BackendError, BackendResult, ByteStream, ObjectBackend, ObjectReader},
        link_signer::LinkSigner,
        local_backend::LocalObjectStore,
    },
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use tempfile::TempDir;

pub const TEST_PUBLIC_URL: &str = "http://files.test";

/// A [`LocalObjectStore`] rooted in a fresh temp dir with its own SQLite file.
/// Keep the `TempDir` alive for as long as the store is used.
pub async fn local_store() -> (TempDir, Arc<LocalObjectStore>) {
    let dir = TempDir::new().unwrap();
    let options = SqliteConnectOptions::new()
        .filename(dir.path().join("index.db"))
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .unwrap();
    LocalObjectStore::run_migrations(&pool).await.unwrap();

    let signer = LinkSigner::new("test-signing-key", TEST_PUBLIC_URL).unwrap();
    let store = LocalObjectStore::new(Arc::new(pool), dir.path().join("objects"), signer);
    (dir, Arc::new(store))
}

pub fn body(content: &str) -> ByteStream<'static> {
    futures::stream::once(futures::future::ready(Ok(Bytes::from(content.to_string())))).boxed()
}

pub async fn read_body(reader: ObjectReader) -> Vec<u8> {
    let chunks: Vec<Bytes> = reader.body.try_collect().await.unwrap();
    chunks.concat()
}

fn injected(op: &str) -> BackendError {
    BackendError::Io(io::Error::other(format!("injected {op} failure")))
}

/// Delegates to a real store but fails selected operations on demand.
/// Uses the trait's default check-then-put `put_if_absent`.
pub struct FaultyBackend {
    inner: Arc<LocalObjectStore>,
    pub fail_puts: AtomicBool,
    pub fail_deletes: AtomicBool,
    pub fail_lists: AtomicBool,
}

impl FaultyBackend {
    pub fn new(inner: Arc<LocalObjectStore>) -> Self {
        Self {
            inner,
            fail_puts: AtomicBool::new(false),
            fail_deletes: AtomicBool::new(false),
            fail_lists: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl ObjectBackend for FaultyBackend {
    async fn head(&self, key: &str) -> BackendResult<Option<Object>> {
        self.inner.head(key).await
    }

    async fn get(&self, key: &str) -> BackendResult<ObjectReader> {
        self.inner.get(key).await
    }

    async fn put(
        &self,
        key: &str,
        content_type: &str,
        body: ByteStream<'_>,
    ) -> BackendResult<Object> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(injected("put"));
        }
        self.inner.put(key, content_type, body).await
    }

    async fn delete(&self, key: &str) -> BackendResult<()> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(injected("delete"));
        }
        self.inner.delete(key).await
    }

    async fn copy(&self, from: &str, to: &str) -> BackendResult<Object> {
        self.inner.copy(from, to).await
    }

    async fn list(&self, prefix: &str) -> BackendResult<Vec<Object>> {
        if self.fail_lists.load(Ordering::SeqCst) {
            return Err(injected("list"));
        }
        self.inner.list(prefix).await
    }

    fn presign_get(&self, key: &str, expiration: Duration) -> BackendResult<String> {
        self.inner.presign_get(key, expiration)
    }
}
