//! src/services/local_backend.rs
//!
//! LocalObjectStore: a flat-key object store backed by SQLite for the
//! object index and local disk for payloads, sharded beneath
//! `base_path/{shard}/{shard}/{key}`. Download links are HMAC-signed URLs that
//! the service itself resolves through [`LocalObjectStore::open_signed`].
//!
//! Moving a payload into place and writing its index row happen under a lock
//! striped by key, so readers never see a row next to another writer's file.

use crate::{
    models::object::Object,
    services::{
        backend::{BackendError, BackendResult, ByteStream, ObjectBackend, ObjectReader},
        link_signer::LinkSigner,
    },
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::{StreamExt, TryStreamExt};
use md5::Context;
use sqlx::SqlitePool;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
    sync::Mutex,
};
use tokio_util::io::ReaderStream;
use tracing::debug;
use uuid::Uuid;

const MAX_OBJECT_KEY_LEN: usize = 1024;
const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");
const OBJECT_COLUMNS: &str = "key, content_type, size_bytes, etag, last_modified";
const KEY_LOCK_STRIPES: usize = 64;

#[derive(Clone)]
pub struct LocalObjectStore {
    /// Shared SQLite connection pool holding the object index.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,

    signer: LinkSigner,

    key_locks: Arc<[Mutex<()>]>,
}

impl LocalObjectStore {
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>, signer: LinkSigner) -> Self {
        Self {
            db,
            base_path: base_path.into(),
            signer,
            key_locks: (0..KEY_LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }

    /// Apply the index schema. Safe to run on every start.
    pub async fn run_migrations(db: &SqlitePool) -> sqlx::Result<usize> {
        let statements = SCHEMA
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        for stmt in &statements {
            debug!("Executing migration SQL: {}", stmt);
            sqlx::query(stmt).execute(db).await?;
        }
        Ok(statements.len())
    }

    /// Resolve a signed link into a readable object.
    pub async fn open_signed(
        &self,
        token: &str,
        expires: i64,
        signature: &str,
    ) -> BackendResult<ObjectReader> {
        let key = self.signer.verify(token, expires, signature)?;
        self.get(&key).await
    }

    /// Reject keys that could escape `base_path` or confuse the shard layout.
    fn ensure_key_safe(&self, key: &str) -> BackendResult<()> {
        let invalid = key.is_empty()
            || key.len() > MAX_OBJECT_KEY_LEN
            || key.starts_with('/')
            || key.ends_with('/')
            || key.split('/').any(|segment| segment == ".." || segment == ".")
            || key
                .bytes()
                .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0');
        if invalid {
            return Err(BackendError::InvalidKey(key.to_string()));
        }
        Ok(())
    }

    /// Two-level shard identifiers: the first two bytes of MD5(key) as hex.
    fn object_shards(key: &str) -> (String, String) {
        let digest = md5::compute(key);
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    /// Guards the payload file and index row of `key` together.
    fn key_lock(&self, key: &str) -> &Mutex<()> {
        let digest = md5::compute(key);
        &self.key_locks[usize::from(digest[2]) % self.key_locks.len()]
    }

    /// Open the payload of `key` while holding its lock, so the returned row
    /// and file belong to the same write.
    async fn open_object(&self, key: &str) -> BackendResult<(Object, File)> {
        let _guard = self.key_lock(key).lock().await;
        let object = self
            .fetch_object(key)
            .await?
            .ok_or_else(|| BackendError::NotFound(key.to_string()))?;

        let file = File::open(self.object_path(key)).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                BackendError::NotFound(key.to_string())
            } else {
                BackendError::Io(err)
            }
        })?;
        Ok((object, file))
    }

    /// `base_path/{shard}/{shard}/{key}`. Parent directories may not exist yet.
    fn object_path(&self, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(key);
        let mut path = self.base_path.clone();
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    async fn fetch_object(&self, key: &str) -> BackendResult<Option<Object>> {
        let sql = format!("SELECT {OBJECT_COLUMNS} FROM objects WHERE key = ?");
        Ok(sqlx::query_as::<_, Object>(&sql)
            .bind(key)
            .fetch_optional(&*self.db)
            .await?)
    }

    /// Insert or replace an index row (S3-like overwrite semantics).
    async fn upsert_object(&self, object: &Object) -> BackendResult<Object> {
        let sql = format!(
            "INSERT INTO objects ({OBJECT_COLUMNS}) VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET
                 content_type = excluded.content_type,
                 size_bytes = excluded.size_bytes,
                 etag = excluded.etag,
                 last_modified = excluded.last_modified
             RETURNING {OBJECT_COLUMNS}"
        );
        Ok(sqlx::query_as::<_, Object>(&sql)
            .bind(&object.key)
            .bind(&object.content_type)
            .bind(object.size_bytes)
            .bind(&object.etag)
            .bind(object.last_modified)
            .fetch_one(&*self.db)
            .await?)
    }

    /// Stream `body` into a temp file next to `dest`, computing size and etag.
    async fn stage_payload(&self, dest: &Path, body: ByteStream<'_>) -> BackendResult<StagedPayload> {
        let parent = dest.parent().ok_or_else(|| {
            BackendError::Io(io::Error::new(
                ErrorKind::Other,
                "object path missing parent directory",
            ))
        })?;
        fs::create_dir_all(parent).await?;

        let mut staged = StagedPayload::new(parent.join(format!(".tmp-{}", Uuid::new_v4())));
        let mut file = match File::create(&staged.path).await {
            // A concurrent delete may prune the shard directory in between.
            Err(err) if err.kind() == ErrorKind::NotFound => {
                fs::create_dir_all(parent).await?;
                File::create(&staged.path).await?
            }
            other => other?,
        };
        let mut digest = Context::new();
        let mut body = body;
        while let Some(chunk) = body.try_next().await? {
            staged.size_bytes += chunk.len() as i64;
            digest.consume(&chunk);
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        file.sync_all().await?;
        staged.etag = format!("{:x}", digest.compute());
        Ok(staged)
    }

    /// Remove the payload of `key` and prune empty shard directories.
    async fn remove_payload(&self, key: &str) -> BackendResult<()> {
        let file_path = self.object_path(key);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed physical file {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("file {} already missing", file_path.display());
            }
            Err(err) => return Err(BackendError::Io(err)),
        }
        if let Some(parent) = file_path.parent() {
            self.prune_empty_dirs(parent, &self.base_path).await;
        }
        Ok(())
    }

    /// Recursively remove empty directories up to (not including) `stop`.
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl ObjectBackend for LocalObjectStore {
    async fn head(&self, key: &str) -> BackendResult<Option<Object>> {
        self.ensure_key_safe(key)?;
        self.fetch_object(key).await
    }

    async fn get(&self, key: &str) -> BackendResult<ObjectReader> {
        self.ensure_key_safe(key)?;
        let (object, file) = self.open_object(key).await?;
        Ok(ObjectReader {
            object,
            body: ReaderStream::new(file).boxed(),
        })
    }

    async fn put(
        &self,
        key: &str,
        content_type: &str,
        body: ByteStream<'_>,
    ) -> BackendResult<Object> {
        self.ensure_key_safe(key)?;
        let file_path = self.object_path(key);
        let staged = self.stage_payload(&file_path, body).await?;
        let object = staged.describe(key, content_type);

        let _guard = self.key_lock(key).lock().await;
        staged.persist(&file_path).await?;
        match self.upsert_object(&object).await {
            Ok(obj) => Ok(obj),
            Err(err) => {
                let _ = fs::remove_file(&file_path).await;
                Err(err)
            }
        }
    }

    /// The index row is inserted with `ON CONFLICT DO NOTHING` inside a
    /// transaction and the payload only moves into place when this call won.
    async fn put_if_absent(&self, key: &str, content_type: &str, body: Bytes) -> BackendResult<bool> {
        self.ensure_key_safe(key)?;
        let file_path = self.object_path(key);
        let body = futures::stream::once(async move { Ok::<_, io::Error>(body) }).boxed();
        let staged = self.stage_payload(&file_path, body).await?;
        let object = staged.describe(key, content_type);

        let _guard = self.key_lock(key).lock().await;
        let mut tx = self.db.begin().await?;
        let sql = format!(
            "INSERT INTO objects ({OBJECT_COLUMNS}) VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(key) DO NOTHING"
        );
        let inserted = sqlx::query(&sql)
            .bind(&object.key)
            .bind(&object.content_type)
            .bind(object.size_bytes)
            .bind(&object.etag)
            .bind(object.last_modified)
            .execute(&mut *tx)
            .await?;
        if inserted.rows_affected() == 0 {
            debug!("object {} already exists, discarding staged payload", key);
            return Ok(false);
        }

        staged.persist(&file_path).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn delete(&self, key: &str) -> BackendResult<()> {
        self.ensure_key_safe(key)?;
        let _guard = self.key_lock(key).lock().await;
        let result = sqlx::query("DELETE FROM objects WHERE key = ?")
            .bind(key)
            .execute(&*self.db)
            .await?;
        if result.rows_affected() == 0 {
            debug!("delete of absent object {}", key);
        }
        self.remove_payload(key).await
    }

    async fn copy(&self, from: &str, to: &str) -> BackendResult<Object> {
        self.ensure_key_safe(from)?;
        self.ensure_key_safe(to)?;
        let (source, reader) = self.open_object(from).await?;

        let dest_path = self.object_path(to);
        let staged = self
            .stage_payload(&dest_path, ReaderStream::new(reader).boxed())
            .await?;
        let object = Object {
            content_type: source.content_type,
            ..staged.describe(to, "")
        };

        let _guard = self.key_lock(to).lock().await;
        staged.persist(&dest_path).await?;
        match self.upsert_object(&object).await {
            Ok(obj) => Ok(obj),
            Err(err) => {
                let _ = fs::remove_file(&dest_path).await;
                Err(err)
            }
        }
    }

    async fn list(&self, prefix: &str) -> BackendResult<Vec<Object>> {
        // substr() keeps the match case-sensitive, unlike LIKE.
        let sql = format!(
            "SELECT {OBJECT_COLUMNS} FROM objects
             WHERE substr(key, 1, length(?)) = ?
             ORDER BY key ASC"
        );
        Ok(sqlx::query_as::<_, Object>(&sql)
            .bind(prefix)
            .bind(prefix)
            .fetch_all(&*self.db)
            .await?)
    }

    fn presign_get(&self, key: &str, expiration: Duration) -> BackendResult<String> {
        self.ensure_key_safe(key)?;
        Ok(self.signer.sign(key, expiration)?)
    }
}

/// A payload written to a temp file but not yet moved into place.
///
/// The temp file is removed when the value is dropped without
/// [`StagedPayload::persist`], including when the owning future is dropped.
struct StagedPayload {
    path: PathBuf,
    size_bytes: i64,
    etag: String,
    armed: bool,
}

impl StagedPayload {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            size_bytes: 0,
            etag: String::new(),
            armed: true,
        }
    }

    fn describe(&self, key: &str, content_type: &str) -> Object {
        Object {
            key: key.to_string(),
            content_type: Some(content_type.to_string()).filter(|ct| !ct.is_empty()),
            size_bytes: self.size_bytes,
            etag: Some(self.etag.clone()),
            last_modified: Utc::now(),
        }
    }

    async fn persist(mut self, dest: &Path) -> io::Result<()> {
        if let Err(err) = fs::rename(&self.path, dest).await {
            if err.kind() != ErrorKind::AlreadyExists {
                return Err(err);
            }
            fs::remove_file(dest).await?;
            fs::rename(&self.path, dest).await?;
        }
        self.armed = false;
        Ok(())
    }
}

impl Drop for StagedPayload {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Err(err) = std::fs::remove_file(&self.path) {
            if err.kind() != ErrorKind::NotFound {
                debug!("failed to remove temp file {}: {}", self.path.display(), err);
            }
        }
    }
}
