use crate::{
    models::metadata::MetadataError,
    services::{backend::BackendError, context::Interrupted},
};
use thiserror::Error;

/// Errors returned by the storage factory and user-scoped handles.
///
/// Every variant names the namespace or object key involved so callers can
/// log and map it without extra context.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("identity `{0}` is not a valid namespace key")]
    InvalidIdentity(String),
    #[error("namespace `{0}` not found")]
    NamespaceNotFound(String),
    #[error("metadata of namespace `{identity}` is corrupt")]
    CorruptMetadata {
        identity: String,
        #[source]
        source: MetadataError,
    },
    #[error("metadata fetched for namespace `{expected}` belongs to `{found}`")]
    IdentityMismatch { expected: String, found: String },
    #[error("failed to read metadata of namespace `{identity}`")]
    MetadataReadFailed {
        identity: String,
        #[source]
        source: BackendError,
    },
    #[error("failed to create metadata for namespace `{identity}`")]
    MetadataCreateFailed {
        identity: String,
        #[source]
        source: BackendError,
    },
    #[error("failed to encode metadata of namespace `{identity}`")]
    MetadataEncodeFailed {
        identity: String,
        #[source]
        source: MetadataError,
    },
    #[error("failed to persist migrated metadata of namespace `{identity}`")]
    MigrationFailed {
        identity: String,
        #[source]
        source: BackendError,
    },
    #[error("failed to upload `{key}`")]
    UploadFailed {
        key: String,
        #[source]
        source: BackendError,
    },
    #[error("failed to delete `{key}`")]
    DeleteFailed {
        key: String,
        #[source]
        source: BackendError,
    },
    #[error("failed to copy `{from}` to `{to}`")]
    CopyFailed {
        from: String,
        to: String,
        #[source]
        source: BackendError,
    },
    #[error("copied `{from}` to `{to}` but could not remove the original")]
    MoveDeleteFailed {
        from: String,
        to: String,
        #[source]
        source: Box<StorageError>,
    },
    #[error("failed to list `{prefix}`")]
    ListFailed {
        prefix: String,
        #[source]
        source: BackendError,
    },
    #[error("failed to sign a download link for `{key}`")]
    SignFailed {
        key: String,
        #[source]
        source: BackendError,
    },
    #[error("operation canceled")]
    Canceled,
    #[error("operation deadline exceeded")]
    DeadlineExceeded,
}

impl From<Interrupted> for StorageError {
    fn from(value: Interrupted) -> Self {
        match value {
            Interrupted::Canceled => StorageError::Canceled,
            Interrupted::DeadlineExceeded => StorageError::DeadlineExceeded,
        }
    }
}

impl StorageError {
    /// The backend failure underneath this error, if any.
    pub fn backend_source(&self) -> Option<&BackendError> {
        match self {
            StorageError::MetadataReadFailed { source, .. }
            | StorageError::MetadataCreateFailed { source, .. }
            | StorageError::MigrationFailed { source, .. }
            | StorageError::UploadFailed { source, .. }
            | StorageError::DeleteFailed { source, .. }
            | StorageError::CopyFailed { source, .. }
            | StorageError::ListFailed { source, .. }
            | StorageError::SignFailed { source, .. } => Some(source),
            StorageError::MoveDeleteFailed { source, .. } => source.backend_source(),
            _ => None,
        }
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, StorageError::Canceled | StorageError::DeadlineExceeded)
    }
}

pub type StorageResult<T> = Result<T, StorageError>;
