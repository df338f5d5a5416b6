//! The versioned descriptor stored at `{identity}/metadata.json`.
//!
//! Every namespace carries exactly one of these records. It names the owning
//! identity and the secret token that gates share and feed links. Records
//! written by older schema revisions are accepted by [`Metadata::decode`] and
//! brought forward one step at a time by [`Metadata::migrate`].

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Schema revision written by this build.
pub const CURRENT_VERSION: u32 = 2;

/// Well-known file name of the record inside a namespace.
pub const METADATA_FILE: &str = "metadata.json";

/// Content type used when persisting the record.
pub const METADATA_CONTENT_TYPE: &str = "application/json";

type MigrationStep = fn(Metadata) -> Metadata;

/// Migration table. Entry `n` advances a record from version `n + 1` to `n + 2`.
const MIGRATIONS: &[MigrationStep] = &[migrate_v1_to_v2];

const _: () = assert!(MIGRATIONS.len() + 1 == CURRENT_VERSION as usize);

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("metadata is not valid json: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("metadata version {0} is not supported (expected 1..={max})", max = CURRENT_VERSION)]
    UnsupportedVersion(u32),
    #[error("metadata does not contain an email")]
    MissingEmail,
    #[error("metadata version {version} requires a non-empty `{field}`")]
    MissingSecret { version: u32, field: &'static str },
    #[error("metadata version {version} must not carry `{field}`")]
    UnexpectedField { version: u32, field: &'static str },
    #[error("metadata document exceeds {limit} bytes")]
    TooLarge { limit: usize },
    #[error("metadata could not be encoded: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Namespace descriptor.
///
/// `rss_secret` only exists in version 1 documents; from version 2 on the
/// token lives in `secret` and `rss_secret` stays empty (and is omitted when
/// encoding).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Metadata {
    /// Schema revision, `1..=CURRENT_VERSION`.
    pub version: u32,

    /// Identity that owns the namespace. Must equal the namespace key.
    pub email: String,

    /// Token authorizing share and feed links.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub secret: String,

    /// Version 1 name of the token.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub rss_secret: String,
}

impl Metadata {
    /// Fresh current-version record with a random v4 UUID secret.
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            version: CURRENT_VERSION,
            email: identity.into(),
            secret: Uuid::new_v4().to_string(),
            rss_secret: String::new(),
        }
    }

    /// Parse and validate a stored document.
    pub fn decode(bytes: &[u8]) -> Result<Self, MetadataError> {
        let meta: Metadata = serde_json::from_slice(bytes)?;
        meta.validate()?;
        Ok(meta)
    }

    pub fn encode(&self) -> Result<Vec<u8>, MetadataError> {
        serde_json::to_vec(self).map_err(MetadataError::Encode)
    }

    pub fn needs_migration(&self) -> bool {
        self.version < CURRENT_VERSION
    }

    /// Advance the record by exactly one schema version.
    ///
    /// Current records (and versions without a table entry) come back
    /// unchanged, so calling this on an up-to-date record is a no-op.
    pub fn migrate(self) -> Self {
        if !self.needs_migration() {
            return self;
        }
        let step = (self.version as usize)
            .checked_sub(1)
            .and_then(|idx| MIGRATIONS.get(idx));
        match step {
            Some(step) => step(self),
            None => self,
        }
    }

    /// Apply [`Metadata::migrate`] until no migration is needed.
    pub fn migrate_to_current(mut self) -> Self {
        while self.needs_migration() {
            let before = self.version;
            self = self.migrate();
            if self.version == before {
                break;
            }
        }
        self
    }

    /// The token used to gate share and feed links, whichever field holds it.
    pub fn link_secret(&self) -> &str {
        if self.version == 1 {
            &self.rss_secret
        } else {
            &self.secret
        }
    }

    fn validate(&self) -> Result<(), MetadataError> {
        if !(1..=CURRENT_VERSION).contains(&self.version) {
            return Err(MetadataError::UnsupportedVersion(self.version));
        }
        if self.email.is_empty() {
            return Err(MetadataError::MissingEmail);
        }

        let (required, forbidden) = if self.version == 1 {
            (("rss_secret", &self.rss_secret), ("secret", &self.secret))
        } else {
            (("secret", &self.secret), ("rss_secret", &self.rss_secret))
        };
        if required.1.is_empty() {
            return Err(MetadataError::MissingSecret {
                version: self.version,
                field: required.0,
            });
        }
        if !forbidden.1.is_empty() {
            return Err(MetadataError::UnexpectedField {
                version: self.version,
                field: forbidden.0,
            });
        }
        Ok(())
    }
}

fn migrate_v1_to_v2(mut meta: Metadata) -> Metadata {
    meta.secret = std::mem::take(&mut meta.rss_secret);
    meta.version = 2;
    meta
}
