//! Shared state handed to every handler.

use crate::{
    config::AppConfig,
    services::{
        context::RequestContext, local_backend::LocalObjectStore,
        storage_factory::StorageFactory,
    },
};
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use std::{sync::Arc, time::Duration};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Lifetime of links handed out by `GET /api/link`.
pub const DIRECT_LINK_TTL: Duration = Duration::from_secs(15 * 60);

/// Characters that cannot appear verbatim in a URL path segment.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Request-facing settings derived from [`AppConfig`].
#[derive(Debug, Clone)]
pub struct Settings {
    pub public_url: String,
    pub identity_header: String,
    pub feed_link_ttl: Duration,
    pub request_timeout: Duration,
}

impl From<&AppConfig> for Settings {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            public_url: cfg.public_url.trim_end_matches('/').to_string(),
            identity_header: cfg.identity_header.clone(),
            feed_link_ttl: cfg.feed_link_ttl(),
            request_timeout: cfg.request_timeout(),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub storage: StorageFactory,
    /// The concrete store, for readiness probes and signed downloads.
    pub store: Arc<LocalObjectStore>,
    pub settings: Arc<Settings>,
    /// Fired on shutdown; aborts storage work still in flight.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(store: Arc<LocalObjectStore>, settings: Settings) -> Self {
        Self {
            storage: StorageFactory::new(store.clone()),
            store,
            settings: Arc::new(settings),
            shutdown: CancellationToken::new(),
        }
    }

    /// Fresh context bounded by the configured request timeout and tied to
    /// server shutdown.
    pub fn request_context(&self) -> RequestContext {
        RequestContext::child_of(&self.shutdown)
            .with_deadline(Instant::now() + self.settings.request_timeout)
    }

    pub fn feed_url(&self, identity: &str, secret: &str) -> String {
        self.namespace_url("rss", identity, secret)
    }

    pub fn share_url(&self, identity: &str, secret: &str) -> String {
        self.namespace_url("share", identity, secret)
    }

    fn namespace_url(&self, route: &str, identity: &str, secret: &str) -> String {
        format!(
            "{}/{}/{}/{}",
            self.settings.public_url,
            route,
            utf8_percent_encode(identity, PATH_SEGMENT),
            utf8_percent_encode(secret, PATH_SEGMENT)
        )
    }
}

#[cfg(test)]
pub fn test_state(store: Arc<LocalObjectStore>) -> AppState {
    use crate::services::testing::TEST_PUBLIC_URL;

    AppState::new(
        store,
        Settings {
            public_url: TEST_PUBLIC_URL.to_string(),
            identity_header: "x-forwarded-email".to_string(),
            feed_link_ttl: Duration::from_secs(3600),
            request_timeout: Duration::from_secs(30),
        },
    )
}
