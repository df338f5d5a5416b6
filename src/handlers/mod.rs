//! HTTP handlers. Thin glue between axum extractors and the storage layer.

pub mod download_handlers;
pub mod feed_handlers;
pub mod file_handlers;
pub mod health_handlers;
pub mod identity;
