//! Authenticated identity of the caller.
//!
//! Authentication happens in front of the service; the proxy forwards the
//! verified identity in a trusted header whose name is configurable.

use crate::{errors::AppError, state::AppState};
use axum::{extract::FromRequestParts, http::request::Parts};

/// The namespace key of the authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthIdentity(pub String);

impl FromRequestParts<AppState> for AuthIdentity {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = state.settings.identity_header.as_str();
        let identity = parts
            .headers
            .get(header)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| AppError::unauthorized(format!("missing `{}` header", header)))?;
        Ok(AuthIdentity(identity.to_string()))
    }
}
