//! HMAC-signed, time-limited download links.
//!
//! A link has the form
//! `{base_url}/download/{token}?expires={unix}&signature={sig}` where `token`
//! is the URL-safe base64 of the object key and `sig` the URL-safe base64 of
//! `HMAC-SHA256(signing_key, "{key}\n{expires}")`.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::Duration;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Route prefix served by the download handler.
pub const DOWNLOAD_ROUTE: &str = "/download";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LinkError {
    #[error("link signing key must not be empty")]
    EmptyKey,
    #[error("link expiration must be positive")]
    InvalidExpiration,
    #[error("link token is malformed")]
    MalformedToken,
    #[error("link signature does not match")]
    BadSignature,
    #[error("link expired")]
    Expired,
}

#[derive(Clone)]
pub struct LinkSigner {
    mac: HmacSha256,
    base_url: String,
}

impl std::fmt::Debug for LinkSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkSigner")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl LinkSigner {
    pub fn new(key: impl Into<Vec<u8>>, base_url: impl Into<String>) -> Result<Self, LinkError> {
        let key = key.into();
        if key.is_empty() {
            return Err(LinkError::EmptyKey);
        }
        let mac = <HmacSha256 as Mac>::new_from_slice(&key).map_err(|_| LinkError::EmptyKey)?;
        Ok(Self {
            mac,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Sign `object_key` for `expiration` from now.
    pub fn sign(&self, object_key: &str, expiration: Duration) -> Result<String, LinkError> {
        if expiration.is_zero() {
            return Err(LinkError::InvalidExpiration);
        }
        let ttl = i64::try_from(expiration.as_secs()).map_err(|_| LinkError::InvalidExpiration)?;
        // Round sub-second lifetimes up so the link is never born expired.
        let ttl = if expiration.subsec_nanos() > 0 { ttl.saturating_add(1) } else { ttl };
        let expires = Utc::now().timestamp().saturating_add(ttl);
        Ok(self.sign_until(object_key, expires))
    }

    /// Sign `object_key` with an absolute unix expiry.
    pub fn sign_until(&self, object_key: &str, expires: i64) -> String {
        let token = URL_SAFE_NO_PAD.encode(object_key);
        let signature = URL_SAFE_NO_PAD.encode(self.mac(object_key, expires).finalize().into_bytes());
        format!(
            "{}{}/{}?expires={}&signature={}",
            self.base_url, DOWNLOAD_ROUTE, token, expires, signature
        )
    }

    /// Check a presented link against the current time.
    pub fn verify(&self, token: &str, expires: i64, signature: &str) -> Result<String, LinkError> {
        self.verify_at(token, expires, signature, Utc::now().timestamp())
    }

    /// Check a presented link and return the object key it grants.
    pub fn verify_at(
        &self,
        token: &str,
        expires: i64,
        signature: &str,
        now: i64,
    ) -> Result<String, LinkError> {
        let key_bytes = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|_| LinkError::MalformedToken)?;
        let object_key = String::from_utf8(key_bytes).map_err(|_| LinkError::MalformedToken)?;
        let presented = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| LinkError::BadSignature)?;

        self.mac(&object_key, expires)
            .verify_slice(&presented)
            .map_err(|_| LinkError::BadSignature)?;

        if now >= expires {
            return Err(LinkError::Expired);
        }
        Ok(object_key)
    }

    fn mac(&self, object_key: &str, expires: i64) -> HmacSha256 {
        let mut mac = self.mac.clone();
        mac.update(object_key.as_bytes());
        mac.update(b"\n");
        mac.update(expires.to_string().as_bytes());
        mac
    }
}

/// Split a link produced by [`LinkSigner::sign`] back into its parts.
#[cfg(test)]
pub(crate) fn parse_link(link: &str) -> Option<(String, i64, String)> {
    let (_, rest) = link.split_once(&format!("{DOWNLOAD_ROUTE}/"))?;
    let (token, query) = rest.split_once('?')?;
    let mut expires = None;
    let mut signature = None;
    for pair in query.split('&') {
        match pair.split_once('=')? {
            ("expires", v) => expires = v.parse().ok(),
            ("signature", v) => signature = Some(v.to_string()),
            _ => {}
        }
    }
    Some((token.to_string(), expires?, signature?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> LinkSigner {
        LinkSigner::new("test-key", "http://files.local/").unwrap()
    }

    #[test]
    fn empty_key_is_rejected_at_construction() {
        assert_eq!(
            LinkSigner::new(Vec::<u8>::new(), "http://x").unwrap_err(),
            LinkError::EmptyKey
        );
    }

    #[test]
    fn signed_link_verifies_to_key() {
        let link = signer().sign_until("a@example.com/files/notes.txt", 1_000);
        assert!(link.starts_with("http://files.local/download/"));
        let (token, expires, sig) = parse_link(&link).unwrap();
        assert_eq!(expires, 1_000);
        assert_eq!(
            signer().verify_at(&token, expires, &sig, 999).unwrap(),
            "a@example.com/files/notes.txt"
        );
    }

    #[test]
    fn expired_link_is_rejected() {
        let link = signer().sign_until("k", 1_000);
        let (token, expires, sig) = parse_link(&link).unwrap();
        assert_eq!(
            signer().verify_at(&token, expires, &sig, 1_000),
            Err(LinkError::Expired)
        );
    }

    #[test]
    fn tampering_is_detected() {
        let link = signer().sign_until("a/files/x", 1_000);
        let (token, expires, sig) = parse_link(&link).unwrap();

        assert_eq!(
            signer().verify_at(&token, expires + 60, &sig, 0),
            Err(LinkError::BadSignature)
        );
        let other_token = URL_SAFE_NO_PAD.encode("b/files/x");
        assert_eq!(
            signer().verify_at(&other_token, expires, &sig, 0),
            Err(LinkError::BadSignature)
        );
        let other_signer = LinkSigner::new("other-key", "http://files.local").unwrap();
        assert_eq!(
            other_signer.verify_at(&token, expires, &sig, 0),
            Err(LinkError::BadSignature)
        );
        assert_eq!(
            signer().verify_at("%%%", expires, &sig, 0),
            Err(LinkError::MalformedToken)
        );
    }

    #[test]
    fn zero_expiration_is_rejected() {
        assert_eq!(
            signer().sign("k", Duration::ZERO),
            Err(LinkError::InvalidExpiration)
        );
    }

    #[test]
    fn relative_expiration_is_in_the_future() {
        let link = signer().sign("k", Duration::from_secs(15 * 60)).unwrap();
        let (token, expires, sig) = parse_link(&link).unwrap();
        assert!(expires > Utc::now().timestamp());
        assert_eq!(signer().verify(&token, expires, &sig).unwrap(), "k");
    }
}
