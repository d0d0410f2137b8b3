//! Token authentication.

use axum::http::{HeaderMap, HeaderName};
use axum::http::header::InvalidHeaderName;

/// Header carrying the token when none is configured.
pub const DEFAULT_AUTH_HEADER: &str = "x-auth-token";

/// Validates a single credential header against the configured token list.
#[derive(Debug, Clone)]
pub struct Authenticator {
    header: HeaderName,
    tokens: Vec<String>,
}

impl Authenticator {
    pub fn new(header: HeaderName, tokens: Vec<String>) -> Self {
        Self { header, tokens }
    }

    /// Build from a header name string and tokens.
    pub fn from_parts(header: &str, tokens: &[String]) -> Result<Self, InvalidHeaderName> {
        let header = HeaderName::from_bytes(header.as_bytes())?;
        if tokens.is_empty() {
            tracing::warn!(header = %header, "No valid tokens configured, every request will be rejected");
        }
        Ok(Self::new(header, tokens.to_vec()))
    }

    /// Header inspected for the token.
    pub fn header(&self) -> &HeaderName {
        &self.header
    }

    /// True if the request carries a configured token.
    pub fn authorize(&self, headers: &HeaderMap) -> bool {
        let Some(value) = headers.get(&self.header).and_then(|v| v.to_str().ok()) else {
            return false;
        };
        self.tokens.iter().any(|token| token == value)
    }
}
