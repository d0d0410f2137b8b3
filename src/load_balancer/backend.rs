//! Backend abstraction.
//!
//! # Responsibilities
//! - Represent a single backend server parsed from its configured URL
//! - Track health state (healthy/unhealthy)
//! - Build upstream URIs for HTTP forwarding, WebSocket dialing and probes

use axum::http::uri::{Authority, PathAndQuery, Scheme};
use axum::http::Uri;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use url::Url;

/// Error raised when a configured backend address cannot be used.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("invalid backend address `{address}`: {reason}")]
    Invalid { address: String, reason: String },

    #[error("unsupported scheme `{scheme}` in backend address `{address}` (expected http)")]
    UnsupportedScheme { address: String, scheme: String },

    #[error("backend address `{0}` has no host")]
    MissingHost(String),
}

/// A single backend server.
#[derive(Debug)]
pub struct Backend {
    /// Parsed backend URL as configured.
    address: Url,
    /// `host[:port]` used for the `Host` header and the upstream URI.
    authority: Authority,
    /// Base path of the backend URL without the trailing slash.
    base_path: String,
    /// Current health state. Starts healthy until the first probe says otherwise.
    healthy: AtomicBool,
}

impl Backend {
    /// Parse a backend from its configured address string.
    pub fn parse(raw: &str) -> Result<Self, BackendError> {
        let address = Url::parse(raw).map_err(|e| BackendError::Invalid {
            address: raw.to_string(),
            reason: e.to_string(),
        })?;

        if address.scheme() != "http" {
            return Err(BackendError::UnsupportedScheme {
                address: raw.to_string(),
                scheme: address.scheme().to_string(),
            });
        }

        let host = address
            .host_str()
            .ok_or_else(|| BackendError::MissingHost(raw.to_string()))?;
        let authority_str = match address.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        let authority = authority_str
            .parse::<Authority>()
            .map_err(|e| BackendError::Invalid {
                address: raw.to_string(),
                reason: e.to_string(),
            })?;

        let base_path = address.path().trim_end_matches('/').to_string();

        Ok(Self {
            address,
            authority,
            base_path,
            healthy: AtomicBool::new(true),
        })
    }

    /// The configured backend URL.
    pub fn address(&self) -> &Url {
        &self.address
    }

    /// `host[:port]` of the backend.
    pub fn authority(&self) -> &Authority {
        &self.authority
    }

    /// Return true if the last probe (or the startup default) says healthy.
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    /// Store the health flag, returning the previous value.
    pub(crate) fn store_healthy(&self, healthy: bool) -> bool {
        self.healthy.swap(healthy, Ordering::AcqRel)
    }

    /// Join the backend base path with a request path.
    fn upstream_path(&self, path: &str) -> String {
        let path = if path.starts_with('/') { path.to_string() } else { format!("/{path}") };
        format!("{}{}", self.base_path, path)
    }

    /// Absolute URI for forwarding a request with the given path and query.
    pub fn http_uri(&self, path_and_query: Option<&PathAndQuery>) -> Result<Uri, axum::http::Error> {
        let (path, query) = match path_and_query {
            Some(pq) => (pq.path(), pq.query()),
            None => ("/", None),
        };
        let mut target = self.upstream_path(path);
        if let Some(query) = query {
            target.push('?');
            target.push_str(query);
        }

        Uri::builder()
            .scheme(Scheme::HTTP)
            .authority(self.authority.clone())
            .path_and_query(target)
            .build()
    }

    /// `ws://` URL used to dial the backend side of a tunnel.
    pub fn websocket_url(&self, path_and_query: Option<&PathAndQuery>) -> String {
        let (path, query) = match path_and_query {
            Some(pq) => (pq.path(), pq.query()),
            None => ("/", None),
        };
        let mut url = format!("ws://{}{}", self.authority, self.upstream_path(path));
        if let Some(query) = query {
            url.push('?');
            url.push_str(query);
        }
        url
    }

    /// URI probed by the health checker.
    pub fn probe_uri(&self, probe_path: &str) -> Result<Uri, axum::http::Error> {
        Uri::builder()
            .scheme(Scheme::HTTP)
            .authority(self.authority.clone())
            .path_and_query(self.upstream_path(probe_path))
            .build()
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.address)
    }
}
