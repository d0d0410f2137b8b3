//! HTTP request forwarding.
//!
//! # Responsibilities
//! - Select a backend and send it a rewritten copy of the request
//! - Stream the backend response back through the byte meter
//! - Map transport failures to 502 Bad Gateway
//! - Optionally fail over to another backend for idempotent requests
//!
//! # Design Decisions
//! - No failover unless `retries.failover_attempts > 0`
//! - Only bodies with a known, bounded length are buffered for replay;
//!   anything else is streamed once
//! - Requests without a body are sent without one

use axum::body::{Body, Bytes, HttpBody};
use axum::http::{request::Parts, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use std::net::SocketAddr;

use crate::http::request::upstream_headers;
use crate::http::response::{self, metered};
use crate::http::server::AppState;
use crate::load_balancer::backend::Backend;

/// Outbound request body, either streamed once or replayable.
enum Outbound {
    Stream(Option<Body>),
    Replay(Bytes),
}

impl Outbound {
    fn body(&mut self) -> Body {
        match self {
            Outbound::Stream(body) => body.take().unwrap_or_else(Body::empty),
            Outbound::Replay(bytes) => Body::from(bytes.clone()),
        }
    }

    fn replayable(&self) -> bool {
        matches!(self, Outbound::Replay(_))
    }
}

/// Body length if it is known up front and fits within `limit`.
fn bounded_length(body: &Body, limit: usize) -> Option<u64> {
    body.size_hint().exact().filter(|&length| length <= limit as u64)
}

/// Forward an authorized request to a backend and relay the response.
pub async fn forward(state: &AppState, client_addr: SocketAddr, request: Request<Body>) -> Response {
    state.metrics.increment_requests();

    let (parts, body) = request.into_parts();
    let limit = state.retries.max_buffered_body_bytes;
    let failover = state.retries.failover_attempts > 0 && parts.method.is_idempotent();

    let known_length = bounded_length(&body, limit);

    let mut outbound = if known_length == Some(0) {
        Outbound::Replay(Bytes::new())
    } else if failover && known_length.is_some() {
        match axum::body::to_bytes(body, limit).await {
            Ok(bytes) => {
                state.metrics.add_bytes_received(bytes.len() as u64);
                Outbound::Replay(bytes)
            }
            Err(e) => {
                tracing::warn!(client = %client_addr, error = %e, "Failed to read request body");
                return (StatusCode::BAD_REQUEST, "Invalid request body").into_response();
            }
        }
    } else {
        let metrics = state.metrics.clone();
        Outbound::Stream(Some(metered(body, move |n| metrics.add_bytes_received(n))))
    };

    let max_attempts = if failover && outbound.replayable() {
        1 + state.retries.failover_attempts
    } else {
        1
    };

    let mut attempt = 0;
    loop {
        attempt += 1;
        let target = state.pool.select();

        let upstream = match build_request(&parts, &target, client_addr, outbound.body()) {
            Ok(req) => req,
            Err(e) => {
                tracing::error!(backend = %target, error = %e, "Failed to build upstream request");
                return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to build upstream request").into_response();
            }
        };

        tracing::debug!(
            backend = %target,
            method = %parts.method,
            uri = %upstream.uri(),
            attempt,
            "Forwarding request"
        );

        match state.client.request(upstream).await {
            Ok(resp) => {
                tracing::debug!(backend = %target, status = %resp.status(), "Upstream responded");
                return response::relay(resp.map(Body::new), state.metrics.clone());
            }
            Err(e) => {
                tracing::error!(backend = %target, attempt, error = %e, "Upstream error");

                if attempt < max_attempts {
                    tracing::info!(attempt, max_attempts, "Failing over to another backend");
                    continue;
                }
                return (StatusCode::BAD_GATEWAY, "Bad Gateway").into_response();
            }
        }
    }
}

fn build_request(
    parts: &Parts,
    target: &Backend,
    client_addr: SocketAddr,
    body: Body,
) -> Result<Request<Body>, axum::http::Error> {
    let uri = target.http_uri(parts.uri.path_and_query())?;

    let mut request = Request::builder()
        .method(parts.method.clone())
        .uri(uri)
        .body(body)?;
    *request.headers_mut() = upstream_headers(&parts.headers, target, client_addr);

    Ok(request)
}
