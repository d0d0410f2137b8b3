//! Response handling and transformation.
//!
//! # Responsibilities
//! - Relay the backend response to the client
//! - Strip hop-by-hop headers
//! - Count every body byte written to the client
//!
//! # Design Decisions
//! - Streaming responses avoid buffering entire body
//! - Byte accounting happens as chunks flow, not after completion

use axum::body::Body;
use axum::response::Response;
use futures_util::TryStreamExt;
use std::sync::Arc;

use crate::http::request::strip_hop_by_hop;
use crate::observability::Metrics;

/// Wrap `body` so `on_chunk` sees the size of every data chunk.
pub fn metered<F>(body: Body, on_chunk: F) -> Body
where
    F: Fn(u64) + Send + 'static,
{
    Body::from_stream(
        body.into_data_stream()
            .inspect_ok(move |chunk| on_chunk(chunk.len() as u64)),
    )
}

/// Turn a backend response into the client response.
pub fn relay(response: Response, metrics: Arc<Metrics>) -> Response {
    let (mut parts, body) = response.into_parts();
    strip_hop_by_hop(&mut parts.headers);

    let body = metered(body, move |n| metrics.add_bytes_sent(n));
    Response::from_parts(parts, body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{header, StatusCode};

    #[tokio::test]
    async fn counts_bytes_sent_and_strips_headers() {
        let metrics = Arc::new(Metrics::new());
        let upstream = Response::builder()
            .status(StatusCode::OK)
            .header(header::CONNECTION, "close")
            .header("x-backend", "b1")
            .body(Body::from("hello world"))
            .unwrap();

        let response = relay(upstream, metrics.clone());
        assert!(!response.headers().contains_key(header::CONNECTION));
        assert_eq!(response.headers()["x-backend"], "b1");

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"hello world");
        assert_eq!(metrics.total_traffic(), (11, 0));
        assert_eq!(metrics.snapshot_and_reset().bytes_sent, 11);
    }
}
