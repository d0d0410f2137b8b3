//! WebSocket tunnel handling.
//!
//! # Responsibilities
//! - Detect WebSocket upgrade requests
//! - Dial the backend WebSocket endpoint with the client's subprotocols
//! - Complete the upgrade handshake with the client
//! - Relay frames in both directions until either side stops
//!
//! # Data Flow
//! ```text
//! Client ←──── WebSocket frames ────→ Proxy ←──── WebSocket frames ────→ Backend
//! ```
//!
//! # Design Decisions
//! - The backend is dialed before the client handshake completes; the
//!   subprotocol it selects is the one echoed to the client
//! - On dial failure the client is still upgraded, then closed with 1011
//! - Message-level relay, no buffering beyond one message
//! - Close frames propagated; Ping/Pong answered per hop, never forwarded
//! - The first direction to stop signals the other one
//! - The registry entry goes away only after both directions finished

use axum::body::Body;
use axum::extract::ws::{self, close_code, WebSocket, WebSocketUpgrade};
use axum::extract::FromRequestParts;
use axum::http::{header, header::InvalidHeaderValue, HeaderMap, HeaderValue, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::{self, client::IntoClientRequest, protocol::frame::coding::CloseCode};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::http::server::AppState;
use crate::load_balancer::backend::Backend;
use crate::net::connection::{ConnectionId, TunnelRegistry, TunnelState};
use crate::observability::Metrics;

type BoxError = Box<dyn std::error::Error + Send + Sync>;
type BackendSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Why the backend WebSocket could not be opened.
#[derive(Debug, thiserror::Error)]
pub enum DialError {
    #[error("invalid subprotocol header: {0}")]
    Protocol(#[from] InvalidHeaderValue),

    #[error(transparent)]
    WebSocket(#[from] tungstenite::Error),

    #[error("no handshake within {0:?}")]
    Timeout(Duration),
}

/// Why one direction of a tunnel stopped abnormally.
#[derive(Debug, thiserror::Error)]
pub enum TunnelError {
    #[error("read failed: {0}")]
    Read(#[source] BoxError),

    #[error("write failed: {0}")]
    Write(#[source] BoxError),
}

/// True if the request asks for a WebSocket upgrade.
pub fn is_upgrade_request(headers: &HeaderMap) -> bool {
    let connection_upgrade = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"));

    let upgrade_websocket = headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("websocket"));

    connection_upgrade && upgrade_websocket
}

/// Subprotocols the client offered, in its order of preference.
pub fn requested_protocols(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(header::SEC_WEBSOCKET_PROTOCOL)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Open the backend side of a tunnel. Returns the socket and the
/// subprotocol the backend selected, if any.
async fn dial(
    url: &str,
    protocols: &[String],
    timeout: Duration,
) -> Result<(BackendSocket, Option<String>), DialError> {
    let mut request = url.into_client_request()?;
    if !protocols.is_empty() {
        let offered = HeaderValue::from_str(&protocols.join(", "))?;
        request.headers_mut().insert(header::SEC_WEBSOCKET_PROTOCOL, offered);
    }

    let (socket, response) = tokio::time::timeout(timeout, tokio_tungstenite::connect_async(request))
        .await
        .map_err(|_| DialError::Timeout(timeout))??;

    let selected = response
        .headers()
        .get(header::SEC_WEBSOCKET_PROTOCOL)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    Ok((socket, selected))
}

/// Authorize, dial the backend, then upgrade the client and hand both
/// sockets to a tunnel.
pub async fn handle_upgrade(state: AppState, client_addr: SocketAddr, request: Request<Body>) -> Response {
    if !state.auth.authorize(request.headers()) {
        tracing::warn!(client = %client_addr, "Unauthorized WebSocket upgrade");
        return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
    }

    let target = state.pool.select();
    let (mut parts, _body) = request.into_parts();
    let backend_url = target.websocket_url(parts.uri.path_and_query());
    let requested = requested_protocols(&parts.headers);

    let upgrade = match WebSocketUpgrade::from_request_parts(&mut parts, &state).await {
        Ok(upgrade) => upgrade,
        Err(rejection) => {
            tracing::warn!(client = %client_addr, error = %rejection, "WebSocket upgrade rejected");
            return rejection.into_response();
        }
    };

    state.metrics.increment_requests();

    let id = ConnectionId::new();
    let dial_timeout = state.websocket.dial_timeout();
    tracing::debug!(
        conn_id = %id,
        state = ?TunnelState::Dialing,
        backend = %backend_url,
        protocols = ?requested,
        "Dialing backend WebSocket"
    );

    let upgrade = upgrade.on_failed_upgrade(move |e| {
        tracing::warn!(client = %client_addr, error = %e, "Client WebSocket upgrade failed");
    });

    let dialed = dial(&backend_url, &requested, dial_timeout).await;
    match dialed {
        Ok((backend, selected)) => {
            let upgrade = match selected {
                Some(protocol) => upgrade.protocols([protocol]),
                None => upgrade,
            };
            let tunnel = Tunnel {
                id,
                client_addr,
                target,
                tunnels: state.tunnels.clone(),
                metrics: state.metrics.clone(),
            };
            upgrade.on_upgrade(move |socket| tunnel.run(socket, backend))
        }
        Err(e) => {
            tracing::error!(conn_id = %id, backend = %target, error = %e, "Backend WebSocket dial failed");
            upgrade.protocols(requested).on_upgrade(reject)
        }
    }
}

/// One client connection bridged to one backend connection.
struct Tunnel {
    id: ConnectionId,
    client_addr: SocketAddr,
    target: Arc<Backend>,
    tunnels: Arc<TunnelRegistry>,
    metrics: Arc<Metrics>,
}

impl Tunnel {
    async fn run(self, client: WebSocket, backend: BackendSocket) {
        self.tunnels.register(self.id, self.client_addr, self.target.to_string());
        tracing::info!(
            conn_id = %self.id,
            client = %self.client_addr,
            backend = %self.target,
            open_tunnels = self.tunnels.len(),
            "WebSocket tunnel open"
        );

        let (client_sink, client_stream) = client.split();
        let (backend_sink, backend_stream) = backend.split();

        let (stop_tx, stop_rx) = watch::channel(false);
        let stop = Arc::new(stop_tx);

        let upstream = tokio::spawn(relay(
            client_stream,
            backend_sink,
            Direction::ClientToBackend,
            RelayContext::new(&self, stop.clone(), stop_rx.clone()),
        ));
        let downstream = tokio::spawn(relay(
            backend_stream,
            client_sink,
            Direction::BackendToClient,
            RelayContext::new(&self, stop, stop_rx),
        ));

        let (up, down) = tokio::join!(upstream, downstream);
        for (direction, joined) in [(Direction::ClientToBackend, up), (Direction::BackendToClient, down)] {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::debug!(conn_id = %self.id, ?direction, error = %e, "Relay stopped with error"),
                Err(e) => tracing::error!(conn_id = %self.id, ?direction, error = %e, "Relay task failed"),
            }
        }

        if let Some(info) = self.tunnels.remove(self.id) {
            tracing::info!(
                conn_id = %self.id,
                backend = %info.backend,
                duration = ?info.opened_at.elapsed(),
                open_tunnels = self.tunnels.len(),
                "WebSocket tunnel closed"
            );
        }
    }
}

/// Tell the client the backend is unreachable, then drop the socket.
async fn reject(mut client: WebSocket) {
    let frame = ws::CloseFrame {
        code: close_code::ERROR,
        reason: "backend unavailable".into(),
    };
    if let Err(e) = client.send(ws::Message::Close(Some(frame))).await {
        tracing::debug!(error = %e, "Failed to send close frame to client");
    }
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    ClientToBackend,
    BackendToClient,
}

impl Direction {
    fn record(self, metrics: &Metrics, bytes: usize) {
        match self {
            Direction::ClientToBackend => metrics.add_bytes_received(bytes as u64),
            Direction::BackendToClient => metrics.add_bytes_sent(bytes as u64),
        }
    }
}

struct RelayContext {
    id: ConnectionId,
    tunnels: Arc<TunnelRegistry>,
    metrics: Arc<Metrics>,
    stop: Arc<watch::Sender<bool>>,
    stopped: watch::Receiver<bool>,
}

impl RelayContext {
    fn new(tunnel: &Tunnel, stop: Arc<watch::Sender<bool>>, stopped: watch::Receiver<bool>) -> Self {
        Self {
            id: tunnel.id,
            tunnels: tunnel.tunnels.clone(),
            metrics: tunnel.metrics.clone(),
            stop,
            stopped,
        }
    }
}

/// What to do with a message read from one side.
enum Relay<T> {
    /// Send to the other side; carries the payload length.
    Forward(T, usize),
    /// Send to the other side, then stop this direction.
    Close(T),
    /// Handled on this hop.
    Skip,
}

/// Conversion of a message into its counterpart on the other socket.
trait IntoPeer<T> {
    fn into_peer(self) -> Relay<T>;
}

impl IntoPeer<tungstenite::Message> for ws::Message {
    fn into_peer(self) -> Relay<tungstenite::Message> {
        match self {
            ws::Message::Text(text) => {
                let len = text.len();
                Relay::Forward(tungstenite::Message::Text(text.as_str().into()), len)
            }
            ws::Message::Binary(data) => {
                let len = data.len();
                Relay::Forward(tungstenite::Message::Binary(data), len)
            }
            ws::Message::Close(frame) => Relay::Close(tungstenite::Message::Close(frame.map(|f| {
                tungstenite::protocol::CloseFrame {
                    code: CloseCode::from(f.code),
                    reason: f.reason.as_str().into(),
                }
            }))),
            ws::Message::Ping(_) | ws::Message::Pong(_) => Relay::Skip,
        }
    }
}

impl IntoPeer<ws::Message> for tungstenite::Message {
    fn into_peer(self) -> Relay<ws::Message> {
        match self {
            tungstenite::Message::Text(text) => {
                let len = text.len();
                Relay::Forward(ws::Message::Text(text.as_str().into()), len)
            }
            tungstenite::Message::Binary(data) => {
                let len = data.len();
                Relay::Forward(ws::Message::Binary(data), len)
            }
            tungstenite::Message::Close(frame) => Relay::Close(ws::Message::Close(frame.map(|f| {
                ws::CloseFrame {
                    code: u16::from(f.code),
                    reason: f.reason.as_str().into(),
                }
            }))),
            tungstenite::Message::Ping(_)
            | tungstenite::Message::Pong(_)
            | tungstenite::Message::Frame(_) => Relay::Skip,
        }
    }
}

/// Copy messages from `source` to `sink` until either side stops or the
/// other direction signals.
async fn relay<S, K, In, Out, ReadErr, WriteErr>(
    mut source: S,
    mut sink: K,
    direction: Direction,
    mut ctx: RelayContext,
) -> Result<(), TunnelError>
where
    S: Stream<Item = Result<In, ReadErr>> + Unpin,
    K: Sink<Out, Error = WriteErr> + Unpin,
    In: IntoPeer<Out>,
    ReadErr: Into<BoxError>,
    WriteErr: Into<BoxError>,
{
    let result = loop {
        tokio::select! {
            next = source.next() => match next {
                None => break Ok(()),
                Some(Err(e)) => break Err(TunnelError::Read(e.into())),
                Some(Ok(message)) => match message.into_peer() {
                    Relay::Forward(out, len) => {
                        direction.record(&ctx.metrics, len);
                        if let Err(e) = sink.send(out).await {
                            break Err(TunnelError::Write(e.into()));
                        }
                    }
                    Relay::Close(out) => {
                        tracing::debug!(conn_id = %ctx.id, ?direction, "Close frame relayed");
                        if let Err(e) = sink.send(out).await {
                            break Err(TunnelError::Write(e.into()));
                        }
                        break Ok(());
                    }
                    Relay::Skip => {}
                },
            },
            _ = ctx.stopped.changed() => break Ok(()),
        }
    };

    ctx.tunnels.set_state(ctx.id, TunnelState::Closing);
    ctx.stop.send_replace(true);
    let _ = sink.close().await;

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(connection: &str, upgrade: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_str(connection).unwrap());
        if let Some(upgrade) = upgrade {
            headers.insert(header::UPGRADE, HeaderValue::from_str(upgrade).unwrap());
        }
        headers
    }

    #[test]
    fn detects_upgrade_case_insensitively() {
        assert!(is_upgrade_request(&headers("Upgrade", Some("websocket"))));
        assert!(is_upgrade_request(&headers("keep-alive, UPGRADE", Some("WebSocket"))));
    }

    #[test]
    fn ignores_plain_requests() {
        assert!(!is_upgrade_request(&HeaderMap::new()));
        assert!(!is_upgrade_request(&headers("keep-alive", Some("websocket"))));
        assert!(!is_upgrade_request(&headers("upgrade", None)));
        assert!(!is_upgrade_request(&headers("upgrade", Some("h2c"))));
    }

    #[test]
    fn collects_offered_subprotocols_in_order() {
        let mut headers = HeaderMap::new();
        headers.append(header::SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static("chat.v2, chat.v1"));
        headers.append(header::SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static("mqtt"));

        assert_eq!(requested_protocols(&headers), vec!["chat.v2", "chat.v1", "mqtt"]);
        assert!(requested_protocols(&HeaderMap::new()).is_empty());
    }

    #[test]
    fn text_and_binary_are_forwarded_with_length() {
        match ws::Message::Text("hello".into()).into_peer() {
            Relay::Forward(tungstenite::Message::Text(text), 5) => assert_eq!(text.as_str(), "hello"),
            _ => panic!("text not forwarded"),
        }
        match tungstenite::Message::Binary(vec![1u8, 2, 3].into()).into_peer() {
            Relay::Forward(ws::Message::Binary(data), 3) => assert_eq!(&data[..], &[1, 2, 3]),
            _ => panic!("binary not forwarded"),
        }
    }

    #[test]
    fn control_frames_stay_on_their_hop() {
        assert!(matches!(ws::Message::Ping(vec![1u8].into()).into_peer(), Relay::<tungstenite::Message>::Skip));
        assert!(matches!(tungstenite::Message::Pong(vec![1u8].into()).into_peer(), Relay::<ws::Message>::Skip));
    }

    #[test]
    fn close_frames_keep_code_and_reason() {
        let frame = ws::CloseFrame {
            code: close_code::NORMAL,
            reason: "bye".into(),
        };
        match ws::Message::Close(Some(frame)).into_peer() {
            Relay::Close(tungstenite::Message::Close(Some(f))) => {
                assert_eq!(u16::from(f.code), 1000);
                assert_eq!(f.reason.as_str(), "bye");
            }
            _ => panic!("close not relayed"),
        }
        assert!(matches!(
            tungstenite::Message::Close(None).into_peer(),
            Relay::<ws::Message>::Close(ws::Message::Close(None))
        ));
    }
}
