//! Realtime WebSocket bridge
//!
//! Realtime sessions are not request/response: the gateway opens a WebSocket
//! to the first target's provider and then pumps messages both ways until
//! either side closes. No retries, caching or hooks apply.

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::gateway::Gateway;
use crate::protocol::request::CanonicalRequest;
use futures::{Sink, SinkExt, Stream, StreamExt};
use reqwest::header::HeaderMap;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};
use url::Url;

/// Socket to the provider
pub type UpstreamSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// HTTP-only headers that must not reach the handshake
const SKIPPED_HEADERS: &[&str] = &[
    "accept",
    "accept-encoding",
    "cache-control",
    "connection",
    "content-length",
    "content-type",
    "keep-alive",
    "transfer-encoding",
];

/// Map an http(s) URL onto its ws(s) counterpart
pub fn to_ws_url(http_url: &str) -> Result<String, GatewayError> {
    let mut url = Url::parse(http_url)
        .map_err(|e| GatewayError::InvalidRequest(format!("invalid realtime URL {}: {}", http_url, e)))?;
    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => {
            return Err(GatewayError::InvalidRequest(format!(
                "unsupported scheme for realtime: {}",
                other
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| GatewayError::Internal(format!("cannot switch {} to {}", http_url, scheme)))?;
    Ok(url.to_string())
}

/// Handshake request carrying the provider's auth headers
pub fn handshake_request(ws_url: &str, headers: &HeaderMap) -> Result<http::Request<()>, GatewayError> {
    let mut request = ws_url
        .into_client_request()
        .map_err(|e| GatewayError::InvalidRequest(format!("invalid WebSocket URL: {}", e)))?;
    for (name, value) in headers {
        if SKIPPED_HEADERS.contains(&name.as_str()) {
            continue;
        }
        request.headers_mut().insert(name.clone(), value.clone());
    }
    Ok(request)
}

impl Gateway {
    /// Open the upstream socket for a realtime request against `targets[0]`
    pub async fn connect_realtime(
        &self,
        config: &GatewayConfig,
        request: &CanonicalRequest,
    ) -> Result<UpstreamSocket, GatewayError> {
        let target = config
            .targets
            .first()
            .ok_or_else(|| GatewayError::Routing("realtime needs at least one target".to_string()))?;
        let adapter = self.registry().get(&target.provider)?;
        let provider = adapter.id().to_string();

        let bearer = match adapter.token_source() {
            Some(source) => Some(self.credentials().bearer(&provider, target, source.as_ref()).await?),
            None => None,
        };
        let headers = adapter.headers(target, request, bearer.as_deref())?;
        let url = to_ws_url(&format!(
            "{}{}",
            adapter.base_url(target),
            adapter.endpoint(request, target)?
        ))?;

        info!("Opening realtime session with {} ({})", provider, target.label());
        let (socket, _) = tokio_tungstenite::connect_async(handshake_request(&url, &headers)?)
            .await
            .map_err(|e| GatewayError::Transport {
                provider,
                message: format!("WebSocket connect failed: {}", e),
            })?;
        Ok(socket)
    }
}

/// Pump messages between the caller's socket and the provider's until one closes
pub async fn bridge<C, U>(client: C, upstream: U) -> Result<(), GatewayError>
where
    C: Stream<Item = Result<Message, WsError>> + Sink<Message, Error = WsError> + Unpin,
    U: Stream<Item = Result<Message, WsError>> + Sink<Message, Error = WsError> + Unpin,
{
    let (mut client_tx, mut client_rx) = client.split();
    let (mut upstream_tx, mut upstream_rx) = upstream.split();
    let mut relayed = 0u64;

    loop {
        tokio::select! {
            message = client_rx.next() => match message {
                Some(Ok(Message::Close(frame))) => {
                    let _ = upstream_tx.send(Message::Close(frame)).await;
                    break;
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                Some(Ok(message)) => {
                    upstream_tx.send(message).await.map_err(stream_error)?;
                    relayed += 1;
                }
                Some(Err(e)) => return Err(stream_error(e)),
                None => {
                    let _ = upstream_tx.close().await;
                    break;
                }
            },
            message = upstream_rx.next() => match message {
                Some(Ok(Message::Close(frame))) => {
                    let _ = client_tx.send(Message::Close(frame)).await;
                    break;
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                Some(Ok(message)) => {
                    client_tx.send(message).await.map_err(stream_error)?;
                    relayed += 1;
                }
                Some(Err(e)) => return Err(stream_error(e)),
                None => {
                    let _ = client_tx.close().await;
                    break;
                }
            },
        }
    }

    debug!("Realtime bridge closed after {} messages", relayed);
    Ok(())
}

fn stream_error(e: WsError) -> GatewayError {
    GatewayError::Stream(format!("realtime socket: {}", e))
}
