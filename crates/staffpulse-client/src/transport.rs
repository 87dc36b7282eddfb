//! Transport seam between the connection manager and the wire.
//!
//! A [`Connector`] performs the handshake and hands back a [`TransportLink`]:
//! a pair of channels to a pump task that owns the socket. Dropping the link
//! closes the socket.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::error::{ClientError, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Capacity of each direction of a link
const LINK_CAPACITY: usize = 64;

/// What the pump task reports back
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A text frame from the server
    Frame(String),
    /// The socket closed; `code` is the close code if the peer sent one
    Closed { code: Option<u16>, reason: String },
    /// The socket failed
    Error(String),
}

/// Channels to an open transport
#[derive(Debug)]
pub struct TransportLink {
    pub outbound: mpsc::Sender<String>,
    pub inbound: mpsc::Receiver<TransportEvent>,
}

/// The far side of an in-memory link
#[derive(Debug)]
pub struct RemoteEnd {
    /// Frames the client sent
    pub sent: mpsc::Receiver<String>,
    /// Push events to the client
    pub events: mpsc::Sender<TransportEvent>,
}

impl TransportLink {
    /// A link backed only by channels, for custom transports and tests
    pub fn in_memory() -> (Self, RemoteEnd) {
        let (outbound, sent) = mpsc::channel(LINK_CAPACITY);
        let (events, inbound) = mpsc::channel(LINK_CAPACITY);
        (Self { outbound, inbound }, RemoteEnd { sent, events })
    }
}

/// Opens transports carrying the handshake credential
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// # Errors
    ///
    /// `ClientError::Rejected` when the server refuses the credential, any
    /// other error for transport failures.
    async fn open(&self, url: &str, token: &str) -> Result<TransportLink>;
}

/// WebSocket connector over tokio-tungstenite
#[derive(Debug, Default, Clone)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn open(&self, url: &str, token: &str) -> Result<TransportLink> {
        let mut request = url
            .into_client_request()
            .map_err(|e| ClientError::config(format!("invalid url {url:?}: {e}")))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| ClientError::Rejected)?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let (ws_stream, _) = connect_async(request).await.map_err(|err| match err {
            WsError::Http(response) if response.status() == StatusCode::UNAUTHORIZED => {
                ClientError::Rejected
            }
            other => ClientError::transport(other.to_string()),
        })?;

        let (outbound, outbound_rx) = mpsc::channel(LINK_CAPACITY);
        let (inbound_tx, inbound) = mpsc::channel(LINK_CAPACITY);
        tokio::spawn(run_connection(ws_stream, outbound_rx, inbound_tx));

        debug!(url, "WebSocket connected");
        Ok(TransportLink { outbound, inbound })
    }
}

async fn run_connection(
    ws_stream: WsStream,
    mut outbound: mpsc::Receiver<String>,
    inbound: mpsc::Sender<TransportEvent>,
) {
    let (mut sink, mut stream) = ws_stream.split();

    loop {
        tokio::select! {
            // Handle outgoing messages
            frame = outbound.recv() => match frame {
                Some(text) => {
                    if let Err(e) = sink.send(Message::Text(text)).await {
                        warn!(error = %e, "Failed to send message");
                        let _ = inbound.send(TransportEvent::Error(e.to_string())).await;
                        break;
                    }
                }
                None => {
                    debug!("Link dropped, closing socket");
                    let _ = sink.close().await;
                    break;
                }
            },

            // Handle incoming messages
            message = stream.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    if inbound.send(TransportEvent::Frame(text)).await.is_err() {
                        let _ = sink.close().await;
                        break;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|f| (Some(u16::from(f.code)), f.reason.to_string()))
                        .unwrap_or((None, String::new()));
                    debug!(?code, %reason, "Server sent close frame");
                    let _ = inbound.send(TransportEvent::Closed { code, reason }).await;
                    break;
                }
                Some(Ok(_)) => {
                    // Ping/pong are answered by tungstenite; binary is unused
                }
                Some(Err(e)) => {
                    warn!(error = %e, "WebSocket error");
                    let _ = inbound.send(TransportEvent::Error(e.to_string())).await;
                    break;
                }
                None => {
                    let _ = inbound
                        .send(TransportEvent::Closed { code: None, reason: String::new() })
                        .await;
                    break;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_link_carries_both_directions() {
        let (mut link, mut remote) = TransportLink::in_memory();

        link.outbound.send("hello".to_string()).await.unwrap();
        assert_eq!(remote.sent.recv().await.as_deref(), Some("hello"));

        remote
            .events
            .send(TransportEvent::Frame("world".to_string()))
            .await
            .unwrap();
        assert_eq!(
            link.inbound.recv().await,
            Some(TransportEvent::Frame("world".to_string()))
        );
    }

    #[tokio::test]
    async fn test_ws_connector_reports_unreachable_server() {
        // Port 1 on loopback is not listening
        let result = WsConnector.open("ws://127.0.0.1:1/ws", "tok").await;
        assert!(matches!(result, Err(ClientError::Transport(_))));
    }

    #[tokio::test]
    async fn test_ws_connector_rejects_bad_url() {
        let result = WsConnector.open("not a url", "tok").await;
        assert!(matches!(result, Err(ClientError::Config(_))));
    }
}
