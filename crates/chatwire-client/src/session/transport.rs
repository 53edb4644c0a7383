//! Transport seam and the WebSocket connector.
//!
//! A [`Connector`] opens one authenticated transport and hands back a
//! [`TransportLink`]: an outbound frame sender and an inbound signal receiver.
//! Dropping the link closes the transport.

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use chatwire_core::prelude::*;

use crate::credential::Credential;
use crate::protocol::{parse_wire_message, preview, WireFrame, WireMessage};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Capacity of the outbound frame channel (bounded, to apply backpressure).
pub const OUTBOUND_CHANNEL_CAPACITY: usize = 64;

/// Capacity of the inbound signal channel (bounded, events can be bursty).
pub const INBOUND_CHANNEL_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// What a transport reports to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportSignal {
    /// A well-formed inbound frame.
    Frame(WireFrame),
    /// The remote side closed the transport.
    Closed { reason: String },
    /// The transport failed.
    Error(String),
}

/// An open transport.
#[derive(Debug)]
pub struct TransportLink {
    pub outbound: mpsc::Sender<WireFrame>,
    pub inbound: mpsc::Receiver<TransportSignal>,
}

/// Opens authenticated transports.
#[trait_variant::make(Connector: Send)]
pub trait LocalConnector {
    /// Open a transport authenticated with `credential`.
    async fn open(&self, credential: &Credential) -> Result<TransportLink>;
}

// ---------------------------------------------------------------------------
// WsConnector
// ---------------------------------------------------------------------------

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// [`Connector`] over a WebSocket.
///
/// The credential is sent both as an `Authorization: Bearer` header and as a
/// `token` query parameter.
#[derive(Debug, Clone)]
pub struct WsConnector {
    socket_url: Url,
}

impl WsConnector {
    /// # Errors
    ///
    /// Returns [`Error::ConfigInvalid`] for URLs that are not `ws`/`wss`.
    pub fn new(socket_url: &str) -> Result<Self> {
        let url = Url::parse(socket_url)
            .map_err(|e| Error::config_invalid(format!("socket url '{socket_url}': {e}")))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(Error::config_invalid(format!(
                "socket url '{socket_url}' must use ws:// or wss://"
            )));
        }
        Ok(Self { socket_url: url })
    }

    /// Build the handshake request carrying `token`.
    pub fn handshake_request(&self, token: &str) -> Result<Request> {
        let mut url = self.socket_url.clone();
        url.query_pairs_mut().append_pair("token", token);

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| Error::transport(format!("invalid handshake request: {e}")))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| Error::transport(format!("invalid credential header: {e}")))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);
        Ok(request)
    }
}

impl Connector for WsConnector {
    async fn open(&self, credential: &Credential) -> Result<TransportLink> {
        let request = self.handshake_request(&credential.access_token)?;

        info!("Connecting to {}", self.socket_url);
        let (ws_stream, _response) = connect_async(request)
            .await
            .map_err(|err| Error::transport(format!("failed to connect: {err}")))?;

        let (outbound, outbound_rx) = mpsc::channel::<WireFrame>(OUTBOUND_CHANNEL_CAPACITY);
        let (inbound_tx, inbound) = mpsc::channel::<TransportSignal>(INBOUND_CHANNEL_CAPACITY);
        tokio::spawn(run_io_loop(ws_stream, outbound_rx, inbound_tx));

        Ok(TransportLink { outbound, inbound })
    }
}

// ---------------------------------------------------------------------------
// Background task
// ---------------------------------------------------------------------------

/// Run one connection's read/write select loop until either side goes away.
async fn run_io_loop(
    ws_stream: WsStream,
    mut outbound_rx: mpsc::Receiver<WireFrame>,
    inbound_tx: mpsc::Sender<TransportSignal>,
) {
    let (mut ws_sink, mut ws_stream) = ws_stream.split();

    loop {
        tokio::select! {
            // ── Incoming WebSocket message ───────────────────────────────
            frame = ws_stream.next() => {
                let signal = match frame {
                    Some(Ok(WsMessage::Text(text))) => match parse_wire_message(text.as_str()) {
                        WireMessage::Frame(frame) => TransportSignal::Frame(frame),
                        WireMessage::Unknown(raw) => {
                            debug!("Ignoring unknown frame: {}", preview(&raw));
                            continue;
                        }
                    },
                    Some(Ok(WsMessage::Close(close))) => {
                        let reason = close
                            .map(|c| c.reason.as_str().to_string())
                            .filter(|r| !r.is_empty())
                            .unwrap_or_else(|| "closed by server".to_string());
                        debug!("Received Close frame: {}", reason);
                        let _ = inbound_tx.send(TransportSignal::Closed { reason }).await;
                        return;
                    }
                    Some(Ok(_)) => {
                        // Ping/Pong/Binary: ignore
                        continue;
                    }
                    Some(Err(err)) => {
                        warn!("WebSocket read error: {}", err);
                        let _ = inbound_tx.send(TransportSignal::Error(err.to_string())).await;
                        return;
                    }
                    None => {
                        debug!("WebSocket stream ended");
                        let _ = inbound_tx
                            .send(TransportSignal::Closed { reason: "stream ended".to_string() })
                            .await;
                        return;
                    }
                };

                if inbound_tx.send(signal).await.is_err() {
                    // The session dropped the link.
                    send_close(&mut ws_sink).await;
                    return;
                }
            }

            // ── Outgoing frame from the session ──────────────────────────
            outgoing = outbound_rx.recv() => {
                match outgoing {
                    Some(frame) => {
                        let text = match frame.to_text() {
                            Ok(text) => text,
                            Err(err) => {
                                warn!("Failed to serialize '{}': {}", frame.event, err);
                                continue;
                            }
                        };
                        trace!("-> {}", frame.event);
                        if let Err(err) = ws_sink.send(WsMessage::Text(text.into())).await {
                            warn!("WebSocket write error: {}", err);
                            let _ = inbound_tx.send(TransportSignal::Error(err.to_string())).await;
                            return;
                        }
                    }
                    None => {
                        debug!("Transport link dropped, closing");
                        send_close(&mut ws_sink).await;
                        return;
                    }
                }
            }
        }
    }
}

/// Send a WebSocket Close frame, ignoring any write errors.
async fn send_close(ws_sink: &mut SplitSink<WsStream, WsMessage>) {
    let _ = ws_sink.send(WsMessage::Close(None)).await;
    let _ = ws_sink.close().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_non_websocket_scheme() {
        let err = WsConnector::new("http://localhost:3001").unwrap_err();
        assert!(matches!(err, Error::ConfigInvalid { .. }));
        assert!(WsConnector::new("::").is_err());
    }

    #[test]
    fn test_handshake_carries_token_twice() {
        let connector = WsConnector::new("ws://localhost:3001/socket").unwrap();
        let request = connector.handshake_request("abc123").unwrap();

        assert_eq!(
            request.headers().get(AUTHORIZATION).unwrap(),
            "Bearer abc123"
        );
        assert_eq!(request.uri().query(), Some("token=abc123"));
        assert_eq!(request.uri().path(), "/socket");
    }

    #[test]
    fn test_handshake_keeps_existing_query() {
        let connector = WsConnector::new("wss://chat.example.com/ws?v=2").unwrap();
        let request = connector.handshake_request("t").unwrap();
        assert_eq!(request.uri().query(), Some("v=2&token=t"));
    }
}
