//! Transport seam between the session dispatcher and the realtime API.
//!
//! [`Transport`] is the narrow interface the dispatch loop consumes: an
//! ordered stream of inbound [`ServerEvent`]s (with `None` as the closed
//! signal) and a way to send outbound [`ClientEvent`]s. [`WsTransport`] is the
//! production implementation over a WebSocket connection; tests substitute a
//! scripted fake.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use futures_util::stream::SplitStream;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{error, info, warn};

use crate::protocol::{ClientEvent, ServerEvent};
use crate::session::{SessionError, SessionResult};
use crate::telemetry::{self, Direction};

/// Realtime API WebSocket endpoint.
pub const REALTIME_URL: &str = "wss://api.openai.com/v1/realtime";

/// Capacity of the outbound message channel.
const WS_CHANNEL_CAPACITY: usize = 256;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// =============================================================================
// Transport Trait
// =============================================================================

/// Bidirectional event transport consumed by the dispatch loop.
#[async_trait]
pub trait Transport: Send {
    /// Receive the next inbound event.
    ///
    /// Returns `Ok(None)` when the peer closed the connection cleanly.
    async fn receive(&mut self) -> SessionResult<Option<ServerEvent>>;

    /// Send an outbound event.
    async fn send(&self, event: ClientEvent) -> SessionResult<()>;
}

// =============================================================================
// WebSocket Implementation
// =============================================================================

/// Cloneable handle for sending outbound events.
///
/// Outbound frames from the dispatch loop and the microphone upload pump are
/// funneled through one bounded channel into a single writer task, which keeps
/// wire writes serialized without locking.
#[derive(Clone)]
pub struct OutboundHandle {
    tx: mpsc::Sender<Message>,
}

impl OutboundHandle {
    #[cfg(test)]
    pub(crate) fn new(tx: mpsc::Sender<Message>) -> Self {
        Self { tx }
    }

    /// Serialize and queue a client event.
    pub async fn send_event(&self, event: ClientEvent) -> SessionResult<()> {
        telemetry::record_event(Direction::Outgoing, event.event_type());
        let json = serde_json::to_string(&event)?;
        self.tx
            .send(Message::Text(json.into()))
            .await
            .map_err(|_| SessionError::NotConnected)
    }

    async fn send_raw(&self, message: Message) -> SessionResult<()> {
        self.tx
            .send(message)
            .await
            .map_err(|_| SessionError::NotConnected)
    }

    /// Whether the connection writer has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// WebSocket transport to the realtime API.
pub struct WsTransport {
    stream: SplitStream<WsStream>,
    outbound: OutboundHandle,
}

impl WsTransport {
    /// Connect and authenticate against the realtime API.
    pub async fn connect(api_key: &str, model: &str) -> SessionResult<Self> {
        if api_key.is_empty() {
            return Err(SessionError::AuthenticationFailed(
                "API key is required".to_string(),
            ));
        }

        let url = format!("{REALTIME_URL}?model={model}");
        let request = http::Request::builder()
            .uri(&url)
            .header("Authorization", format!("Bearer {api_key}"))
            .header("OpenAI-Beta", "realtime=v1")
            .header("Sec-WebSocket-Protocol", "realtime")
            .header(
                "Sec-WebSocket-Key",
                tungstenite::handshake::client::generate_key(),
            )
            .header("Sec-WebSocket-Version", "13")
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Host", "api.openai.com")
            .body(())
            .map_err(|e| SessionError::ConnectionFailed(e.to_string()))?;

        let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| SessionError::ConnectionFailed(e.to_string()))?;

        info!(model, "connected to realtime API");

        let (mut ws_sink, ws_stream) = ws_stream.split();
        let (tx, mut rx) = mpsc::channel::<Message>(WS_CHANNEL_CAPACITY);

        // Single writer task: everything outbound goes through the channel.
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if let Err(e) = ws_sink.send(message).await {
                    error!("failed to send WebSocket message: {e}");
                    break;
                }
            }
            info!("outbound writer task ended");
        });

        Ok(Self {
            stream: ws_stream,
            outbound: OutboundHandle { tx },
        })
    }

    /// Handle for sending events outside the dispatch loop.
    pub fn outbound(&self) -> OutboundHandle {
        self.outbound.clone()
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn receive(&mut self) -> SessionResult<Option<ServerEvent>> {
        loop {
            match self.stream.next().await {
                None => return Ok(None),
                Some(Err(e)) => return Err(SessionError::WebSocketError(e.to_string())),
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ServerEvent>(&text) {
                        Ok(event) => return Ok(Some(event)),
                        Err(e) => {
                            // Skip frames we cannot decode rather than ending
                            // the session over them.
                            warn!("failed to parse server event: {e}");
                        }
                    }
                }
                Some(Ok(Message::Close(_))) => return Ok(None),
                Some(Ok(Message::Ping(data))) => {
                    self.outbound.send_raw(Message::Pong(data)).await?;
                }
                Some(Ok(_)) => {}
            }
        }
    }

    async fn send(&self, event: ClientEvent) -> SessionResult<()> {
        self.outbound.send_event(event).await
    }
}
