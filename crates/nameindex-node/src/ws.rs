//! Websocket block notifications (bchd `notifyblocks`).
//!
//! `subscribe` connects and registers for notifications before it returns,
//! then hands the connection to a background task that forwards
//! connect/disconnect notifications to the indexer's event queue and
//! reconnects with backoff. Every registration, the first included, is
//! followed by a synthetic `Connected` so the indexer resyncs whatever
//! arrived while no subscription was live. Disconnects that happen during
//! an outage are not replayed; use the polling watcher when that matters.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{Connector, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use nameindex_core::error::IndexerError;
use nameindex_core::node::BlockSubscriber;
use nameindex_core::sequencer::EventSink;
use nameindex_core::types::BlockEvent;

use crate::rpc::{JsonRpcNotification, JsonRpcRequest};
use crate::tls::tls_connector;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Settings for [`WsSubscriber`].
#[derive(Debug, Clone)]
pub struct WsConfig {
    pub url: String,
    pub user: String,
    pub password: String,
    /// PEM certificate to trust for `wss://`, for a node with a self-signed cert.
    pub root_cert: Option<Vec<u8>>,
    /// Reconnect backoff starting duration.
    pub reconnect_initial: Duration,
    /// Maximum reconnect backoff.
    pub reconnect_max: Duration,
}

impl WsConfig {
    pub fn new(url: impl Into<String>, user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            user: user.into(),
            password: password.into(),
            root_cert: None,
            reconnect_initial: Duration::from_millis(500),
            reconnect_max: Duration::from_secs(60),
        }
    }
}

/// [`BlockSubscriber`] fed by the node's websocket notifications.
pub struct WsSubscriber {
    config: WsConfig,
}

impl WsSubscriber {
    pub fn new(config: WsConfig) -> Self {
        Self { config }
    }

    fn request(&self) -> Result<Request, IndexerError> {
        let mut request = self
            .config
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| IndexerError::Config(format!("invalid websocket url {}: {e}", self.config.url)))?;
        let credentials = STANDARD.encode(format!("{}:{}", self.config.user, self.config.password));
        let header = HeaderValue::from_str(&format!("Basic {credentials}"))
            .map_err(|e| IndexerError::Config(format!("invalid websocket credentials: {e}")))?;
        request.headers_mut().insert("Authorization", header);
        Ok(request)
    }

    fn connector(&self) -> Result<Option<native_tls::TlsConnector>, IndexerError> {
        self.config.root_cert.as_deref().map(tls_connector).transpose()
    }

    /// Connect and send `notifyblocks`. Transport failures are transient.
    async fn register(&self, tls: Option<&native_tls::TlsConnector>) -> Result<Socket, IndexerError> {
        let request = self.request()?;
        let connector = tls.cloned().map(Connector::NativeTls);
        let (mut socket, _) = tokio_tungstenite::connect_async_tls_with_config(request, None, false, connector)
            .await
            .map_err(|e| match e {
                WsError::Http(resp) if matches!(resp.status().as_u16(), 401 | 403) => IndexerError::Config(format!(
                    "node at {} rejected the RPC credentials (HTTP {})",
                    self.config.url,
                    resp.status().as_u16()
                )),
                e => IndexerError::Rpc(format!("websocket connect to {}: {e}", self.config.url)),
            })?;

        let register = serde_json::to_string(&JsonRpcRequest::new(0, "notifyblocks", vec![]))
            .map_err(|e| IndexerError::Other(e.to_string()))?;
        socket
            .send(Message::Text(register))
            .await
            .map_err(|e| IndexerError::Rpc(format!("notifyblocks: {e}")))?;
        info!(url = %self.config.url, "subscribed to block notifications");
        Ok(socket)
    }
}

#[async_trait]
impl BlockSubscriber for WsSubscriber {
    async fn subscribe(&self, sink: EventSink) -> Result<(), IndexerError> {
        let tls = self.connector()?;
        let socket = self.register(tls.as_ref()).await?;
        // Blocks may have arrived before the registration took effect.
        sink.connected(0)?;

        let subscriber = WsSubscriber::new(self.config.clone());
        tokio::spawn(async move {
            ws_task(subscriber, tls, socket, sink).await;
        });
        Ok(())
    }
}

async fn ws_task(
    subscriber: WsSubscriber,
    tls: Option<native_tls::TlsConnector>,
    mut socket: Socket,
    sink: EventSink,
) {
    let config = &subscriber.config;

    loop {
        if !forward(socket, &sink).await {
            return;
        }

        let mut backoff = config.reconnect_initial;
        warn!(url = %config.url, "websocket disconnected, reconnecting in {backoff:?}");
        socket = loop {
            time::sleep(backoff).await;
            if sink.is_closed() {
                return;
            }
            match subscriber.register(tls.as_ref()).await {
                Ok(socket) => break socket,
                Err(e) if e.is_transient() => {
                    backoff = (backoff * 2).min(config.reconnect_max);
                    warn!(error = %e, "websocket reconnect failed, retrying in {backoff:?}");
                }
                Err(e) => {
                    warn!(error = %e, "websocket notifications stopped");
                    return;
                }
            }
        };

        if sink.connected(0).is_err() {
            return;
        }
    }
}

/// Forward notifications until the connection drops.
///
/// Returns `false` once the event queue is gone.
async fn forward(socket: Socket, sink: &EventSink) -> bool {
    let (mut ws_sink, mut stream) = socket.split();
    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                if let Some(event) = parse_notification(text.as_str()) {
                    debug!(%event, "block notification");
                    if sink.send(event).is_err() {
                        return false;
                    }
                }
            }
            Ok(Message::Ping(payload)) => {
                if ws_sink.send(Message::Pong(payload)).await.is_err() {
                    break;
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "websocket receive error");
                break;
            }
        }
    }
    !sink.is_closed()
}

/// Turn a node notification into a block event.
///
/// Understands both the filtered form (`params[0]` = height) and the legacy
/// form (`params = [hash, height, time]`). Responses and other notifications
/// yield `None`.
pub fn parse_notification(text: &str) -> Option<BlockEvent> {
    let note: JsonRpcNotification = serde_json::from_str(text).ok()?;
    let height = |idx: usize| note.params.get(idx).and_then(|v| v.as_u64());
    match note.method.as_str() {
        "filteredblockconnected" => height(0).map(BlockEvent::Connected),
        "filteredblockdisconnected" => height(0).map(BlockEvent::Disconnected),
        "blockconnected" => height(1).map(BlockEvent::Connected),
        "blockdisconnected" => height(1).map(BlockEvent::Disconnected),
        _ => None,
    }
}
