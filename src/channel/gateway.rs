//! Channel transport over a device-link gateway, spoken as JSON on a
//! `tokio-tungstenite` WebSocket.
//!
//! Wire format:
//! - requests  `{"id": 1, "method": "isRegistered", "params": {"address": "..."}}`
//! - responses `{"id": 1, "result": true}` or `{"id": 1, "error": "..."}`
//! - events    `{"event": "pairing", "code": "..."}`, `{"event": "ready"}`,
//!   `{"event": "message", "from": "...", "body": "..."}`,
//!   `{"event": "disconnected", "reason": "..."}`

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::Engine as _;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::{
    ChannelAddress, ChannelConnector, ChannelEvent, ChannelLink, ChannelPayload, ChannelTransport,
    InboundMessage,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Pending gateway request waiting for its response.
type PendingTx = oneshot::Sender<Result<Value, String>>;

enum Command {
    Request {
        method: &'static str,
        params: Value,
        response_tx: PendingTx,
    },
    Close,
}

/// Events as the gateway names them
#[derive(Debug, Deserialize)]
#[serde(tag = "event")]
enum GatewayEvent {
    #[serde(rename = "pairing", alias = "qr")]
    Pairing { code: String },
    #[serde(rename = "ready")]
    Ready,
    #[serde(rename = "message")]
    Message { from: String, body: String },
    #[serde(rename = "disconnected")]
    Disconnected {
        #[serde(default)]
        reason: Option<String>,
    },
}

impl From<GatewayEvent> for ChannelEvent {
    fn from(event: GatewayEvent) -> Self {
        match event {
            GatewayEvent::Pairing { code } => ChannelEvent::Pairing { code },
            GatewayEvent::Ready => ChannelEvent::Authorized,
            GatewayEvent::Message { from, body } => {
                ChannelEvent::Message(InboundMessage { from, body })
            }
            GatewayEvent::Disconnected { reason } => ChannelEvent::Closed { reason },
        }
    }
}

/// Opens gateway transports
pub struct GatewayConnector {
    url: String,
    request_timeout: Duration,
}

impl GatewayConnector {
    pub fn new(url: impl Into<String>, request_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            request_timeout,
        }
    }
}

#[async_trait]
impl ChannelConnector for GatewayConnector {
    async fn open(&self) -> Result<ChannelLink> {
        info!(url = %self.url, "Connecting to channel gateway");

        let (ws, _) = tokio::time::timeout(self.request_timeout, connect_async(self.url.as_str()))
            .await
            .map_err(|_| anyhow!("Timed out connecting to gateway at {}", self.url))?
            .with_context(|| format!("Failed to connect to gateway at {}", self.url))?;

        let (cmd_tx, cmd_rx) = mpsc::channel::<Command>(64);
        let (event_tx, events) = mpsc::channel::<ChannelEvent>(64);
        tokio::spawn(gateway_loop(ws, cmd_rx, event_tx));

        Ok(ChannelLink {
            transport: Box::new(GatewayTransport {
                cmd_tx,
                request_timeout: self.request_timeout,
            }),
            events,
        })
    }
}

/// Outbound handle onto a running gateway loop
pub struct GatewayTransport {
    cmd_tx: mpsc::Sender<Command>,
    request_timeout: Duration,
}

impl GatewayTransport {
    async fn request(&self, method: &'static str, params: Value) -> Result<Value> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Request {
                method,
                params,
                response_tx: tx,
            })
            .await
            .map_err(|_| anyhow!("gateway connection closed"))?;

        let result = tokio::time::timeout(self.request_timeout, rx)
            .await
            .map_err(|_| {
                anyhow!(
                    "gateway did not answer {} within {}ms",
                    method,
                    self.request_timeout.as_millis()
                )
            })?
            .map_err(|_| anyhow!("gateway connection closed"))?;

        result.map_err(|e| anyhow!("gateway rejected {}: {}", method, e))
    }
}

#[async_trait]
impl ChannelTransport for GatewayTransport {
    async fn is_registered(&self, address: &ChannelAddress) -> Result<bool> {
        let result = self
            .request("isRegistered", json!({ "address": address }))
            .await?;
        result
            .as_bool()
            .ok_or_else(|| anyhow!("isRegistered returned non-boolean {}", result))
    }

    async fn deliver(&self, address: &ChannelAddress, payload: ChannelPayload) -> Result<()> {
        match payload {
            ChannelPayload::Text(text) => {
                self.request("sendText", json!({ "address": address, "text": text }))
                    .await?;
            }
            ChannelPayload::Media(media) => {
                let data = base64::engine::general_purpose::STANDARD.encode(&media.data);
                self.request(
                    "sendMedia",
                    json!({
                        "address": address,
                        "fileName": media.file_name,
                        "mimeType": media.mime_type,
                        "data": data,
                        "caption": media.caption,
                    }),
                )
                .await?;
            }
        }
        Ok(())
    }

    async fn close(&self) {
        // Loop may already be gone; nothing left to release then
        let _ = self.cmd_tx.send(Command::Close).await;
    }
}

/// Owns the socket: writes requests, routes responses, forwards events.
async fn gateway_loop(
    ws: WsStream,
    mut cmd_rx: mpsc::Receiver<Command>,
    event_tx: mpsc::Sender<ChannelEvent>,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let mut pending: HashMap<u64, PendingTx> = HashMap::new();
    let mut next_id: u64 = 1;

    let reason = loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(Command::Request { method, params, response_tx }) => {
                        let id = next_id;
                        next_id += 1;
                        let msg = json!({ "id": id, "method": method, "params": params });
                        pending.insert(id, response_tx);
                        if let Err(e) = ws_tx.send(Message::Text(msg.to_string().into())).await {
                            break Some(format!("gateway write failed: {}", e));
                        }
                    }
                    Some(Command::Close) | None => {
                        let _ = ws_tx.send(Message::Close(None)).await;
                        debug!("Gateway transport released");
                        return;
                    }
                }
            }
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let Some(event) = route_frame(&text, &mut pending) else { continue };
                        let closing = matches!(event, ChannelEvent::Closed { .. });
                        if event_tx.send(event).await.is_err() || closing {
                            return;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        break frame.map(|f| f.reason.as_str().to_string());
                    }
                    Some(Ok(_)) => {
                        // Ping/pong/binary carry nothing for us
                    }
                    Some(Err(e)) => break Some(e.to_string()),
                    None => break None,
                }
            }
        }
    };

    // Dropping `pending` fails every outstanding request
    let _ = event_tx.send(ChannelEvent::Closed { reason }).await;
}

/// Resolves a response against `pending`, or decodes a channel event.
fn route_frame(text: &str, pending: &mut HashMap<u64, PendingTx>) -> Option<ChannelEvent> {
    let value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "Ignoring non-JSON gateway frame");
            return None;
        }
    };

    if let Some(id) = value.get("id").and_then(Value::as_u64) {
        if let Some(tx) = pending.remove(&id) {
            let outcome = match value.get("error") {
                Some(Value::String(msg)) => Err(msg.clone()),
                Some(err) => Err(err.to_string()),
                None => Ok(value.get("result").cloned().unwrap_or(Value::Null)),
            };
            let _ = tx.send(outcome);
        } else {
            debug!(id = id, "Response for unknown or abandoned request");
        }
        return None;
    }

    match serde_json::from_value::<GatewayEvent>(value) {
        Ok(event) => Some(event.into()),
        Err(e) => {
            debug!(error = %e, "Ignoring unrecognized gateway event");
            None
        }
    }
}
