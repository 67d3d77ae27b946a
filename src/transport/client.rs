use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, AUTHORIZATION};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::messages::ClientMessage;

/// Close code sent on a deliberate local close
pub const NORMAL_CLOSE: u16 = 1000;

/// Close code reported when the connection dropped without a close frame
pub const ABNORMAL_CLOSE: u16 = 1006;

/// Close code reported when the peer closed without a status
pub const NO_STATUS_CLOSE: u16 = 1005;

/// Event delivered from the transport to its owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// One text frame
    Message(String),
    /// The connection is gone; always the last event
    Closed { code: u16 },
}

/// Frame queued for the writer task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    Text(String),
    Close,
}

/// Sending half of an open link. Never blocks.
#[derive(Debug, Clone)]
pub struct LinkSender {
    tx: mpsc::Sender<OutboundFrame>,
}

impl LinkSender {
    /// Queue a message; returns false if it was dropped
    pub fn send(&self, message: &ClientMessage) -> bool {
        let text = match message.to_json() {
            Ok(text) => text,
            Err(e) => {
                warn!("{:#}", e);
                return false;
            }
        };

        match self.tx.try_send(OutboundFrame::Text(text)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Transport send queue full, dropping message");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("Send on closed transport, dropping message");
                false
            }
        }
    }

    /// Request a normal close. Safe to call more than once.
    pub fn close(&self) {
        if self.tx.try_send(OutboundFrame::Close).is_err() {
            debug!("Transport already closing");
        }
    }
}

/// An open connection: a non-blocking sender and the inbound event stream
#[derive(Debug)]
pub struct TransportLink {
    pub sender: LinkSender,
    pub events: mpsc::Receiver<TransportEvent>,
}

/// The far side of a [`TransportLink`], held by whatever drives the connection
#[derive(Debug)]
pub struct LinkPeer {
    pub outbound: mpsc::Receiver<OutboundFrame>,
    pub inbound: mpsc::Sender<TransportEvent>,
}

impl TransportLink {
    /// Create a link and the peer end that feeds it
    pub fn channel(capacity: usize) -> (TransportLink, LinkPeer) {
        let (out_tx, out_rx) = mpsc::channel(capacity);
        let (in_tx, in_rx) = mpsc::channel(capacity);
        (
            TransportLink {
                sender: LinkSender { tx: out_tx },
                events: in_rx,
            },
            LinkPeer {
                outbound: out_rx,
                inbound: in_tx,
            },
        )
    }
}

/// Opens persistent message connections to the agent
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, url: &str) -> Result<TransportLink>;
}

/// WebSocket connector
pub struct WsConnector {
    /// Login-derived credential sent as a bearer token
    auth_token: Option<String>,
    capacity: usize,
}

impl WsConnector {
    pub fn new(auth_token: Option<String>) -> Self {
        Self {
            auth_token,
            capacity: 256,
        }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn open(&self, url: &str) -> Result<TransportLink> {
        let mut request = url
            .into_client_request()
            .with_context(|| format!("Invalid websocket URL: {}", url))?;

        if let Some(token) = &self.auth_token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .context("Auth token is not a valid header value")?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (stream, _response) = connect_async(request)
            .await
            .with_context(|| format!("WebSocket handshake failed: {}", url))?;

        info!("WebSocket connected: {}", url);

        let (mut sink, mut source) = stream.split();
        let (link, peer) = TransportLink::channel(self.capacity);
        let LinkPeer {
            mut outbound,
            inbound,
        } = peer;

        tokio::spawn(async move {
            while let Some(frame) = outbound.recv().await {
                match frame {
                    OutboundFrame::Text(text) => {
                        if let Err(e) = sink.send(Message::Text(text)).await {
                            warn!("WebSocket send failed: {}", e);
                            break;
                        }
                    }
                    OutboundFrame::Close => {
                        let frame = CloseFrame {
                            code: CloseCode::Normal,
                            reason: "".into(),
                        };
                        if let Err(e) = sink.send(Message::Close(Some(frame))).await {
                            debug!("WebSocket close frame not sent: {}", e);
                        }
                        break;
                    }
                }
            }
            let _ = sink.close().await;
            debug!("WebSocket writer stopped");
        });

        tokio::spawn(async move {
            let mut code = ABNORMAL_CLOSE;

            while let Some(message) = source.next().await {
                match message {
                    Ok(Message::Text(text)) => {
                        if inbound.send(TransportEvent::Message(text)).await.is_err() {
                            // Owner dropped the link
                            return;
                        }
                    }
                    Ok(Message::Close(frame)) => {
                        code = frame
                            .map(|f| u16::from(f.code))
                            .unwrap_or(NO_STATUS_CLOSE);
                        break;
                    }
                    Ok(Message::Binary(bytes)) => {
                        debug!("Ignoring binary frame ({} bytes)", bytes.len());
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("WebSocket receive failed: {}", e);
                        break;
                    }
                }
            }

            let _ = inbound.send(TransportEvent::Closed { code }).await;
        });

        Ok(link)
    }
}
