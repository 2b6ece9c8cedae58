//! WebSocket transport to the clearing node.
//!
//! One pump task per connection bridges the socket and the
//! [`TransportLink`] channels. The task ends, and reports
//! [`TransportEvent::Closed`], when the socket closes, errors, or the
//! outbound sender is dropped.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::domain::OrchestratorError;
use crate::ports::{NodeTransport, TransportEvent, TransportLink};

/// Frames buffered in each direction.
const LINK_CAPACITY: usize = 128;

/// `tokio-tungstenite` transport.
#[derive(Debug, Clone)]
pub struct WsTransport {
    connect_timeout: Duration,
}

impl Default for WsTransport {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(15),
        }
    }
}

impl WsTransport {
    /// Transport with a custom handshake deadline.
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl NodeTransport for WsTransport {
    async fn connect(&self, url: &str) -> Result<TransportLink, OrchestratorError> {
        let (ws_stream, _) = tokio::time::timeout(self.connect_timeout, connect_async(url))
            .await
            .map_err(|_| OrchestratorError::Connection(format!("timeout connecting to {url}")))?
            .map_err(|e| OrchestratorError::Connection(format!("WebSocket connect failed: {e}")))?;
        info!(url, "[cw-ws] Connected");

        let (mut write, mut read) = ws_stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<String>(LINK_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel::<TransportEvent>(LINK_CAPACITY);

        tokio::spawn(async move {
            let reason = loop {
                tokio::select! {
                    frame = outbound_rx.recv() => match frame {
                        Some(text) => {
                            if let Err(e) = write.send(Message::Text(text.into())).await {
                                break format!("send failed: {e}");
                            }
                        }
                        None => {
                            let _ = write.send(Message::Close(None)).await;
                            break "closed locally".to_string();
                        }
                    },
                    msg = read.next() => match msg {
                        Some(Ok(Message::Text(text))) => {
                            if inbound_tx.send(TransportEvent::Frame(text.to_string())).await.is_err() {
                                break "reader dropped".to_string();
                            }
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            if let Err(e) = write.send(Message::Pong(payload)).await {
                                break format!("pong failed: {e}");
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            break frame
                                .map(|f| format!("closed by node: {} {}", f.code, f.reason))
                                .unwrap_or_else(|| "closed by node".to_string());
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => break format!("WebSocket error: {e}"),
                        None => break "stream ended".to_string(),
                    },
                }
            };

            if reason == "closed locally" {
                debug!("[cw-ws] Link closed locally");
            } else {
                warn!(reason = %reason, "[cw-ws] Link closed");
            }
            let _ = inbound_tx.send(TransportEvent::Closed(reason)).await;
        });

        Ok(TransportLink {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}
