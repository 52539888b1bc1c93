//! WebSocket Transport
//!
//! JSON frames over a single WebSocket connection to the broker. Topic
//! multiplexing uses a small action envelope; the read loop forwards publish
//! frames and raises a fault when the stream breaks.

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use super::transport::{InboundFrame, Transport, TransportFault};
use crate::error::{Result, WardenError};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Wire envelope for topic multiplexing over one socket
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
enum WireMessage {
    Subscribe { topic: String },
    Unsubscribe { topic: String },
    Publish { topic: String, payload: String },
}

pub struct WsTransport {
    url: String,
    connect_timeout: Duration,
    writer: Mutex<Option<WsSink>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    frames_tx: broadcast::Sender<InboundFrame>,
    faults_tx: broadcast::Sender<TransportFault>,
}

impl WsTransport {
    pub fn new(url: &str) -> Result<Self> {
        // Fail fast on a malformed URL instead of at the first connect.
        Url::parse(url).map_err(|e| WardenError::Internal(format!("Invalid WebSocket URL: {}", e)))?;

        let (frames_tx, _) = broadcast::channel(1024);
        let (faults_tx, _) = broadcast::channel(16);
        Ok(Self {
            url: url.to_string(),
            connect_timeout: Duration::from_secs(10),
            writer: Mutex::new(None),
            reader: Mutex::new(None),
            frames_tx,
            faults_tx,
        })
    }

    async fn send_wire(&self, message: &WireMessage) -> Result<()> {
        let json = serde_json::to_string(message)?;
        let mut writer = self.writer.lock().await;
        match writer.as_mut() {
            Some(sink) => {
                sink.send(Message::Text(json)).await?;
                Ok(())
            }
            None => Err(WardenError::Transport("WebSocket not connected".to_string())),
        }
    }
}

#[async_trait::async_trait]
impl Transport for WsTransport {
    async fn connect(&self) -> Result<()> {
        info!("Connecting to WebSocket: {}", self.url);

        let (ws_stream, _) = timeout(self.connect_timeout, connect_async(&self.url))
            .await
            .map_err(|_| WardenError::Transport("WebSocket connection timeout".to_string()))?
            .map_err(WardenError::WebSocket)?;

        info!("WebSocket connected");

        let (write, mut read) = ws_stream.split();
        *self.writer.lock().await = Some(write);

        let frames_tx = self.frames_tx.clone();
        let faults_tx = self.faults_tx.clone();
        let handle = tokio::spawn(async move {
            let mut ping_interval = interval(Duration::from_secs(30));
            // First tick fires immediately; skip it.
            ping_interval.tick().await;

            loop {
                tokio::select! {
                    msg = read.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                match serde_json::from_str::<WireMessage>(&text) {
                                    Ok(WireMessage::Publish { topic, payload }) => {
                                        let _ = frames_tx.send(InboundFrame { topic, payload });
                                    }
                                    Ok(other) => {
                                        debug!("Ignoring non-publish wire message: {:?}", other);
                                    }
                                    Err(e) => {
                                        warn!("Unparseable wire message: {}", e);
                                    }
                                }
                            }
                            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
                            Some(Ok(Message::Close(_))) => {
                                let _ = faults_tx.send(TransportFault {
                                    description: "server closed the connection".to_string(),
                                });
                                break;
                            }
                            Some(Err(e)) => {
                                let _ = faults_tx.send(TransportFault {
                                    description: format!("WebSocket read error: {}", e),
                                });
                                break;
                            }
                            None => {
                                let _ = faults_tx.send(TransportFault {
                                    description: "WebSocket stream ended".to_string(),
                                });
                                break;
                            }
                            _ => {}
                        }
                    }
                    _ = ping_interval.tick() => {
                        // Keepalive is handled by the writer side on a real
                        // broker; here we just log liveness.
                        debug!("WebSocket read loop alive");
                    }
                }
            }
            debug!("WebSocket read loop finished");
        });
        *self.reader.lock().await = Some(handle);

        Ok(())
    }

    async fn disconnect(&self) {
        if let Some(mut sink) = self.writer.lock().await.take() {
            let _ = sink.send(Message::Close(None)).await;
        }
        if let Some(handle) = self.reader.lock().await.take() {
            handle.abort();
        }
        info!("WebSocket disconnected");
    }

    async fn subscribe(&self, topic: &str) -> Result<()> {
        self.send_wire(&WireMessage::Subscribe {
            topic: topic.to_string(),
        })
        .await
    }

    async fn unsubscribe(&self, topic: &str) -> Result<()> {
        self.send_wire(&WireMessage::Unsubscribe {
            topic: topic.to_string(),
        })
        .await
    }

    async fn publish(&self, topic: &str, payload: String) -> Result<()> {
        self.send_wire(&WireMessage::Publish {
            topic: topic.to_string(),
            payload,
        })
        .await
    }

    fn frames(&self) -> broadcast::Receiver<InboundFrame> {
        self.frames_tx.subscribe()
    }

    fn faults(&self) -> broadcast::Receiver<TransportFault> {
        self.faults_tx.subscribe()
    }
}
