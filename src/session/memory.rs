//! In-Process Transport
//!
//! Used by tests and embedded deployments. Frames injected through `inject`
//! reach subscribers exactly like frames read off a real connection, and
//! faults can be raised on demand to exercise the reconnect path.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

use super::transport::{InboundFrame, Transport, TransportFault};
use crate::error::{Result, WardenError};

pub struct MemoryTransport {
    connected: AtomicBool,
    /// Number of upcoming connect attempts that should fail
    fail_connects: AtomicUsize,
    subscriptions: RwLock<HashSet<String>>,
    frames_tx: broadcast::Sender<InboundFrame>,
    faults_tx: broadcast::Sender<TransportFault>,
    published_tx: broadcast::Sender<InboundFrame>,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    pub fn new() -> Self {
        let (frames_tx, _) = broadcast::channel(1024);
        let (faults_tx, _) = broadcast::channel(16);
        let (published_tx, _) = broadcast::channel(1024);
        Self {
            connected: AtomicBool::new(false),
            fail_connects: AtomicUsize::new(0),
            subscriptions: RwLock::new(HashSet::new()),
            frames_tx,
            faults_tx,
            published_tx,
        }
    }

    /// Deliver a frame to subscribers, as the server side would.
    /// Returns whether the frame was deliverable (connected and subscribed).
    pub async fn inject(&self, topic: &str, payload: &str) -> bool {
        if !self.connected.load(Ordering::SeqCst) {
            return false;
        }
        if !self.subscriptions.read().await.contains(topic) {
            return false;
        }
        self.frames_tx
            .send(InboundFrame {
                topic: topic.to_string(),
                payload: payload.to_string(),
            })
            .is_ok()
    }

    /// Break the connection and notify fault listeners.
    pub fn fail(&self, description: &str) {
        self.connected.store(false, Ordering::SeqCst);
        let _ = self.faults_tx.send(TransportFault {
            description: description.to_string(),
        });
    }

    /// Make the next `n` connect attempts fail.
    pub fn fail_next_connects(&self, n: usize) {
        self.fail_connects.store(n, Ordering::SeqCst);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub async fn subscriptions(&self) -> HashSet<String> {
        self.subscriptions.read().await.clone()
    }

    /// Observe frames published through this transport.
    pub fn published(&self) -> broadcast::Receiver<InboundFrame> {
        self.published_tx.subscribe()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self) -> Result<()> {
        let remaining = self.fail_connects.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_connects.store(remaining - 1, Ordering::SeqCst);
            return Err(WardenError::Transport(
                "memory transport: connect refused".to_string(),
            ));
        }
        self.subscriptions.write().await.clear();
        self.connected.store(true, Ordering::SeqCst);
        debug!("Memory transport connected");
        Ok(())
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.subscriptions.write().await.clear();
        debug!("Memory transport disconnected");
    }

    async fn subscribe(&self, topic: &str) -> Result<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(WardenError::Transport(
                "memory transport: not connected".to_string(),
            ));
        }
        self.subscriptions.write().await.insert(topic.to_string());
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<()> {
        self.subscriptions.write().await.remove(topic);
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: String) -> Result<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(WardenError::Transport(
                "memory transport: not connected".to_string(),
            ));
        }
        let _ = self.published_tx.send(InboundFrame {
            topic: topic.to_string(),
            payload,
        });
        Ok(())
    }

    fn frames(&self) -> broadcast::Receiver<InboundFrame> {
        self.frames_tx.subscribe()
    }

    fn faults(&self) -> broadcast::Receiver<TransportFault> {
        self.faults_tx.subscribe()
    }
}
