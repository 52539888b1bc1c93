use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::Result;

/// One inbound message on a subscribed topic
#[derive(Debug, Clone)]
pub struct InboundFrame {
    pub topic: String,
    pub payload: String,
}

/// Asynchronous notification of a broken connection
#[derive(Debug, Clone)]
pub struct TransportFault {
    pub description: String,
}

/// Topic-based message transport.
///
/// The session manager owns exactly one transport and drives its lifecycle;
/// implementations deliver inbound frames and faults over broadcast channels
/// that survive reconnects.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the connection. Subscriptions do not survive a reconnect; the
    /// session manager rebuilds them through `refresh_subscriptions`.
    async fn connect(&self) -> Result<()>;

    /// Close the connection and drop all subscriptions.
    async fn disconnect(&self);

    async fn subscribe(&self, topic: &str) -> Result<()>;

    async fn unsubscribe(&self, topic: &str) -> Result<()>;

    async fn publish(&self, topic: &str, payload: String) -> Result<()>;

    /// Inbound frames for all subscribed topics.
    fn frames(&self) -> broadcast::Receiver<InboundFrame>;

    /// Connection loss notifications.
    fn faults(&self) -> broadcast::Receiver<TransportFault>;
}
