use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::Result;

/// Listener invoked for each delivered event of a channel
#[async_trait]
pub trait EventListener<E>: Send + Sync {
    async fn on_event(&self, event: &E) -> Result<()>;
}

/// Listener registry for one channel.
///
/// Two filtering policies live side by side: keyed listeners only see events
/// for their key, broadcast listeners see every event on the channel
/// (supervision / heartbeat / admin semantics).
pub struct ListenerRegistry<E> {
    keyed: RwLock<HashMap<u64, Vec<Arc<dyn EventListener<E>>>>>,
    broadcast: RwLock<Vec<Arc<dyn EventListener<E>>>>,
}

impl<E> Default for ListenerRegistry<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> ListenerRegistry<E> {
    pub fn new() -> Self {
        Self {
            keyed: RwLock::new(HashMap::new()),
            broadcast: RwLock::new(Vec::new()),
        }
    }

    pub async fn add_keyed(&self, key: u64, listener: Arc<dyn EventListener<E>>) {
        let mut keyed = self.keyed.write().await;
        keyed.entry(key).or_default().push(listener);
    }

    /// Remove a keyed listener by identity. Returns whether the key has no
    /// listeners left (the caller then clears per-key delivery state).
    pub async fn remove_keyed(&self, key: u64, listener: &Arc<dyn EventListener<E>>) -> bool {
        let mut keyed = self.keyed.write().await;
        if let Some(listeners) = keyed.get_mut(&key) {
            listeners.retain(|l| !Arc::ptr_eq(l, listener));
            if listeners.is_empty() {
                keyed.remove(&key);
                return true;
            }
        }
        false
    }

    pub async fn add_broadcast(&self, listener: Arc<dyn EventListener<E>>) {
        self.broadcast.write().await.push(listener);
    }

    pub async fn remove_broadcast(&self, listener: &Arc<dyn EventListener<E>>) {
        self.broadcast
            .write()
            .await
            .retain(|l| !Arc::ptr_eq(l, listener));
    }

    pub async fn count(&self) -> usize {
        let keyed = self.keyed.read().await;
        let broadcast = self.broadcast.read().await;
        keyed.values().map(Vec::len).sum::<usize>() + broadcast.len()
    }

    /// Private snapshot for notification, so no registry lock is held during
    /// listener calls.
    pub async fn snapshot(&self, key: Option<u64>) -> Vec<Arc<dyn EventListener<E>>> {
        let mut out = Vec::new();
        if let Some(key) = key {
            let keyed = self.keyed.read().await;
            if let Some(listeners) = keyed.get(&key) {
                out.extend(listeners.iter().cloned());
            }
        }
        let broadcast = self.broadcast.read().await;
        out.extend(broadcast.iter().cloned());
        out
    }
}
