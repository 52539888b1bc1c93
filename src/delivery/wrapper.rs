//! Queued Delivery Wrapper
//!
//! One wrapper per logical channel. Decouples the transport task from
//! listener execution through a bounded queue, detects slow consumers, and
//! filters per-key stale events.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::listeners::{EventListener, ListenerRegistry};
use crate::error::Result;

/// Typed event carried by a delivery channel
pub trait DeliveryEvent: Send + Sync + Clone + 'static {
    /// Domain id used for per-key staleness filtering; `None` means the event
    /// is delivered unfiltered (system-wide channels).
    fn key(&self) -> Option<u64>;
    fn timestamp(&self) -> DateTime<Utc>;
}

/// Callback fired when a dispatch exceeds the slow-consumer threshold
pub trait SlowConsumerListener: Send + Sync {
    fn on_slow_consumer(&self, description: &str);
}

/// Tuning knobs for one channel wrapper
#[derive(Debug, Clone)]
pub struct WrapperConfig {
    /// Bounded queue capacity; a full queue blocks the transport task
    pub queue_capacity: usize,
    /// Dispatch duration after which the slow-consumer callback fires
    pub slow_consumer_threshold: Duration,
    /// Poll timeout of the drain loop, bounds shutdown latency
    pub poll_timeout: Duration,
}

impl Default for WrapperConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1000,
            slow_consumer_threshold: Duration::from_secs(30),
            poll_timeout: Duration::from_millis(100),
        }
    }
}

type Converter<E> = Arc<dyn Fn(&str) -> Result<E> + Send + Sync>;

/// Bounded-queue, single-worker message-to-event pipeline
pub struct QueuedDeliveryWrapper<E: DeliveryEvent> {
    topic: String,
    config: WrapperConfig,
    converter: Converter<E>,
    tx: mpsc::Sender<E>,
    /// Held while no worker runs; the worker takes it at start and hands it
    /// back at stop so the wrapper can be restarted after a reconnect.
    rx_slot: Mutex<Option<mpsc::Receiver<E>>>,
    listeners: Arc<ListenerRegistry<E>>,
    last_delivered: Arc<DashMap<u64, DateTime<Utc>>>,
    dispatch_started: Arc<RwLock<Option<Instant>>>,
    slow_consumer: Arc<RwLock<Option<Arc<dyn SlowConsumerListener>>>>,
    running: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<mpsc::Receiver<E>>>>,
}

impl<E: DeliveryEvent> QueuedDeliveryWrapper<E> {
    pub fn new(
        topic: &str,
        config: WrapperConfig,
        converter: impl Fn(&str) -> Result<E> + Send + Sync + 'static,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity);
        Self {
            topic: topic.to_string(),
            config,
            converter: Arc::new(converter),
            tx,
            rx_slot: Mutex::new(Some(rx)),
            listeners: Arc::new(ListenerRegistry::new()),
            last_delivered: Arc::new(DashMap::new()),
            dispatch_started: Arc::new(RwLock::new(None)),
            slow_consumer: Arc::new(RwLock::new(None)),
            running: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Current number of queued, undelivered events.
    pub fn queue_depth(&self) -> usize {
        self.config.queue_capacity - self.tx.capacity()
    }

    pub fn queue_capacity(&self) -> usize {
        self.config.queue_capacity
    }

    pub async fn set_slow_consumer_listener(&self, listener: Arc<dyn SlowConsumerListener>) {
        *self.slow_consumer.write().await = Some(listener);
    }

    pub async fn add_keyed_listener(&self, key: u64, listener: Arc<dyn EventListener<E>>) {
        self.listeners.add_keyed(key, listener).await;
    }

    /// Remove a keyed listener; when the key's last listener goes away, its
    /// staleness-filter entry is cleared too.
    pub async fn remove_keyed_listener(&self, key: u64, listener: &Arc<dyn EventListener<E>>) {
        if self.listeners.remove_keyed(key, listener).await {
            self.last_delivered.remove(&key);
        }
    }

    pub async fn add_broadcast_listener(&self, listener: Arc<dyn EventListener<E>>) {
        self.listeners.add_broadcast(listener).await;
    }

    pub async fn remove_broadcast_listener(&self, listener: &Arc<dyn EventListener<E>>) {
        self.listeners.remove_broadcast(listener).await;
    }

    pub async fn listener_count(&self) -> usize {
        self.listeners.count().await
    }

    /// Entry point for the transport task. Converts the raw message and
    /// enqueues it; a full queue blocks the caller (deliberate backpressure,
    /// not a drop policy). Must not do anything else that blocks.
    pub async fn on_message(&self, raw: &str) {
        let event = match (self.converter)(raw) {
            Ok(event) => event,
            Err(e) => {
                warn!("Discarding undecodable message on {}: {}", self.topic, e);
                return;
            }
        };

        self.check_slow_consumer().await;

        if self.tx.send(event).await.is_err() {
            warn!("Delivery queue for {} is closed; message dropped", self.topic);
        }
    }

    /// Fires the slow-consumer callback when a dispatch has been in flight
    /// longer than the threshold. May fire repeatedly while still slow.
    async fn check_slow_consumer(&self) {
        let started = *self.dispatch_started.read().await;
        if let Some(started) = started {
            let elapsed = started.elapsed();
            if elapsed > self.config.slow_consumer_threshold {
                let description = format!(
                    "Slow consumer on {}: dispatch in flight for {:?} (threshold {:?})",
                    self.topic, elapsed, self.config.slow_consumer_threshold
                );
                warn!("{}", description);
                if let Some(listener) = self.slow_consumer.read().await.as_ref() {
                    listener.on_slow_consumer(&description);
                }
            }
        }
    }

    /// Start the drain worker. Idempotent while running.
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(rx) = self.rx_slot.lock().await.take() else {
            // A previous worker still owns the receiver; treat as running.
            return;
        };

        let handle = tokio::spawn(drain_loop(
            self.topic.clone(),
            self.config.clone(),
            rx,
            Arc::clone(&self.listeners),
            Arc::clone(&self.last_delivered),
            Arc::clone(&self.dispatch_started),
            Arc::clone(&self.running),
        ));
        *self.worker.lock().await = Some(handle);
    }

    /// Stop the drain worker. The flag is observed at the next poll timeout;
    /// an in-flight listener call is not interrupted.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.worker.lock().await.take() {
            if let Ok(rx) = handle.await {
                *self.rx_slot.lock().await = Some(rx);
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Self-owned drain loop: pop one event, dispatch synchronously to the
/// listener snapshot, repeat. Returns the receiver so the wrapper can be
/// restarted.
async fn drain_loop<E: DeliveryEvent>(
    topic: String,
    config: WrapperConfig,
    mut rx: mpsc::Receiver<E>,
    listeners: Arc<ListenerRegistry<E>>,
    last_delivered: Arc<DashMap<u64, DateTime<Utc>>>,
    dispatch_started: Arc<RwLock<Option<Instant>>>,
    running: Arc<AtomicBool>,
) -> mpsc::Receiver<E> {
    debug!("Delivery worker started for {}", topic);

    while running.load(Ordering::SeqCst) {
        let event = match tokio::time::timeout(config.poll_timeout, rx.recv()).await {
            Err(_) => continue,
            Ok(None) => break,
            Ok(Some(event)) => event,
        };

        // Per-key staleness filter: deliver only strictly newer events. The
        // timestamp is taken once so the value stored after dispatch is the
        // same one that passed the comparison.
        let timestamp = event.timestamp();
        if let Some(key) = event.key() {
            if let Some(last) = last_delivered.get(&key) {
                if timestamp <= *last {
                    debug!(
                        "Discarding stale event on {} for key {} ({} <= {})",
                        topic, key, timestamp, *last
                    );
                    continue;
                }
            }
        }

        let snapshot = listeners.snapshot(event.key()).await;

        *dispatch_started.write().await = Some(Instant::now());
        for listener in &snapshot {
            if let Err(e) = listener.on_event(&event).await {
                warn!("Listener failed on {}: {}", topic, e);
            }
        }
        *dispatch_started.write().await = None;

        if let Some(key) = event.key() {
            last_delivered.insert(key, timestamp);
        }
    }

    debug!("Delivery worker stopped for {}", topic);
    rx
}
