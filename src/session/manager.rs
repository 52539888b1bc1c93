//! Reconnecting Session Manager
//!
//! Owns the transport and one queued delivery wrapper per topic: fixed system
//! channels (supervision, heartbeat, alarm, admin, requests) plus lazily
//! created per-entity control tag channels. Lost connections are rebuilt with
//! a fixed backoff and all subscriptions re-created from scratch.

use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::transport::Transport;
use super::{ConnectionListener, ConnectionState};
use crate::config::{ConnectionConfig, DeliveryConfig, TopicConfig};
use crate::delivery::{EventListener, QueuedDeliveryWrapper, SlowConsumerListener, WrapperConfig};
use crate::domain::SupervisionEvent;
use crate::error::{Result, WardenError};
use crate::protocol::{
    AdminMessage, AlarmMessage, ControlTagUpdate, ProgressReport, ReplyKind, ReplyMessage,
    RequestEnvelope, RequestKind, ServerHeartbeat,
};

/// Receives intermediate progress and error reports while a request wait
/// continues
pub trait ProgressListener: Send + Sync {
    fn on_progress(&self, report: &ProgressReport);

    fn on_error(&self, _message: &str) {}
}

const REPLY_TOPIC_PREFIX: &str = "warden.reply.";

fn json_converter<E: serde::de::DeserializeOwned>(raw: &str) -> Result<E> {
    Ok(serde_json::from_str(raw)?)
}

pub struct SessionManager {
    transport: Arc<dyn Transport>,
    topics: TopicConfig,
    connection: ConnectionConfig,
    wrapper_config: WrapperConfig,

    state: Arc<RwLock<ConnectionState>>,
    shutdown: Arc<AtomicBool>,
    /// At most one reconnect attempt at a time
    reconnecting: Arc<AtomicBool>,
    /// Excludes register/unregister while subscriptions are being rebuilt
    refresh_lock: Mutex<()>,

    supervision: Arc<QueuedDeliveryWrapper<SupervisionEvent>>,
    heartbeat: Arc<QueuedDeliveryWrapper<ServerHeartbeat>>,
    alarm: Arc<QueuedDeliveryWrapper<AlarmMessage>>,
    admin: Arc<QueuedDeliveryWrapper<AdminMessage>>,
    requests: Arc<QueuedDeliveryWrapper<RequestEnvelope>>,
    /// Per-entity control tag channels, keyed by topic name
    tag_wrappers: Arc<RwLock<HashMap<String, Arc<QueuedDeliveryWrapper<ControlTagUpdate>>>>>,

    admin_registered: AtomicBool,
    pending_replies: Arc<DashMap<String, mpsc::UnboundedSender<ReplyMessage>>>,
    connection_listeners: Arc<RwLock<Vec<Arc<dyn ConnectionListener>>>>,

    router: Mutex<Option<JoinHandle<()>>>,
    fault_watcher: Mutex<Option<JoinHandle<()>>>,
}

impl SessionManager {
    pub fn new(
        transport: Arc<dyn Transport>,
        topics: TopicConfig,
        connection: ConnectionConfig,
        delivery: DeliveryConfig,
    ) -> Self {
        let wrapper_config = WrapperConfig {
            queue_capacity: delivery.queue_capacity,
            slow_consumer_threshold: Duration::from_secs(delivery.slow_consumer_threshold_secs),
            ..WrapperConfig::default()
        };

        let supervision = Arc::new(QueuedDeliveryWrapper::new(
            &topics.supervision,
            wrapper_config.clone(),
            json_converter::<SupervisionEvent>,
        ));
        let heartbeat = Arc::new(QueuedDeliveryWrapper::new(
            &topics.heartbeat,
            wrapper_config.clone(),
            json_converter::<ServerHeartbeat>,
        ));
        let alarm = Arc::new(QueuedDeliveryWrapper::new(
            &topics.alarm,
            wrapper_config.clone(),
            json_converter::<AlarmMessage>,
        ));
        let admin = Arc::new(QueuedDeliveryWrapper::new(
            &topics.admin,
            wrapper_config.clone(),
            json_converter::<AdminMessage>,
        ));
        let requests = Arc::new(QueuedDeliveryWrapper::new(
            &topics.request,
            wrapper_config.clone(),
            json_converter::<RequestEnvelope>,
        ));

        Self {
            transport,
            topics,
            connection,
            wrapper_config,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            shutdown: Arc::new(AtomicBool::new(false)),
            reconnecting: Arc::new(AtomicBool::new(false)),
            refresh_lock: Mutex::new(()),
            supervision,
            heartbeat,
            alarm,
            admin,
            requests,
            tag_wrappers: Arc::new(RwLock::new(HashMap::new())),
            admin_registered: AtomicBool::new(false),
            pending_replies: Arc::new(DashMap::new()),
            connection_listeners: Arc::new(RwLock::new(Vec::new())),
            router: Mutex::new(None),
            fault_watcher: Mutex::new(None),
        }
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub async fn is_connected(&self) -> bool {
        *self.state.read().await == ConnectionState::Connected
    }

    pub fn topics(&self) -> &TopicConfig {
        &self.topics
    }

    /// Spawn the frame router and fault watcher, then connect. The router
    /// outlives individual connections; broadcast channels survive reconnects.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        {
            let this = Arc::clone(self);
            let mut frames = self.transport.frames();
            let handle = tokio::spawn(async move {
                loop {
                    match frames.recv().await {
                        Ok(frame) => this.route_frame(&frame.topic, &frame.payload).await,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Frame router lagged, {} frames lost", n);
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
                debug!("Frame router stopped");
            });
            *self.router.lock().await = Some(handle);
        }

        {
            let this = Arc::clone(self);
            let mut faults = self.transport.faults();
            let handle = tokio::spawn(async move {
                loop {
                    match faults.recv().await {
                        Ok(fault) => this.on_transport_fault(&fault.description).await,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
            });
            *self.fault_watcher.lock().await = Some(handle);
        }

        self.connect().await
    }

    /// Connect loop: retries with a fixed backoff and never gives up while
    /// not shut down.
    pub async fn connect(&self) -> Result<()> {
        let backoff = Duration::from_secs(self.connection.reconnect_backoff_secs);

        while !self.shutdown.load(Ordering::SeqCst) {
            *self.state.write().await = ConnectionState::Connecting;
            info!("Connecting session");

            match self.try_connect_once().await {
                Ok(()) => {
                    *self.state.write().await = ConnectionState::Connected;
                    info!("Session connected");
                    self.notify_connection_listeners(true).await;
                    return Ok(());
                }
                Err(e) => {
                    warn!("Connection attempt failed: {}; retrying in {:?}", e, backoff);
                    tokio::time::sleep(backoff).await;
                }
            }
        }

        Err(WardenError::Cancelled)
    }

    async fn try_connect_once(&self) -> Result<()> {
        self.transport.connect().await?;
        self.refresh_subscriptions().await?;
        Ok(())
    }

    /// Full rebuild of all subscriptions: the fixed system topics plus every
    /// currently registered control tag topic. Registration is excluded while
    /// this runs.
    async fn refresh_subscriptions(&self) -> Result<()> {
        let _guard = self.refresh_lock.lock().await;

        self.transport.subscribe(&self.topics.supervision).await?;
        self.transport.subscribe(&self.topics.heartbeat).await?;
        self.transport.subscribe(&self.topics.alarm).await?;
        self.transport.subscribe(&self.topics.admin).await?;
        self.transport.subscribe(&self.topics.request).await?;

        self.supervision.start().await;
        self.heartbeat.start().await;
        self.alarm.start().await;
        self.admin.start().await;
        self.requests.start().await;

        let wrappers = self.tag_wrappers.read().await;
        for (topic, wrapper) in wrappers.iter() {
            self.transport.subscribe(topic).await?;
            wrapper.start().await;
        }
        info!(
            "Subscriptions refreshed: 5 system topics, {} control topics",
            wrappers.len()
        );
        Ok(())
    }

    /// Handle a broken connection: at most one reconnect attempt runs at a
    /// time; later faults while one is in flight are ignored.
    async fn on_transport_fault(&self, description: &str) {
        if self.shutdown.load(Ordering::SeqCst) {
            return;
        }
        if self
            .reconnecting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Reconnect already in progress, ignoring fault: {}", description);
            return;
        }

        warn!("Transport fault: {}; reconnecting", description);
        *self.state.write().await = ConnectionState::Disconnected;
        self.notify_connection_listeners(false).await;

        self.stop_wrappers().await;
        self.transport.disconnect().await;

        if let Err(e) = self.connect().await {
            error!("Reconnect aborted: {}", e);
        }
        self.reconnecting.store(false, Ordering::SeqCst);
    }

    async fn stop_wrappers(&self) {
        self.supervision.stop().await;
        self.heartbeat.stop().await;
        self.alarm.stop().await;
        self.admin.stop().await;
        self.requests.stop().await;
        for wrapper in self.tag_wrappers.read().await.values() {
            wrapper.stop().await;
        }
    }

    async fn route_frame(&self, topic: &str, payload: &str) {
        if topic == self.topics.supervision {
            self.supervision.on_message(payload).await;
        } else if topic == self.topics.heartbeat {
            self.heartbeat.on_message(payload).await;
        } else if topic == self.topics.alarm {
            self.alarm.on_message(payload).await;
        } else if topic == self.topics.admin {
            self.admin.on_message(payload).await;
        } else if topic == self.topics.request {
            self.requests.on_message(payload).await;
        } else if topic.starts_with(REPLY_TOPIC_PREFIX) {
            match serde_json::from_str::<ReplyMessage>(payload) {
                Ok(reply) => {
                    if let Some(tx) = self.pending_replies.get(topic) {
                        let _ = tx.send(reply);
                    } else {
                        debug!("Reply on {} with no pending request", topic);
                    }
                }
                Err(e) => warn!("Unparseable reply on {}: {}", topic, e),
            }
        } else {
            let wrapper = self.tag_wrappers.read().await.get(topic).cloned();
            match wrapper {
                Some(wrapper) => wrapper.on_message(payload).await,
                None => debug!("Frame on unrouted topic {}", topic),
            }
        }
    }

    // --- listener registration ---

    /// Register a per-entity control tag listener on `topic`, keyed by the
    /// entity id. The channel wrapper is created lazily. When not connected
    /// the registration is retained for the next subscription refresh and a
    /// retryable error is returned.
    pub async fn register_update_listener(
        &self,
        topic: &str,
        entity_id: u64,
        listener: Arc<dyn EventListener<ControlTagUpdate>>,
    ) -> Result<()> {
        let _guard = self.refresh_lock.lock().await;

        let wrapper = {
            let mut wrappers = self.tag_wrappers.write().await;
            match wrappers.get(topic) {
                Some(wrapper) => Arc::clone(wrapper),
                None => {
                    let wrapper = Arc::new(QueuedDeliveryWrapper::new(
                        topic,
                        self.wrapper_config.clone(),
                        json_converter::<ControlTagUpdate>,
                    ));
                    wrappers.insert(topic.to_string(), Arc::clone(&wrapper));
                    wrapper
                }
            }
        };
        wrapper.add_keyed_listener(entity_id, listener).await;

        if *self.state.read().await != ConnectionState::Connected {
            return Err(WardenError::NotConnected {
                topic: topic.to_string(),
            });
        }

        self.transport.subscribe(topic).await?;
        wrapper.start().await;
        debug!("Registered update listener for entity {} on {}", entity_id, topic);
        Ok(())
    }

    /// Remove a control tag listener; an emptied wrapper is torn down and its
    /// topic unsubscribed.
    pub async fn unregister_update_listener(
        &self,
        topic: &str,
        entity_id: u64,
        listener: &Arc<dyn EventListener<ControlTagUpdate>>,
    ) -> Result<()> {
        let _guard = self.refresh_lock.lock().await;

        let (wrapper, now_empty) = {
            let wrappers = self.tag_wrappers.read().await;
            match wrappers.get(topic) {
                Some(wrapper) => {
                    let wrapper = Arc::clone(wrapper);
                    wrapper.remove_keyed_listener(entity_id, listener).await;
                    let empty = wrapper.listener_count().await == 0;
                    (wrapper, empty)
                }
                None => return Ok(()),
            }
        };

        if now_empty {
            wrapper.stop().await;
            self.tag_wrappers.write().await.remove(topic);
            if *self.state.read().await == ConnectionState::Connected {
                self.transport.unsubscribe(topic).await?;
            }
            debug!("Tore down empty control channel {}", topic);
        }
        Ok(())
    }

    pub async fn register_supervision_listener(
        &self,
        listener: Arc<dyn EventListener<SupervisionEvent>>,
    ) {
        self.supervision.add_broadcast_listener(listener).await;
    }

    pub async fn unregister_supervision_listener(
        &self,
        listener: &Arc<dyn EventListener<SupervisionEvent>>,
    ) {
        self.supervision.remove_broadcast_listener(listener).await;
    }

    /// Server heartbeats are forwarded unfiltered to every registered listener.
    pub async fn register_heartbeat_listener(
        &self,
        listener: Arc<dyn EventListener<ServerHeartbeat>>,
    ) {
        self.heartbeat.add_broadcast_listener(listener).await;
    }

    pub async fn register_alarm_listener(&self, listener: Arc<dyn EventListener<AlarmMessage>>) {
        self.alarm.add_broadcast_listener(listener).await;
    }

    pub async fn register_request_listener(
        &self,
        listener: Arc<dyn EventListener<RequestEnvelope>>,
    ) {
        self.requests.add_broadcast_listener(listener).await;
    }

    /// The admin channel accepts exactly one listener.
    pub async fn register_admin_listener(
        &self,
        listener: Arc<dyn EventListener<AdminMessage>>,
    ) -> Result<()> {
        if self.admin_registered.swap(true, Ordering::SeqCst) {
            return Err(WardenError::Contract(
                "admin listener is already registered".to_string(),
            ));
        }
        self.admin.add_broadcast_listener(listener).await;
        Ok(())
    }

    /// Registered listeners get an immediate callback with the current state.
    pub async fn register_connection_listener(&self, listener: Arc<dyn ConnectionListener>) {
        let connected = self.is_connected().await;
        self.connection_listeners.write().await.push(Arc::clone(&listener));
        if connected {
            listener.on_connection();
        } else {
            listener.on_disconnection();
        }
    }

    async fn notify_connection_listeners(&self, connected: bool) {
        let listeners = self.connection_listeners.read().await.clone();
        for listener in listeners {
            if connected {
                listener.on_connection();
            } else {
                listener.on_disconnection();
            }
        }
    }

    pub async fn set_slow_consumer_listener(&self, listener: Arc<dyn SlowConsumerListener>) {
        self.supervision
            .set_slow_consumer_listener(Arc::clone(&listener))
            .await;
        self.heartbeat
            .set_slow_consumer_listener(Arc::clone(&listener))
            .await;
        self.alarm
            .set_slow_consumer_listener(Arc::clone(&listener))
            .await;
        self.admin
            .set_slow_consumer_listener(Arc::clone(&listener))
            .await;
        self.requests
            .set_slow_consumer_listener(Arc::clone(&listener))
            .await;
        for wrapper in self.tag_wrappers.read().await.values() {
            wrapper.set_slow_consumer_listener(Arc::clone(&listener)).await;
        }
    }

    // --- outbound ---

    pub async fn publish(&self, topic: &str, payload: String) -> Result<()> {
        self.transport.publish(topic, payload).await
    }

    pub async fn publish_json<T: serde::Serialize>(&self, topic: &str, value: &T) -> Result<()> {
        self.publish(topic, serde_json::to_string(value)?).await
    }

    /// Send a correlated request and wait for the final result. Progress
    /// reports are forwarded to the optional listener while the wait
    /// continues; an error report or the timeout terminates the wait.
    pub async fn send_request(
        &self,
        kind: RequestKind,
        report_listener: Option<Arc<dyn ProgressListener>>,
    ) -> Result<Value> {
        let request_id = Uuid::new_v4().to_string();
        let reply_to = format!("{}{}", REPLY_TOPIC_PREFIX, request_id);
        let timeout = Duration::from_secs(self.connection.request_timeout_secs);

        let (tx, mut rx) = mpsc::unbounded_channel();
        self.pending_replies.insert(reply_to.clone(), tx);
        self.transport.subscribe(&reply_to).await?;

        let envelope = RequestEnvelope {
            request_id: request_id.clone(),
            reply_to: reply_to.clone(),
            timestamp: chrono::Utc::now(),
            kind,
        };
        let result = async {
            self.transport
                .publish(&self.topics.request, serde_json::to_string(&envelope)?)
                .await?;

            let started = Instant::now();
            let deadline = started + timeout;
            loop {
                let reply = match tokio::time::timeout_at(deadline, rx.recv()).await {
                    Err(_) | Ok(None) => {
                        return Err(WardenError::RequestTimeout {
                            elapsed_ms: started.elapsed().as_millis() as u64,
                        });
                    }
                    Ok(Some(reply)) => reply,
                };
                if reply.request_id != request_id {
                    debug!("Reply correlation mismatch on {}, ignoring", reply_to);
                    continue;
                }
                match reply.kind {
                    ReplyKind::Result(value) => return Ok(value),
                    ReplyKind::Progress(report) => {
                        debug!(
                            "Request {} progress: {} ({}/{})",
                            request_id, report.description, report.current, report.total
                        );
                        if let Some(listener) = &report_listener {
                            listener.on_progress(&report);
                        }
                    }
                    ReplyKind::Error(message) => {
                        if let Some(listener) = &report_listener {
                            listener.on_error(&message);
                        }
                        return Err(WardenError::RequestFailed(message));
                    }
                }
            }
        }
        .await;

        self.pending_replies.remove(&reply_to);
        let _ = self.transport.unsubscribe(&reply_to).await;
        result
    }

    // --- diagnostics ---

    /// Queue depth and capacity per active channel
    pub async fn channel_depths(&self) -> Vec<(String, usize, usize)> {
        let mut depths = vec![
            (
                self.supervision.topic().to_string(),
                self.supervision.queue_depth(),
                self.supervision.queue_capacity(),
            ),
            (
                self.heartbeat.topic().to_string(),
                self.heartbeat.queue_depth(),
                self.heartbeat.queue_capacity(),
            ),
            (
                self.alarm.topic().to_string(),
                self.alarm.queue_depth(),
                self.alarm.queue_capacity(),
            ),
            (
                self.admin.topic().to_string(),
                self.admin.queue_depth(),
                self.admin.queue_capacity(),
            ),
            (
                self.requests.topic().to_string(),
                self.requests.queue_depth(),
                self.requests.queue_capacity(),
            ),
        ];
        for (topic, wrapper) in self.tag_wrappers.read().await.iter() {
            depths.push((topic.clone(), wrapper.queue_depth(), wrapper.queue_capacity()));
        }
        depths
    }

    pub fn in_flight_requests(&self) -> usize {
        self.pending_replies.len()
    }

    /// Terminal shutdown: stop wrappers, close the transport, abort the
    /// router and fault watcher.
    pub async fn shutdown(&self) {
        info!("Shutting down session manager");
        self.shutdown.store(true, Ordering::SeqCst);
        *self.state.write().await = ConnectionState::Shutdown;

        self.stop_wrappers().await;
        self.transport.disconnect().await;

        if let Some(handle) = self.router.lock().await.take() {
            handle.abort();
        }
        if let Some(handle) = self.fault_watcher.lock().await.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MemoryTransport;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    fn manager(transport: Arc<MemoryTransport>) -> Arc<SessionManager> {
        let mut connection = ConnectionConfig::default();
        connection.reconnect_backoff_secs = 1;
        connection.request_timeout_secs = 2;
        Arc::new(SessionManager::new(
            transport,
            TopicConfig::default(),
            connection,
            DeliveryConfig::default(),
        ))
    }

    struct CountingListener {
        count: AtomicUsize,
    }

    #[async_trait]
    impl EventListener<ControlTagUpdate> for CountingListener {
        async fn on_event(&self, _event: &ControlTagUpdate) -> Result<()> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_connects_and_subscribes_system_topics() {
        let transport = Arc::new(MemoryTransport::new());
        let session = manager(Arc::clone(&transport));
        session.start().await.unwrap();

        assert_eq!(session.state().await, ConnectionState::Connected);
        let subs = transport.subscriptions().await;
        assert!(subs.contains(&"warden.supervision".to_string()));
        assert!(subs.contains(&"warden.heartbeat".to_string()));
        assert!(subs.contains(&"warden.alarm".to_string()));
        assert!(subs.contains(&"warden.admin".to_string()));
        assert!(subs.contains(&"warden.request".to_string()));

        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_register_while_disconnected_is_retryable() {
        let transport = Arc::new(MemoryTransport::new());
        let session = manager(Arc::clone(&transport));

        let listener = Arc::new(CountingListener {
            count: AtomicUsize::new(0),
        }) as Arc<dyn EventListener<ControlTagUpdate>>;
        let err = session
            .register_update_listener("warden.control.7", 7, Arc::clone(&listener))
            .await
            .unwrap_err();
        assert!(err.is_retryable());

        // The registration is retained: after connect the topic is subscribed.
        session.start().await.unwrap();
        assert!(transport
            .subscriptions()
            .await
            .contains(&"warden.control.7".to_string()));

        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_routes_control_updates_to_keyed_listener() {
        let transport = Arc::new(MemoryTransport::new());
        let session = manager(Arc::clone(&transport));
        session.start().await.unwrap();

        let listener = Arc::new(CountingListener {
            count: AtomicUsize::new(0),
        });
        session
            .register_update_listener(
                "warden.control.7",
                7,
                Arc::clone(&listener) as Arc<dyn EventListener<ControlTagUpdate>>,
            )
            .await
            .unwrap();

        let update = serde_json::json!({
            "tagId": 7,
            "value": true,
            "sourceTimestamp": chrono::Utc::now(),
        });
        assert!(transport.inject("warden.control.7", &update.to_string()).await);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(listener.count.load(Ordering::SeqCst), 1);

        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_admin_listener_is_singleton() {
        let transport = Arc::new(MemoryTransport::new());
        let session = manager(transport);

        struct Sink;
        #[async_trait]
        impl EventListener<AdminMessage> for Sink {
            async fn on_event(&self, _event: &AdminMessage) -> Result<()> {
                Ok(())
            }
        }

        session
            .register_admin_listener(Arc::new(Sink) as Arc<dyn EventListener<AdminMessage>>)
            .await
            .unwrap();
        let err = session
            .register_admin_listener(Arc::new(Sink) as Arc<dyn EventListener<AdminMessage>>)
            .await
            .unwrap_err();
        assert!(matches!(err, WardenError::Contract(_)));
    }

    #[tokio::test]
    async fn test_reconnect_rebuilds_subscriptions() {
        let transport = Arc::new(MemoryTransport::new());
        let session = manager(Arc::clone(&transport));
        session.start().await.unwrap();

        let listener = Arc::new(CountingListener {
            count: AtomicUsize::new(0),
        });
        session
            .register_update_listener(
                "warden.control.9",
                9,
                Arc::clone(&listener) as Arc<dyn EventListener<ControlTagUpdate>>,
            )
            .await
            .unwrap();

        transport.fail("simulated broker loss");
        // Backoff is 1s; give the reconnect loop time to finish.
        tokio::time::sleep(Duration::from_millis(1600)).await;

        assert_eq!(session.state().await, ConnectionState::Connected);
        let subs = transport.subscriptions().await;
        assert!(subs.contains(&"warden.supervision".to_string()));
        assert!(subs.contains(&"warden.control.9".to_string()));

        // The rebuilt channel still delivers.
        let update = serde_json::json!({
            "tagId": 9,
            "value": 1,
            "sourceTimestamp": chrono::Utc::now(),
        });
        assert!(transport.inject("warden.control.9", &update.to_string()).await);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(listener.count.load(Ordering::SeqCst), 1);

        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_connection_listener_immediate_callback() {
        let transport = Arc::new(MemoryTransport::new());
        let session = manager(transport);

        struct Recorder {
            log: std::sync::Mutex<Vec<&'static str>>,
        }
        impl ConnectionListener for Recorder {
            fn on_connection(&self) {
                self.log.lock().unwrap().push("up");
            }
            fn on_disconnection(&self) {
                self.log.lock().unwrap().push("down");
            }
        }

        let recorder = Arc::new(Recorder {
            log: std::sync::Mutex::new(Vec::new()),
        });
        // Not connected yet: immediate callback reflects that.
        session
            .register_connection_listener(Arc::clone(&recorder) as Arc<dyn ConnectionListener>)
            .await;
        assert_eq!(recorder.log.lock().unwrap().clone(), vec!["down"]);

        session.start().await.unwrap();
        assert_eq!(recorder.log.lock().unwrap().clone(), vec!["down", "up"]);

        session.shutdown().await;
    }
}
