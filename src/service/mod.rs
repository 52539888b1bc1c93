//! Composition root: wires the registry, session layer and supervision core
//! into one runnable service.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::delivery::EventListener;
use crate::diagnostics::{ChannelDepth, DiagnosticsSnapshot};
use crate::domain::SupervisionEvent;
use crate::error::Result;
use crate::protocol::{
    ControlTagUpdate, ReplyKind, ReplyMessage, RequestEnvelope, RequestKind, ServerHeartbeat,
};
use crate::registry::EntityRegistry;
use crate::session::{SessionManager, Transport};
use crate::supervision::{
    AliveTimerScanner, ConfigurationProvider, SupervisionManager, SupervisionNotifier,
    SupervisionPropagator,
};

/// Feeds classified control tag updates into the state machine.
struct ControlTagProcessor {
    supervision: Arc<SupervisionManager>,
}

#[async_trait]
impl EventListener<ControlTagUpdate> for ControlTagProcessor {
    async fn on_event(&self, event: &ControlTagUpdate) -> Result<()> {
        self.supervision.process_control_tag(event).await;
        Ok(())
    }
}

/// Serves correlated handshake requests and publishes the replies.
struct RequestHandler {
    supervision: Arc<SupervisionManager>,
    session: Arc<SessionManager>,
}

#[async_trait]
impl EventListener<RequestEnvelope> for RequestHandler {
    async fn on_event(&self, envelope: &RequestEnvelope) -> Result<()> {
        match &envelope.kind {
            RequestKind::ProcessConnection(request) => {
                let response = self.supervision.on_process_connection(request).await;
                self.reply(envelope, serde_json::to_value(&response)?).await
            }
            RequestKind::ProcessConfiguration(request) => {
                let response = self.supervision.on_process_configuration(request).await;
                self.reply(envelope, serde_json::to_value(&response)?).await
            }
            // Disconnections are fire-and-forget: no reply is published.
            RequestKind::ProcessDisconnection(request) => {
                self.supervision.on_process_disconnection(request).await;
                Ok(())
            }
        }
    }
}

impl RequestHandler {
    async fn reply(&self, envelope: &RequestEnvelope, value: serde_json::Value) -> Result<()> {
        let reply = ReplyMessage {
            request_id: envelope.request_id.clone(),
            kind: ReplyKind::Result(value),
        };
        self.session.publish_json(&envelope.reply_to, &reply).await
    }
}

/// Publishes accepted supervision transitions on the supervision topic.
struct SupervisionPublisher {
    session: Arc<SessionManager>,
    topic: String,
}

#[async_trait]
impl EventListener<SupervisionEvent> for SupervisionPublisher {
    async fn on_event(&self, event: &SupervisionEvent) -> Result<()> {
        self.session.publish_json(&self.topic, event).await
    }
}

struct HeartbeatLogger;

#[async_trait]
impl EventListener<ServerHeartbeat> for HeartbeatLogger {
    async fn on_event(&self, event: &ServerHeartbeat) -> Result<()> {
        debug!("Server heartbeat from {} at {}", event.host_name, event.timestamp);
        Ok(())
    }
}

/// The supervision service.
pub struct Warden {
    config: AppConfig,
    registry: EntityRegistry,
    session: Arc<SessionManager>,
    supervision: Arc<SupervisionManager>,
    notifier: Arc<SupervisionNotifier>,
    propagator: Arc<SupervisionPropagator>,
    scanner: AliveTimerScanner,
}

impl Warden {
    pub fn new(
        config: AppConfig,
        transport: Arc<dyn Transport>,
        config_provider: Option<Arc<dyn ConfigurationProvider>>,
    ) -> Self {
        let registry = EntityRegistry::new();
        let notifier = Arc::new(SupervisionNotifier::new());

        let mut supervision =
            SupervisionManager::new(registry.clone(), Arc::clone(&notifier), &config.supervision);
        if let Some(provider) = config_provider {
            supervision = supervision.with_configuration_provider(provider);
        }
        let supervision = Arc::new(supervision);

        let session = Arc::new(SessionManager::new(
            transport,
            config.server.topics.clone(),
            config.connection.clone(),
            config.delivery.clone(),
        ));
        let propagator = Arc::new(SupervisionPropagator::new(registry.clone()));
        let scanner = AliveTimerScanner::new(
            registry.clone(),
            Arc::clone(&supervision),
            Duration::from_secs(config.supervision.scan_interval_secs),
        );

        Self {
            config,
            registry,
            session,
            supervision,
            notifier,
            propagator,
            scanner,
        }
    }

    /// Populated by the configuration subsystem before `start`.
    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    pub fn supervision(&self) -> &Arc<SupervisionManager> {
        &self.supervision
    }

    pub fn notifier(&self) -> &Arc<SupervisionNotifier> {
        &self.notifier
    }

    /// Wire the listeners, connect and start the expiry scanner.
    pub async fn start(&self) -> Result<()> {
        info!("Starting supervision service");

        self.notifier
            .register_listener(Arc::clone(&self.propagator) as Arc<dyn EventListener<SupervisionEvent>>)
            .await;
        self.notifier
            .register_listener(Arc::new(SupervisionPublisher {
                session: Arc::clone(&self.session),
                topic: self.config.server.topics.supervision.clone(),
            }) as Arc<dyn EventListener<SupervisionEvent>>)
            .await;

        self.session
            .register_request_listener(Arc::new(RequestHandler {
                supervision: Arc::clone(&self.supervision),
                session: Arc::clone(&self.session),
            }) as Arc<dyn EventListener<RequestEnvelope>>)
            .await;
        self.session
            .register_heartbeat_listener(Arc::new(HeartbeatLogger) as Arc<dyn EventListener<ServerHeartbeat>>)
            .await;

        // Control channels for every registered entity; while still
        // disconnected the registrations are retained for the first refresh.
        self.register_control_channels().await;

        self.session.start().await?;
        self.scanner.start().await;

        info!("Supervision service started");
        Ok(())
    }

    /// One control channel per supervised entity, keyed by its alive and
    /// fault tag ids.
    async fn register_control_channels(&self) {
        let processor = Arc::new(ControlTagProcessor {
            supervision: Arc::clone(&self.supervision),
        }) as Arc<dyn EventListener<ControlTagUpdate>>;
        let topics = &self.config.server.topics;

        let mut bindings: Vec<(u64, Vec<u64>)> = Vec::new();
        for id in self.registry.processes.ids() {
            if let Some(p) = self.registry.processes.get_copy(id).await {
                let tags = p.alive_tag_id.into_iter().chain(p.comm_fault_tag_id).collect();
                bindings.push((id, tags));
            }
        }
        for id in self.registry.equipment.ids() {
            if let Some(e) = self.registry.equipment.get_copy(id).await {
                let tags = e.alive_tag_id.into_iter().chain(e.comm_fault_tag_id).collect();
                bindings.push((id, tags));
            }
        }
        for id in self.registry.sub_equipment.ids() {
            if let Some(s) = self.registry.sub_equipment.get_copy(id).await {
                let tags = s.alive_tag_id.into_iter().chain(s.comm_fault_tag_id).collect();
                bindings.push((id, tags));
            }
        }

        for (entity_id, tag_ids) in bindings {
            let topic = topics.control_topic(entity_id);
            for tag_id in tag_ids {
                match self
                    .session
                    .register_update_listener(&topic, tag_id, Arc::clone(&processor))
                    .await
                {
                    Ok(()) => {}
                    Err(e) if e.is_retryable() => {
                        debug!("Registration for {} retained until connect", topic)
                    }
                    Err(e) => warn!("Failed to register control channel {}: {}", topic, e),
                }
            }
        }
    }

    pub async fn diagnostics(&self) -> DiagnosticsSnapshot {
        let channels = self
            .session
            .channel_depths()
            .await
            .into_iter()
            .map(|(topic, queue_depth, queue_capacity)| ChannelDepth {
                topic,
                queue_depth,
                queue_capacity,
            })
            .collect();
        DiagnosticsSnapshot {
            connection_state: self.session.state().await.to_string(),
            channels,
            notifier_listeners: self.notifier.diagnostics().await,
            in_flight_requests: self.session.in_flight_requests(),
            alive_timers: self.registry.alive_timers.len(),
            processes: self.registry.processes.len(),
            equipment: self.registry.equipment.len(),
            sub_equipment: self.registry.sub_equipment.len(),
            control_tags: self.registry.control_tags.len(),
            data_tags: self.registry.data_tags.len(),
        }
    }

    /// Ordered shutdown: scanner first, then the session, then the notifier
    /// workers drain.
    pub async fn shutdown(&self) {
        info!("Shutting down supervision service");
        self.scanner.stop().await;
        self.session.shutdown().await;
        self.notifier.shutdown().await;
        info!("Supervision service stopped");
    }
}
