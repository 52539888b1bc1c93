//! Supervision State Machine
//!
//! Serves the four inputs that drive entity status: connection handshakes,
//! disconnections, alive-timer expirations and control tag updates. Every
//! read-check-write of a state tag runs under the owning entity's write lock,
//! so the cached status and the state tag value never diverge. Entity-not-found
//! and rejected inputs are logged and absorbed here; they never reach callers.

use chrono::{DateTime, Utc};
use rand::Rng;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::SupervisionConfig;
use crate::domain::{EntityKind, Supervised, SupervisionEvent, SupervisionStatus};
use crate::protocol::{
    ControlTagUpdate, ProcessConfigurationRequest, ProcessConfigurationResponse,
    ProcessConnectionRequest, ProcessConnectionResponse, ProcessDisconnectionRequest, NO_PIK,
    NO_PROCESS, NO_XML,
};
use crate::registry::{EntityRegistry, SharedStore};

use super::notifier::SupervisionNotifier;

/// Supplies the opaque configuration document handed to a DAQ process after a
/// successful handshake.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait ConfigurationProvider: Send + Sync {
    async fn configuration_xml(&self, process_name: &str) -> Option<String>;
}

pub struct SupervisionManager {
    registry: EntityRegistry,
    notifier: Arc<SupervisionNotifier>,
    /// Permissive handshake mode: a running process may reconnect
    test_mode: bool,
    config_provider: Option<Arc<dyn ConfigurationProvider>>,
}

impl SupervisionManager {
    pub fn new(
        registry: EntityRegistry,
        notifier: Arc<SupervisionNotifier>,
        config: &SupervisionConfig,
    ) -> Self {
        Self {
            registry,
            notifier,
            test_mode: config.test_mode,
            config_provider: None,
        }
    }

    pub fn with_configuration_provider(mut self, provider: Arc<dyn ConfigurationProvider>) -> Self {
        self.config_provider = Some(provider);
        self
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    /// Fresh process instance key: wall clock millis plus a random component,
    /// always distinguishable from the rejection sentinel.
    fn generate_pik() -> i64 {
        Utc::now().timestamp_millis() + rand::thread_rng().gen_range(1..=999)
    }

    // --- handshake ---

    /// Serve a connection request. A process that is already running is
    /// rejected without touching its state, unless permissive test mode is on.
    pub async fn on_process_connection(
        &self,
        request: &ProcessConnectionRequest,
    ) -> ProcessConnectionResponse {
        let name = &request.process_name;
        let Some(process_id) = self.registry.process_id(name) else {
            warn!("Connection request for unknown process {}", name);
            return ProcessConnectionResponse::rejected(NO_PROCESS);
        };

        let now = Utc::now();
        let test_mode = self.test_mode;
        let registry = self.registry.clone();
        let startup_time = request.process_startup_time;
        let outcome = self
            .registry
            .processes
            .with_write(process_id, |process| {
                if process.is_running() && !test_mode {
                    return None;
                }
                if process.is_running() {
                    info!("Test mode: allowing reconnection of running process {}", process.name);
                }
                let pik = Self::generate_pik();
                process.start(pik, startup_time);
                let message = format!("Process {} connected from {}", process.name, request.process_host_name);
                process.set_status(SupervisionStatus::Startup, now, &message);
                registry.control_tags.write_status(
                    process.state_tag_id,
                    SupervisionStatus::Startup,
                    now,
                    &message,
                );
                Some((
                    pik,
                    SupervisionEvent::new(
                        EntityKind::Process,
                        process.id,
                        &process.name,
                        SupervisionStatus::Startup,
                        now,
                        &message,
                    ),
                ))
            })
            .await;

        match outcome {
            None => {
                warn!("Connection request for vanished process {}", name);
                ProcessConnectionResponse::rejected(name)
            }
            Some(None) => {
                warn!("Rejecting connection of already running process {}", name);
                ProcessConnectionResponse::rejected(name)
            }
            Some(Some((pik, event))) => {
                info!("Process {} connected, PIK {}", name, pik);
                self.notifier.notify(&event).await;
                ProcessConnectionResponse {
                    process_name: name.clone(),
                    process_pik: pik,
                }
            }
        }
    }

    /// Serve a disconnection request. A missing or mismatched PIK is ignored
    /// with a warning; a second disconnection of a stopped process is harmless.
    pub async fn on_process_disconnection(&self, request: &ProcessDisconnectionRequest) {
        let process_id = match request.process_id {
            Some(id) => Some(id),
            None => request
                .process_name
                .as_deref()
                .and_then(|name| self.registry.process_id(name)),
        };
        let Some(process_id) = process_id else {
            warn!("Disconnection request for unknown process: {:?}", request.process_name);
            return;
        };

        if request.process_pik == NO_PIK {
            warn!("Ignoring disconnection of process {} without a PIK", process_id);
            return;
        }

        let now = Utc::now();
        let registry = self.registry.clone();
        let presented_pik = request.process_pik;
        let outcome = self
            .registry
            .processes
            .with_write(process_id, |process| {
                if process.current_pik != Some(presented_pik) {
                    return Err(process.current_pik);
                }
                if !process.is_running() {
                    return Ok(None);
                }
                process.stop();
                if let Some(alive_id) = process.alive_tag_id {
                    registry.alive_timers.deactivate(alive_id);
                }
                let message = format!("Process {} disconnected", process.name);
                process.set_status(SupervisionStatus::Down, now, &message);
                registry.control_tags.write_status(
                    process.state_tag_id,
                    SupervisionStatus::Down,
                    now,
                    &message,
                );
                Ok(Some((
                    process.equipment_ids.clone(),
                    SupervisionEvent::new(
                        EntityKind::Process,
                        process.id,
                        &process.name,
                        SupervisionStatus::Down,
                        now,
                        &message,
                    ),
                )))
            })
            .await;

        match outcome {
            None => warn!("Disconnection request for vanished process {}", process_id),
            Some(Err(cached)) => warn!(
                "Ignoring disconnection of process {} with mismatched PIK (presented {}, cached {:?})",
                process_id, presented_pik, cached
            ),
            Some(Ok(None)) => {
                debug!("Process {} already stopped, disconnection ignored", process_id)
            }
            Some(Ok(Some((equipment_ids, event)))) => {
                info!("Process {} disconnected", process_id);
                self.notifier.notify(&event).await;
                for equipment_id in equipment_ids {
                    self.cascade_equipment_down(equipment_id, now, "Parent process disconnected", false)
                        .await;
                }
            }
        }
    }

    /// Serve a configuration request: validates the process name and PIK,
    /// records whether the DAQ runs a local configuration, and returns the
    /// opaque configuration document.
    pub async fn on_process_configuration(
        &self,
        request: &ProcessConfigurationRequest,
    ) -> ProcessConfigurationResponse {
        let name = &request.process_name;
        let Some(process_id) = self.registry.process_id(name) else {
            warn!("Configuration request for unknown process {}", name);
            return ProcessConfigurationResponse::rejected(name);
        };

        let presented_pik = request.process_pik;
        let local_config = request.local_config;
        let accepted = self
            .registry
            .processes
            .with_write(process_id, |process| {
                if process.current_pik != Some(presented_pik) {
                    return false;
                }
                process.local_config = local_config;
                true
            })
            .await
            .unwrap_or(false);

        if !accepted {
            warn!("Rejecting configuration request for {} with stale PIK", name);
            return ProcessConfigurationResponse::rejected(name);
        }

        let xml = match &self.config_provider {
            Some(provider) => provider.configuration_xml(name).await,
            None => None,
        };
        match xml {
            Some(configuration_xml) => {
                info!("Delivering configuration to process {}", name);
                ProcessConfigurationResponse {
                    process_name: name.clone(),
                    configuration_xml,
                }
            }
            None => {
                warn!("No configuration available for process {}", name);
                ProcessConfigurationResponse {
                    process_name: name.clone(),
                    configuration_xml: NO_XML.to_string(),
                }
            }
        }
    }

    // --- timers ---

    /// An expired alive timer marks its owning entity down; an equipment
    /// expiry also forces the fault tag and cascades below.
    pub async fn on_alive_timer_expiration(&self, timer_id: u64) {
        let Some(timer) = self.registry.alive_timers.get(timer_id) else {
            warn!("Expiration of unknown alive timer {}", timer_id);
            return;
        };

        let now = Utc::now();
        let message = "Alive timer expired";
        info!(
            "Alive timer {} expired for {} {}",
            timer_id, timer.related_kind, timer.related_id
        );

        match timer.related_kind {
            EntityKind::Process => {
                let equipment_ids = self
                    .registry
                    .processes
                    .with_read(timer.related_id, |p| p.equipment_ids.clone())
                    .await
                    .unwrap_or_default();
                self.entity_down(EntityKind::Process, timer.related_id, now, message)
                    .await;
                for equipment_id in equipment_ids {
                    self.cascade_equipment_down(equipment_id, now, "Parent process alive expired", true)
                        .await;
                }
            }
            EntityKind::Equipment => {
                self.cascade_equipment_down(timer.related_id, now, message, true)
                    .await;
            }
            EntityKind::SubEquipment => {
                self.entity_down(EntityKind::SubEquipment, timer.related_id, now, message)
                    .await;
            }
        }
    }

    // --- control tags ---

    /// Classify and process one control tag update: alive tags reset their
    /// timer and drive "up", fault tags drive "down" or "up" by value.
    pub async fn process_control_tag(&self, update: &ControlTagUpdate) {
        if self.registry.alive_timers.is_registered(update.tag_id) {
            self.process_alive_tag(update).await;
        } else if self.registry.comm_faults.is_registered(update.tag_id) {
            self.process_fault_tag(update).await;
        } else {
            debug!("Control tag update for unclassified tag {}", update.tag_id);
        }
    }

    async fn process_alive_tag(&self, update: &ControlTagUpdate) {
        let Some(timer) = self.registry.alive_timers.get(update.tag_id) else {
            return;
        };
        let ts = update.effective_timestamp();
        let age_ms = Utc::now().signed_duration_since(ts).num_milliseconds();
        if age_ms > 2 * timer.interval_ms as i64 {
            debug!(
                "Rejecting stale alive tag {} update ({}ms old, interval {}ms)",
                update.tag_id, age_ms, timer.interval_ms
            );
            return;
        }

        self.registry.alive_timers.update(update.tag_id);
        self.registry.control_tags.write_value(
            update.tag_id,
            update.value.clone(),
            ts,
            update.value_description.as_deref().unwrap_or(""),
        );
        self.entity_up(timer.related_kind, timer.related_id, ts, "Alive tag received")
            .await;
    }

    async fn process_fault_tag(&self, update: &ControlTagUpdate) {
        let Some(binding) = self.registry.comm_faults.get(update.tag_id) else {
            return;
        };
        let ts = update.effective_timestamp();
        self.registry.control_tags.write_value(
            update.tag_id,
            update.value.clone(),
            ts,
            update.value_description.as_deref().unwrap_or(""),
        );

        if update.value == binding.fault_value {
            debug!(
                "Fault tag {} reports fault for {} {}",
                update.tag_id, binding.entity_kind, binding.entity_id
            );
            match binding.entity_kind {
                EntityKind::Equipment => {
                    // The fault tag itself carries the down signal; children
                    // only get their state tags cascaded.
                    let sub_ids = self
                        .registry
                        .equipment
                        .with_read(binding.entity_id, |e| e.sub_equipment_ids.clone())
                        .await
                        .unwrap_or_default();
                    self.entity_down(EntityKind::Equipment, binding.entity_id, ts, "Communication fault")
                        .await;
                    for sub_id in sub_ids {
                        self.entity_down(
                            EntityKind::SubEquipment,
                            sub_id,
                            ts,
                            "Parent equipment communication fault",
                        )
                        .await;
                    }
                }
                kind => {
                    self.entity_down(kind, binding.entity_id, ts, "Communication fault")
                        .await;
                }
            }
        } else {
            self.entity_up(binding.entity_kind, binding.entity_id, ts, "Communication fault cleared")
                .await;
            // A clearing fault tag also counts as proof of life.
            if let Some(alive_id) = binding.alive_tag_id {
                self.registry.alive_timers.update(alive_id);
            }
        }
    }

    // --- transitions ---

    pub async fn entity_down(
        &self,
        kind: EntityKind,
        id: u64,
        ts: DateTime<Utc>,
        message: &str,
    ) {
        let event = match kind {
            EntityKind::Process => self.mark_down(&self.registry.processes, id, ts, message).await,
            EntityKind::Equipment => self.mark_down(&self.registry.equipment, id, ts, message).await,
            EntityKind::SubEquipment => {
                self.mark_down(&self.registry.sub_equipment, id, ts, message).await
            }
        };
        if let Some(event) = event {
            self.notifier.notify(&event).await;
        }
    }

    pub async fn entity_up(&self, kind: EntityKind, id: u64, ts: DateTime<Utc>, message: &str) {
        let event = match kind {
            EntityKind::Process => self.mark_up(&self.registry.processes, id, ts, message).await,
            EntityKind::Equipment => self.mark_up(&self.registry.equipment, id, ts, message).await,
            EntityKind::SubEquipment => {
                self.mark_up(&self.registry.sub_equipment, id, ts, message).await
            }
        };
        if let Some(event) = event {
            self.notifier.notify(&event).await;
        }
    }

    /// Idempotent down transition: a state tag already reading DOWN is left
    /// untouched and produces no notification.
    async fn mark_down<T: Supervised>(
        &self,
        store: &SharedStore<T>,
        id: u64,
        ts: DateTime<Utc>,
        message: &str,
    ) -> Option<SupervisionEvent> {
        let registry = self.registry.clone();
        let outcome = store
            .with_write(id, |entity| {
                entity.suspend();
                let already_down = registry
                    .control_tags
                    .get(entity.state_tag_id())
                    .filter(|tag| tag.valid)
                    .and_then(|tag| tag.as_status())
                    .map(|status| status.is_down())
                    .unwrap_or(false);
                if already_down {
                    return None;
                }
                entity.set_status(SupervisionStatus::Down, ts, message);
                registry.control_tags.write_status(
                    entity.state_tag_id(),
                    SupervisionStatus::Down,
                    ts,
                    message,
                );
                Some(SupervisionEvent::new(
                    entity.kind(),
                    entity.id(),
                    entity.name(),
                    SupervisionStatus::Down,
                    ts,
                    message,
                ))
            })
            .await;
        match outcome {
            None => {
                warn!("Down transition for unknown entity {}", id);
                None
            }
            Some(event) => event,
        }
    }

    /// Idempotent up transition. A missing or invalid state tag counts as
    /// not-running. The paired fault tag is reconciled to its ok value so the
    /// two signals stay consistent.
    async fn mark_up<T: Supervised>(
        &self,
        store: &SharedStore<T>,
        id: u64,
        ts: DateTime<Utc>,
        message: &str,
    ) -> Option<SupervisionEvent> {
        let registry = self.registry.clone();
        let outcome = store
            .with_write(id, |entity| {
                entity.resume();
                let current = registry
                    .control_tags
                    .get(entity.state_tag_id())
                    .filter(|tag| tag.valid)
                    .and_then(|tag| tag.as_status());
                if current.map(|status| status.is_running()).unwrap_or(false) {
                    return None;
                }
                let target = entity.running_status();
                entity.set_status(target, ts, message);
                registry
                    .control_tags
                    .write_status(entity.state_tag_id(), target, ts, message);
                if let Some(fault_id) = entity.comm_fault_tag_id() {
                    if let Some(binding) = registry.comm_faults.get(fault_id) {
                        if let Some(ok) = binding.ok_value() {
                            registry.control_tags.write_value(fault_id, ok, ts, message);
                        }
                    }
                }
                Some(SupervisionEvent::new(
                    entity.kind(),
                    entity.id(),
                    entity.name(),
                    target,
                    ts,
                    message,
                ))
            })
            .await;
        match outcome {
            None => {
                warn!("Up transition for unknown entity {}", id);
                None
            }
            Some(event) => event,
        }
    }

    /// Mark one equipment and all its sub-equipment down. With `force_fault`
    /// the fault tags are driven to their fault value too (alive-expiry path);
    /// a missing child is logged and skipped, siblings still processed.
    async fn cascade_equipment_down(
        &self,
        equipment_id: u64,
        ts: DateTime<Utc>,
        message: &str,
        force_fault: bool,
    ) {
        let Some((fault_tag_id, sub_ids)) = self
            .registry
            .equipment
            .with_read(equipment_id, |e| (e.comm_fault_tag_id, e.sub_equipment_ids.clone()))
            .await
        else {
            warn!("Cascade skipping unknown equipment {}", equipment_id);
            return;
        };

        self.entity_down(EntityKind::Equipment, equipment_id, ts, message).await;
        if force_fault {
            self.force_fault_tag(fault_tag_id, ts).await;
        }

        for sub_id in sub_ids {
            let fault_id = self
                .registry
                .sub_equipment
                .with_read(sub_id, |s| s.comm_fault_tag_id)
                .await;
            let Some(fault_id) = fault_id else {
                warn!("Cascade skipping unknown sub-equipment {}", sub_id);
                continue;
            };
            self.entity_down(EntityKind::SubEquipment, sub_id, ts, message).await;
            if force_fault {
                self.force_fault_tag(fault_id, ts).await;
            }
        }
    }

    async fn force_fault_tag(&self, fault_tag_id: Option<u64>, ts: DateTime<Utc>) {
        let Some(fault_tag_id) = fault_tag_id else {
            return;
        };
        if let Some(binding) = self.registry.comm_faults.get(fault_tag_id) {
            self.registry.control_tags.write_value(
                fault_tag_id,
                binding.fault_value.clone(),
                ts,
                "Forced by alive timer expiration",
            );
        }
    }
}
