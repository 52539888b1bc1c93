//! Tag Supervision Propagator
//!
//! Pushes accepted supervision transitions down into the measurement tags of
//! the affected subtree: ancestor availability is merged into each tag's
//! quality flags, and dependent rules are re-notified breadth-first over an
//! explicit worklist. Only effective quality changes produce notifications.

use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::delivery::EventListener;
use crate::domain::{
    EntityKind, QualityFlag, Supervised, SupervisionEvent, SupervisionStatus, TagQuality,
};
use crate::error::Result;
use crate::registry::EntityRegistry;

/// Notified when propagation changes a tag's effective quality or invalidates
/// a dependent rule.
#[async_trait]
pub trait TagCacheListener: Send + Sync {
    async fn on_tag_quality_change(&self, tag_id: u64, quality: &TagQuality) -> Result<()>;
    async fn on_rule_invalidated(&self, rule_id: u64) -> Result<()>;
}

pub struct SupervisionPropagator {
    registry: EntityRegistry,
    listeners: RwLock<Vec<Arc<dyn TagCacheListener>>>,
}

impl SupervisionPropagator {
    pub fn new(registry: EntityRegistry) -> Self {
        Self {
            registry,
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub async fn add_listener(&self, listener: Arc<dyn TagCacheListener>) {
        self.listeners.write().await.push(listener);
    }

    /// Equipment/sub-equipment ids whose directly-owned tags the event touches.
    async fn affected_owners(&self, event: &SupervisionEvent) -> Vec<u64> {
        match event.entity_type {
            EntityKind::Process => self
                .registry
                .processes
                .with_read(event.entity_id, |p| p.equipment_ids.clone())
                .await
                .unwrap_or_else(|| {
                    warn!("Propagation for unknown process {}", event.entity_id);
                    Vec::new()
                }),
            EntityKind::Equipment | EntityKind::SubEquipment => vec![event.entity_id],
        }
    }

    fn apply_status(quality: &mut TagQuality, kind: EntityKind, name: &str, status: SupervisionStatus) {
        let flag = match kind {
            EntityKind::Process => QualityFlag::ProcessDown,
            EntityKind::Equipment => QualityFlag::EquipmentDown,
            EntityKind::SubEquipment => QualityFlag::SubEquipmentDown,
        };
        match status {
            SupervisionStatus::Down | SupervisionStatus::Stopped => {
                quality.set(flag, &format!("{} {} is down", kind, name));
            }
            SupervisionStatus::Uncertain => {
                quality.set(QualityFlag::Uncertain, &format!("{} {} is uncertain", kind, name));
            }
            _ => {}
        }
    }

    /// Recompute one tag's quality from the current status of every ancestor.
    /// Returns the dependent rule ids when the effective quality changed.
    async fn refresh_tag(&self, tag_id: u64) -> Option<Vec<u64>> {
        let tag = self.registry.data_tags.get(tag_id)?;
        let mut quality = TagQuality::valid();

        if let Some(process) = self.registry.processes.get_copy(tag.process_id).await {
            Self::apply_status(&mut quality, EntityKind::Process, &process.name, process.status());
        }
        if let Some(equipment_id) = tag.equipment_id {
            if let Some(equipment) = self.registry.equipment.get_copy(equipment_id).await {
                Self::apply_status(
                    &mut quality,
                    EntityKind::Equipment,
                    &equipment.name,
                    equipment.status(),
                );
            }
        }
        if let Some(sub_id) = tag.sub_equipment_id {
            if let Some(sub) = self.registry.sub_equipment.get_copy(sub_id).await {
                Self::apply_status(&mut quality, EntityKind::SubEquipment, &sub.name, sub.status());
            }
        }

        match self.registry.data_tags.set_quality(tag_id, quality.clone()) {
            Some(true) => {
                debug!("Tag {} quality changed: {}", tag_id, quality.description());
                let listeners = self.listeners.read().await.clone();
                for listener in listeners {
                    if let Err(e) = listener.on_tag_quality_change(tag_id, &quality).await {
                        warn!("Tag cache listener failed for tag {}: {}", tag_id, e);
                    }
                }
                Some(tag.rule_ids)
            }
            _ => None,
        }
    }

    /// Visit every rule reachable from the seed rules, each at most once.
    async fn notify_rules(&self, seeds: Vec<u64>) {
        let mut visited: HashSet<u64> = HashSet::new();
        let mut worklist: VecDeque<u64> = seeds.into();

        while let Some(rule_id) = worklist.pop_front() {
            if !visited.insert(rule_id) {
                continue;
            }
            let Some(rule) = self.registry.rules.get(&rule_id).map(|r| r.clone()) else {
                warn!("Propagation references unknown rule {}", rule_id);
                continue;
            };
            let listeners = self.listeners.read().await.clone();
            for listener in listeners {
                if let Err(e) = listener.on_rule_invalidated(rule_id).await {
                    warn!("Tag cache listener failed for rule {}: {}", rule_id, e);
                }
            }
            for dependent in rule.dependent_rule_ids {
                if !visited.contains(&dependent) {
                    worklist.push_back(dependent);
                }
            }
        }
    }
}

#[async_trait]
impl EventListener<SupervisionEvent> for SupervisionPropagator {
    async fn on_event(&self, event: &SupervisionEvent) -> Result<()> {
        if !event.status.is_propagated() {
            return Ok(());
        }
        debug!(
            "Propagating {} of {} {} into the tag cache",
            event.status, event.entity_type, event.entity_id
        );

        let mut rule_seeds: Vec<u64> = Vec::new();
        for owner in self.affected_owners(event).await {
            for tag_id in self.registry.data_tags.tags_of(owner) {
                if let Some(rule_ids) = self.refresh_tag(tag_id).await {
                    rule_seeds.extend(rule_ids);
                }
            }
        }
        self.notify_rules(rule_seeds).await;
        Ok(())
    }
}
