//! Control and Data Tag Caches

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;

use crate::domain::{ControlTag, DataTag, SupervisionStatus, TagQuality};

/// Cache of state, alive and fault tags.
///
/// Writes are synchronous so the state machine can update a state tag inside
/// the owning entity's write lock.
#[derive(Debug, Clone, Default)]
pub struct ControlTagCache {
    tags: Arc<DashMap<u64, ControlTag>>,
}

impl ControlTagCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, tag: ControlTag) {
        self.tags.insert(tag.id, tag);
    }

    pub fn remove(&self, id: u64) -> bool {
        self.tags.remove(&id).is_some()
    }

    pub fn get(&self, id: u64) -> Option<ControlTag> {
        self.tags.get(&id).map(|t| t.clone())
    }

    /// Upsert a raw tag value.
    pub fn write_value(&self, id: u64, value: Value, timestamp: DateTime<Utc>, description: &str) {
        let mut entry = self.tags.entry(id).or_insert_with(|| ControlTag::new(id));
        entry.value = value;
        entry.valid = true;
        entry.timestamp = timestamp;
        entry.description = description.to_string();
    }

    /// Write a supervision status into a state tag.
    pub fn write_status(
        &self,
        id: u64,
        status: SupervisionStatus,
        timestamp: DateTime<Utc>,
        description: &str,
    ) {
        self.write_value(id, Value::String(status.as_str().to_string()), timestamp, description);
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}

/// Cache of measurement tags plus an owner index for propagation.
#[derive(Debug, Clone, Default)]
pub struct DataTagCache {
    tags: Arc<DashMap<u64, DataTag>>,
    /// equipment-or-subequipment id -> directly owned tag ids
    by_owner: Arc<DashMap<u64, Vec<u64>>>,
}

impl DataTagCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, tag: DataTag) {
        let owner = tag.sub_equipment_id.or(tag.equipment_id);
        if let Some(owner) = owner {
            let mut owned = self.by_owner.entry(owner).or_default();
            if !owned.contains(&tag.id) {
                owned.push(tag.id);
            }
        }
        self.tags.insert(tag.id, tag);
    }

    pub fn remove(&self, id: u64) -> bool {
        match self.tags.remove(&id) {
            Some((_, tag)) => {
                if let Some(owner) = tag.sub_equipment_id.or(tag.equipment_id) {
                    if let Some(mut owned) = self.by_owner.get_mut(&owner) {
                        owned.retain(|t| *t != id);
                    }
                }
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: u64) -> Option<DataTag> {
        self.tags.get(&id).map(|t| t.clone())
    }

    /// Tag ids directly owned by an equipment or sub-equipment.
    pub fn tags_of(&self, owner_id: u64) -> Vec<u64> {
        self.by_owner
            .get(&owner_id)
            .map(|owned| owned.clone())
            .unwrap_or_default()
    }

    /// Replace a tag's quality. Returns whether the effective quality changed,
    /// or `None` when the tag is unknown.
    pub fn set_quality(&self, id: u64, quality: TagQuality) -> Option<bool> {
        let mut tag = self.tags.get_mut(&id)?;
        let changed = tag.quality != quality;
        tag.quality = quality;
        Some(changed)
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}
