use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;

use crate::domain::EntityKind;

/// Binding between a communication fault tag and its entity.
///
/// The fault tag value directly encodes up/down: equal to `fault_value` means
/// DOWN, anything else means up.
#[derive(Debug, Clone)]
pub struct CommFaultBinding {
    /// Fault tag id
    pub fault_tag_id: u64,
    pub entity_id: u64,
    pub entity_kind: EntityKind,
    /// The value that signifies DOWN
    pub fault_value: Value,
    /// Paired alive tag, refreshed when a fault tag reports "up"
    pub alive_tag_id: Option<u64>,
}

impl CommFaultBinding {
    pub fn new(fault_tag_id: u64, entity_id: u64, entity_kind: EntityKind, fault_value: Value) -> Self {
        Self {
            fault_tag_id,
            entity_id,
            entity_kind,
            fault_value,
            alive_tag_id: None,
        }
    }

    /// The "everything fine" value written back when the entity goes up.
    /// Only defined for boolean fault values.
    pub fn ok_value(&self) -> Option<Value> {
        match &self.fault_value {
            Value::Bool(b) => Some(Value::Bool(!b)),
            _ => None,
        }
    }
}

/// Registry of fault-tag bindings, keyed by fault tag id
#[derive(Debug, Clone, Default)]
pub struct CommFaultRegistry {
    bindings: Arc<DashMap<u64, CommFaultBinding>>,
}

impl CommFaultRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, binding: CommFaultBinding) {
        self.bindings.insert(binding.fault_tag_id, binding);
    }

    pub fn remove(&self, fault_tag_id: u64) -> bool {
        self.bindings.remove(&fault_tag_id).is_some()
    }

    pub fn is_registered(&self, fault_tag_id: u64) -> bool {
        self.bindings.contains_key(&fault_tag_id)
    }

    pub fn get(&self, fault_tag_id: u64) -> Option<CommFaultBinding> {
        self.bindings.get(&fault_tag_id).map(|b| b.clone())
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}
