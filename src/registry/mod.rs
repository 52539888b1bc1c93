pub mod alive;
pub mod commfault;
pub mod store;
pub mod tags;

pub use alive::{AliveTimer, AliveTimerRegistry};
pub use commfault::{CommFaultBinding, CommFaultRegistry};
pub use store::SharedStore;
pub use tags::{ControlTagCache, DataTagCache};

use dashmap::DashMap;
use std::sync::Arc;

use crate::domain::{EquipmentEntity, ProcessEntity, SubEquipmentEntity};

/// All in-memory supervision state: entities, timers, bindings, tag caches.
///
/// Populated by the configuration subsystem at startup or reconfiguration;
/// mutated afterwards only by the state machine and by timer refresh.
#[derive(Clone, Default)]
pub struct EntityRegistry {
    pub processes: SharedStore<ProcessEntity>,
    pub equipment: SharedStore<EquipmentEntity>,
    pub sub_equipment: SharedStore<SubEquipmentEntity>,
    pub alive_timers: AliveTimerRegistry,
    pub comm_faults: CommFaultRegistry,
    pub control_tags: ControlTagCache,
    pub data_tags: DataTagCache,
    pub rules: Arc<DashMap<u64, crate::domain::RuleTag>>,
    process_names: Arc<DashMap<String, u64>>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a process and index it by name for the connection handshake.
    pub fn register_process(&self, process: ProcessEntity) {
        self.process_names.insert(process.name.clone(), process.id);
        self.processes.insert(process.id, process);
    }

    pub fn register_equipment(&self, equipment: EquipmentEntity) {
        self.equipment.insert(equipment.id, equipment);
    }

    pub fn register_sub_equipment(&self, sub: SubEquipmentEntity) {
        self.sub_equipment.insert(sub.id, sub);
    }

    pub fn register_rule(&self, rule: crate::domain::RuleTag) {
        self.rules.insert(rule.id, rule);
    }

    pub fn process_id(&self, name: &str) -> Option<u64> {
        self.process_names.get(name).map(|id| *id)
    }

    /// Deletion cascades timer and binding removal.
    pub async fn remove_process(&self, id: u64) -> bool {
        let Some(process) = self.processes.get_copy(id).await else {
            return false;
        };
        if let Some(alive_id) = process.alive_tag_id {
            self.alive_timers.remove(alive_id);
        }
        if let Some(fault_id) = process.comm_fault_tag_id {
            self.comm_faults.remove(fault_id);
        }
        self.process_names.remove(&process.name);
        self.processes.remove(id)
    }
}
