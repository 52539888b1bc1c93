//! Supervised Entity Model
//!
//! One capability trait implemented by three concrete entity types. The state
//! machine dispatches on `EntityKind`, never on the concrete type.

use chrono::{DateTime, Utc};

use super::status::{EntityKind, SupervisionStatus};

/// Capability contract shared by processes, equipment and sub-equipment.
pub trait Supervised: Clone + Send + Sync + 'static {
    fn id(&self) -> u64;
    fn name(&self) -> &str;
    fn kind(&self) -> EntityKind;

    /// Tag carrying the externally visible status
    fn state_tag_id(&self) -> u64;
    /// Heartbeat tag, if the entity declares one
    fn alive_tag_id(&self) -> Option<u64>;
    /// Communication fault tag, if the entity declares one
    fn comm_fault_tag_id(&self) -> Option<u64>;

    fn status(&self) -> SupervisionStatus;
    fn status_time(&self) -> DateTime<Utc>;
    fn status_description(&self) -> &str;

    /// Record a new status. Must be called under the entity's write lock so
    /// the status never diverges from the last value written to the state tag.
    fn set_status(&mut self, status: SupervisionStatus, time: DateTime<Utc>, description: &str);

    /// Internal bookkeeping on a down-triggering signal
    fn suspend(&mut self);
    /// Internal bookkeeping on an up-triggering signal
    fn resume(&mut self);
    fn is_suspended(&self) -> bool;

    /// The status an accepted "up" signal writes for this entity
    fn running_status(&self) -> SupervisionStatus {
        SupervisionStatus::Running
    }
}

/// A remote DAQ process, root of a supervision subtree
#[derive(Debug, Clone)]
pub struct ProcessEntity {
    pub id: u64,
    pub name: String,
    pub state_tag_id: u64,
    pub alive_tag_id: Option<u64>,
    pub comm_fault_tag_id: Option<u64>,
    /// Child equipment ids
    pub equipment_ids: Vec<u64>,
    pub status: SupervisionStatus,
    pub status_time: DateTime<Utc>,
    pub status_description: String,
    /// Process instance key issued at the last accepted connection
    pub current_pik: Option<i64>,
    /// Startup time presented at the last accepted connection
    pub startup_time: Option<DateTime<Utc>>,
    /// Set when the DAQ runs a local configuration (drives RUNNING_LOCAL)
    pub local_config: bool,
    suspended: bool,
}

impl ProcessEntity {
    pub fn new(id: u64, name: &str, state_tag_id: u64) -> Self {
        Self {
            id,
            name: name.to_string(),
            state_tag_id,
            alive_tag_id: None,
            comm_fault_tag_id: None,
            equipment_ids: Vec::new(),
            status: SupervisionStatus::Down,
            status_time: Utc::now(),
            status_description: String::new(),
            current_pik: None,
            startup_time: None,
            local_config: false,
            suspended: true,
        }
    }

    /// Accept a connection: cache the fresh PIK and the presented startup time.
    pub fn start(&mut self, pik: i64, startup_time: DateTime<Utc>) {
        self.current_pik = Some(pik);
        self.startup_time = Some(startup_time);
        self.suspended = false;
    }

    /// Accept a disconnection: forget the PIK. The state tag is updated
    /// separately by the caller.
    pub fn stop(&mut self) {
        self.current_pik = None;
        self.suspended = true;
    }

    pub fn is_running(&self) -> bool {
        self.status.is_running() || self.status == SupervisionStatus::Startup
    }
}

impl Supervised for ProcessEntity {
    fn id(&self) -> u64 {
        self.id
    }
    fn name(&self) -> &str {
        &self.name
    }
    fn kind(&self) -> EntityKind {
        EntityKind::Process
    }
    fn state_tag_id(&self) -> u64 {
        self.state_tag_id
    }
    fn alive_tag_id(&self) -> Option<u64> {
        self.alive_tag_id
    }
    fn comm_fault_tag_id(&self) -> Option<u64> {
        self.comm_fault_tag_id
    }
    fn status(&self) -> SupervisionStatus {
        self.status
    }
    fn status_time(&self) -> DateTime<Utc> {
        self.status_time
    }
    fn status_description(&self) -> &str {
        &self.status_description
    }

    fn set_status(&mut self, status: SupervisionStatus, time: DateTime<Utc>, description: &str) {
        self.status = status;
        self.status_time = time;
        self.status_description = description.to_string();
    }

    fn suspend(&mut self) {
        self.suspended = true;
    }
    fn resume(&mut self) {
        self.suspended = false;
    }
    fn is_suspended(&self) -> bool {
        self.suspended
    }

    fn running_status(&self) -> SupervisionStatus {
        if self.local_config {
            SupervisionStatus::RunningLocal
        } else {
            SupervisionStatus::Running
        }
    }
}

/// A piece of equipment attached to a process
#[derive(Debug, Clone)]
pub struct EquipmentEntity {
    pub id: u64,
    pub name: String,
    /// Owning process id
    pub parent_id: u64,
    pub state_tag_id: u64,
    pub alive_tag_id: Option<u64>,
    pub comm_fault_tag_id: Option<u64>,
    /// Child sub-equipment ids
    pub sub_equipment_ids: Vec<u64>,
    pub status: SupervisionStatus,
    pub status_time: DateTime<Utc>,
    pub status_description: String,
    suspended: bool,
}

impl EquipmentEntity {
    pub fn new(id: u64, name: &str, parent_id: u64, state_tag_id: u64) -> Self {
        Self {
            id,
            name: name.to_string(),
            parent_id,
            state_tag_id,
            alive_tag_id: None,
            comm_fault_tag_id: None,
            sub_equipment_ids: Vec::new(),
            status: SupervisionStatus::Down,
            status_time: Utc::now(),
            status_description: String::new(),
            suspended: true,
        }
    }
}

impl Supervised for EquipmentEntity {
    fn id(&self) -> u64 {
        self.id
    }
    fn name(&self) -> &str {
        &self.name
    }
    fn kind(&self) -> EntityKind {
        EntityKind::Equipment
    }
    fn state_tag_id(&self) -> u64 {
        self.state_tag_id
    }
    fn alive_tag_id(&self) -> Option<u64> {
        self.alive_tag_id
    }
    fn comm_fault_tag_id(&self) -> Option<u64> {
        self.comm_fault_tag_id
    }
    fn status(&self) -> SupervisionStatus {
        self.status
    }
    fn status_time(&self) -> DateTime<Utc> {
        self.status_time
    }
    fn status_description(&self) -> &str {
        &self.status_description
    }

    fn set_status(&mut self, status: SupervisionStatus, time: DateTime<Utc>, description: &str) {
        self.status = status;
        self.status_time = time;
        self.status_description = description.to_string();
    }

    fn suspend(&mut self) {
        self.suspended = true;
    }
    fn resume(&mut self) {
        self.suspended = false;
    }
    fn is_suspended(&self) -> bool {
        self.suspended
    }
}

/// A sub-device attached to an equipment
#[derive(Debug, Clone)]
pub struct SubEquipmentEntity {
    pub id: u64,
    pub name: String,
    /// Owning equipment id
    pub parent_id: u64,
    pub state_tag_id: u64,
    pub alive_tag_id: Option<u64>,
    pub comm_fault_tag_id: Option<u64>,
    pub status: SupervisionStatus,
    pub status_time: DateTime<Utc>,
    pub status_description: String,
    suspended: bool,
}

impl SubEquipmentEntity {
    pub fn new(id: u64, name: &str, parent_id: u64, state_tag_id: u64) -> Self {
        Self {
            id,
            name: name.to_string(),
            parent_id,
            state_tag_id,
            alive_tag_id: None,
            comm_fault_tag_id: None,
            status: SupervisionStatus::Down,
            status_time: Utc::now(),
            status_description: String::new(),
            suspended: true,
        }
    }
}

impl Supervised for SubEquipmentEntity {
    fn id(&self) -> u64 {
        self.id
    }
    fn name(&self) -> &str {
        &self.name
    }
    fn kind(&self) -> EntityKind {
        EntityKind::SubEquipment
    }
    fn state_tag_id(&self) -> u64 {
        self.state_tag_id
    }
    fn alive_tag_id(&self) -> Option<u64> {
        self.alive_tag_id
    }
    fn comm_fault_tag_id(&self) -> Option<u64> {
        self.comm_fault_tag_id
    }
    fn status(&self) -> SupervisionStatus {
        self.status
    }
    fn status_time(&self) -> DateTime<Utc> {
        self.status_time
    }
    fn status_description(&self) -> &str {
        &self.status_description
    }

    fn set_status(&mut self, status: SupervisionStatus, time: DateTime<Utc>, description: &str) {
        self.status = status;
        self.status_time = time;
        self.status_description = description.to_string();
    }

    fn suspend(&mut self) {
        self.suspended = true;
    }
    fn resume(&mut self) {
        self.suspended = false;
    }
    fn is_suspended(&self) -> bool {
        self.suspended
    }
}
