use serde::{Deserialize, Serialize};
use std::fmt;

/// Supervision status of a monitored entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SupervisionStatus {
    /// Entity announced itself but has not confirmed normal operation yet
    Startup,
    /// Entity is alive and configured from the server
    Running,
    /// Entity is alive but runs a DAQ-local configuration
    RunningLocal,
    /// Entity was stopped deliberately
    Stopped,
    /// Entity is unreachable or signalled a communication fault
    Down,
    /// Status cannot be determined
    Uncertain,
}

impl SupervisionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SupervisionStatus::Startup => "STARTUP",
            SupervisionStatus::Running => "RUNNING",
            SupervisionStatus::RunningLocal => "RUNNING_LOCAL",
            SupervisionStatus::Stopped => "STOPPED",
            SupervisionStatus::Down => "DOWN",
            SupervisionStatus::Uncertain => "UNCERTAIN",
        }
    }

    /// Is the entity considered operational?
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            SupervisionStatus::Running | SupervisionStatus::RunningLocal
        )
    }

    /// Is the entity considered unavailable for its dependents?
    pub fn is_down(&self) -> bool {
        matches!(self, SupervisionStatus::Down | SupervisionStatus::Stopped)
    }

    /// Statuses worth propagating to dependent tags and rules.
    ///
    /// STARTUP and UNCERTAIN are transient and never forwarded downstream.
    pub fn is_propagated(&self) -> bool {
        matches!(
            self,
            SupervisionStatus::Running
                | SupervisionStatus::RunningLocal
                | SupervisionStatus::Stopped
                | SupervisionStatus::Down
        )
    }
}

impl fmt::Display for SupervisionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for SupervisionStatus {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s.to_uppercase().as_str() {
            "STARTUP" => Ok(SupervisionStatus::Startup),
            "RUNNING" => Ok(SupervisionStatus::Running),
            "RUNNING_LOCAL" => Ok(SupervisionStatus::RunningLocal),
            "STOPPED" => Ok(SupervisionStatus::Stopped),
            "DOWN" => Ok(SupervisionStatus::Down),
            "UNCERTAIN" => Ok(SupervisionStatus::Uncertain),
            _ => Err(format!("Unknown status: {}", s)),
        }
    }
}

/// Kind of supervised entity in the Process -> Equipment -> SubEquipment tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityKind {
    Process,
    Equipment,
    SubEquipment,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Process => "PROCESS",
            EntityKind::Equipment => "EQUIPMENT",
            EntityKind::SubEquipment => "SUBEQUIPMENT",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for EntityKind {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s.to_uppercase().as_str() {
            "PROCESS" => Ok(EntityKind::Process),
            "EQUIPMENT" => Ok(EntityKind::Equipment),
            "SUBEQUIPMENT" | "SUB_EQUIPMENT" => Ok(EntityKind::SubEquipment),
            _ => Err(format!("Unknown entity kind: {}", s)),
        }
    }
}
