use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::status::{EntityKind, SupervisionStatus};

/// Immutable record of one accepted supervision transition.
///
/// Produced once per transition by the state machine, fanned out by the
/// notifier, and published on the supervision topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupervisionEvent {
    pub entity_type: EntityKind,
    pub entity_id: u64,
    pub entity_name: String,
    pub status: SupervisionStatus,
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

impl SupervisionEvent {
    pub fn new(
        entity_type: EntityKind,
        entity_id: u64,
        entity_name: &str,
        status: SupervisionStatus,
        timestamp: DateTime<Utc>,
        message: &str,
    ) -> Self {
        Self {
            entity_type,
            entity_id,
            entity_name: entity_name.to_string(),
            status,
            timestamp,
            message: message.to_string(),
        }
    }
}
