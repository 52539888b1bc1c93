use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use super::status::SupervisionStatus;

/// State, alive or communication-fault tag.
///
/// The only persisted signal external consumers observe; the entity status and
/// the state tag value must never diverge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlTag {
    pub id: u64,
    pub value: Value,
    pub valid: bool,
    pub timestamp: DateTime<Utc>,
    pub description: String,
}

impl ControlTag {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            value: Value::Null,
            valid: false,
            timestamp: Utc::now(),
            description: String::new(),
        }
    }

    /// Read the tag value back as a supervision status, if it holds one.
    pub fn as_status(&self) -> Option<SupervisionStatus> {
        self.value
            .as_str()
            .and_then(|s| SupervisionStatus::try_from(s).ok())
    }
}

/// Reason a tag's supervision-derived quality is degraded
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum QualityFlag {
    ProcessDown,
    EquipmentDown,
    SubEquipmentDown,
    Uncertain,
}

impl fmt::Display for QualityFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QualityFlag::ProcessDown => write!(f, "PROCESS_DOWN"),
            QualityFlag::EquipmentDown => write!(f, "EQUIPMENT_DOWN"),
            QualityFlag::SubEquipmentDown => write!(f, "SUBEQUIPMENT_DOWN"),
            QualityFlag::Uncertain => write!(f, "UNCERTAIN"),
        }
    }
}

/// Supervision-derived quality of a measurement tag.
///
/// A tag is valid when no flag is set. Flags carry a human-readable
/// description naming the unavailable ancestor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TagQuality {
    flags: BTreeMap<QualityFlag, String>,
}

impl TagQuality {
    pub fn valid() -> Self {
        Self::default()
    }

    pub fn is_valid(&self) -> bool {
        self.flags.is_empty()
    }

    pub fn set(&mut self, flag: QualityFlag, description: &str) {
        self.flags.insert(flag, description.to_string());
    }

    pub fn clear(&mut self, flag: QualityFlag) {
        self.flags.remove(&flag);
    }

    pub fn has(&self, flag: QualityFlag) -> bool {
        self.flags.contains_key(&flag)
    }

    pub fn description(&self) -> String {
        self.flags
            .iter()
            .map(|(flag, desc)| format!("{}: {}", flag, desc))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Cached measurement tag, held here only for supervision propagation.
///
/// The full tag (value, metadata) lives with the out-of-scope tag cache; this
/// projection carries the ancestor links and the dependent rule ids.
#[derive(Debug, Clone)]
pub struct DataTag {
    pub id: u64,
    /// Owning process id
    pub process_id: u64,
    /// Owning equipment id, if attached below a process
    pub equipment_id: Option<u64>,
    /// Owning sub-equipment id, if attached below an equipment
    pub sub_equipment_id: Option<u64>,
    /// Rules evaluated from this tag
    pub rule_ids: Vec<u64>,
    pub quality: TagQuality,
}

impl DataTag {
    pub fn new(id: u64, process_id: u64) -> Self {
        Self {
            id,
            process_id,
            equipment_id: None,
            sub_equipment_id: None,
            rule_ids: Vec::new(),
            quality: TagQuality::valid(),
        }
    }
}

/// A rule in the tag dependency graph
#[derive(Debug, Clone)]
pub struct RuleTag {
    pub id: u64,
    /// Tags this rule evaluates
    pub input_tag_ids: Vec<u64>,
    /// Rules evaluated from this rule's result
    pub dependent_rule_ids: Vec<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_control_tag_as_status() {
        let mut tag = ControlTag::new(100);
        assert!(tag.as_status().is_none());

        tag.value = json!("DOWN");
        assert_eq!(tag.as_status(), Some(SupervisionStatus::Down));

        tag.value = json!(true);
        assert!(tag.as_status().is_none());
    }

    #[test]
    fn test_quality_flags() {
        let mut q = TagQuality::valid();
        assert!(q.is_valid());

        q.set(QualityFlag::ProcessDown, "Process P_TEST01 is down");
        q.set(QualityFlag::EquipmentDown, "Equipment E_TEST01 is down");
        assert!(!q.is_valid());
        assert!(q.has(QualityFlag::ProcessDown));

        q.clear(QualityFlag::ProcessDown);
        assert!(!q.has(QualityFlag::ProcessDown));
        assert!(q.has(QualityFlag::EquipmentDown));

        q.clear(QualityFlag::EquipmentDown);
        assert!(q.is_valid());
    }

    #[test]
    fn test_quality_description_lists_flags() {
        let mut q = TagQuality::valid();
        q.set(QualityFlag::EquipmentDown, "Equipment E_TEST01 is down");
        assert_eq!(
            q.description(),
            "EQUIPMENT_DOWN: Equipment E_TEST01 is down"
        );
    }
}
