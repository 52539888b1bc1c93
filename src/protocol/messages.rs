//! Wire Messages
//!
//! Serde payloads exchanged with DAQ processes and clients, plus the request
//! envelope used by the correlated request/response helper.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::delivery::DeliveryEvent;
use crate::domain::SupervisionEvent;

/// PIK returned when a connection attempt is rejected
pub const PIK_REJECTED: i64 = 0;
/// Placeholder PIK of a DAQ that never completed a handshake
pub const NO_PIK: i64 = -1;
/// Name sentinel for an unknown process
pub const NO_PROCESS: &str = "NO_PROCESS";
/// Configuration response sentinel for a rejected request
pub const CONF_REJECTED: &str = "CONF_REJECTED";
/// Configuration response sentinel when no XML could be produced
pub const NO_XML: &str = "NO_XML";

/// DAQ -> server connection handshake
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessConnectionRequest {
    pub process_name: String,
    pub process_host_name: String,
    pub process_startup_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessConnectionResponse {
    pub process_name: String,
    pub process_pik: i64,
}

impl ProcessConnectionResponse {
    pub fn rejected(process_name: &str) -> Self {
        Self {
            process_name: process_name.to_string(),
            process_pik: PIK_REJECTED,
        }
    }

    pub fn is_rejected(&self) -> bool {
        self.process_pik == PIK_REJECTED
    }
}

/// DAQ -> server disconnection notice; acknowledged at transport level only
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessDisconnectionRequest {
    #[serde(default)]
    pub process_id: Option<u64>,
    #[serde(default)]
    pub process_name: Option<String>,
    pub process_pik: i64,
    pub process_startup_time: DateTime<Utc>,
}

/// DAQ -> server configuration request following a successful handshake
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessConfigurationRequest {
    pub process_name: String,
    pub process_pik: i64,
    /// Set when the DAQ runs a local configuration file instead of the
    /// server-provided one
    #[serde(default)]
    pub local_config: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessConfigurationResponse {
    pub process_name: String,
    /// Opaque XML body, or one of the sentinels
    pub configuration_xml: String,
}

impl ProcessConfigurationResponse {
    pub fn rejected(process_name: &str) -> Self {
        Self {
            process_name: process_name.to_string(),
            configuration_xml: CONF_REJECTED.to_string(),
        }
    }

    pub fn is_rejected(&self) -> bool {
        self.configuration_xml == CONF_REJECTED
    }
}

/// Control tag value update consumed from the DAQ tier
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlTagUpdate {
    pub tag_id: u64,
    pub value: Value,
    #[serde(default)]
    pub value_description: Option<String>,
    #[serde(default)]
    pub source_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub daq_timestamp: Option<DateTime<Utc>>,
}

impl ControlTagUpdate {
    /// Earliest declared timestamp, falling back to now for updates carrying
    /// no timestamp at all.
    pub fn effective_timestamp(&self) -> DateTime<Utc> {
        match (self.daq_timestamp, self.source_timestamp) {
            (Some(daq), Some(source)) => daq.min(source),
            (Some(daq), None) => daq,
            (None, Some(source)) => source,
            (None, None) => Utc::now(),
        }
    }
}

/// Periodic server heartbeat forwarded unfiltered to heartbeat listeners
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerHeartbeat {
    pub host_name: String,
    pub timestamp: DateTime<Utc>,
}

/// Alarm state change, keyed by alarm id on its channel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlarmMessage {
    pub alarm_id: u64,
    #[serde(default)]
    pub tag_id: Option<u64>,
    pub active: bool,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub info: String,
}

/// Administrative broadcast (shutdown notices, operator messages)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminMessage {
    pub command: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub detail: String,
}

/// Typed body of a correlated request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RequestKind {
    ProcessConnection(ProcessConnectionRequest),
    ProcessDisconnection(ProcessDisconnectionRequest),
    ProcessConfiguration(ProcessConfigurationRequest),
}

/// Correlated request carrying a temporary reply address
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestEnvelope {
    pub request_id: String,
    pub reply_to: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: RequestKind,
}

/// Intermediate progress report forwarded while a request wait continues
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressReport {
    pub description: String,
    pub current: u32,
    pub total: u32,
}

/// Reply to a correlated request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "body", rename_all = "camelCase")]
pub enum ReplyKind {
    /// Final result; terminates the wait
    Result(Value),
    /// Progress report; the wait continues
    Progress(ProgressReport),
    /// Error report; terminates the wait with an error
    Error(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyMessage {
    pub request_id: String,
    #[serde(flatten)]
    pub kind: ReplyKind,
}

impl DeliveryEvent for SupervisionEvent {
    fn key(&self) -> Option<u64> {
        // System-wide channel: unfiltered fan-out.
        None
    }
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

impl DeliveryEvent for ControlTagUpdate {
    fn key(&self) -> Option<u64> {
        Some(self.tag_id)
    }
    fn timestamp(&self) -> DateTime<Utc> {
        self.effective_timestamp()
    }
}

impl DeliveryEvent for ServerHeartbeat {
    fn key(&self) -> Option<u64> {
        None
    }
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

impl DeliveryEvent for AlarmMessage {
    fn key(&self) -> Option<u64> {
        Some(self.alarm_id)
    }
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

impl DeliveryEvent for AdminMessage {
    fn key(&self) -> Option<u64> {
        None
    }
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

impl DeliveryEvent for RequestEnvelope {
    fn key(&self) -> Option<u64> {
        None
    }
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}
