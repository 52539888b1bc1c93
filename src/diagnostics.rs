//! Read-only diagnostics surface.

use serde::Serialize;

use crate::supervision::ListenerDiagnostics;

/// Queue depth of one delivery channel
#[derive(Debug, Clone, Serialize)]
pub struct ChannelDepth {
    pub topic: String,
    pub queue_depth: usize,
    pub queue_capacity: usize,
}

/// Point-in-time view of the whole service
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticsSnapshot {
    pub connection_state: String,
    pub channels: Vec<ChannelDepth>,
    pub notifier_listeners: Vec<ListenerDiagnostics>,
    pub in_flight_requests: usize,
    pub alive_timers: usize,
    pub processes: usize,
    pub equipment: usize,
    pub sub_equipment: usize,
    pub control_tags: usize,
    pub data_tags: usize,
}
