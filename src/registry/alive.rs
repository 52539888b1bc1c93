//! Alive Timer Registry
//!
//! One heartbeat timer per entity that declares an alive tag, keyed by the
//! alive tag id. Expiry means the owning entity is unreachable.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;

use crate::domain::EntityKind;

/// Heartbeat timer for one supervised entity
#[derive(Debug, Clone)]
pub struct AliveTimer {
    /// Alive tag id, doubles as the timer id
    pub id: u64,
    /// Owning entity id
    pub related_id: u64,
    /// Owning entity kind, drives dispatch on expiry
    pub related_kind: EntityKind,
    pub interval_ms: u64,
    pub last_update: DateTime<Utc>,
    /// Inactive timers are skipped by the expiry scanner until the next
    /// accepted alive update reactivates them
    pub active: bool,
}

impl AliveTimer {
    pub fn new(id: u64, related_id: u64, related_kind: EntityKind, interval_ms: u64) -> Self {
        Self {
            id,
            related_id,
            related_kind,
            interval_ms,
            last_update: Utc::now(),
            active: true,
        }
    }

    pub fn has_expired(&self, now: DateTime<Utc>) -> bool {
        let age_ms = now.signed_duration_since(self.last_update).num_milliseconds();
        age_ms > self.interval_ms as i64
    }
}

/// Registry of alive timers, keyed by alive tag id
#[derive(Debug, Clone, Default)]
pub struct AliveTimerRegistry {
    timers: Arc<DashMap<u64, AliveTimer>>,
}

impl AliveTimerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, timer: AliveTimer) {
        self.timers.insert(timer.id, timer);
    }

    pub fn remove(&self, id: u64) -> bool {
        self.timers.remove(&id).is_some()
    }

    /// Distinguishes alive tag ids from fault tag ids for control-tag dispatch.
    pub fn is_registered(&self, id: u64) -> bool {
        self.timers.contains_key(&id)
    }

    pub fn get(&self, id: u64) -> Option<AliveTimer> {
        self.timers.get(&id).map(|t| t.clone())
    }

    /// Reset `last_update` to now and reactivate. Returns whether the timer
    /// was found.
    pub fn update(&self, id: u64) -> bool {
        match self.timers.get_mut(&id) {
            Some(mut timer) => {
                timer.last_update = Utc::now();
                timer.active = true;
                true
            }
            None => false,
        }
    }

    /// Deactivate a timer without resetting it. Used when an expiry fires
    /// (single-shot) and when a process disconnects.
    pub fn deactivate(&self, id: u64) -> bool {
        match self.timers.get_mut(&id) {
            Some(mut timer) => {
                timer.active = false;
                true
            }
            None => false,
        }
    }

    /// Snapshot of all active timers whose interval has elapsed.
    pub fn expired(&self, now: DateTime<Utc>) -> Vec<AliveTimer> {
        self.timers
            .iter()
            .filter(|t| t.active && t.has_expired(now))
            .map(|t| t.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}
