use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::event::Event;

/// Snapshot of a soft-deleted event, kept in the key-value store until
/// `expires_at` so it can be audited or restored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tombstone {
    pub resource_id: Uuid,
    pub snapshot: Event,
    pub deleted_by: Uuid,
    pub deleted_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Tombstone {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Seconds the backing key should live for, never less than one.
    pub fn ttl_secs(&self) -> u64 {
        (self.expires_at - self.deleted_at).num_seconds().max(1) as u64
    }
}
