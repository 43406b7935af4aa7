//! Soft-delete support: the protection-window decision and the
//! key-value-backed tombstone store.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::models::tombstone::Tombstone;
use crate::store::kv::KeyValueStore;

pub const TOMBSTONE_PREFIX: &str = "deleted_event:";

/// What a delete request does to an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletePlan {
    /// Snapshot into a tombstone, then remove the active record.
    Tombstone,
    /// Remove the active record for good.
    Permanent,
}

/// Events scheduled less than `window` from `now` (including ones already
/// in the past) are tombstoned. The comparison is strict: an event exactly
/// `window` away is deleted permanently.
pub fn plan_deletion(scheduled_at: DateTime<Utc>, now: DateTime<Utc>, window: Duration) -> DeletePlan {
    if scheduled_at - now < window {
        DeletePlan::Tombstone
    } else {
        DeletePlan::Permanent
    }
}

#[derive(Clone)]
pub struct TombstoneStore {
    kv: Arc<dyn KeyValueStore>,
}

impl TombstoneStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    pub fn key(resource_id: Uuid) -> String {
        format!("{}{}", TOMBSTONE_PREFIX, resource_id)
    }

    /// Write a tombstone that the store forgets at `expires_at`.
    pub async fn put(&self, tombstone: &Tombstone) -> anyhow::Result<()> {
        let json = serde_json::to_string(tombstone)?;
        self.kv
            .set_ex(&Self::key(tombstone.resource_id), &json, tombstone.ttl_secs())
            .await
    }

    pub async fn get(&self, resource_id: Uuid) -> anyhow::Result<Option<Tombstone>> {
        match self.kv.get(&Self::key(resource_id)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn remove(&self, resource_id: Uuid) -> anyhow::Result<bool> {
        self.remove_key(&Self::key(resource_id)).await
    }

    pub async fn remove_key(&self, key: &str) -> anyhow::Result<bool> {
        self.kv.delete(key).await
    }

    /// Every live tombstone key with its decoded payload. Payloads that do
    /// not decode come back as `None`; keys that vanish between the scan and
    /// the read are skipped.
    pub async fn entries(&self) -> anyhow::Result<Vec<(String, Option<Tombstone>)>> {
        let keys = self
            .kv
            .keys_matching(&format!("{}*", TOMBSTONE_PREFIX))
            .await?;
        let mut entries = Vec::with_capacity(keys.len());
        for key in keys {
            let Some(raw) = self.kv.get(&key).await? else {
                continue;
            };
            let decoded = match serde_json::from_str::<Tombstone>(&raw) {
                Ok(tombstone) => Some(tombstone),
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "undecodable tombstone");
                    None
                }
            };
            entries.push((key, decoded));
        }
        Ok(entries)
    }

    /// Decoded tombstones, oldest deletion first.
    pub async fn list(&self) -> anyhow::Result<Vec<Tombstone>> {
        let mut tombstones: Vec<Tombstone> = self
            .entries()
            .await?
            .into_iter()
            .filter_map(|(_, tombstone)| tombstone)
            .collect();
        tombstones.sort_by_key(|t| t.deleted_at);
        Ok(tombstones)
    }
}
