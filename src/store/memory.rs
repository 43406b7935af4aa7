//! In-process implementations of the store capabilities, used by
//! `serve --in-memory` and by the test suites.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use super::kv::{glob_matches, KeyValueStore};
use super::{AlreadyExists, RecordStore};
use crate::models::event::{Event, EventChanges, EventStatus, NewEvent};
use crate::models::user::{NewUser, User};

/// Value stored in [`MemoryKv`] together with its expiry deadline.
#[derive(Clone)]
struct KvEntry {
    value: String,
    expires_at: Instant,
}

/// Expiring key-value map.
///
/// Reads validate the deadline so an expired entry is never returned;
/// memory is reclaimed by `evict_expired`, which `spawn_reaper` runs on an
/// interval. Deadlines use tokio's clock so tests can pause and advance time.
#[derive(Default)]
pub struct MemoryKv {
    entries: RwLock<HashMap<String, KvEntry>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove all expired entries. Returns how many were dropped.
    pub async fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }

    /// Number of entries held, expired or not (for debugging).
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Spawn the background reaper. It stops once the store is dropped.
    pub fn spawn_reaper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let store: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                let Some(store) = store.upgrade() else { break };
                let evicted = store.evict_expired().await;
                if evicted > 0 {
                    tracing::debug!(evicted, "memory kv: reaped expired entries");
                }
            }
        })
    }
}

fn deadline(ttl_secs: u64) -> Instant {
    Instant::now() + Duration::from_secs(ttl_secs.max(1))
}

#[async_trait]
impl KeyValueStore for MemoryKv {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|entry| Instant::now() < entry.expires_at)
            .map(|entry| entry.value.clone()))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> anyhow::Result<()> {
        self.entries.write().await.insert(
            key.to_string(),
            KvEntry {
                value: value.to_string(),
                expires_at: deadline(ttl_secs),
            },
        );
        Ok(())
    }

    async fn set_many_ex(&self, batch: &[(String, String, u64)]) -> anyhow::Result<()> {
        // one write guard for the whole batch
        let mut entries = self.entries.write().await;
        for (key, value, ttl_secs) in batch {
            entries.insert(
                key.clone(),
                KvEntry {
                    value: value.clone(),
                    expires_at: deadline(*ttl_secs),
                },
            );
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> anyhow::Result<bool> {
        let mut entries = self.entries.write().await;
        Ok(entries
            .remove(key)
            .is_some_and(|entry| Instant::now() < entry.expires_at))
    }

    async fn keys_matching(&self, pattern: &str) -> anyhow::Result<Vec<String>> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        let mut keys: Vec<String> = entries
            .iter()
            .filter(|(key, entry)| now < entry.expires_at && glob_matches(pattern, key))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn exists(&self, key: &str) -> anyhow::Result<bool> {
        Ok(self.get(key).await?.is_some())
    }
}

/// HashMap-backed record store.
#[derive(Default)]
pub struct MemoryRecordStore {
    users: RwLock<HashMap<Uuid, User>>,
    events: RwLock<HashMap<Uuid, Event>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn sorted(mut events: Vec<Event>) -> Vec<Event> {
    events.sort_by(|a, b| {
        a.scheduled_at
            .cmp(&b.scheduled_at)
            .then_with(|| a.created_at.cmp(&b.created_at))
    });
    events
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn insert_user(&self, user: &NewUser) -> anyhow::Result<User> {
        let mut users = self.users.write().await;
        if users.values().any(|u| u.email == user.email) {
            return Err(AlreadyExists("email").into());
        }
        let row = User {
            id: Uuid::new_v4(),
            email: user.email.clone(),
            password_hash: user.password_hash.clone(),
            role: user.role,
            plan: user.plan,
            created_at: Utc::now(),
        };
        users.insert(row.id, row.clone());
        Ok(row)
    }

    async fn find_user_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let users = self.users.read().await;
        Ok(users.values().find(|u| u.email == email).cloned())
    }

    async fn get_user(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn insert_event(&self, event: &NewEvent) -> anyhow::Result<Event> {
        let row = Event {
            id: Uuid::new_v4(),
            owner_id: event.owner_id,
            title: event.title.clone(),
            description: event.description.clone(),
            scheduled_at: event.scheduled_at,
            status: EventStatus::Pending,
            created_at: Utc::now(),
        };
        self.events.write().await.insert(row.id, row.clone());
        Ok(row)
    }

    async fn restore_event(&self, event: &Event) -> anyhow::Result<()> {
        let mut events = self.events.write().await;
        if events.contains_key(&event.id) {
            return Err(AlreadyExists("event").into());
        }
        events.insert(event.id, event.clone());
        Ok(())
    }

    async fn get_event(&self, id: Uuid) -> anyhow::Result<Option<Event>> {
        Ok(self.events.read().await.get(&id).cloned())
    }

    async fn list_events(&self) -> anyhow::Result<Vec<Event>> {
        Ok(sorted(self.events.read().await.values().cloned().collect()))
    }

    async fn list_events_by_owner(&self, owner_id: Uuid) -> anyhow::Result<Vec<Event>> {
        let events = self.events.read().await;
        Ok(sorted(
            events
                .values()
                .filter(|e| e.owner_id == owner_id)
                .cloned()
                .collect(),
        ))
    }

    async fn list_events_by_status(&self, status: EventStatus) -> anyhow::Result<Vec<Event>> {
        let events = self.events.read().await;
        Ok(sorted(
            events
                .values()
                .filter(|e| e.status == status)
                .cloned()
                .collect(),
        ))
    }

    async fn update_event(&self, id: Uuid, changes: &EventChanges) -> anyhow::Result<Option<Event>> {
        let mut events = self.events.write().await;
        let Some(event) = events.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(title) = &changes.title {
            event.title = title.clone();
        }
        if let Some(description) = &changes.description {
            event.description = Some(description.clone());
        }
        if let Some(scheduled_at) = changes.scheduled_at {
            event.scheduled_at = scheduled_at;
        }
        if let Some(status) = changes.status {
            event.status = status;
        }
        Ok(Some(event.clone()))
    }

    async fn delete_event(&self, id: Uuid) -> anyhow::Result<bool> {
        Ok(self.events.write().await.remove(&id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::rbac::Role;

    #[tokio::test(start_paused = true)]
    async fn test_memory_kv_entry_expires_after_ttl() {
        let kv = MemoryKv::new();
        kv.set_ex("k", "v", 10).await.unwrap();
        assert_eq!(kv.get("k").await.unwrap().as_deref(), Some("v"));

        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(kv.exists("k").await.unwrap());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(kv.get("k").await.unwrap(), None);
        assert!(!kv.exists("k").await.unwrap());
        assert!(kv.keys_matching("*").await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_memory_kv_evict_expired_reclaims_entries() {
        let kv = MemoryKv::new();
        kv.set_ex("short", "1", 5).await.unwrap();
        kv.set_ex("long", "2", 500).await.unwrap();
        tokio::time::advance(Duration::from_secs(6)).await;

        assert_eq!(kv.len().await, 2);
        assert_eq!(kv.evict_expired().await, 1);
        assert_eq!(kv.len().await, 1);
        assert!(kv.exists("long").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_memory_kv_reaper_runs_in_background() {
        let kv = Arc::new(MemoryKv::new());
        let reaper = kv.spawn_reaper(Duration::from_secs(30));
        kv.set_ex("k", "v", 1).await.unwrap();

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(kv.is_empty().await);
        reaper.abort();
    }

    #[tokio::test]
    async fn test_memory_kv_set_many_and_prefix_scan() {
        let kv = MemoryKv::new();
        kv.set_many_ex(&[
            ("revoked:a".into(), "1".into(), 60),
            ("revoked:b".into(), "1".into(), 60),
            ("events:all".into(), "[]".into(), 60),
        ])
        .await
        .unwrap();

        assert_eq!(
            kv.keys_matching("revoked:*").await.unwrap(),
            vec!["revoked:a".to_string(), "revoked:b".to_string()]
        );
        assert!(kv.delete("revoked:a").await.unwrap());
        assert!(!kv.delete("revoked:a").await.unwrap());
    }

    #[tokio::test]
    async fn test_memory_records_reject_duplicate_email() {
        let store = MemoryRecordStore::new();
        let new_user = NewUser {
            email: "a@x.com".into(),
            password_hash: "h".into(),
            role: Role::User,
            plan: None,
        };
        store.insert_user(&new_user).await.unwrap();
        let err = store.insert_user(&new_user).await.unwrap_err();
        assert!(crate::store::is_already_exists(&err));
    }

    #[tokio::test]
    async fn test_memory_records_restore_keeps_original_id() {
        let store = MemoryRecordStore::new();
        let event = store
            .insert_event(&NewEvent {
                owner_id: Uuid::new_v4(),
                title: "standup".into(),
                description: None,
                scheduled_at: Utc::now(),
            })
            .await
            .unwrap();

        assert!(store.delete_event(event.id).await.unwrap());
        store.restore_event(&event).await.unwrap();
        assert_eq!(store.get_event(event.id).await.unwrap(), Some(event.clone()));
        // restoring over a live row is refused
        let err = store.restore_event(&event).await.unwrap_err();
        assert!(crate::store::is_already_exists(&err));
    }
}
