//! Event operations: cache-aside reads, write-then-invalidate mutations,
//! and the soft-delete path.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::cache::CacheAside;
use crate::errors::AppError;
use crate::middleware::auth::AuthContext;
use crate::middleware::rbac::{self, Role};
use crate::models::event::{Event, EventChanges, NewEvent};
use crate::models::tombstone::Tombstone;
use crate::store::{self, RecordStore};
use crate::tombstones::{plan_deletion, DeletePlan, TombstoneStore};

pub const ALL_EVENTS_KEY: &str = "events:all";

pub fn owner_events_key(owner_id: Uuid) -> String {
    format!("events:owner:{}", owner_id)
}

/// Every cache key whose value depends on events owned by `owner_id`.
pub fn dependent_keys(owner_id: Uuid) -> Vec<String> {
    vec![ALL_EVENTS_KEY.to_string(), owner_events_key(owner_id)]
}

/// Cache lifetimes and soft-delete windows.
#[derive(Debug, Clone)]
pub struct EventSettings {
    pub all_events_ttl_secs: u64,
    pub owner_events_ttl_secs: u64,
    pub protection_window: Duration,
    pub tombstone_ttl: Duration,
}

impl Default for EventSettings {
    fn default() -> Self {
        Self {
            all_events_ttl_secs: 300,
            owner_events_ttl_secs: 180,
            protection_window: Duration::hours(24),
            tombstone_ttl: Duration::hours(24),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DeleteOutcome {
    Tombstoned { expires_at: DateTime<Utc> },
    Deleted,
}

#[derive(Clone)]
pub struct EventService {
    records: Arc<dyn RecordStore>,
    cache: CacheAside,
    tombstones: TombstoneStore,
    settings: EventSettings,
}

impl EventService {
    pub fn new(
        records: Arc<dyn RecordStore>,
        cache: CacheAside,
        tombstones: TombstoneStore,
        settings: EventSettings,
    ) -> Self {
        Self {
            records,
            cache,
            tombstones,
            settings,
        }
    }

    pub async fn list_all(&self) -> Result<Vec<Event>, AppError> {
        let records = self.records.clone();
        self.cache
            .read(ALL_EVENTS_KEY, self.settings.all_events_ttl_secs, || async move {
                Ok(records.list_events().await?)
            })
            .await
    }

    pub async fn list_for_owner(&self, owner_id: Uuid) -> Result<Vec<Event>, AppError> {
        let records = self.records.clone();
        self.cache
            .read(
                &owner_events_key(owner_id),
                self.settings.owner_events_ttl_secs,
                || async move { Ok(records.list_events_by_owner(owner_id).await?) },
            )
            .await
    }

    pub async fn get(&self, id: Uuid) -> Result<Event, AppError> {
        self.records
            .get_event(id)
            .await?
            .ok_or(AppError::NotFound("event"))
    }

    pub async fn create(
        &self,
        ctx: &AuthContext,
        title: &str,
        description: Option<String>,
        scheduled_at: DateTime<Utc>,
    ) -> Result<Event, AppError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(AppError::Validation("title is required".into()));
        }
        let event = self
            .records
            .insert_event(&NewEvent {
                owner_id: ctx.user_id,
                title: title.to_string(),
                description,
                scheduled_at,
            })
            .await?;
        self.cache.invalidate(&dependent_keys(event.owner_id)).await;
        tracing::info!(event_id = %event.id, owner = %event.owner_id, "event created");
        Ok(event)
    }

    /// Owner or admin may edit; only admins may approve or reject.
    pub async fn update(
        &self,
        ctx: &AuthContext,
        id: Uuid,
        changes: EventChanges,
    ) -> Result<Event, AppError> {
        if changes.is_empty() {
            return Err(AppError::Validation("no fields to update".into()));
        }
        if changes.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
            return Err(AppError::Validation("title cannot be empty".into()));
        }
        let existing = self.get(id).await?;
        rbac::enforce_owner(ctx.user_id, ctx.role, existing.owner_id)?;
        if changes.status.is_some_and(|s| s.requires_admin()) {
            rbac::enforce_role(ctx.user_id, ctx.role, Role::Admin)?;
        }

        let updated = self
            .records
            .update_event(id, &changes)
            .await?
            .ok_or(AppError::NotFound("event"))?;
        self.cache.invalidate(&dependent_keys(updated.owner_id)).await;
        tracing::info!(event_id = %id, by = %ctx.user_id, "event updated");
        Ok(updated)
    }

    pub async fn delete(&self, ctx: &AuthContext, id: Uuid) -> Result<DeleteOutcome, AppError> {
        self.delete_at(ctx, id, Utc::now()).await
    }

    /// Delete an event, tombstoning it if it is scheduled inside the
    /// protection window. The tombstone is written before the active record
    /// is removed, so the id is never absent from both.
    pub async fn delete_at(
        &self,
        ctx: &AuthContext,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<DeleteOutcome, AppError> {
        let event = self.get(id).await?;
        rbac::enforce_owner(ctx.user_id, ctx.role, event.owner_id)?;

        let outcome = match plan_deletion(event.scheduled_at, now, self.settings.protection_window) {
            DeletePlan::Tombstone => {
                let tombstone = Tombstone {
                    resource_id: event.id,
                    snapshot: event.clone(),
                    deleted_by: ctx.user_id,
                    deleted_at: now,
                    expires_at: now + self.settings.tombstone_ttl,
                };
                self.tombstones.put(&tombstone).await?;

                match self.records.delete_event(id).await {
                    Ok(true) => {}
                    Ok(false) => {
                        tracing::warn!(event_id = %id, "event vanished before removal; tombstone kept");
                    }
                    Err(e) => {
                        if let Err(rollback) = self.tombstones.remove(id).await {
                            tracing::error!(event_id = %id, error = %rollback, "tombstone rollback failed");
                        }
                        return Err(AppError::Store(e));
                    }
                }
                tracing::info!(
                    event_id = %id,
                    by = %ctx.user_id,
                    expires_at = %tombstone.expires_at,
                    "event tombstoned"
                );
                DeleteOutcome::Tombstoned {
                    expires_at: tombstone.expires_at,
                }
            }
            DeletePlan::Permanent => {
                if !self.records.delete_event(id).await? {
                    return Err(AppError::NotFound("event"));
                }
                tracing::info!(event_id = %id, by = %ctx.user_id, "event deleted");
                DeleteOutcome::Deleted
            }
        };

        self.cache.invalidate(&dependent_keys(event.owner_id)).await;
        Ok(outcome)
    }

    pub async fn restore(&self, ctx: &AuthContext, id: Uuid) -> Result<Event, AppError> {
        self.restore_at(ctx, id, Utc::now()).await
    }

    /// Bring a tombstoned event back. The record is re-inserted before the
    /// tombstone is dropped.
    pub async fn restore_at(
        &self,
        ctx: &AuthContext,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Event, AppError> {
        let tombstone = self
            .tombstones
            .get(id)
            .await?
            .filter(|t| !t.is_expired_at(now))
            .ok_or(AppError::NotFound("tombstone"))?;
        rbac::enforce_owner(ctx.user_id, ctx.role, tombstone.snapshot.owner_id)?;

        if let Err(e) = self.records.restore_event(&tombstone.snapshot).await {
            if !store::is_already_exists(&e) {
                return Err(e.into());
            }
            // another restore won, or an earlier one left its tombstone behind
            tracing::warn!(event_id = %id, "event already active; dropping stale tombstone");
            if let Err(e) = self.tombstones.remove(id).await {
                tracing::error!(event_id = %id, error = %e, "failed to drop stale tombstone");
            }
            return Err(AppError::NotFound("tombstone"));
        }
        if let Err(e) = self.tombstones.remove(id).await {
            // the record is back; the next sweep drops the tombstone
            tracing::error!(event_id = %id, error = %e, "failed to drop restored tombstone");
        }
        self.cache
            .invalidate(&dependent_keys(tombstone.snapshot.owner_id))
            .await;
        tracing::info!(event_id = %id, by = %ctx.user_id, "event restored");
        Ok(tombstone.snapshot)
    }

    pub async fn tombstones(&self) -> Result<Vec<Tombstone>, AppError> {
        Ok(self.tombstones.list().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::sweeper::TombstoneSweeper;
    use crate::models::user::Plan;
    use crate::store::kv::KeyValueStore;
    use crate::store::memory::{MemoryKv, MemoryRecordStore};

    struct Fixture {
        svc: EventService,
        kv: Arc<MemoryKv>,
        records: Arc<MemoryRecordStore>,
    }

    fn fixture() -> Fixture {
        let kv = Arc::new(MemoryKv::new());
        let records = Arc::new(MemoryRecordStore::new());
        let svc = EventService::new(
            records.clone(),
            CacheAside::new(kv.clone()),
            TombstoneStore::new(kv.clone()),
            EventSettings::default(),
        );
        Fixture { svc, kv, records }
    }

    fn ctx(role: Role) -> AuthContext {
        AuthContext {
            user_id: Uuid::new_v4(),
            role,
            plan: Plan::Free,
        }
    }

    #[tokio::test]
    async fn test_create_invalidates_collections() {
        let f = fixture();
        let owner = ctx(Role::User);

        assert!(f.svc.list_all().await.unwrap().is_empty());
        assert!(f.svc.list_for_owner(owner.user_id).await.unwrap().is_empty());
        assert!(f.kv.exists(ALL_EVENTS_KEY).await.unwrap());

        let event = f
            .svc
            .create(&owner, "dinner", None, Utc::now() + Duration::days(3))
            .await
            .unwrap();

        assert!(!f.kv.exists(ALL_EVENTS_KEY).await.unwrap());
        assert_eq!(f.svc.list_all().await.unwrap(), vec![event.clone()]);
        assert_eq!(f.svc.list_for_owner(owner.user_id).await.unwrap(), vec![event]);
    }

    #[tokio::test]
    async fn test_read_after_update_sees_the_update() {
        let f = fixture();
        let owner = ctx(Role::User);
        let event = f
            .svc
            .create(&owner, "dinner", None, Utc::now() + Duration::days(3))
            .await
            .unwrap();
        f.svc.list_all().await.unwrap();

        f.svc
            .update(
                &owner,
                event.id,
                EventChanges {
                    title: Some("late dinner".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let listed = f.svc.list_all().await.unwrap();
        assert_eq!(listed[0].title, "late dinner");
    }

    #[tokio::test]
    async fn test_only_admin_may_approve() {
        let f = fixture();
        let owner = ctx(Role::User);
        let event = f
            .svc
            .create(&owner, "gig", None, Utc::now() + Duration::days(3))
            .await
            .unwrap();
        let approve = EventChanges {
            status: Some(crate::models::event::EventStatus::Approved),
            ..Default::default()
        };

        let err = f.svc.update(&owner, event.id, approve.clone()).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::Forbidden(crate::errors::DenyReason::RoleMismatch)
        ));
        assert!(f.svc.update(&ctx(Role::Admin), event.id, approve).await.is_ok());
    }

    #[tokio::test]
    async fn test_non_owner_cannot_delete() {
        let f = fixture();
        let event = f
            .svc
            .create(&ctx(Role::User), "gig", None, Utc::now() + Duration::days(3))
            .await
            .unwrap();

        let err = f.svc.delete(&ctx(Role::User), event.id).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(crate::errors::DenyReason::NotOwner)));
        assert!(f.records.get_event(event.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_far_future_delete_is_permanent() {
        let f = fixture();
        let owner = ctx(Role::User);
        let now = Utc::now();
        let event = f
            .svc
            .create(&owner, "gig", None, now + Duration::hours(24) + Duration::minutes(1))
            .await
            .unwrap();

        let outcome = f.svc.delete_at(&owner, event.id, now).await.unwrap();
        assert_eq!(outcome, DeleteOutcome::Deleted);
        assert!(f.records.get_event(event.id).await.unwrap().is_none());
        assert!(f.svc.tombstones().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_near_term_delete_is_tombstoned_and_restorable() {
        let f = fixture();
        let owner = ctx(Role::User);
        let now = Utc::now();
        let event = f
            .svc
            .create(&owner, "gig", None, now + Duration::hours(23) + Duration::minutes(59))
            .await
            .unwrap();

        let outcome = f.svc.delete_at(&owner, event.id, now).await.unwrap();
        assert_eq!(
            outcome,
            DeleteOutcome::Tombstoned {
                expires_at: now + Duration::hours(24)
            }
        );
        assert!(f.records.get_event(event.id).await.unwrap().is_none());
        assert_eq!(f.svc.tombstones().await.unwrap()[0].snapshot, event);

        let restored = f.svc.restore_at(&owner, event.id, now).await.unwrap();
        assert_eq!(restored, event);
        assert!(f.svc.tombstones().await.unwrap().is_empty());
        assert_eq!(f.svc.list_all().await.unwrap(), vec![event]);
    }

    #[tokio::test]
    async fn test_restore_of_already_active_event_is_not_found() {
        let f = fixture();
        let owner = ctx(Role::User);
        let now = Utc::now();
        let event = f
            .svc
            .create(&owner, "gig", None, now + Duration::hours(2))
            .await
            .unwrap();
        f.svc.delete_at(&owner, event.id, now).await.unwrap();
        // a concurrent restore put the record back first
        f.records.restore_event(&event).await.unwrap();

        assert!(matches!(
            f.svc.restore_at(&owner, event.id, now).await,
            Err(AppError::NotFound("tombstone"))
        ));
        assert!(f.svc.tombstones().await.unwrap().is_empty());
        assert_eq!(f.records.get_event(event.id).await.unwrap(), Some(event));
    }

    #[tokio::test]
    async fn test_second_restore_is_not_found() {
        let f = fixture();
        let owner = ctx(Role::User);
        let now = Utc::now();
        let event = f
            .svc
            .create(&owner, "gig", None, now + Duration::hours(2))
            .await
            .unwrap();
        f.svc.delete_at(&owner, event.id, now).await.unwrap();

        f.svc.restore_at(&owner, event.id, now).await.unwrap();
        assert!(matches!(
            f.svc.restore_at(&owner, event.id, now).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_swept_tombstone_cannot_be_restored() {
        let f = fixture();
        let owner = ctx(Role::User);
        let now = Utc::now();
        let event = f
            .svc
            .create(&owner, "gig", None, now + Duration::hours(2))
            .await
            .unwrap();
        f.svc.delete_at(&owner, event.id, now).await.unwrap();

        let sweeper = TombstoneSweeper::new(
            TombstoneStore::new(f.kv.clone()),
            std::time::Duration::from_secs(300),
        );
        let report = sweeper.sweep().await.unwrap();
        assert_eq!(report.purged, 1);

        assert!(matches!(
            f.svc.restore_at(&owner, event.id, now).await,
            Err(AppError::NotFound("tombstone"))
        ));
        assert!(f.records.get_event(event.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_admin_may_delete_any_event() {
        let f = fixture();
        let event = f
            .svc
            .create(&ctx(Role::User), "gig", None, Utc::now() + Duration::days(5))
            .await
            .unwrap();
        assert_eq!(
            f.svc.delete(&ctx(Role::Admin), event.id).await.unwrap(),
            DeleteOutcome::Deleted
        );
    }

    #[tokio::test]
    async fn test_missing_event_is_not_found() {
        let f = fixture();
        assert!(matches!(
            f.svc.delete(&ctx(Role::Admin), Uuid::new_v4()).await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            f.svc.restore(&ctx(Role::Admin), Uuid::new_v4()).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_create_requires_title() {
        let f = fixture();
        assert!(matches!(
            f.svc.create(&ctx(Role::User), "  ", None, Utc::now()).await,
            Err(AppError::Validation(_))
        ));
    }
}
