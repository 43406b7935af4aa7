use async_trait::async_trait;
use uuid::Uuid;

use crate::models::event::{Event, EventChanges, EventStatus, NewEvent};
use crate::models::user::{NewUser, User};

pub mod kv;
pub mod memory;
pub mod postgres;

/// A write collided with an existing row: a taken email, or an event id
/// that is already active. Stores return it inside `anyhow::Error`.
#[derive(Debug, thiserror::Error)]
#[error("{0} already exists")]
pub struct AlreadyExists(pub &'static str);

pub fn is_already_exists(err: &anyhow::Error) -> bool {
    err.downcast_ref::<AlreadyExists>().is_some()
}

/// Primary record store: the source of truth for users and events.
///
/// No operation spans more than one record, so implementations need no
/// multi-statement transactions.
#[async_trait]
pub trait RecordStore: Send + Sync {
    // -- User Operations --

    /// Fails with [`AlreadyExists`] if the email is taken.
    async fn insert_user(&self, user: &NewUser) -> anyhow::Result<User>;

    async fn find_user_by_email(&self, email: &str) -> anyhow::Result<Option<User>>;

    async fn get_user(&self, id: Uuid) -> anyhow::Result<Option<User>>;

    // -- Event Operations --

    async fn insert_event(&self, event: &NewEvent) -> anyhow::Result<Event>;

    /// Re-insert a previously deleted event under its original id. Fails
    /// with [`AlreadyExists`] if that id is active.
    async fn restore_event(&self, event: &Event) -> anyhow::Result<()>;

    async fn get_event(&self, id: Uuid) -> anyhow::Result<Option<Event>>;

    /// All events ordered by `scheduled_at`.
    async fn list_events(&self) -> anyhow::Result<Vec<Event>>;

    async fn list_events_by_owner(&self, owner_id: Uuid) -> anyhow::Result<Vec<Event>>;

    async fn list_events_by_status(&self, status: EventStatus) -> anyhow::Result<Vec<Event>>;

    /// Returns `None` if the event does not exist.
    async fn update_event(&self, id: Uuid, changes: &EventChanges) -> anyhow::Result<Option<Event>>;

    /// Returns `true` if a row was removed.
    async fn delete_event(&self, id: Uuid) -> anyhow::Result<bool>;
}
