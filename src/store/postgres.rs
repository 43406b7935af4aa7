use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{AlreadyExists, RecordStore};
use crate::models::event::{Event, EventChanges, EventStatus, NewEvent};
use crate::models::user::{NewUser, Plan, User};

const USER_COLUMNS: &str = "id, email, password_hash, role, plan, created_at";
const EVENT_COLUMNS: &str = "id, owner_id, title, description, scheduled_at, status, created_at";

/// Unique-constraint violations become [`AlreadyExists`].
fn conflict_or(err: sqlx::Error, what: &'static str) -> anyhow::Error {
    match err.as_database_error() {
        Some(db) if db.is_unique_violation() => AlreadyExists(what).into(),
        _ => err.into(),
    }
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl RecordStore for PgStore {
    // -- User Operations --

    async fn insert_user(&self, user: &NewUser) -> anyhow::Result<User> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "INSERT INTO users (id, email, password_hash, role, plan) VALUES ($1, $2, $3, $4, $5) RETURNING {}",
            USER_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.role.as_str())
        .bind(user.plan.map(|p| p.as_str()))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| conflict_or(e, "email"))?;
        row.try_into()
    }

    async fn find_user_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users WHERE email = $1",
            USER_COLUMNS
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        row.map(User::try_from).transpose()
    }

    async fn get_user(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users WHERE id = $1",
            USER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(User::try_from).transpose()
    }

    // -- Event Operations --

    async fn insert_event(&self, event: &NewEvent) -> anyhow::Result<Event> {
        let row = sqlx::query_as::<_, EventRow>(&format!(
            r#"INSERT INTO events (id, owner_id, title, description, scheduled_at, status)
               VALUES ($1, $2, $3, $4, $5, 'pending')
               RETURNING {}"#,
            EVENT_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(event.owner_id)
        .bind(&event.title)
        .bind(&event.description)
        .bind(event.scheduled_at)
        .fetch_one(&self.pool)
        .await?;
        row.try_into()
    }

    async fn restore_event(&self, event: &Event) -> anyhow::Result<()> {
        sqlx::query(
            r#"INSERT INTO events (id, owner_id, title, description, scheduled_at, status, created_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7)"#,
        )
        .bind(event.id)
        .bind(event.owner_id)
        .bind(&event.title)
        .bind(&event.description)
        .bind(event.scheduled_at)
        .bind(event.status.as_str())
        .bind(event.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| conflict_or(e, "event"))?;
        Ok(())
    }

    async fn get_event(&self, id: Uuid) -> anyhow::Result<Option<Event>> {
        let row = sqlx::query_as::<_, EventRow>(&format!(
            "SELECT {} FROM events WHERE id = $1",
            EVENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Event::try_from).transpose()
    }

    async fn list_events(&self) -> anyhow::Result<Vec<Event>> {
        let rows = sqlx::query_as::<_, EventRow>(&format!(
            "SELECT {} FROM events ORDER BY scheduled_at ASC, created_at ASC",
            EVENT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Event::try_from).collect()
    }

    async fn list_events_by_owner(&self, owner_id: Uuid) -> anyhow::Result<Vec<Event>> {
        let rows = sqlx::query_as::<_, EventRow>(&format!(
            "SELECT {} FROM events WHERE owner_id = $1 ORDER BY scheduled_at ASC, created_at ASC",
            EVENT_COLUMNS
        ))
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Event::try_from).collect()
    }

    async fn list_events_by_status(&self, status: EventStatus) -> anyhow::Result<Vec<Event>> {
        let rows = sqlx::query_as::<_, EventRow>(&format!(
            "SELECT {} FROM events WHERE status = $1 ORDER BY scheduled_at ASC, created_at ASC",
            EVENT_COLUMNS
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Event::try_from).collect()
    }

    async fn update_event(&self, id: Uuid, changes: &EventChanges) -> anyhow::Result<Option<Event>> {
        let row = sqlx::query_as::<_, EventRow>(&format!(
            r#"UPDATE events
               SET title        = COALESCE($2, title),
                   description  = COALESCE($3, description),
                   scheduled_at = COALESCE($4, scheduled_at),
                   status       = COALESCE($5, status)
               WHERE id = $1
               RETURNING {}"#,
            EVENT_COLUMNS
        ))
        .bind(id)
        .bind(&changes.title)
        .bind(&changes.description)
        .bind(changes.scheduled_at)
        .bind(changes.status.map(|s| s.as_str()))
        .fetch_optional(&self.pool)
        .await?;
        row.map(Event::try_from).transpose()
    }

    async fn delete_event(&self, id: Uuid) -> anyhow::Result<bool> {
        let result = sqlx::query("DELETE FROM events WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

// -- Row types --

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    email: String,
    password_hash: String,
    role: String,
    plan: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = anyhow::Error;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let plan = row
            .plan
            .as_deref()
            .map(str::parse::<Plan>)
            .transpose()
            .map_err(anyhow::Error::msg)?;
        Ok(User {
            id: row.id,
            email: row.email,
            password_hash: row.password_hash,
            role: row.role.parse().map_err(anyhow::Error::msg)?,
            plan,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct EventRow {
    id: Uuid,
    owner_id: Uuid,
    title: String,
    description: Option<String>,
    scheduled_at: DateTime<Utc>,
    status: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<EventRow> for Event {
    type Error = anyhow::Error;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        Ok(Event {
            id: row.id,
            owner_id: row.owner_id,
            title: row.title,
            description: row.description,
            scheduled_at: row.scheduled_at,
            status: row.status.parse().map_err(anyhow::Error::msg)?,
            created_at: row.created_at,
        })
    }
}
