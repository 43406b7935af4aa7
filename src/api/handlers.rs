use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::auth::service::TokenPair;
use crate::errors::AppError;
use crate::events::DeleteOutcome;
use crate::middleware::auth::{bearer_token, AuthContext};
use crate::models::event::{Event, EventChanges};
use crate::models::tombstone::Tombstone;
use crate::models::user::User;
use crate::AppState;

// ── Request / Response DTOs ──────────────────────────────────

#[derive(Deserialize)]
pub struct CredentialsRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: Option<String>,
}

#[derive(Serialize)]
pub struct RefreshResponse {
    pub access_token: String,
}

#[derive(Deserialize)]
pub struct LogoutRequest {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

#[derive(Deserialize)]
pub struct CreateEventRequest {
    pub title: String,
    pub description: Option<String>,
    pub scheduled_at: DateTime<Utc>,
}

#[derive(Serialize)]
pub struct DeleteResponse {
    pub id: Uuid,
    #[serde(flatten)]
    pub outcome: DeleteOutcome,
}

// ── Health ───────────────────────────────────────────────────

/// GET /healthz
pub async fn healthz() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

// ── Auth ─────────────────────────────────────────────────────

/// POST /auth/signup: register a `user` on the free plan
pub async fn signup(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CredentialsRequest>,
) -> Result<(StatusCode, Json<User>), AppError> {
    let user = state.auth.signup(&payload.email, &payload.password).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

/// POST /auth/login: exchange credentials for an access/refresh pair
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CredentialsRequest>,
) -> Result<Json<TokenPair>, AppError> {
    let pair = state.auth.login(&payload.email, &payload.password).await?;
    Ok(Json(pair))
}

/// POST /auth/refresh: mint a new access token
pub async fn refresh(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RefreshRequest>,
) -> Result<Json<RefreshResponse>, AppError> {
    let access_token = state.auth.refresh(payload.refresh_token.as_deref()).await?;
    Ok(Json(RefreshResponse { access_token }))
}

/// POST /auth/logout: revoke both tokens. The access token may come from
/// the body or the `Authorization` header.
pub async fn logout(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<LogoutRequest>,
) -> Result<Json<Value>, AppError> {
    let access = payload
        .access_token
        .as_deref()
        .or_else(|| bearer_token(&headers));
    state
        .auth
        .logout(access, payload.refresh_token.as_deref())
        .await?;
    Ok(Json(json!({ "logged_out": true })))
}

// ── Events ───────────────────────────────────────────────────

/// GET /events
pub async fn list_events(
    State(state): State<Arc<AppState>>,
    _ctx: AuthContext,
) -> Result<Json<Vec<Event>>, AppError> {
    Ok(Json(state.events.list_all().await?))
}

/// GET /events/mine
pub async fn list_my_events(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
) -> Result<Json<Vec<Event>>, AppError> {
    Ok(Json(state.events.list_for_owner(ctx.user_id).await?))
}

/// POST /events
pub async fn create_event(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    Json(payload): Json<CreateEventRequest>,
) -> Result<(StatusCode, Json<Event>), AppError> {
    let event = state
        .events
        .create(&ctx, &payload.title, payload.description, payload.scheduled_at)
        .await?;
    Ok((StatusCode::CREATED, Json(event)))
}

/// GET /events/:id
pub async fn get_event(
    State(state): State<Arc<AppState>>,
    _ctx: AuthContext,
    Path(id): Path<Uuid>,
) -> Result<Json<Event>, AppError> {
    Ok(Json(state.events.get(id).await?))
}

/// PUT /events/:id: owner or admin; status approval is admin-only
pub async fn update_event(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    Path(id): Path<Uuid>,
    Json(changes): Json<EventChanges>,
) -> Result<Json<Event>, AppError> {
    Ok(Json(state.events.update(&ctx, id, changes).await?))
}

/// DELETE /events/:id: tombstoned if scheduled inside the protection window
pub async fn delete_event(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    Path(id): Path<Uuid>,
) -> Result<Json<DeleteResponse>, AppError> {
    let outcome = state.events.delete(&ctx, id).await?;
    Ok(Json(DeleteResponse { id, outcome }))
}

/// POST /events/:id/restore
pub async fn restore_event(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    Path(id): Path<Uuid>,
) -> Result<Json<Event>, AppError> {
    Ok(Json(state.events.restore(&ctx, id).await?))
}

// ── Admin ────────────────────────────────────────────────────

/// GET /admin/tombstones
pub async fn list_tombstones(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Tombstone>>, AppError> {
    Ok(Json(state.events.tombstones().await?))
}
