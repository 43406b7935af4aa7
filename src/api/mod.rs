use std::sync::Arc;

use axum::{
    http::StatusCode,
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::middleware::auth::{require_admin, require_auth};
use crate::AppState;

pub mod handlers;

/// Build the HTTP router.
///
/// `/auth/*` and `/healthz` are public; `/events*` needs a valid access
/// token; `/admin/*` additionally needs the admin role.
pub fn router(state: Arc<AppState>) -> Router {
    let gate = state.gate.clone();

    let public = Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/auth/signup", post(handlers::signup))
        .route("/auth/login", post(handlers::login))
        .route("/auth/refresh", post(handlers::refresh))
        .route("/auth/logout", post(handlers::logout));

    let protected = Router::new()
        .route(
            "/events",
            get(handlers::list_events).post(handlers::create_event),
        )
        .route("/events/mine", get(handlers::list_my_events))
        .route(
            "/events/:id",
            get(handlers::get_event)
                .put(handlers::update_event)
                .delete(handlers::delete_event),
        )
        .route("/events/:id/restore", post(handlers::restore_event))
        .route_layer(middleware::from_fn_with_state(gate.clone(), require_auth));

    // layers run outside-in: authenticate first, then check the role
    let admin = Router::new()
        .route("/admin/tombstones", get(handlers::list_tombstones))
        .route_layer(middleware::from_fn_with_state(gate.clone(), require_admin))
        .route_layer(middleware::from_fn_with_state(gate, require_auth));

    public
        .merge(protected)
        .merge(admin)
        .fallback(fallback_404)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn fallback_404() -> StatusCode {
    StatusCode::NOT_FOUND
}
