//! eventgate: token-authenticated event API with cache-aside reads and
//! tombstone soft deletes.
//!
//! The binary in `main.rs` wires Postgres and Redis; integration tests in
//! `tests/` build the same router over the in-memory stores.

use std::sync::Arc;

pub mod api;
pub mod auth;
pub mod cache;
pub mod cli;
pub mod config;
pub mod errors;
pub mod events;
pub mod jobs;
pub mod middleware;
pub mod models;
pub mod store;
pub mod tombstones;

use auth::password::PasswordHashing;
use auth::revocation::RevocationStore;
use auth::service::AuthService;
use auth::tokens::{TokenIssuer, TokenVerifier};
use cache::CacheAside;
use config::Config;
use events::EventService;
use middleware::auth::AuthorizationGate;
use store::kv::KeyValueStore;
use store::RecordStore;
use tombstones::TombstoneStore;

/// Shared state handed to every handler.
pub struct AppState {
    pub config: Config,
    pub auth: AuthService,
    pub gate: AuthorizationGate,
    pub events: EventService,
}

impl AppState {
    pub fn new(
        config: Config,
        records: Arc<dyn RecordStore>,
        kv: Arc<dyn KeyValueStore>,
        hasher: Arc<dyn PasswordHashing>,
    ) -> Self {
        let revocations = RevocationStore::new(kv.clone());
        let issuer = Arc::new(TokenIssuer::new(&config.access_secret, &config.refresh_secret));
        let verifier = Arc::new(TokenVerifier::new(
            &config.access_secret,
            &config.refresh_secret,
            revocations.clone(),
        ));

        let auth = AuthService::new(records.clone(), hasher, issuer, verifier.clone(), revocations);
        let events = EventService::new(
            records,
            CacheAside::new(kv.clone()),
            TombstoneStore::new(kv),
            config.event_settings(),
        );

        Self {
            config,
            auth,
            gate: AuthorizationGate::new(verifier),
            events,
        }
    }
}
