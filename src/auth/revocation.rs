//! Token blacklist backed by the key-value store.
//!
//! Entries are written only by logout and are never deleted explicitly:
//! each one carries a ttl at least as long as the token's remaining life,
//! so the store's own expiry forgets it once the token could no longer
//! verify anyway. Keys hold a SHA-256 digest, not the bearer token itself.

use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};

use crate::store::kv::KeyValueStore;

const REVOKED_PREFIX: &str = "revoked:";

#[derive(Clone)]
pub struct RevocationStore {
    kv: Arc<dyn KeyValueStore>,
}

impl RevocationStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    /// Revoke one token for `ttl`.
    pub async fn revoke(&self, token: &str, ttl: Duration) -> anyhow::Result<()> {
        self.kv
            .set_ex(&revocation_key(token), "1", ttl_secs(ttl))
            .await
    }

    /// Revoke several tokens as a single atomic write.
    pub async fn revoke_all(&self, tokens: &[(&str, Duration)]) -> anyhow::Result<()> {
        let entries: Vec<(String, String, u64)> = tokens
            .iter()
            .map(|(token, ttl)| (revocation_key(token), "1".to_string(), ttl_secs(*ttl)))
            .collect();
        self.kv.set_many_ex(&entries).await
    }

    pub async fn is_revoked(&self, token: &str) -> anyhow::Result<bool> {
        self.kv.exists(&revocation_key(token)).await
    }
}

fn revocation_key(token: &str) -> String {
    format!("{}{}", REVOKED_PREFIX, hex::encode(Sha256::digest(token.as_bytes())))
}

/// Whole seconds, rounded up so the entry never lapses before the token.
fn ttl_secs(ttl: Duration) -> u64 {
    let secs = ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0);
    secs.max(1)
}
