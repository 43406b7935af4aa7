//! Password hashing capability. The services only see `hash` and `verify`;
//! the Argon2id details live here.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};

pub trait PasswordHashing: Send + Sync {
    /// Produce a PHC-formatted hash for storage.
    fn hash(&self, password: &str) -> anyhow::Result<String>;

    /// `true` if `password` matches `hash`. Malformed hashes never match.
    fn verify(&self, password: &str, hash: &str) -> bool;
}

/// Argon2id with configurable cost parameters.
pub struct Argon2Hashing {
    params: Params,
}

impl Default for Argon2Hashing {
    fn default() -> Self {
        Self {
            params: Params::default(),
        }
    }
}

impl Argon2Hashing {
    /// Custom memory (KiB) and iteration cost. Low values are only
    /// appropriate for tests and local development.
    pub fn with_cost(memory_kib: u32, iterations: u32) -> anyhow::Result<Self> {
        let params = Params::new(memory_kib, iterations, 1, None)
            .map_err(|e| anyhow::anyhow!("invalid argon2 params: {}", e))?;
        Ok(Self { params })
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }
}

impl PasswordHashing for Argon2Hashing {
    fn hash(&self, password: &str) -> anyhow::Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| anyhow::anyhow!("password hashing failed: {}", e))?;
        Ok(hash.to_string())
    }

    fn verify(&self, password: &str, hash: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(hash) else {
            tracing::warn!("stored password hash is not valid PHC");
            return false;
        };
        // cost parameters are read back from the PHC string
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cheap() -> Argon2Hashing {
        Argon2Hashing::with_cost(64, 1).unwrap()
    }

    #[test]
    fn test_hash_then_verify() {
        let hasher = cheap();
        let hash = hasher.hash("p").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(hasher.verify("p", &hash));
        assert!(!hasher.verify("wrong", &hash));
    }

    #[test]
    fn test_same_password_gets_distinct_salts() {
        let hasher = cheap();
        assert_ne!(hasher.hash("p").unwrap(), hasher.hash("p").unwrap());
    }

    #[test]
    fn test_malformed_hash_never_matches() {
        assert!(!cheap().verify("p", "plaintext-not-a-hash"));
    }
}
