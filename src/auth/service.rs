use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::password::PasswordHashing;
use super::revocation::RevocationStore;
use super::tokens::{AccessClaims, RefreshClaims, TokenIssuer, TokenVerifier};
use crate::errors::AppError;
use crate::middleware::rbac::Role;
use crate::models::user::{NewUser, Plan, User};
use crate::store::{self, RecordStore};

#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Signup, login, refresh and logout flows.
#[derive(Clone)]
pub struct AuthService {
    records: Arc<dyn RecordStore>,
    hasher: Arc<dyn PasswordHashing>,
    issuer: Arc<TokenIssuer>,
    verifier: Arc<TokenVerifier>,
    revocations: RevocationStore,
}

impl AuthService {
    pub fn new(
        records: Arc<dyn RecordStore>,
        hasher: Arc<dyn PasswordHashing>,
        issuer: Arc<TokenIssuer>,
        verifier: Arc<TokenVerifier>,
        revocations: RevocationStore,
    ) -> Self {
        Self {
            records,
            hasher,
            issuer,
            verifier,
            revocations,
        }
    }

    /// Self-service registration: always a `user` on the free plan.
    pub async fn signup(&self, email: &str, password: &str) -> Result<User, AppError> {
        self.register(email, password, Role::User, Some(Plan::Free)).await
    }

    /// Create an account with an explicit role and plan (CLI provisioning).
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        role: Role,
        plan: Option<Plan>,
    ) -> Result<User, AppError> {
        let email = normalize_email(email);
        if email.is_empty() || !email.contains('@') {
            return Err(AppError::Validation("a valid email is required".into()));
        }
        if password.is_empty() {
            return Err(AppError::Validation("password is required".into()));
        }
        if self.records.find_user_by_email(&email).await?.is_some() {
            return Err(AppError::Validation("email already exists".into()));
        }

        let password_hash = self.hash_password(password).await?;
        // a concurrent signup can take the email after the check above
        let user = self
            .records
            .insert_user(&NewUser {
                email,
                password_hash,
                role,
                plan,
            })
            .await
            .map_err(|e| {
                if store::is_already_exists(&e) {
                    AppError::Validation("email already exists".into())
                } else {
                    AppError::Store(e)
                }
            })?;
        tracing::info!(user_id = %user.id, role = %user.role, "user registered");
        Ok(user)
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<TokenPair, AppError> {
        let email = normalize_email(email);
        let user = self.records.find_user_by_email(&email).await?;
        let Some(user) = user else {
            tracing::info!("login failed: unknown email");
            return Err(AppError::InvalidCredentials);
        };
        if !self.verify_password(password, &user.password_hash).await? {
            tracing::info!(user_id = %user.id, "login failed: wrong password");
            return Err(AppError::InvalidCredentials);
        }

        let principal = user.principal();
        let pair = TokenPair {
            access_token: self.issuer.issue_access(&principal)?,
            refresh_token: self.issuer.issue_refresh(&principal)?,
        };
        tracing::info!(user_id = %user.id, "login succeeded");
        Ok(pair)
    }

    /// Mint a new access token from a refresh token. Role and plan are
    /// re-read from the record store so the new token reflects the current
    /// account rather than whatever was true at login.
    pub async fn refresh(&self, refresh_token: Option<&str>) -> Result<String, AppError> {
        let token = refresh_token
            .filter(|t| !t.is_empty())
            .ok_or(AppError::MissingCredentials)?;
        let claims: RefreshClaims = self.verifier.verify(token).await?;

        let user = self.records.get_user(claims.sub).await?.ok_or_else(|| {
            tracing::warn!(user_id = %claims.sub, "refresh for a user that no longer exists");
            AppError::InvalidToken
        })?;
        self.issuer.issue_access(&user.principal())
    }

    pub async fn logout(
        &self,
        access_token: Option<&str>,
        refresh_token: Option<&str>,
    ) -> Result<(), AppError> {
        self.logout_at(access_token, refresh_token, Utc::now()).await
    }

    /// Revoke an access/refresh pair in one atomic write. Each entry lives
    /// for the token's remaining validity, so the blacklist forgets it only
    /// once the token could no longer verify anyway.
    pub async fn logout_at(
        &self,
        access_token: Option<&str>,
        refresh_token: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let (Some(access), Some(refresh)) = (
            access_token.filter(|t| !t.is_empty()),
            refresh_token.filter(|t| !t.is_empty()),
        ) else {
            return Err(AppError::Validation(
                "access_token and refresh_token are both required".into(),
            ));
        };

        let access_claims: AccessClaims = self.verifier.decode_signed(access)?;
        let refresh_claims: RefreshClaims = self.verifier.decode_signed(refresh)?;
        if access_claims.sub != refresh_claims.sub {
            return Err(AppError::Validation(
                "tokens belong to different subjects".into(),
            ));
        }

        let mut entries = Vec::with_capacity(2);
        for (token, exp) in [(access, access_claims.exp), (refresh, refresh_claims.exp)] {
            // an already-expired token can never verify again
            if let Some(ttl) = remaining_life(exp, now) {
                entries.push((token, ttl));
            }
        }
        self.revocations.revoke_all(&entries).await?;

        tracing::info!(user_id = %access_claims.sub, revoked = entries.len(), "logged out");
        Ok(())
    }

    async fn hash_password(&self, password: &str) -> Result<String, AppError> {
        let hasher = self.hasher.clone();
        let password = password.to_string();
        let hash = tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| anyhow::anyhow!("hashing task failed: {}", e))??;
        Ok(hash)
    }

    async fn verify_password(&self, password: &str, hash: &str) -> Result<bool, AppError> {
        let hasher = self.hasher.clone();
        let (password, hash) = (password.to_string(), hash.to_string());
        let matches = tokio::task::spawn_blocking(move || hasher.verify(&password, &hash))
            .await
            .map_err(|e| anyhow::anyhow!("verify task failed: {}", e))?;
        Ok(matches)
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn remaining_life(exp: i64, now: DateTime<Utc>) -> Option<std::time::Duration> {
    let secs = exp - now.timestamp();
    (secs > 0).then(|| std::time::Duration::from_secs(secs as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::password::Argon2Hashing;
    use crate::store::memory::{MemoryKv, MemoryRecordStore};
    use chrono::Duration;

    fn service() -> AuthService {
        let revocations = RevocationStore::new(Arc::new(MemoryKv::new()));
        AuthService::new(
            Arc::new(MemoryRecordStore::new()),
            Arc::new(Argon2Hashing::with_cost(64, 1).unwrap()),
            Arc::new(TokenIssuer::new("a-secret", "r-secret")),
            Arc::new(TokenVerifier::new("a-secret", "r-secret", revocations.clone())),
            revocations,
        )
    }

    #[test]
    fn test_remaining_life() {
        let now = Utc::now();
        let exp = (now + Duration::seconds(900)).timestamp();
        assert_eq!(remaining_life(exp, now), Some(std::time::Duration::from_secs(900)));
        assert_eq!(remaining_life(now.timestamp(), now), None);
    }

    #[tokio::test]
    async fn test_signup_rejects_duplicate_email_case_insensitively() {
        let svc = service();
        svc.signup("a@x.com", "p").await.unwrap();
        let err = svc.signup(" A@X.com ", "p").await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_concurrent_signups_for_one_email_yield_one_account() {
        let svc = service();
        let (a, b) = tokio::join!(svc.signup("race@x.com", "p"), svc.signup("race@x.com", "p"));

        let (ok, err) = match (a, b) {
            (Ok(user), Err(e)) | (Err(e), Ok(user)) => (user, e),
            (a, b) => panic!("expected one success, got {:?} and {:?}", a.is_ok(), b.is_ok()),
        };
        assert_eq!(ok.email, "race@x.com");
        assert!(matches!(err, AppError::Validation(ref m) if m == "email already exists"));
    }

    #[tokio::test]
    async fn test_signup_requires_email_and_password() {
        let svc = service();
        assert!(matches!(svc.signup("", "p").await, Err(AppError::Validation(_))));
        assert!(matches!(svc.signup("a@x.com", "").await, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_login_wrong_password_and_unknown_email_look_the_same() {
        let svc = service();
        svc.signup("a@x.com", "p").await.unwrap();
        assert!(matches!(
            svc.login("a@x.com", "wrong").await,
            Err(AppError::InvalidCredentials)
        ));
        assert!(matches!(
            svc.login("nobody@x.com", "p").await,
            Err(AppError::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn test_refresh_reflects_current_role() {
        let svc = service();
        let user = svc.register("boss@x.com", "p", Role::Admin, Some(Plan::Premium)).await.unwrap();
        let pair = svc.login("boss@x.com", "p").await.unwrap();

        let access = svc.refresh(Some(&pair.refresh_token)).await.unwrap();
        let claims: AccessClaims = svc.verifier.verify(&access).await.unwrap();
        assert_eq!(claims.sub, user.id);
        assert_eq!(claims.role, Role::Admin);
        assert_eq!(claims.plan, Plan::Premium);
    }

    #[tokio::test]
    async fn test_refresh_without_token_is_credential_error() {
        assert!(matches!(
            service().refresh(None).await,
            Err(AppError::MissingCredentials)
        ));
    }

    #[tokio::test]
    async fn test_logout_requires_both_tokens() {
        let svc = service();
        svc.signup("a@x.com", "p").await.unwrap();
        let pair = svc.login("a@x.com", "p").await.unwrap();

        let err = svc.logout(Some(&pair.access_token), None).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        // nothing was revoked by the failed call
        assert!(!svc.revocations.is_revoked(&pair.access_token).await.unwrap());
    }

    #[tokio::test]
    async fn test_logout_revokes_both_tokens() {
        let svc = service();
        svc.signup("a@x.com", "p").await.unwrap();
        let pair = svc.login("a@x.com", "p").await.unwrap();

        svc.logout(Some(&pair.access_token), Some(&pair.refresh_token))
            .await
            .unwrap();
        assert!(svc.verifier.verify::<AccessClaims>(&pair.access_token).await.is_err());
        assert!(matches!(
            svc.refresh(Some(&pair.refresh_token)).await,
            Err(AppError::InvalidToken)
        ));
    }

    #[tokio::test]
    async fn test_logout_refuses_mixed_subjects() {
        let svc = service();
        svc.signup("a@x.com", "p").await.unwrap();
        svc.signup("b@x.com", "p").await.unwrap();
        let a = svc.login("a@x.com", "p").await.unwrap();
        let b = svc.login("b@x.com", "p").await.unwrap();

        let err = svc
            .logout(Some(&a.access_token), Some(&b.refresh_token))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
}
