//! Access/refresh token minting and verification (HS256 JWTs).
//!
//! Access tokens live 15 minutes and carry `sub`, `role` and `plan`.
//! Refresh tokens live 7 days, carry `sub` only, and are signed with a
//! separate secret. Every token has a random `jti` so two tokens minted in
//! the same second never share a revocation entry.
//!
//! Expiry is checked against a caller-supplied `now` (the `*_at` methods)
//! rather than jsonwebtoken's wall clock, which keeps validity windows
//! testable.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::revocation::RevocationStore;
use crate::errors::AppError;
use crate::middleware::rbac::Role;
use crate::models::user::{Plan, Principal};

pub const ACCESS_TOKEN_TTL_SECS: i64 = 15 * 60;
pub const REFRESH_TOKEN_TTL_SECS: i64 = 7 * 24 * 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// Claims types the verifier knows how to check.
pub trait TokenClaims: DeserializeOwned {
    const KIND: TokenKind;

    fn kind(&self) -> TokenKind;

    /// Unix timestamp after which the token is no longer valid.
    fn expires_at(&self) -> i64;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: Uuid,
    pub role: Role,
    pub plan: Plan,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
    pub typ: TokenKind,
}

impl TokenClaims for AccessClaims {
    const KIND: TokenKind = TokenKind::Access;

    fn kind(&self) -> TokenKind {
        self.typ
    }

    fn expires_at(&self) -> i64 {
        self.exp
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshClaims {
    pub sub: Uuid,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
    pub typ: TokenKind,
}

impl TokenClaims for RefreshClaims {
    const KIND: TokenKind = TokenKind::Refresh;

    fn kind(&self) -> TokenKind {
        self.typ
    }

    fn expires_at(&self) -> i64 {
        self.exp
    }
}

/// Mints signed tokens.
pub struct TokenIssuer {
    access_key: EncodingKey,
    refresh_key: EncodingKey,
}

impl TokenIssuer {
    pub fn new(access_secret: &str, refresh_secret: &str) -> Self {
        Self {
            access_key: EncodingKey::from_secret(access_secret.as_bytes()),
            refresh_key: EncodingKey::from_secret(refresh_secret.as_bytes()),
        }
    }

    pub fn issue_access(&self, principal: &Principal) -> Result<String, AppError> {
        self.issue_access_at(principal, Utc::now())
    }

    /// Fails with `Signing` if the principal has no plan attribute.
    pub fn issue_access_at(
        &self,
        principal: &Principal,
        now: DateTime<Utc>,
    ) -> Result<String, AppError> {
        let plan = principal.plan.ok_or_else(|| {
            AppError::Signing(format!("principal {} has no plan attribute", principal.id))
        })?;
        let claims = AccessClaims {
            sub: principal.id,
            role: principal.role,
            plan,
            iat: now.timestamp(),
            exp: (now + Duration::seconds(ACCESS_TOKEN_TTL_SECS)).timestamp(),
            jti: Uuid::new_v4().simple().to_string(),
            typ: TokenKind::Access,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.access_key)
            .map_err(|e| AppError::Signing(e.to_string()))
    }

    pub fn issue_refresh(&self, principal: &Principal) -> Result<String, AppError> {
        self.issue_refresh_at(principal, Utc::now())
    }

    pub fn issue_refresh_at(
        &self,
        principal: &Principal,
        now: DateTime<Utc>,
    ) -> Result<String, AppError> {
        let claims = RefreshClaims {
            sub: principal.id,
            iat: now.timestamp(),
            exp: (now + Duration::seconds(REFRESH_TOKEN_TTL_SECS)).timestamp(),
            jti: Uuid::new_v4().simple().to_string(),
            typ: TokenKind::Refresh,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.refresh_key)
            .map_err(|e| AppError::Signing(e.to_string()))
    }
}

/// Validates signature, kind and expiry, then consults the revocation list.
pub struct TokenVerifier {
    access_key: DecodingKey,
    refresh_key: DecodingKey,
    validation: Validation,
    revocations: RevocationStore,
}

impl TokenVerifier {
    pub fn new(access_secret: &str, refresh_secret: &str, revocations: RevocationStore) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // expiry is compared against the caller's clock in `check_expiry`
        validation.validate_exp = false;
        validation.leeway = 0;
        Self {
            access_key: DecodingKey::from_secret(access_secret.as_bytes()),
            refresh_key: DecodingKey::from_secret(refresh_secret.as_bytes()),
            validation,
            revocations,
        }
    }

    pub async fn verify<C: TokenClaims>(&self, token: &str) -> Result<C, AppError> {
        self.verify_at(token, Utc::now()).await
    }

    /// Full verification. The local signature/expiry check runs first so
    /// garbage input never costs a revocation lookup.
    pub async fn verify_at<C: TokenClaims>(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<C, AppError> {
        let claims = self.decode_at::<C>(token, now)?;

        let revoked = self.revocations.is_revoked(token).await.map_err(|e| {
            // fail closed: an unreachable blacklist must not admit revoked tokens
            tracing::error!(error = %e, "revocation lookup failed");
            AppError::Store(e)
        })?;
        if revoked {
            tracing::debug!(kind = ?C::KIND, "rejected revoked token");
            return Err(AppError::InvalidToken);
        }
        Ok(claims)
    }

    /// Signature, kind and expiry only. No I/O.
    pub fn decode_at<C: TokenClaims>(&self, token: &str, now: DateTime<Utc>) -> Result<C, AppError> {
        let claims = self.decode_signed::<C>(token)?;
        if now.timestamp() >= claims.expires_at() {
            return Err(AppError::InvalidToken);
        }
        Ok(claims)
    }

    /// Signature and kind only; expired tokens are accepted. Used by logout
    /// to size revocation entries.
    pub fn decode_signed<C: TokenClaims>(&self, token: &str) -> Result<C, AppError> {
        let key = match C::KIND {
            TokenKind::Access => &self.access_key,
            TokenKind::Refresh => &self.refresh_key,
        };
        let data = decode::<C>(token, key, &self.validation).map_err(|e| {
            tracing::debug!(kind = ?C::KIND, error = %e, "token failed signature check");
            AppError::InvalidToken
        })?;
        if data.claims.kind() != C::KIND {
            return Err(AppError::InvalidToken);
        }
        Ok(data.claims)
    }
}
