//! Bearer-token authentication and the per-route authorization gate.
//!
//! `require_auth` runs on every protected route: it verifies the access
//! token (signature, expiry, revocation) and injects an [`AuthContext`]
//! into request extensions. `require_admin` layers a role check on top.
//! Ownership checks need the resource, so the event service applies
//! [`rbac::enforce_owner`] once it has loaded it.

use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use crate::auth::tokens::{AccessClaims, TokenVerifier};
use crate::errors::AppError;
use crate::middleware::rbac::{self, Role};
use crate::models::user::Plan;

/// The authenticated caller, as carried by its access token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthContext {
    pub user_id: Uuid,
    pub role: Role,
    pub plan: Plan,
}

impl From<AccessClaims> for AuthContext {
    fn from(claims: AccessClaims) -> Self {
        Self {
            user_id: claims.sub,
            role: claims.role,
            plan: claims.plan,
        }
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        // present only behind `require_auth`
        parts
            .extensions
            .get::<AuthContext>()
            .copied()
            .ok_or(AppError::MissingCredentials)
    }
}

#[derive(Clone)]
pub struct AuthorizationGate {
    verifier: Arc<TokenVerifier>,
}

impl AuthorizationGate {
    pub fn new(verifier: Arc<TokenVerifier>) -> Self {
        Self { verifier }
    }

    /// Resolve an `Authorization` header value to a caller.
    /// Accepts `Bearer <token>` or a bare token.
    pub async fn authenticate(&self, header: Option<&str>) -> Result<AuthContext, AppError> {
        let token = header
            .map(strip_bearer)
            .filter(|t| !t.is_empty())
            .ok_or(AppError::MissingCredentials)?;
        let claims: AccessClaims = self.verifier.verify(token).await?;
        Ok(claims.into())
    }

    pub fn require_role(&self, ctx: &AuthContext, required: Role) -> Result<(), AppError> {
        rbac::enforce_role(ctx.user_id, ctx.role, required)
    }

}

/// The token part of an `Authorization` value. A scheme with no token
/// yields an empty string.
fn strip_bearer(value: &str) -> &str {
    let value = value.trim();
    if value.eq_ignore_ascii_case("bearer") {
        return "";
    }
    match value.split_once(char::is_whitespace) {
        Some((scheme, rest)) if scheme.eq_ignore_ascii_case("bearer") => rest.trim(),
        _ => value,
    }
}

/// The raw token from an `Authorization` header, if any.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(strip_bearer)
        .filter(|t| !t.is_empty())
}

/// Middleware: authenticate the caller and stash its [`AuthContext`].
pub async fn require_auth(
    State(gate): State<AuthorizationGate>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let header = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    let ctx = gate.authenticate(header).await.map_err(|e| {
        tracing::debug!(path = %req.uri().path(), error = %e, "authentication failed");
        e
    })?;
    req.extensions_mut().insert(ctx);
    Ok(next.run(req).await)
}

/// Middleware: admit only admins. Must sit inside `require_auth`.
pub async fn require_admin(
    State(gate): State<AuthorizationGate>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let ctx = req
        .extensions()
        .get::<AuthContext>()
        .copied()
        .ok_or(AppError::MissingCredentials)?;
    gate.require_role(&ctx, Role::Admin)?;
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::revocation::RevocationStore;
    use crate::auth::tokens::TokenIssuer;
    use crate::errors::DenyReason;
    use crate::models::user::Principal;
    use crate::store::memory::MemoryKv;

    fn setup() -> (AuthorizationGate, TokenIssuer, RevocationStore) {
        let revocations = RevocationStore::new(Arc::new(MemoryKv::new()));
        let verifier = TokenVerifier::new("acc", "ref", revocations.clone());
        (
            AuthorizationGate::new(Arc::new(verifier)),
            TokenIssuer::new("acc", "ref"),
            revocations,
        )
    }

    fn principal(role: Role) -> Principal {
        Principal {
            id: Uuid::new_v4(),
            role,
            plan: Some(Plan::Free),
        }
    }

    #[test]
    fn test_strip_bearer() {
        assert_eq!(strip_bearer("Bearer abc"), "abc");
        assert_eq!(strip_bearer("bearer  abc "), "abc");
        assert_eq!(strip_bearer("abc"), "abc");
        assert_eq!(strip_bearer("Bearer"), "");
        assert_eq!(strip_bearer("BEARER   "), "");
        assert_eq!(strip_bearer("Bearer\tabc"), "abc");
    }

    #[test]
    fn test_bearer_token_from_headers() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);
        headers.insert(AUTHORIZATION, "Bearer".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);
        headers.insert(AUTHORIZATION, "Bearer xyz".parse().unwrap());
        assert_eq!(bearer_token(&headers), Some("xyz"));
    }

    #[tokio::test]
    async fn test_missing_header_is_missing_credentials() {
        let (gate, _, _) = setup();
        assert!(matches!(gate.authenticate(None).await, Err(AppError::MissingCredentials)));
        assert!(matches!(
            gate.authenticate(Some("Bearer ")).await,
            Err(AppError::MissingCredentials)
        ));
        // header parsers drop the trailing space
        assert!(matches!(
            gate.authenticate(Some("bearer")).await,
            Err(AppError::MissingCredentials)
        ));
    }

    #[tokio::test]
    async fn test_valid_token_yields_context() {
        let (gate, issuer, _) = setup();
        let p = principal(Role::User);
        let token = issuer.issue_access(&p).unwrap();

        let ctx = gate.authenticate(Some(&format!("Bearer {}", token))).await.unwrap();
        assert_eq!(ctx.user_id, p.id);
        assert_eq!(ctx.role, Role::User);
        // bare tokens are accepted too
        assert!(gate.authenticate(Some(&token)).await.is_ok());
    }

    #[tokio::test]
    async fn test_refresh_token_is_not_an_access_token() {
        let (gate, issuer, _) = setup();
        let token = issuer.issue_refresh(&principal(Role::User)).unwrap();
        assert!(matches!(
            gate.authenticate(Some(&token)).await,
            Err(AppError::InvalidToken)
        ));
    }

    #[tokio::test]
    async fn test_revoked_token_is_rejected() {
        let (gate, issuer, revocations) = setup();
        let token = issuer.issue_access(&principal(Role::Admin)).unwrap();
        revocations
            .revoke(&token, std::time::Duration::from_secs(900))
            .await
            .unwrap();
        assert!(matches!(
            gate.authenticate(Some(&token)).await,
            Err(AppError::InvalidToken)
        ));
    }

    #[test]
    fn test_role_gate() {
        let (gate, _, _) = setup();
        let user = AuthContext {
            user_id: Uuid::new_v4(),
            role: Role::User,
            plan: Plan::Free,
        };
        let admin = AuthContext {
            role: Role::Admin,
            ..user
        };

        assert!(matches!(
            gate.require_role(&user, Role::Admin),
            Err(AppError::Forbidden(DenyReason::RoleMismatch))
        ));
        assert!(gate.require_role(&admin, Role::Admin).is_ok());
        assert!(gate.require_role(&admin, Role::User).is_ok());
    }
}
