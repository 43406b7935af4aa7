use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{AppError, DenyReason};

/// Roles supported by the RBAC system.
/// Matches the `role` column in the `users` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }

    /// Check if this role passes a gate that requires `required`.
    /// Admin passes every gate; other roles must match exactly.
    pub fn satisfies(&self, required: Role) -> bool {
        *self == Role::Admin || *self == required
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role gate: `Ok` if `role` satisfies `required`.
pub fn check_role(role: Role, required: Role) -> Result<(), DenyReason> {
    if role.satisfies(required) {
        Ok(())
    } else {
        Err(DenyReason::RoleMismatch)
    }
}

/// Ownership gate for resource-scoped mutations.
/// Admins may act on any resource; everyone else only on their own.
pub fn check_owner(role: Role, principal_id: Uuid, owner_id: Uuid) -> Result<(), DenyReason> {
    if role == Role::Admin || principal_id == owner_id {
        Ok(())
    } else {
        Err(DenyReason::NotOwner)
    }
}

/// Helper to check a role gate in handlers/services and return 403 on failure.
pub fn enforce_role(principal_id: Uuid, role: Role, required: Role) -> Result<(), AppError> {
    check_role(role, required).map_err(|reason| {
        tracing::warn!(
            principal = %principal_id,
            role = %role,
            required = %required,
            reason = reason.code(),
            "RBAC access denied"
        );
        AppError::Forbidden(reason)
    })
}

/// Helper to check resource ownership and return 403 on failure.
pub fn enforce_owner(principal_id: Uuid, role: Role, owner_id: Uuid) -> Result<(), AppError> {
    check_owner(role, principal_id, owner_id).map_err(|reason| {
        tracing::warn!(
            principal = %principal_id,
            role = %role,
            owner = %owner_id,
            reason = reason.code(),
            "RBAC access denied"
        );
        AppError::Forbidden(reason)
    })
}

// ── Tests ───────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_from_str() {
        assert_eq!("admin".parse::<Role>(), Ok(Role::Admin));
        assert_eq!("Admin".parse::<Role>(), Ok(Role::Admin));
        assert_eq!(" user ".parse::<Role>(), Ok(Role::User));
        assert!("editor".parse::<Role>().is_err());
    }

    #[test]
    fn test_role_serde_is_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Admin).unwrap(), "\"admin\"");
        let role: Role = serde_json::from_str("\"user\"").unwrap();
        assert_eq!(role, Role::User);
    }

    #[test]
    fn test_admin_passes_every_role_gate() {
        assert!(check_role(Role::Admin, Role::Admin).is_ok());
        assert!(check_role(Role::Admin, Role::User).is_ok());
    }

    #[test]
    fn test_user_fails_admin_gate() {
        assert!(check_role(Role::User, Role::User).is_ok());
        assert_eq!(
            check_role(Role::User, Role::Admin),
            Err(DenyReason::RoleMismatch)
        );
    }

    #[test]
    fn test_owner_may_mutate_own_resource() {
        let me = Uuid::new_v4();
        assert!(check_owner(Role::User, me, me).is_ok());
    }

    #[test]
    fn test_non_owner_is_denied() {
        let me = Uuid::new_v4();
        let someone_else = Uuid::new_v4();
        assert_eq!(
            check_owner(Role::User, me, someone_else),
            Err(DenyReason::NotOwner)
        );
    }

    #[test]
    fn test_admin_may_mutate_any_resource() {
        assert!(check_owner(Role::Admin, Uuid::new_v4(), Uuid::new_v4()).is_ok());
    }

    #[test]
    fn test_enforce_owner_returns_forbidden_with_reason() {
        let err = enforce_owner(Uuid::new_v4(), Role::User, Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, AppError::Forbidden(DenyReason::NotOwner)));
    }
}
