//! Authentication and authorization for the admin surface
//!
//! Callers present a static API key from configuration; the key maps to a
//! role, and lifecycle operations are gated on `AuthContext::can_admin`.

use crate::common::config::ApiKeyConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Role defining access levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Role {
    /// System administrator: may activate and deactivate nodes
    Admin,
    /// May inspect cluster state and request index copies
    Operator,
    /// Read-only access to cluster state (default)
    #[default]
    ReadOnly,
}

impl Role {
    /// Check if this role can perform admin operations
    pub fn can_admin(&self) -> bool {
        matches!(self, Role::Admin)
    }

    /// Check if this role can trigger index operations
    pub fn can_operate(&self) -> bool {
        matches!(self, Role::Admin | Role::Operator)
    }
}

/// Authentication context extracted from a valid request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    /// Key name, or "system" for in-process callers
    pub principal: String,
    pub role: Role,
}

impl AuthContext {
    pub fn new(principal: impl Into<String>, role: Role) -> Self {
        Self {
            principal: principal.into(),
            role,
        }
    }

    /// In-process administrative caller (scheduled tasks, startup hooks)
    pub fn system() -> Self {
        Self::new("system", Role::Admin)
    }

    /// Is the caller a system administrator?
    pub fn can_admin(&self) -> bool {
        self.role.can_admin()
    }

    pub fn can_operate(&self) -> bool {
        self.role.can_operate()
    }
}

/// Result of authentication attempt
#[derive(Debug, PartialEq, Eq)]
pub enum AuthResult {
    /// Authentication successful
    Ok(AuthContext),
    /// No authentication provided
    Missing,
    /// Unknown key
    Invalid,
}

/// API key store built from configuration
#[derive(Debug, Default)]
pub struct KeyStore {
    /// key -> context
    keys: HashMap<String, AuthContext>,
}

impl KeyStore {
    pub fn new(keys: &[ApiKeyConfig]) -> Self {
        Self {
            keys: keys
                .iter()
                .map(|k| (k.key.clone(), AuthContext::new(k.name.clone(), k.role)))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Authenticate a raw `Authorization` header value
    pub fn authenticate(&self, header: Option<&str>) -> AuthResult {
        let Some(header) = header else {
            return AuthResult::Missing;
        };
        let token = header
            .strip_prefix("Bearer ")
            .unwrap_or(header)
            .trim();
        if token.is_empty() {
            return AuthResult::Missing;
        }
        match self.keys.get(token) {
            Some(ctx) => AuthResult::Ok(ctx.clone()),
            None => AuthResult::Invalid,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> KeyStore {
        KeyStore::new(&[
            ApiKeyConfig {
                name: "ops".into(),
                key: "admin-key".into(),
                role: Role::Admin,
            },
            ApiKeyConfig {
                name: "viewer".into(),
                key: "view-key".into(),
                role: Role::ReadOnly,
            },
        ])
    }

    #[test]
    fn test_role_permissions() {
        assert!(Role::Admin.can_admin());
        assert!(Role::Admin.can_operate());
        assert!(!Role::Operator.can_admin());
        assert!(Role::Operator.can_operate());
        assert!(!Role::ReadOnly.can_operate());
    }

    #[test]
    fn test_authenticate() {
        let store = store();
        match store.authenticate(Some("Bearer admin-key")) {
            AuthResult::Ok(ctx) => {
                assert_eq!(ctx.principal, "ops");
                assert!(ctx.can_admin());
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(store.authenticate(None), AuthResult::Missing);
        assert_eq!(store.authenticate(Some("Bearer ")), AuthResult::Missing);
        assert_eq!(store.authenticate(Some("Bearer nope")), AuthResult::Invalid);
    }

    #[test]
    fn test_system_context_is_admin() {
        assert!(AuthContext::system().can_admin());
    }
}
