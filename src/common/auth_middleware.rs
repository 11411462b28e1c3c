//! Authentication middleware for the admin API
//!
//! Resolves the `Authorization: Bearer <key>` header against the configured
//! key store and hands the resulting `AuthContext` to handlers. Role checks
//! happen in the handlers (or the services they call).

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;

use crate::common::auth::{AuthContext, AuthResult, KeyStore};

/// Paths served without credentials
pub const PUBLIC_PATHS: &[&str] = &["/health", "/metrics"];

/// Extension type for passing auth context to handlers.
/// `None` on public paths.
#[derive(Clone, Debug)]
pub struct AuthExtension(pub Option<AuthContext>);

/// State for auth middleware
#[derive(Clone)]
pub struct AuthState {
    pub key_store: Arc<KeyStore>,
}

impl AuthState {
    pub fn new(key_store: Arc<KeyStore>) -> Self {
        Self { key_store }
    }

    /// No keys configured: every caller is treated as the system principal
    pub fn is_open(&self) -> bool {
        self.key_store.is_empty()
    }
}

/// Authentication middleware
pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path();
    if PUBLIC_PATHS.iter().any(|p| path == *p) {
        request.extensions_mut().insert(AuthExtension(None));
        return next.run(request).await;
    }

    if state.is_open() {
        request
            .extensions_mut()
            .insert(AuthExtension(Some(AuthContext::system())));
        return next.run(request).await;
    }

    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    match state.key_store.authenticate(header) {
        AuthResult::Ok(ctx) => {
            request.extensions_mut().insert(AuthExtension(Some(ctx)));
            next.run(request).await
        }
        AuthResult::Missing => (
            StatusCode::UNAUTHORIZED,
            Json(json!({
                "error": "Authentication required",
                "hint": "Provide Authorization header with 'Bearer <key>'"
            })),
        )
            .into_response(),
        AuthResult::Invalid => (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "Invalid credentials" })),
        )
            .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::auth::Role;
    use crate::common::config::ApiKeyConfig;

    #[test]
    fn test_open_without_keys() {
        let state = AuthState::new(Arc::new(KeyStore::default()));
        assert!(state.is_open());

        let state = AuthState::new(Arc::new(KeyStore::new(&[ApiKeyConfig {
            name: "ops".into(),
            key: "k".into(),
            role: Role::Admin,
        }])));
        assert!(!state.is_open());
    }

    #[test]
    fn test_public_paths() {
        assert!(PUBLIC_PATHS.contains(&"/health"));
        assert!(PUBLIC_PATHS.contains(&"/metrics"));
    }
}
