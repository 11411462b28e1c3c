//! HTTP admin API for a cluster node
//!
//! Public:
//! - `GET /health`, `GET /metrics`
//!
//! Authenticated:
//! - `GET /cluster/node`, `GET /cluster/nodes`
//! - `POST /cluster/heartbeat/:node_id` (operator)
//! - `POST /admin/node/activate`, `POST /admin/node/deactivate` (admin)
//! - `POST /admin/index/request/:node_id` (operator)
//! - `POST /admin/messages/purge` (admin)
//! - `GET /admin/audit` (admin)

use axum::{
    extract::{Path, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    Extension, Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::cluster::heartbeat::HeartbeatService;
use crate::cluster::manager::ClusterManager;
use crate::cluster::node::validate_node_id;
use crate::cluster::service::{NodeStateService, ServiceOutcome};
use crate::cluster::store::ClusterMessageStore;
use crate::common::audit::{AuditEventType, AuditLogger};
use crate::common::auth::{AuthContext, KeyStore};
use crate::common::auth_middleware::{auth_middleware, AuthExtension, AuthState};
use crate::common::metrics::ClusterMetrics;
use crate::common::tracing_middleware::request_tracing_middleware;
use crate::common::Error;

/// Admin requests carry no payload worth more than this
const MAX_BODY_BYTES: usize = 16 * 1024;

#[derive(Clone)]
pub struct AdminState {
    pub cluster: Arc<ClusterManager>,
    pub node_service: Arc<NodeStateService>,
    pub heartbeat: Arc<dyn HeartbeatService>,
    pub messages: Arc<dyn ClusterMessageStore>,
    pub metrics: Arc<ClusterMetrics>,
    pub audit: Arc<AuditLogger>,
}

pub fn create_router(state: AdminState, keys: Arc<KeyStore>) -> Router {
    let metrics = state.metrics.clone();
    Router::new()
        .route("/health", axum::routing::get(health))
        .route("/metrics", axum::routing::get(metrics_text))
        // Cluster view
        .route("/cluster/node", axum::routing::get(cluster_node))
        .route("/cluster/nodes", axum::routing::get(cluster_nodes))
        .route(
            "/cluster/heartbeat/:node_id",
            axum::routing::post(cluster_heartbeat),
        )
        // Lifecycle
        .route("/admin/node/activate", axum::routing::post(admin_activate))
        .route(
            "/admin/node/deactivate",
            axum::routing::post(admin_deactivate),
        )
        .route(
            "/admin/index/request/:node_id",
            axum::routing::post(admin_request_index),
        )
        .route(
            "/admin/messages/purge",
            axum::routing::post(admin_purge_messages),
        )
        .route("/admin/audit", axum::routing::get(admin_audit))
        .with_state(state)
        .layer(middleware::from_fn_with_state(
            AuthState::new(keys),
            auth_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            metrics,
            request_tracing_middleware,
        ))
        .layer(
            ServiceBuilder::new()
                .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
                .layer(TraceLayer::new_for_http()),
        )
}

fn error_response(e: &Error) -> Response {
    (
        e.to_http_status(),
        Json(json!({ "error": e.to_string() })),
    )
        .into_response()
}

fn unauthenticated() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "error": "Authentication required" })),
    )
        .into_response()
}

fn forbidden(required: &str, caller: &AuthContext) -> Response {
    (
        StatusCode::FORBIDDEN,
        Json(json!({
            "error": format!("{} permission required", required),
            "role": format!("{:?}", caller.role)
        })),
    )
        .into_response()
}

/// Liveness of the admin endpoint plus the locally known node state
async fn health(State(state): State<AdminState>) -> impl IntoResponse {
    let node = state.cluster.state_manager().node();
    Json(json!({
        "status": "healthy",
        "clustered": state.cluster.is_clustered(),
        "node_id": node.node_id(),
        "state": node.state(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn metrics_text(State(state): State<AdminState>) -> impl IntoResponse {
    (StatusCode::OK, state.metrics.to_prometheus())
}

/// This node as the shared table records it
async fn cluster_node(State(state): State<AdminState>) -> Response {
    let result = tokio::task::spawn_blocking(move || {
        let node = state.cluster.state_manager().persisted_node()?;
        let index = state.cluster.check_index()?;
        Ok::<_, Error>(json!({
            "clustered": state.cluster.is_clustered(),
            "node": node,
            "active": node.state() == crate::cluster::NodeState::Active,
            "index": index,
        }))
    })
    .await;

    match result {
        Ok(Ok(body)) => (StatusCode::OK, Json(body)).into_response(),
        Ok(Err(e)) => error_response(&e),
        Err(e) => error_response(&Error::Internal(e.to_string())),
    }
}

/// Every registered node with its liveness flag
async fn cluster_nodes(State(state): State<AdminState>) -> Response {
    let result =
        tokio::task::spawn_blocking(move || state.cluster.node_information()).await;
    match result {
        Ok(Ok(nodes)) => {
            let live = nodes.iter().filter(|n| n.live).count();
            (
                StatusCode::OK,
                Json(json!({ "nodes": nodes, "live": live })),
            )
                .into_response()
        }
        Ok(Err(e)) => error_response(&e),
        Err(e) => error_response(&Error::Internal(e.to_string())),
    }
}

/// Peers report liveness here
async fn cluster_heartbeat(
    State(state): State<AdminState>,
    Extension(AuthExtension(auth)): Extension<AuthExtension>,
    Path(node_id): Path<String>,
) -> Response {
    let Some(caller) = auth else {
        return unauthenticated();
    };
    if !caller.can_operate() {
        return forbidden("Operator", &caller);
    }
    if let Err(e) = validate_node_id(&node_id) {
        return error_response(&e);
    }
    let heartbeat = state.heartbeat.clone();
    let id = node_id.clone();
    match tokio::task::spawn_blocking(move || heartbeat.beat(&id)).await {
        Ok(Ok(())) => (StatusCode::OK, Json(json!({ "node_id": node_id }))).into_response(),
        Ok(Err(e)) => error_response(&e),
        Err(e) => error_response(&Error::Internal(e.to_string())),
    }
}

async fn admin_activate(
    State(state): State<AdminState>,
    Extension(AuthExtension(auth)): Extension<AuthExtension>,
) -> Response {
    let Some(caller) = auth else {
        return unauthenticated();
    };
    let service = state.node_service.clone();
    outcome_response(tokio::task::spawn_blocking(move || service.activate(&caller)).await)
}

async fn admin_deactivate(
    State(state): State<AdminState>,
    Extension(AuthExtension(auth)): Extension<AuthExtension>,
) -> Response {
    let Some(caller) = auth else {
        return unauthenticated();
    };
    let service = state.node_service.clone();
    outcome_response(tokio::task::spawn_blocking(move || service.deactivate(&caller)).await)
}

fn outcome_response(result: Result<ServiceOutcome, tokio::task::JoinError>) -> Response {
    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) => return error_response(&Error::Internal(e.to_string())),
    };
    let status = match &outcome {
        ServiceOutcome::Completed { .. } => StatusCode::OK,
        ServiceOutcome::Forbidden { .. } => StatusCode::FORBIDDEN,
        ServiceOutcome::Failed { .. } => StatusCode::CONFLICT,
    };
    (status, Json(outcome)).into_response()
}

/// Ask another live node to produce a current index snapshot
async fn admin_request_index(
    State(state): State<AdminState>,
    Extension(AuthExtension(auth)): Extension<AuthExtension>,
    Path(node_id): Path<String>,
) -> Response {
    let Some(caller) = auth else {
        return unauthenticated();
    };
    if !caller.can_operate() {
        state.audit.log_event(
            AuditEventType::AccessDenied,
            &caller.principal,
            Some(node_id),
            "index request refused",
        );
        return forbidden("Operator", &caller);
    }

    let cluster = state.cluster.clone();
    let target = node_id.clone();
    let result = tokio::task::spawn_blocking(move || {
        if !cluster.is_clustered() {
            return Err(Error::NotClustered);
        }
        let live = cluster
            .other_live_nodes()?
            .iter()
            .any(|n| n.node_id() == Some(target.as_str()));
        if !live {
            return Ok(None);
        }
        cluster.request_current_index_from_node(&target).map(Some)
    })
    .await;

    match result {
        Ok(Ok(Some(sent))) => {
            state.audit.log_event(
                AuditEventType::IndexRequested,
                &caller.principal,
                Some(node_id.clone()),
                format!("message {}", sent.id),
            );
            (
                StatusCode::ACCEPTED,
                Json(json!({ "id": sent.id, "node_id": node_id })),
            )
                .into_response()
        }
        Ok(Ok(None)) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("{} is not a live cluster node", node_id) })),
        )
            .into_response(),
        Ok(Err(e)) => error_response(&e),
        Err(e) => error_response(&Error::Internal(e.to_string())),
    }
}

async fn admin_audit(
    State(state): State<AdminState>,
    Extension(AuthExtension(auth)): Extension<AuthExtension>,
) -> Response {
    let Some(caller) = auth else {
        return unauthenticated();
    };
    if !caller.can_admin() {
        return forbidden("Admin", &caller);
    }
    (
        StatusCode::OK,
        Json(json!({ "entries": state.audit.recent() })),
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
struct PurgeRequest {
    /// Unix millis; rows written earlier are dropped
    before: u64,
}

async fn admin_purge_messages(
    State(state): State<AdminState>,
    Extension(AuthExtension(auth)): Extension<AuthExtension>,
    Json(req): Json<PurgeRequest>,
) -> Response {
    let Some(caller) = auth else {
        return unauthenticated();
    };
    if !caller.can_admin() {
        return forbidden("Admin", &caller);
    }
    let messages = state.messages.clone();
    let before = req.before;
    match tokio::task::spawn_blocking(move || messages.purge_before(before)).await {
        Ok(Ok(purged)) => {
            state.audit.log_event(
                AuditEventType::System,
                &caller.principal,
                None,
                format!("purged {} cluster messages before {}", purged, before),
            );
            (StatusCode::OK, Json(json!({ "purged": purged }))).into_response()
        }
        Ok(Err(e)) => error_response(&e),
        Err(e) => error_response(&Error::Internal(e.to_string())),
    }
}
