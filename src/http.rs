//! HTTP API for Moderation and Metrics
//!
//! REST endpoints for moderator actions, plus monitoring. Every request is
//! checked against the ban store, and moderation endpoints require a
//! moderator identity header so actions can be audited.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use crate::metrics::LobbyMetrics;
use crate::moderation::{format_ban_duration, Moderation};
use crate::storage::ModerationStore;

/// Header naming the moderator performing an action.
pub const MODERATOR_HEADER: &str = "x-moderator-name";

/// Shared state for HTTP handlers.
#[derive(Clone)]
pub struct HttpState {
    pub metrics: LobbyMetrics,
    pub metrics_token: Option<String>,
    pub moderation: Arc<Moderation>,
    pub store: Arc<dyn ModerationStore>,
}

/// Middleware guarding every endpoint: a banned caller address is turned
/// away, moderation calls need an identity header, and metrics can require a
/// bearer token.
async fn lobby_auth_middleware(
    State(state): State<HttpState>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    if let Some(ConnectInfo(addr)) = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .cloned()
    {
        if let Some(ban) = state.store.ban_for(addr.ip()) {
            return (
                StatusCode::UNAUTHORIZED,
                format!(
                    "You have been banned, {} remaining",
                    format_ban_duration(ban.remaining_minutes())
                ),
            )
                .into_response();
        }
    }

    if request.uri().path().starts_with("/moderation/") {
        let has_identity = request
            .headers()
            .get(MODERATOR_HEADER)
            .and_then(|h| h.to_str().ok())
            .is_some_and(|name| !name.is_empty());
        if !has_identity {
            return (StatusCode::UNAUTHORIZED, "moderator identity required").into_response();
        }
    }

    if request.uri().path() == "/metrics" {
        if let Some(ref expected_token) = state.metrics_token {
            let auth_header = request.headers().get(header::AUTHORIZATION);
            let is_authorized = auth_header.is_some_and(|h| {
                h.to_str()
                    .map(|s| {
                        s.strip_prefix("Bearer ")
                            .is_some_and(|token| token == expected_token)
                    })
                    .unwrap_or(false)
            });

            if !is_authorized {
                return (
                    StatusCode::UNAUTHORIZED,
                    [(header::WWW_AUTHENTICATE, "Bearer")],
                    "Unauthorized",
                )
                    .into_response();
            }
        }
    }

    next.run(request).await
}

/// Creates the HTTP router.
pub fn create_router(state: HttpState) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/metrics", get(metrics_handler))
        .route("/moderation/ban", post(ban_handler))
        .route("/moderation/disconnect", post(disconnect_handler))
        .route("/moderation/shutdown", post(shutdown_handler))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            lobby_auth_middleware,
        ))
        .with_state(state)
}

/// Root handler - returns basic info.
async fn root_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "service": "lobby-relay",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": [
            "/metrics",
            "/moderation/ban",
            "/moderation/disconnect",
            "/moderation/shutdown"
        ]
    }))
}

async fn metrics_handler(State(state): State<HttpState>) -> impl IntoResponse {
    let metrics_text = state.metrics.encode();

    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        metrics_text,
    )
}

fn moderator_name(headers: &HeaderMap) -> String {
    headers
        .get(MODERATOR_HEADER)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("unknown")
        .to_string()
}

#[derive(Deserialize)]
struct BanRequest {
    ip: IpAddr,
    username: String,
    #[serde(default)]
    hashed_mac: String,
    duration_minutes: u64,
}

async fn ban_handler(
    State(state): State<HttpState>,
    headers: HeaderMap,
    Json(req): Json<BanRequest>,
) -> Response {
    let moderator = moderator_name(&headers);
    match state.moderation.ban_by_ip(
        req.ip,
        &req.username,
        &req.hashed_mac,
        req.duration_minutes,
        &moderator,
    ) {
        Ok(()) => Json(serde_json::json!({ "status": "banned" })).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e).into_response(),
    }
}

#[derive(Deserialize)]
struct DisconnectRequest {
    username: String,
}

async fn disconnect_handler(
    State(state): State<HttpState>,
    headers: HeaderMap,
    Json(req): Json<DisconnectRequest>,
) -> Response {
    let moderator = moderator_name(&headers);
    if state
        .moderation
        .disconnect_by_moderator(&moderator, &req.username)
    {
        Json(serde_json::json!({ "status": "disconnected" })).into_response()
    } else {
        (StatusCode::NOT_FOUND, "identity not connected").into_response()
    }
}

#[derive(Deserialize)]
struct ShutdownRequest {
    ip: IpAddr,
}

async fn shutdown_handler(
    State(state): State<HttpState>,
    headers: HeaderMap,
    Json(req): Json<ShutdownRequest>,
) -> Response {
    let moderator = moderator_name(&headers);
    let reached = state.moderation.shutdown_by_ip(req.ip, &moderator);
    Json(serde_json::json!({ "status": "ok", "connections": reached })).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::Broadcaster;
    use crate::chatters::Chatters;
    use crate::storage::{BanRecord, MemoryModerationStore};
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn create_test_state() -> HttpState {
        let metrics = LobbyMetrics::new();
        let broadcaster = Arc::new(Broadcaster::new(metrics.clone()));
        let chatters = Arc::new(Chatters::new(broadcaster.clone()));
        let store = Arc::new(MemoryModerationStore::new());
        let moderation = Arc::new(Moderation::new(
            store.clone(),
            chatters.clone(),
            broadcaster,
            metrics.clone(),
        ));
        moderation.register_registry(chatters.session_registry());
        HttpState {
            metrics,
            metrics_token: None,
            moderation,
            store,
        }
    }

    fn caller(addr: &str) -> ConnectInfo<SocketAddr> {
        ConnectInfo(addr.parse().unwrap())
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let app = create_router(create_test_state());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .extension(caller("10.0.0.1:50000"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_moderation_requires_identity_header() {
        let app = create_router(create_test_state());

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/moderation/ban")
                    .header("content-type", "application/json")
                    .extension(caller("10.0.0.1:50000"))
                    .body(Body::from(
                        r#"{"ip":"9.9.9.9","username":"Bob","duration_minutes":120}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_ban_endpoint_records_ban() {
        let state = create_test_state();
        let store = state.store.clone();
        let app = create_router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/moderation/ban")
                    .header("content-type", "application/json")
                    .header(MODERATOR_HEADER, "Admin")
                    .extension(caller("10.0.0.1:50000"))
                    .body(Body::from(
                        r#"{"ip":"9.9.9.9","username":"Bob","duration_minutes":120}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(store.is_banned("9.9.9.9".parse().unwrap()));
    }

    #[tokio::test]
    async fn test_banned_caller_is_turned_away() {
        let state = create_test_state();
        state
            .store
            .record_ban(BanRecord::new("Bob", "", "10.0.0.1".parse().unwrap(), 120))
            .unwrap();
        let app = create_router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/")
                    .extension(caller("10.0.0.1:50000"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert!(String::from_utf8_lossy(&body).contains("2 hours remaining"));
    }

    #[tokio::test]
    async fn test_disconnect_unknown_identity_is_404() {
        let app = create_router(create_test_state());

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/moderation/disconnect")
                    .header("content-type", "application/json")
                    .header(MODERATOR_HEADER, "Admin")
                    .extension(caller("10.0.0.1:50000"))
                    .body(Body::from(r#"{"username":"Nobody"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_metrics_token_enforced() {
        let mut state = create_test_state();
        state.metrics_token = Some("secret".to_string());
        let app = create_router(state);

        let denied = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .extension(caller("10.0.0.1:50000"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(denied.status(), StatusCode::UNAUTHORIZED);

        let allowed = app
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .header(header::AUTHORIZATION, "Bearer secret")
                    .extension(caller("10.0.0.1:50000"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(allowed.status(), StatusCode::OK);
    }
}
