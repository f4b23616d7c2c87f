//! Peercall gateway: credential accounts, bearer sessions and the
//! username to peer-connection id registry callers use to find each other.

#![forbid(unsafe_code)]

pub mod audit;
pub mod auth;
pub mod config;
pub mod db;
pub mod peers;
pub mod security;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{ConnectInfo, FromRef, Request, State},
    http::{header, HeaderName, Method, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use peercall_common::{ErrorResponse, HealthReport};
use serde::de::DeserializeOwned;
use sqlx::SqlitePool;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

pub use config::GatewayConfig;
pub use peers::PeerRegistry;
pub use security::FixedWindowRateLimiter;

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub peers: PeerRegistry,
    pub config: Arc<GatewayConfig>,
    pub api_limiter: Arc<FixedWindowRateLimiter>,
}

impl AppState {
    pub fn new(pool: SqlitePool, config: GatewayConfig) -> Self {
        let api_limiter = FixedWindowRateLimiter::new(
            config.api_rate_limit,
            config.api_rate_window,
            config.api_rate_max_keys,
        );
        Self {
            pool,
            peers: PeerRegistry::new(),
            config: Arc::new(config),
            api_limiter: Arc::new(api_limiter),
        }
    }
}

impl FromRef<AppState> for SqlitePool {
    fn from_ref(state: &AppState) -> Self {
        state.pool.clone()
    }
}

impl FromRef<AppState> for PeerRegistry {
    fn from_ref(state: &AppState) -> Self {
        state.peers.clone()
    }
}

impl FromRef<AppState> for Arc<GatewayConfig> {
    fn from_ref(state: &AppState) -> Self {
        state.config.clone()
    }
}

pub(crate) fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

/// Why a request body could not be turned into the expected payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BodyError {
    /// Not JSON at all.
    Malformed,
    /// Valid JSON that does not fit the payload, e.g. a number where a string belongs.
    Shape,
}

/// Decode a JSON request body whatever its `Content-Type` says.
pub(crate) fn decode_json_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, BodyError> {
    let value: serde_json::Value = serde_json::from_slice(body).map_err(|err| {
        tracing::debug!("request body is not JSON: {}", err);
        BodyError::Malformed
    })?;
    serde_json::from_value(value).map_err(|err| {
        tracing::debug!("request body has the wrong shape: {}", err);
        BodyError::Shape
    })
}

async fn health(State(state): State<AppState>) -> Response {
    let users = db::count_users(&state.pool).await;
    let active_sessions = db::count_active_sessions(&state.pool).await;
    match (users, active_sessions) {
        (Ok(users), Ok(active_sessions)) => (
            StatusCode::OK,
            Json(HealthReport {
                registered_peers: state.peers.len().await,
                users,
                active_sessions,
            }),
        )
            .into_response(),
        (Err(err), _) | (_, Err(err)) => {
            tracing::error!("health check failed: {}", err);
            error_response(StatusCode::SERVICE_UNAVAILABLE, "Identity store unavailable")
        }
    }
}

async fn global_api_rate_limit(
    State(state): State<AppState>,
    req: Request,
    next: middleware::Next,
) -> Response {
    let path = req.uri().path();
    if path == "/" || path == "/health" || path.starts_with("/metrics/") {
        return next.run(req).await;
    }

    let direct_addr = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0)
        .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 0)));
    let client_ip = security::effective_client_ip(
        req.headers(),
        direct_addr,
        state.config.trust_proxy_headers,
    );
    let key = format!("{}:{}:{}", req.method(), path, client_ip);
    if !state.api_limiter.allow(&key) {
        audit::AuditEvent::new(audit::AuditKind::RateLimitExceeded)
            .ip(client_ip)
            .context(key)
            .emit();
        return error_response(StatusCode::TOO_MANY_REQUESTS, "Too many requests");
    }

    next.run(req).await
}

fn build_cors_layer(config: &GatewayConfig) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static("x-session-token"),
        ]);

    if config.cors_allow_any {
        return base.allow_origin(AllowOrigin::any());
    }

    let origins = security::cors_origin_values(&config.allowed_origins);
    if origins.is_empty() {
        tracing::warn!(
            "no valid CORS origins configured; cross-origin browser access will be blocked"
        );
        return base;
    }
    base.allow_origin(AllowOrigin::list(origins))
}

/// Build the full HTTP surface over `state`.
pub fn router(state: AppState) -> Router {
    let cors = build_cors_layer(&state.config);

    Router::new()
        .route("/", get(|| async { "Peercall Gateway Online" }))
        .route("/health", get(health))
        .route("/metrics/auth", get(auth::metrics))
        .route("/api/register", post(auth::register))
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/session", get(auth::session))
        .route("/api/auth/logout", post(auth::logout))
        .route(
            "/api/peers",
            get(peers::lookup_peer).post(peers::register_peer),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            global_api_rate_limit,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Periodically drop expired sessions from the identity store.
pub fn spawn_session_sweeper(pool: SqlitePool, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            match db::delete_expired_sessions(&pool).await {
                Ok(count) if count > 0 => tracing::info!("cleaned {} expired sessions", count),
                Ok(_) => {}
                Err(err) => tracing::warn!("failed to clean expired sessions: {}", err),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use peercall_common::PeerRegistration;

    #[test]
    fn test_decode_json_body_accepts_payload() {
        let reg: PeerRegistration =
            decode_json_body(br#"{"username":"User1","peerId":"User1-abc"}"#).unwrap();
        assert_eq!(reg.username.as_deref(), Some("User1"));
        assert_eq!(reg.peer_id.as_deref(), Some("User1-abc"));
    }

    #[test]
    fn test_decode_json_body_errors() {
        assert_eq!(
            decode_json_body::<PeerRegistration>(b"{not json").unwrap_err(),
            BodyError::Malformed
        );
        assert_eq!(
            decode_json_body::<PeerRegistration>(b"").unwrap_err(),
            BodyError::Malformed
        );
        assert_eq!(
            decode_json_body::<PeerRegistration>(br#"{"username":42,"peerId":"x"}"#).unwrap_err(),
            BodyError::Shape
        );
    }
}
