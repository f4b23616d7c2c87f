use crate::audit::{AuditEvent, AuditKind, FailureReason};
use crate::config::GatewayConfig;
use crate::db;
use crate::{decode_json_body, error_response, security, BodyError};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    body::Bytes,
    extract::{ConnectInfo, Json, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use once_cell::sync::Lazy;
use peercall_common::{
    required, LoginRequest, LoginResponse, LogoutResponse, SessionInfo, SignupRequest,
    SignupResponse,
};
use serde::Serialize;
use sqlx::SqlitePool;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Accounts present at startup when demo seeding is on.
pub const DEMO_USERS: [(&str, &str); 2] = [
    ("User1", "user1@example.com"),
    ("User2", "user2@example.com"),
];
pub const DEMO_PASSWORD: &str = "password";

#[derive(Default)]
struct AuthMetrics {
    register_attempts: AtomicU64,
    register_success: AtomicU64,
    login_attempts: AtomicU64,
    login_success: AtomicU64,
    logout_attempts: AtomicU64,
    logout_success: AtomicU64,
    validation_errors: AtomicU64,
    auth_failures: AtomicU64,
    lockouts: AtomicU64,
    db_errors: AtomicU64,
}

#[derive(Debug, Serialize)]
pub struct AuthMetricsSnapshot {
    pub register_attempts: u64,
    pub register_success: u64,
    pub login_attempts: u64,
    pub login_success: u64,
    pub logout_attempts: u64,
    pub logout_success: u64,
    pub validation_errors: u64,
    pub auth_failures: u64,
    pub lockouts: u64,
    pub db_errors: u64,
}

static AUTH_METRICS: Lazy<AuthMetrics> = Lazy::new(AuthMetrics::default);

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

fn metrics_snapshot() -> AuthMetricsSnapshot {
    let m = &*AUTH_METRICS;
    AuthMetricsSnapshot {
        register_attempts: m.register_attempts.load(Ordering::Relaxed),
        register_success: m.register_success.load(Ordering::Relaxed),
        login_attempts: m.login_attempts.load(Ordering::Relaxed),
        login_success: m.login_success.load(Ordering::Relaxed),
        logout_attempts: m.logout_attempts.load(Ordering::Relaxed),
        logout_success: m.logout_success.load(Ordering::Relaxed),
        validation_errors: m.validation_errors.load(Ordering::Relaxed),
        auth_failures: m.auth_failures.load(Ordering::Relaxed),
        lockouts: m.lockouts.load(Ordering::Relaxed),
        db_errors: m.db_errors.load(Ordering::Relaxed),
    }
}

/// `GET /metrics/auth`
pub async fn metrics() -> impl IntoResponse {
    (StatusCode::OK, Json(metrics_snapshot())).into_response()
}

pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| anyhow::anyhow!("password hashing failed: {err}"))
}

/// False for a wrong password and for an unparseable stored hash.
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        tracing::error!("stored password hash is not a PHC string");
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// Insert the demo accounts unless their emails are already taken.
pub async fn seed_demo_users(pool: &SqlitePool) -> anyhow::Result<usize> {
    let mut created = 0;
    for (name, email) in DEMO_USERS {
        if db::get_user_by_email(pool, email).await?.is_some() {
            continue;
        }
        let password_hash = hash_password(DEMO_PASSWORD)?;
        db::create_user(pool, name, email, &password_hash).await?;
        created += 1;
    }
    Ok(created)
}

fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

fn client_ip(config: &GatewayConfig, headers: &HeaderMap, addr: SocketAddr) -> IpAddr {
    security::effective_client_ip(headers, addr, config.trust_proxy_headers)
}

fn is_unique_violation(err: &anyhow::Error) -> bool {
    let lower = err.to_string().to_ascii_lowercase();
    lower.contains("unique") && lower.contains("users.email")
}

pub fn extract_session_token(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers.get("x-session-token") {
        if let Ok(token) = value.to_str() {
            let trimmed = token.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }

    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|raw| raw.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(ToOwned::to_owned)
}

/// `POST /api/register`
pub async fn register(
    State(pool): State<SqlitePool>,
    State(config): State<Arc<GatewayConfig>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    bump(&AUTH_METRICS.register_attempts);
    let client_ip = client_ip(&config, &headers, addr);

    let payload: SignupRequest = match decode_json_body(&body) {
        Ok(payload) => payload,
        Err(BodyError::Malformed) => {
            bump(&AUTH_METRICS.validation_errors);
            return error_response(StatusCode::BAD_REQUEST, "Invalid JSON body");
        }
        Err(BodyError::Shape) => SignupRequest::default(),
    };

    let (Some(name), Some(email), Some(password)) = (
        required(&payload.name),
        required(&payload.email),
        required(&payload.password),
    ) else {
        bump(&AUTH_METRICS.validation_errors);
        return error_response(StatusCode::BAD_REQUEST, "Missing required fields");
    };
    let email = normalize_email(email);

    match db::get_user_by_email(&pool, &email).await {
        Ok(Some(_)) => {
            bump(&AUTH_METRICS.auth_failures);
            return error_response(StatusCode::CONFLICT, "User already exists");
        }
        Ok(None) => {}
        Err(err) => {
            bump(&AUTH_METRICS.db_errors);
            AuditEvent::new(AuditKind::DatabaseError)
                .ip(client_ip)
                .context(err.to_string())
                .emit();
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "An error occurred during registration",
            );
        }
    }

    let password_hash = match hash_password(password) {
        Ok(hash) => hash,
        Err(err) => {
            tracing::error!("{}", err);
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "An error occurred during registration",
            );
        }
    };

    let user = match db::create_user(&pool, name, &email, &password_hash).await {
        Ok(user) => user,
        Err(err) if is_unique_violation(&err) => {
            bump(&AUTH_METRICS.auth_failures);
            return error_response(StatusCode::CONFLICT, "User already exists");
        }
        Err(err) => {
            bump(&AUTH_METRICS.db_errors);
            tracing::error!("failed to create user: {}", err);
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "An error occurred during registration",
            );
        }
    };

    bump(&AUTH_METRICS.register_success);
    AuditEvent::new(AuditKind::Registration)
        .ip(client_ip)
        .user(&user.id)
        .email(&user.email)
        .emit();
    (
        StatusCode::CREATED,
        Json(SignupResponse {
            user: user.to_public(),
        }),
    )
        .into_response()
}

/// `POST /api/auth/login`
pub async fn login(
    State(pool): State<SqlitePool>,
    State(config): State<Arc<GatewayConfig>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    bump(&AUTH_METRICS.login_attempts);
    let client_ip = client_ip(&config, &headers, addr);

    let payload: LoginRequest = match decode_json_body(&body) {
        Ok(payload) => payload,
        Err(BodyError::Malformed) => {
            bump(&AUTH_METRICS.validation_errors);
            return error_response(StatusCode::BAD_REQUEST, "Invalid JSON body");
        }
        Err(BodyError::Shape) => LoginRequest::default(),
    };

    let (Some(email), Some(password)) = (required(&payload.email), required(&payload.password))
    else {
        bump(&AUTH_METRICS.validation_errors);
        AuditEvent::new(AuditKind::LoginFailure)
            .ip(client_ip)
            .reason(FailureReason::MissingCredentials)
            .emit();
        return error_response(StatusCode::BAD_REQUEST, "Email and password are required");
    };
    let email = normalize_email(email);
    let failure_key = format!("email:{}", email);

    if let Ok(Some((count, last_failure))) = db::get_login_failures(&pool, &failure_key).await {
        if Utc::now() >= last_failure + config.login_lockout {
            // Window over: the next failure starts a fresh count.
            db::reset_login_failure(&pool, &failure_key).await.ok();
        } else if count >= config.login_max_failures {
            bump(&AUTH_METRICS.lockouts);
            AuditEvent::new(AuditKind::AccountLocked)
                .ip(client_ip)
                .email(&email)
                .context(format!("{} failed login attempts", count))
                .emit();
            return error_response(
                StatusCode::TOO_MANY_REQUESTS,
                "Account locked due to too many failed attempts. Try again later.",
            );
        }
    }

    let user = match db::get_user_by_email(&pool, &email).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            bump(&AUTH_METRICS.auth_failures);
            AuditEvent::new(AuditKind::LoginFailure)
                .ip(client_ip)
                .email(&email)
                .reason(FailureReason::UserNotFound)
                .emit();
            return error_response(StatusCode::UNAUTHORIZED, "Invalid credentials");
        }
        Err(err) => {
            bump(&AUTH_METRICS.db_errors);
            AuditEvent::new(AuditKind::DatabaseError)
                .ip(client_ip)
                .context(err.to_string())
                .emit();
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Database error");
        }
    };

    if !verify_password(password, &user.password_hash) {
        bump(&AUTH_METRICS.auth_failures);
        let failures = db::record_login_failure(&pool, &failure_key).await.ok();
        let mut event = AuditEvent::new(AuditKind::LoginFailure)
            .ip(client_ip)
            .user(&user.id)
            .email(&email)
            .reason(FailureReason::InvalidPassword);
        if let Some(count) = failures {
            event = event.context(format!("{} consecutive failures", count));
        }
        event.emit();
        return error_response(StatusCode::UNAUTHORIZED, "Invalid credentials");
    }

    db::reset_login_failure(&pool, &failure_key).await.ok();

    let session = match db::create_session(
        &pool,
        &user.id,
        Some(client_ip.to_string()),
        config.session_ttl,
    )
    .await
    {
        Ok(session) => session,
        Err(err) => {
            bump(&AUTH_METRICS.db_errors);
            tracing::error!("failed to create session: {}", err);
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Session creation failed");
        }
    };

    bump(&AUTH_METRICS.login_success);
    AuditEvent::new(AuditKind::LoginSuccess)
        .ip(client_ip)
        .user(&user.id)
        .email(&email)
        .emit();
    (
        StatusCode::OK,
        Json(LoginResponse {
            token: session.token,
            expires_at: session.expires_at,
            user: user.to_public(),
        }),
    )
        .into_response()
}

/// `GET /api/auth/session`
pub async fn session(State(pool): State<SqlitePool>, headers: HeaderMap) -> Response {
    let Some(token) = extract_session_token(&headers) else {
        return error_response(StatusCode::UNAUTHORIZED, "Not authenticated");
    };
    if !security::is_valid_session_token(&token) {
        return error_response(StatusCode::UNAUTHORIZED, "Not authenticated");
    }

    match db::get_active_session(&pool, &token).await {
        Ok(Some(active)) => (
            StatusCode::OK,
            Json(SessionInfo {
                user: active.user(),
                expires_at: active.expires_at,
            }),
        )
            .into_response(),
        Ok(None) => error_response(StatusCode::UNAUTHORIZED, "Not authenticated"),
        Err(err) => {
            bump(&AUTH_METRICS.db_errors);
            tracing::error!("failed to load session: {}", err);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Database error")
        }
    }
}

/// `POST /api/auth/logout`
pub async fn logout(
    State(pool): State<SqlitePool>,
    State(config): State<Arc<GatewayConfig>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    bump(&AUTH_METRICS.logout_attempts);
    let client_ip = client_ip(&config, &headers, addr);

    let Some(token) = extract_session_token(&headers) else {
        bump(&AUTH_METRICS.validation_errors);
        return error_response(StatusCode::BAD_REQUEST, "Missing bearer token");
    };
    if !security::is_valid_session_token(&token) {
        bump(&AUTH_METRICS.validation_errors);
        return error_response(StatusCode::BAD_REQUEST, "Invalid session token");
    }

    let owner = db::get_active_session(&pool, &token).await.ok().flatten();

    match db::revoke_session(&pool, &token).await {
        Ok(revoked) => {
            bump(&AUTH_METRICS.logout_success);
            let mut event = AuditEvent::new(AuditKind::Logout).ip(client_ip);
            if let Some(active) = owner.as_ref() {
                event = event.user(&active.user_id);
            }
            event.emit();
            (StatusCode::OK, Json(LogoutResponse { revoked })).into_response()
        }
        Err(err) => {
            bump(&AUTH_METRICS.db_errors);
            AuditEvent::new(AuditKind::DatabaseError)
                .ip(client_ip)
                .context(err.to_string())
                .emit();
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Logout failed")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_password_hash_roundtrip() {
        let hash = hash_password("password").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("password", &hash));
        assert!(!verify_password("Password", &hash));
    }

    #[test]
    fn test_verify_rejects_garbage_hash() {
        assert!(!verify_password("password", "not-a-phc-string"));
    }

    #[test]
    fn test_extract_session_token_prefers_custom_header() {
        let mut headers = HeaderMap::new();
        headers.insert("x-session-token", HeaderValue::from_static(" abc "));
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer xyz"));
        assert_eq!(extract_session_token(&headers).as_deref(), Some("abc"));
    }

    #[test]
    fn test_extract_session_token_from_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer xyz"));
        assert_eq!(extract_session_token(&headers).as_deref(), Some("xyz"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic xyz"));
        assert!(extract_session_token(&headers).is_none());
    }

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email("  User1@Example.COM "), "user1@example.com");
    }

    #[tokio::test]
    async fn test_seed_demo_users_is_idempotent() {
        let pool = db::connect_in_memory().await.unwrap();
        assert_eq!(seed_demo_users(&pool).await.unwrap(), 2);
        assert_eq!(seed_demo_users(&pool).await.unwrap(), 0);

        let user = db::get_user_by_email(&pool, "user2@example.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(user.id, "2");
        assert_eq!(user.name, "User2");
        assert!(verify_password(DEMO_PASSWORD, &user.password_hash));
    }
}
