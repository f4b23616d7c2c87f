use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3000";
const DEFAULT_SESSION_TTL_HOURS: i64 = 24 * 30;

const DEFAULT_ALLOWED_ORIGINS: [&str; 4] = [
    "http://localhost:3000",
    "http://127.0.0.1:3000",
    "http://localhost:5173",
    "http://127.0.0.1:5173",
];

/// Runtime settings, read from the environment (and `.env`) at startup.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub bind_addr: SocketAddr,
    pub allow_public_bind: bool,
    pub session_ttl: chrono::Duration,
    pub seed_demo_users: bool,
    pub trust_proxy_headers: bool,
    pub cors_allow_any: bool,
    pub allowed_origins: Vec<String>,
    pub api_rate_limit: u32,
    pub api_rate_window: Duration,
    pub api_rate_max_keys: usize,
    pub login_max_failures: i64,
    pub login_lockout: chrono::Duration,
    pub session_sweep_interval: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            allow_public_bind: false,
            session_ttl: chrono::Duration::hours(DEFAULT_SESSION_TTL_HOURS),
            seed_demo_users: true,
            trust_proxy_headers: false,
            cors_allow_any: false,
            allowed_origins: DEFAULT_ALLOWED_ORIGINS
                .iter()
                .map(|o| normalize_origin(o))
                .collect(),
            api_rate_limit: 600,
            api_rate_window: Duration::from_secs(60),
            api_rate_max_keys: 50_000,
            login_max_failures: 5,
            login_lockout: chrono::Duration::minutes(15),
            session_sweep_interval: Duration::from_secs(300),
        }
    }
}

impl GatewayConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let bind_addr = env_string("PEERCALL_GATEWAY_BIND_ADDR")
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string())
            .parse::<SocketAddr>()
            .context("PEERCALL_GATEWAY_BIND_ADDR must be host:port")?;

        let allowed_origins = match env_string("PEERCALL_ALLOWED_ORIGINS") {
            Some(raw) => parse_origins(&raw),
            None => defaults.allowed_origins.clone(),
        };

        Ok(Self {
            bind_addr,
            allow_public_bind: env_bool("PEERCALL_ALLOW_PUBLIC_BIND", false),
            session_ttl: chrono::Duration::hours(
                env_parse("PEERCALL_SESSION_TTL_HOURS", DEFAULT_SESSION_TTL_HOURS).max(1),
            ),
            seed_demo_users: env_bool("PEERCALL_SEED_DEMO_USERS", true),
            trust_proxy_headers: env_bool("PEERCALL_TRUST_PROXY_HEADERS", false),
            cors_allow_any: env_bool("PEERCALL_CORS_ALLOW_ANY", false),
            allowed_origins,
            api_rate_limit: env_parse("PEERCALL_API_RATE_LIMIT", defaults.api_rate_limit),
            api_rate_window: Duration::from_secs(
                env_parse("PEERCALL_API_RATE_WINDOW_SECS", 60u64).max(1),
            ),
            api_rate_max_keys: env_parse("PEERCALL_API_RATE_MAX_KEYS", defaults.api_rate_max_keys),
            ..defaults
        })
    }

    /// Non-loopback binds must be opted into.
    pub fn check_public_bind_allowed(&self, addr: SocketAddr) -> anyhow::Result<()> {
        if addr.ip().is_loopback() || self.allow_public_bind {
            return Ok(());
        }
        Err(anyhow::anyhow!(
            "refusing non-loopback bind without PEERCALL_ALLOW_PUBLIC_BIND=1"
        ))
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(value) => matches!(
            value.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => default,
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

pub fn normalize_origin(origin: &str) -> String {
    origin.trim().trim_end_matches('/').to_ascii_lowercase()
}

fn parse_origins(raw: &str) -> Vec<String> {
    let origins: Vec<String> = raw
        .split(',')
        .map(normalize_origin)
        .filter(|o| !o.is_empty())
        .collect();
    if origins.is_empty() {
        return DEFAULT_ALLOWED_ORIGINS
            .iter()
            .map(|o| normalize_origin(o))
            .collect();
    }
    origins
}
