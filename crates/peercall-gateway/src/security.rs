use std::{
    collections::HashMap,
    net::{IpAddr, SocketAddr},
    sync::Mutex,
    time::{Duration, Instant},
};

use axum::http::{HeaderMap, HeaderValue};
use sha2::{Digest, Sha256};

#[derive(Clone, Copy)]
struct RateEntry {
    count: u32,
    window_start: Instant,
}

pub struct FixedWindowRateLimiter {
    max_requests: u32,
    window: Duration,
    max_keys: usize,
    entries: Mutex<HashMap<String, RateEntry>>,
}

impl FixedWindowRateLimiter {
    pub fn new(max_requests: u32, window: Duration, max_keys: usize) -> Self {
        Self {
            max_requests,
            window,
            max_keys,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn allow(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut guard = match self.entries.lock() {
            Ok(v) => v,
            Err(_) => return false,
        };

        if guard.len() > self.max_keys {
            guard.retain(|_, entry| now.duration_since(entry.window_start) < self.window);
            if guard.len() > self.max_keys {
                return false;
            }
        }

        let entry = guard.entry(key.to_string()).or_insert(RateEntry {
            count: 0,
            window_start: now,
        });

        if now.duration_since(entry.window_start) >= self.window {
            entry.count = 0;
            entry.window_start = now;
        }

        entry.count = entry.count.saturating_add(1);
        entry.count <= self.max_requests
    }
}

pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Client address for rate limiting and audit. Forwarding headers are only
/// honoured when the gateway sits behind a trusted proxy.
pub fn effective_client_ip(headers: &HeaderMap, direct_addr: SocketAddr, trust_proxy: bool) -> IpAddr {
    if trust_proxy {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|raw| raw.split(',').next())
            .and_then(|first| first.trim().parse::<IpAddr>().ok());
        if let Some(ip) = forwarded {
            return ip;
        }
        let real_ip = headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .and_then(|raw| raw.trim().parse::<IpAddr>().ok());
        if let Some(ip) = real_ip {
            return ip;
        }
    }
    direct_addr.ip()
}

pub fn cors_origin_values(origins: &[String]) -> Vec<HeaderValue> {
    origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect()
}

pub fn is_valid_session_token(token: &str) -> bool {
    let len = token.len();
    (32..=256).contains(&len)
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_token_consistency() {
        assert_eq!(hash_token("test_token_12345"), hash_token("test_token_12345"));
        assert_ne!(hash_token("token_one"), hash_token("token_two"));
    }

    #[test]
    fn test_hash_token_is_sha256_hex() {
        let hash = hash_token(&"a".repeat(1000));
        // SHA-256 produces 64 hex characters (256 bits)
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_rate_limiter_blocks_after_limit() {
        let limiter = FixedWindowRateLimiter::new(2, Duration::from_secs(60), 100);
        assert!(limiter.allow("GET:/api/peers:127.0.0.1"));
        assert!(limiter.allow("GET:/api/peers:127.0.0.1"));
        assert!(!limiter.allow("GET:/api/peers:127.0.0.1"));
        // Other keys are unaffected.
        assert!(limiter.allow("POST:/api/peers:127.0.0.1"));
    }

    #[test]
    fn test_rate_limiter_resets_after_window() {
        let limiter = FixedWindowRateLimiter::new(1, Duration::from_millis(20), 100);
        assert!(limiter.allow("k"));
        assert!(!limiter.allow("k"));
        std::thread::sleep(Duration::from_millis(30));
        assert!(limiter.allow("k"));
    }

    #[test]
    fn test_effective_client_ip_ignores_headers_by_default() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.9"));
        let direct: SocketAddr = "10.0.0.2:5555".parse().unwrap();
        assert_eq!(
            effective_client_ip(&headers, direct, false),
            direct.ip()
        );
        assert_eq!(
            effective_client_ip(&headers, direct, true),
            "203.0.113.9".parse::<IpAddr>().unwrap()
        );
    }

    #[test]
    fn test_effective_client_ip_uses_first_forwarded_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("198.51.100.1, 10.0.0.1"),
        );
        let direct: SocketAddr = "10.0.0.2:5555".parse().unwrap();
        assert_eq!(
            effective_client_ip(&headers, direct, true),
            "198.51.100.1".parse::<IpAddr>().unwrap()
        );
    }

    #[test]
    fn test_session_token_shape() {
        assert!(is_valid_session_token(&"ab12".repeat(16)));
        assert!(!is_valid_session_token("short"));
        assert!(!is_valid_session_token(&format!("{} x", "a".repeat(40))));
    }
}
