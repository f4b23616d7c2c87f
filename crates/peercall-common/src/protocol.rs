use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Announce the peer-connection id a user can currently be reached at.
///
/// Fields are optional on the wire so the gateway can answer a missing
/// field with a 400 instead of a decode failure.
#[derive(Debug, Default, Serialize, Deserialize, Clone)]
pub struct PeerRegistration {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(rename = "peerId", default)]
    pub peer_id: Option<String>,
}

impl PeerRegistration {
    pub fn new(username: impl Into<String>, peer_id: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            peer_id: Some(peer_id.into()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PeerRegistered {
    pub success: bool,
}

/// Result of resolving a username to its current peer id.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PeerLookup {
    pub username: String,
    #[serde(rename = "peerId")]
    pub peer_id: String,
}

#[derive(Debug, Default, Serialize, Deserialize, Clone)]
pub struct PeerLookupQuery {
    #[serde(default)]
    pub username: Option<String>,
}

impl PeerLookupQuery {
    /// Build from decoded query pairs. A repeated `username` keeps its first value.
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let username = pairs
            .into_iter()
            .find(|(key, _)| key == "username")
            .map(|(_, value)| value);
        Self { username }
    }
}

/// Account creation request.
#[derive(Debug, Default, Serialize, Deserialize, Clone)]
pub struct SignupRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

/// Credentials login request.
#[derive(Debug, Default, Serialize, Deserialize, Clone)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

/// The parts of an account that are safe to hand back to clients.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PublicUser {
    pub id: String,
    pub name: String,
    pub email: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SignupResponse {
    pub user: PublicUser,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LoginResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub user: PublicUser,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SessionInfo {
    pub user: PublicUser,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct LogoutResponse {
    pub revoked: bool,
}

/// Error body returned by every failing gateway endpoint.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct HealthReport {
    pub registered_peers: usize,
    pub users: i64,
    pub active_sessions: i64,
}

/// Returns the value when it is present and non-empty.
pub fn required(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}
