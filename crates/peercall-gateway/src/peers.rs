//! Username to peer-connection id registry.
//!
//! Last write wins, entries never expire and the table is unbounded. The
//! registry does not check who is announcing a username.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{rejection::QueryRejection, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use peercall_common::{required, PeerLookup, PeerLookupQuery, PeerRegistered, PeerRegistration};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::{decode_json_body, error_response, BodyError};

#[derive(Clone, Default)]
pub struct PeerRegistry {
    peers: Arc<RwLock<HashMap<String, String>>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite. Returns the id that was replaced, if any.
    pub async fn register(&self, username: &str, peer_id: &str) -> Option<String> {
        self.peers
            .write()
            .await
            .insert(username.to_string(), peer_id.to_string())
    }

    pub async fn lookup(&self, username: &str) -> Option<String> {
        self.peers.read().await.get(username).cloned()
    }

    pub async fn len(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.peers.read().await.is_empty()
    }
}

/// `POST /api/peers`
///
/// The body is read as JSON whatever the request's `Content-Type`.
pub async fn register_peer(State(registry): State<PeerRegistry>, body: Bytes) -> Response {
    let payload: PeerRegistration = match decode_json_body(&body) {
        Ok(payload) => payload,
        Err(BodyError::Malformed) => {
            warn!("rejected peer registration: body is not JSON");
            return error_response(StatusCode::BAD_REQUEST, "Invalid JSON body");
        }
        // Non-string fields are treated as absent.
        Err(BodyError::Shape) => PeerRegistration::default(),
    };

    let (Some(username), Some(peer_id)) = (required(&payload.username), required(&payload.peer_id))
    else {
        return error_response(StatusCode::BAD_REQUEST, "Username and peerId are required");
    };

    match registry.register(username, peer_id).await {
        Some(previous) if previous != peer_id => {
            info!(username, peer_id, previous = %previous, "peer id replaced")
        }
        Some(_) => debug!(username, peer_id, "peer id re-announced"),
        None => info!(username, peer_id, "peer registered"),
    }

    (StatusCode::OK, Json(PeerRegistered { success: true })).into_response()
}

/// `GET /api/peers?username=<name>`
pub async fn lookup_peer(
    State(registry): State<PeerRegistry>,
    pairs: Result<Query<Vec<(String, String)>>, QueryRejection>,
) -> Response {
    let query = match pairs {
        Ok(Query(pairs)) => PeerLookupQuery::from_pairs(pairs),
        Err(rejection) => {
            warn!("rejected peer lookup query: {}", rejection);
            PeerLookupQuery::default()
        }
    };
    let Some(username) = required(&query.username) else {
        return error_response(StatusCode::BAD_REQUEST, "Username parameter is required");
    };

    match registry.lookup(username).await {
        Some(peer_id) => (
            StatusCode::OK,
            Json(PeerLookup {
                username: username.to_string(),
                peer_id,
            }),
        )
            .into_response(),
        None => {
            debug!(username, "peer lookup miss");
            error_response(StatusCode::NOT_FOUND, "User not found")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_then_lookup() {
        let registry = PeerRegistry::new();
        assert!(registry.is_empty().await);
        assert_eq!(registry.register("User1", "User1-abc").await, None);
        assert_eq!(registry.lookup("User1").await.as_deref(), Some("User1-abc"));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_last_write_wins() {
        let registry = PeerRegistry::new();
        registry.register("User1", "first").await;
        let previous = registry.register("User1", "second").await;
        assert_eq!(previous.as_deref(), Some("first"));
        assert_eq!(registry.lookup("User1").await.as_deref(), Some("second"));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_keys_are_exact() {
        let registry = PeerRegistry::new();
        registry.register("User1", "id").await;
        assert!(registry.lookup("user1").await.is_none());
        assert!(registry.lookup(" User1").await.is_none());
    }

    #[tokio::test]
    async fn test_clones_share_the_table() {
        let registry = PeerRegistry::new();
        let handle = registry.clone();
        handle.register("User2", "User2-xyz").await;
        assert_eq!(registry.lookup("User2").await.as_deref(), Some("User2-xyz"));
    }
}
