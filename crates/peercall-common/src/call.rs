//! Client-side call flow: peer id minting, target validation and the status
//! machine a caller walks through while the media library does the real work.

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

const PEER_ID_SUFFIX_LEN: usize = 7;
const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Mint a fresh peer-connection id for `name`: `<name>-<7 base36 chars>`.
pub fn generate_peer_id(name: &str) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..PEER_ID_SUFFIX_LEN)
        .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
        .collect();
    format!("{name}-{suffix}")
}

/// Trim the username typed into the dial box, rejecting blank input.
pub fn validate_call_target(input: &str) -> Result<String> {
    let target = input.trim();
    if target.is_empty() {
        return Err(Error::invalid_input("Please enter a username to call"));
    }
    Ok(target.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CallStatus {
    Initializing,
    Ready,
    LookingUp,
    Calling,
    Incoming,
    Connected,
    Ended,
    Error,
}

impl CallStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Initializing => "Initializing...",
            Self::Ready => "Ready to call",
            Self::LookingUp => "Looking up user...",
            Self::Calling => "Calling...",
            Self::Incoming => "Incoming call...",
            Self::Connected => "Connected",
            Self::Ended => "Call ended",
            Self::Error => "Call failed",
        }
    }

    /// Whether the hang-up control applies.
    pub fn can_hang_up(&self) -> bool {
        matches!(self, Self::Calling | Self::Connected)
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One two-party call attempt against a single target username.
#[derive(Debug, Clone)]
pub struct CallSession {
    target: String,
    status: CallStatus,
    local_peer_id: Option<String>,
    remote_peer_id: Option<String>,
    last_error: Option<String>,
}

impl CallSession {
    pub fn new(target: &str) -> Result<Self> {
        Ok(Self {
            target: validate_call_target(target)?,
            status: CallStatus::Initializing,
            local_peer_id: None,
            remote_peer_id: None,
            last_error: None,
        })
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn status(&self) -> CallStatus {
        self.status
    }

    pub fn local_peer_id(&self) -> Option<&str> {
        self.local_peer_id.as_deref()
    }

    pub fn remote_peer_id(&self) -> Option<&str> {
        self.remote_peer_id.as_deref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    fn transition(&mut self, next: CallStatus) {
        debug!(target_user = %self.target, from = ?self.status, to = ?next, "call status change");
        self.status = next;
    }

    fn reject(&mut self, message: &str) -> Error {
        self.last_error = Some(message.to_string());
        Error::call_state(message)
    }

    /// The local peer connection is open and reachable under `peer_id`.
    pub fn opened(&mut self, peer_id: impl Into<String>) -> Result<()> {
        if self.status != CallStatus::Initializing {
            return Err(Error::call_state(format!(
                "peer opened while {:?}",
                self.status
            )));
        }
        self.local_peer_id = Some(peer_id.into());
        self.transition(CallStatus::Ready);
        Ok(())
    }

    /// Start resolving the target. Leaves the status untouched on refusal.
    pub fn begin_lookup(&mut self) -> Result<()> {
        if self.status != CallStatus::Ready {
            return Err(self.reject("Video not initialized yet"));
        }
        self.transition(CallStatus::LookingUp);
        Ok(())
    }

    pub fn lookup_failed(&mut self) {
        let message = format!(
            "Could not connect to peer {}: User not found or not online",
            self.target
        );
        self.fail(message);
    }

    /// The target resolved to `peer_id` and the outgoing call was placed.
    pub fn dial(&mut self, peer_id: impl Into<String>) -> Result<()> {
        if self.status != CallStatus::LookingUp {
            return Err(Error::call_state(format!("dial while {:?}", self.status)));
        }
        self.remote_peer_id = Some(peer_id.into());
        self.transition(CallStatus::Calling);
        Ok(())
    }

    pub fn incoming(&mut self, peer_id: impl Into<String>) -> Result<()> {
        if !matches!(self.status, CallStatus::Initializing | CallStatus::Ready) {
            return Err(Error::call_state(format!(
                "incoming call while {:?}",
                self.status
            )));
        }
        self.remote_peer_id = Some(peer_id.into());
        self.transition(CallStatus::Incoming);
        Ok(())
    }

    /// The remote media stream arrived.
    pub fn remote_stream(&mut self) -> Result<()> {
        if !matches!(self.status, CallStatus::Calling | CallStatus::Incoming) {
            return Err(Error::call_state(format!(
                "remote stream while {:?}",
                self.status
            )));
        }
        self.transition(CallStatus::Connected);
        Ok(())
    }

    /// The remote side closed the call.
    pub fn closed(&mut self) -> Result<()> {
        if !matches!(
            self.status,
            CallStatus::Calling | CallStatus::Incoming | CallStatus::Connected
        ) {
            return Err(Error::call_state(format!("close while {:?}", self.status)));
        }
        self.transition(CallStatus::Ended);
        Ok(())
    }

    /// Local hang-up always ends the session.
    pub fn hang_up(&mut self) {
        self.transition(CallStatus::Ended);
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.last_error = Some(message.into());
        self.transition(CallStatus::Error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_peer_id_shape() {
        let id = generate_peer_id("User1");
        let suffix = id.strip_prefix("User1-").expect("name prefix");
        assert_eq!(suffix.len(), PEER_ID_SUFFIX_LEN);
        assert!(suffix
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
    }

    #[test]
    fn test_generate_peer_id_varies() {
        let a = generate_peer_id("alice");
        let b = generate_peer_id("alice");
        assert_ne!(a, b);
    }

    #[test]
    fn test_validate_call_target() {
        assert_eq!(validate_call_target("  User2 ").unwrap(), "User2");
        let err = validate_call_target("   ").unwrap_err();
        assert_eq!(err.to_string(), "invalid input: Please enter a username to call");
    }

    #[test]
    fn test_outgoing_call_happy_path() {
        let mut call = CallSession::new("User2").unwrap();
        assert_eq!(call.status(), CallStatus::Initializing);

        call.opened("User1-aaaaaaa").unwrap();
        assert_eq!(call.status(), CallStatus::Ready);
        assert_eq!(call.local_peer_id(), Some("User1-aaaaaaa"));

        call.begin_lookup().unwrap();
        assert_eq!(call.status(), CallStatus::LookingUp);

        call.dial("User2-bbbbbbb").unwrap();
        assert_eq!(call.status(), CallStatus::Calling);
        assert!(call.status().can_hang_up());

        call.remote_stream().unwrap();
        assert_eq!(call.status(), CallStatus::Connected);

        call.closed().unwrap();
        assert_eq!(call.status(), CallStatus::Ended);
        assert_eq!(call.status().label(), "Call ended");
    }

    #[test]
    fn test_lookup_before_ready_is_refused_without_state_change() {
        let mut call = CallSession::new("User2").unwrap();
        assert!(call.begin_lookup().is_err());
        assert_eq!(call.status(), CallStatus::Initializing);
        assert_eq!(call.last_error(), Some("Video not initialized yet"));
    }

    #[test]
    fn test_lookup_failure_reports_target() {
        let mut call = CallSession::new("ghost").unwrap();
        call.opened("me-1234567").unwrap();
        call.begin_lookup().unwrap();
        call.lookup_failed();
        assert_eq!(call.status(), CallStatus::Error);
        assert_eq!(
            call.last_error(),
            Some("Could not connect to peer ghost: User not found or not online")
        );
    }

    #[test]
    fn test_incoming_call_connects() {
        let mut call = CallSession::new("User1").unwrap();
        call.opened("User2-ccccccc").unwrap();
        call.incoming("User1-ddddddd").unwrap();
        assert_eq!(call.status().label(), "Incoming call...");
        call.remote_stream().unwrap();
        assert_eq!(call.remote_peer_id(), Some("User1-ddddddd"));
    }

    #[test]
    fn test_remote_stream_requires_active_call() {
        let mut call = CallSession::new("User1").unwrap();
        assert!(call.remote_stream().is_err());
        call.hang_up();
        assert_eq!(call.status(), CallStatus::Ended);
        assert!(call.closed().is_err());
    }

    #[test]
    fn test_status_serializes_kebab_case() {
        let json = serde_json::to_string(&CallStatus::LookingUp).unwrap();
        assert_eq!(json, "\"looking-up\"");
    }
}
