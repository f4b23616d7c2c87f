//! Structured audit trail for account and session events.

use std::net::IpAddr;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditKind {
    Registration,
    LoginSuccess,
    LoginFailure,
    Logout,
    RateLimitExceeded,
    AccountLocked,
    /// Store failures during an auth operation are kept in the audit trail
    /// since they change what the caller was allowed to do.
    DatabaseError,
}

impl AuditKind {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Registration => "REGISTRATION",
            Self::LoginSuccess => "LOGIN_SUCCESS",
            Self::LoginFailure => "LOGIN_FAILURE",
            Self::Logout => "LOGOUT",
            Self::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            Self::AccountLocked => "ACCOUNT_LOCKED",
            Self::DatabaseError => "DATABASE_ERROR",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    UserNotFound,
    InvalidPassword,
    MissingCredentials,
}

impl FailureReason {
    fn as_str(&self) -> &'static str {
        match self {
            Self::UserNotFound => "USER_NOT_FOUND",
            Self::InvalidPassword => "INVALID_PASSWORD",
            Self::MissingCredentials => "MISSING_CREDENTIALS",
        }
    }
}

/// One audit record. Build it up, then `emit` it.
#[derive(Debug)]
pub struct AuditEvent<'a> {
    kind: AuditKind,
    client_ip: Option<IpAddr>,
    user_id: Option<&'a str>,
    email: Option<&'a str>,
    reason: Option<FailureReason>,
    context: Option<String>,
}

impl<'a> AuditEvent<'a> {
    pub fn new(kind: AuditKind) -> Self {
        Self {
            kind,
            client_ip: None,
            user_id: None,
            email: None,
            reason: None,
            context: None,
        }
    }

    pub fn ip(mut self, ip: IpAddr) -> Self {
        self.client_ip = Some(ip);
        self
    }

    pub fn user(mut self, user_id: &'a str) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn email(mut self, email: &'a str) -> Self {
        self.email = Some(email);
        self
    }

    pub fn reason(mut self, reason: FailureReason) -> Self {
        self.reason = Some(reason);
        self
    }

    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn emit(self) {
        let event = self.kind.as_str();
        let reason = self.reason.map(|r| r.as_str());
        let context = self.context.as_deref();

        match self.kind {
            AuditKind::Registration => info!(
                event,
                client_ip = ?self.client_ip,
                user_id = self.user_id,
                email = self.email,
                "user registered"
            ),
            AuditKind::LoginSuccess => info!(
                event,
                client_ip = ?self.client_ip,
                user_id = self.user_id,
                email = self.email,
                "login succeeded"
            ),
            AuditKind::LoginFailure => warn!(
                event,
                client_ip = ?self.client_ip,
                user_id = self.user_id,
                email = self.email,
                reason,
                context,
                "login failed"
            ),
            AuditKind::Logout => info!(
                event,
                client_ip = ?self.client_ip,
                user_id = self.user_id,
                "session logout"
            ),
            AuditKind::RateLimitExceeded | AuditKind::AccountLocked => warn!(
                event,
                client_ip = ?self.client_ip,
                email = self.email,
                context,
                "request throttled"
            ),
            AuditKind::DatabaseError => error!(
                event,
                client_ip = ?self.client_ip,
                context,
                "identity store error"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_kind_strings() {
        assert_eq!(AuditKind::LoginSuccess.as_str(), "LOGIN_SUCCESS");
        assert_eq!(AuditKind::AccountLocked.as_str(), "ACCOUNT_LOCKED");
        assert_eq!(FailureReason::InvalidPassword.as_str(), "INVALID_PASSWORD");
    }

    #[test]
    fn test_builder_collects_fields() {
        let event = AuditEvent::new(AuditKind::LoginFailure)
            .ip(IpAddr::V4(Ipv4Addr::LOCALHOST))
            .email("user1@example.com")
            .reason(FailureReason::UserNotFound)
            .context("3 failures");
        assert_eq!(event.email, Some("user1@example.com"));
        assert_eq!(event.reason, Some(FailureReason::UserNotFound));
        assert_eq!(event.context.as_deref(), Some("3 failures"));
        event.emit();
    }
}
