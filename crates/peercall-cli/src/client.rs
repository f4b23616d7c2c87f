//! Thin HTTP client for the gateway.

use peercall_common::{
    Error, ErrorResponse, LoginRequest, LoginResponse, LogoutResponse, PeerLookup,
    PeerRegistration, PublicUser, Result, SessionInfo, SignupRequest, SignupResponse,
};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;

pub const DEFAULT_SERVER: &str = "http://127.0.0.1:3000";

pub fn normalize_server(server: Option<String>) -> String {
    server
        .map(|s| s.trim().trim_end_matches('/').to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_SERVER.to_string())
}

#[derive(Clone)]
pub struct GatewayClient {
    http: reqwest::Client,
    server: String,
    token: Option<String>,
}

impl GatewayClient {
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            server: normalize_server(Some(server.into())),
            token: None,
        }
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token.filter(|t| !t.trim().is_empty());
        self
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.server, path)
    }

    fn authorized(&self, builder: RequestBuilder) -> Result<RequestBuilder> {
        let token = self
            .token
            .as_deref()
            .ok_or_else(|| Error::auth("no session token; log in first"))?;
        Ok(builder.bearer_auth(token))
    }

    async fn send(builder: RequestBuilder) -> Result<Response> {
        builder.send().await.map_err(Error::transport)
    }

    async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T> {
        let status = resp.status();
        let bytes = resp.bytes().await.map_err(Error::transport)?;
        if status.is_success() {
            return Ok(serde_json::from_slice(&bytes)?);
        }
        let message = serde_json::from_slice::<ErrorResponse>(&bytes)
            .map(|body| body.error)
            .unwrap_or_else(|_| String::from_utf8_lossy(&bytes).into_owned());
        debug!(status = status.as_u16(), %message, "gateway rejected request");
        Err(Error::from_status(status.as_u16(), message))
    }

    pub async fn signup(&self, name: &str, email: &str, password: &str) -> Result<PublicUser> {
        let body = SignupRequest {
            name: Some(name.to_string()),
            email: Some(email.to_string()),
            password: Some(password.to_string()),
        };
        let resp = Self::send(self.http.post(self.url("/api/register")).json(&body)).await?;
        let created: SignupResponse = Self::decode(resp).await?;
        Ok(created.user)
    }

    /// Log in and keep the returned bearer token on this client.
    pub async fn login(&mut self, email: &str, password: &str) -> Result<LoginResponse> {
        let body = LoginRequest {
            email: Some(email.to_string()),
            password: Some(password.to_string()),
        };
        let resp = Self::send(self.http.post(self.url("/api/auth/login")).json(&body)).await?;
        let login: LoginResponse = Self::decode(resp).await?;
        self.token = Some(login.token.clone());
        Ok(login)
    }

    pub async fn session(&self) -> Result<SessionInfo> {
        let req = self.authorized(self.http.get(self.url("/api/auth/session")))?;
        Self::decode(Self::send(req).await?).await
    }

    pub async fn logout(&mut self) -> Result<bool> {
        let req = self.authorized(self.http.post(self.url("/api/auth/logout")))?;
        let resp: LogoutResponse = Self::decode(Self::send(req).await?).await?;
        self.token = None;
        Ok(resp.revoked)
    }

    pub async fn announce(&self, username: &str, peer_id: &str) -> Result<()> {
        let body = PeerRegistration::new(username, peer_id);
        let resp = Self::send(self.http.post(self.url("/api/peers")).json(&body)).await?;
        let _: peercall_common::PeerRegistered = Self::decode(resp).await?;
        Ok(())
    }

    /// `Ok(None)` when the user has no announced peer id.
    pub async fn lookup(&self, username: &str) -> Result<Option<String>> {
        let req = self
            .http
            .get(self.url("/api/peers"))
            .query(&[("username", username)]);
        let resp = Self::send(req).await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let found: PeerLookup = Self::decode(resp).await?;
        Ok(Some(found.peer_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_server() {
        assert_eq!(
            normalize_server(Some(" http://call.example.com/ ".into())),
            "http://call.example.com"
        );
        assert_eq!(normalize_server(Some("  ".into())), DEFAULT_SERVER);
        assert_eq!(normalize_server(None), DEFAULT_SERVER);
    }

    #[test]
    fn test_blank_token_is_dropped() {
        let client = GatewayClient::new(DEFAULT_SERVER).with_token(Some("  ".into()));
        assert!(client.token().is_none());
    }

    #[tokio::test]
    async fn test_authorized_calls_need_a_token() {
        let client = GatewayClient::new(DEFAULT_SERVER);
        let err = client.session().await.unwrap_err();
        assert!(matches!(err, Error::Auth(_)));
    }
}
