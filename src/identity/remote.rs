use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::error::AuthError;
use super::principal::Principal;
use super::provider::{AuthStore, LoginRequest, SessionChange, SessionEvent};
use super::roles::Role;
use super::session::Session;
use super::token_cache::TokenCache;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub timeout: Duration,
}

impl ClientConfig {
    pub fn new<S: Into<String>>(base_url: S) -> Self {
        Self { base_url: base_url.into(), timeout: Duration::from_secs(10) }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct SignupRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_to: Option<&'a str>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RoleCheck {
    pub has_role: bool,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: AuthError,
}

/// `AuthStore` over the server's `/auth/v1` routes.
pub struct HttpAuthStore {
    client: reqwest::Client,
    base: String,
    cache: TokenCache,
    events: broadcast::Sender<SessionChange>,
}

fn transport(err: reqwest::Error) -> AuthError {
    AuthError::unavailable(err.to_string())
}

async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T, AuthError> {
    let status = resp.status();
    if status.is_success() {
        return resp
            .json::<T>()
            .await
            .map_err(|e| AuthError::unavailable(format!("invalid response body: {}", e)));
    }
    match resp.json::<ErrorBody>().await {
        Ok(body) => Err(body.error),
        Err(_) => Err(AuthError::unavailable(format!("unexpected HTTP status {}", status))),
    }
}

impl HttpAuthStore {
    pub fn new(cfg: ClientConfig, cache: TokenCache) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(cfg.timeout)
            .build()
            .context("building auth HTTP client")?;
        let (events, _) = broadcast::channel(32);
        Ok(Self { client, base: cfg.base_url.trim_end_matches('/').to_string(), cache, events })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    fn authed(&self, req: RequestBuilder, token: Option<&str>) -> RequestBuilder {
        match token {
            Some(t) => req.bearer_auth(t),
            None => req,
        }
    }

    /// Best-effort logout of a token this client no longer holds.
    async fn end_remote(&self, token: &str) {
        let res = self.client.post(self.url("/auth/v1/logout")).bearer_auth(token).send().await;
        match res {
            Ok(resp) if resp.status().is_success() => {}
            Ok(resp) => warn!(target: "auth", status = %resp.status(), "failed to end replaced session"),
            Err(e) => warn!(target: "auth", "failed to end replaced session: {}", e),
        }
    }

    fn emit(&self, change: SessionChange) {
        let _ = self.events.send(change);
    }
}

#[async_trait]
impl AuthStore for HttpAuthStore {
    async fn sign_in(&self, identity: &str, secret: &str) -> Result<Session, AuthError> {
        let body = LoginRequest { email: identity.to_string(), password: secret.to_string() };
        let resp = self.client.post(self.url("/auth/v1/token")).json(&body).send().await.map_err(transport)?;
        let session: Session = decode(resp).await?;
        if let Some(prev) = self.cache.load().filter(|t| *t != session.token) {
            self.end_remote(&prev).await;
        }
        self.cache.store(&session.token);
        self.emit(SessionChange::signed_in(session.clone()));
        Ok(session)
    }

    async fn sign_up(&self, identity: &str, secret: &str, redirect_to: Option<&str>) -> Result<Principal, AuthError> {
        let body = SignupRequest { email: identity, password: secret, redirect_to };
        let resp = self.client.post(self.url("/auth/v1/signup")).json(&body).send().await.map_err(transport)?;
        decode(resp).await
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        let Some(token) = self.cache.clear() else { return Ok(()); };
        self.emit(SessionChange::ended(SessionEvent::SignedOut, Some(token.clone())));
        let resp = self
            .client
            .post(self.url("/auth/v1/logout"))
            .bearer_auth(&token)
            .send()
            .await
            .map_err(transport)?;
        if resp.status().is_success() { Ok(()) } else { Err(AuthError::unavailable(format!("logout returned {}", resp.status()))) }
    }

    async fn current_session(&self) -> Result<Option<Session>, AuthError> {
        let Some(token) = self.cache.load() else { return Ok(None); };
        let resp = self
            .client
            .get(self.url("/auth/v1/session"))
            .bearer_auth(&token)
            .send()
            .await
            .map_err(transport)?;
        if resp.status() == StatusCode::UNAUTHORIZED {
            debug!(target: "auth", "cached session rejected by server");
            self.cache.clear();
            self.emit(SessionChange::ended(SessionEvent::Expired, Some(token)));
            return Ok(None);
        }
        decode::<Session>(resp).await.map(Some)
    }

    async fn has_role(&self, user_id: &str, role: Role) -> Result<bool, AuthError> {
        let token = self.cache.load();
        let req = self.client.get(self.url(&format!("/auth/v1/roles/{}/{}", user_id, role)));
        let resp = self.authed(req, token.as_deref()).send().await.map_err(transport)?;
        let check: RoleCheck = decode(resp).await?;
        Ok(check.has_role)
    }

    fn subscribe(&self) -> broadcast::Receiver<SessionChange> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreachable_server_is_store_unavailable() {
        // Port 9 (discard) on loopback is expected to refuse connections.
        let store = HttpAuthStore::new(
            ClientConfig { base_url: "http://127.0.0.1:9/".into(), timeout: Duration::from_secs(2) },
            TokenCache::memory(),
        )
        .unwrap();
        let err = store.sign_in("a@x.com", "secret1").await.unwrap_err();
        assert!(matches!(err, AuthError::StoreUnavailable { .. }));
        assert!(store.current_session().await.unwrap().is_none());
        store.sign_out().await.unwrap();
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let store = HttpAuthStore::new(ClientConfig::new("http://localhost:7878/"), TokenCache::memory()).unwrap();
        assert_eq!(store.url("/auth/v1/token"), "http://localhost:7878/auth/v1/token");
    }
}
