//!
//! donation ledger HTTP server
//! ---------------------------
//! Axum application hosting three surfaces:
//! - `/auth/v1/*`: principals, bearer sessions and role lookups backed by `AuthBackend`.
//! - `/rest/v1/*`: collections, expenses and the summary. Reads are public;
//!   mutations need a bearer session whose principal holds the admin grant.
//! - `/functions/v1/verify-admin`: the shared-secret verification function.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::header::{ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_ORIGIN, AUTHORIZATION};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use chrono::Duration;
use serde::Deserialize;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::error::{AppError, AppResult};
use crate::identity::{AuthBackend, AuthError, LoginRequest, Role, RoleCheck, Session};
use crate::ledger::{
    Collection, CollectionPatch, Expense, ExpensePatch, LedgerStore, LedgerSummary, NewCollection, NewExpense,
};
use crate::verifier::AdminVerifier;

const FUNCTION_ALLOW_HEADERS: &str = "authorization, x-client-info, apikey, content-type";

/// Shared server state injected into all handlers.
#[derive(Clone)]
pub struct AppState {
    pub backend: Arc<AuthBackend>,
    pub ledger: Arc<LedgerStore>,
    pub verifier: Arc<AdminVerifier>,
}

impl AppState {
    /// Build state from configuration: auth backend, optional bootstrap admin,
    /// ledger file and verifier secret.
    pub fn from_config(cfg: &ServerConfig) -> anyhow::Result<Self> {
        let backend = Arc::new(AuthBackend::new(cfg.min_secret_len, Duration::seconds(cfg.session_ttl_secs)));
        if let Some((identity, secret)) = &cfg.bootstrap_admin {
            let p = backend
                .bootstrap_admin(identity, secret)
                .map_err(anyhow::Error::from)
                .with_context(|| format!("While provisioning bootstrap admin {}", identity))?;
            info!(target: "startup", user_id = %p.user_id, "bootstrap admin ready");
        }
        let ledger = match &cfg.data_file {
            Some(path) => LedgerStore::open(path).with_context(|| format!("While opening ledger {}", path.display()))?,
            None => LedgerStore::in_memory(),
        };
        let verifier = AdminVerifier::new(cfg.admin_password.clone());
        if !verifier.is_configured() {
            warn!(target: "startup", "ADMIN_PASSWORD not set; verify-admin will answer 500");
        }
        Ok(Self { backend, ledger: Arc::new(ledger), verifier: Arc::new(verifier) })
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);
    let api = Router::new()
        .route("/", get(|| async { "donation ledger ok" }))
        .route("/auth/v1/signup", post(signup))
        .route("/auth/v1/token", post(login))
        .route("/auth/v1/logout", post(logout))
        .route("/auth/v1/session", get(current_session))
        .route("/auth/v1/roles/{user_id}/{role}", get(role_check))
        .route("/rest/v1/collections", get(list_collections).post(create_collection))
        .route("/rest/v1/collections/{id}", patch(update_collection).delete(delete_collection))
        .route("/rest/v1/expenses", get(list_expenses).post(create_expense))
        .route("/rest/v1/expenses/{id}", patch(update_expense).delete(delete_expense))
        .route("/rest/v1/summary", get(summary))
        .layer(cors);
    // The function sets its own CORS headers on every response.
    let functions = Router::new().route(
        "/functions/v1/verify-admin",
        post(verify_admin).options(verify_admin_preflight),
    );
    api.merge(functions).with_state(state)
}

/// Start the HTTP server and serve until the listener fails.
pub async fn run(cfg: ServerConfig) -> anyhow::Result<()> {
    let state = AppState::from_config(&cfg)?;
    let app = router(state);
    let addr = SocketAddr::new(cfg.bind, cfg.http_port);
    info!(target: "server", "Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let v = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = v.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") { return None; }
    let token = token.trim();
    (!token.is_empty()).then(|| token.to_string())
}

fn require_session(state: &AppState, headers: &HeaderMap) -> AppResult<Session> {
    let token = bearer_token(headers).ok_or_else(|| AppError::auth("unauthorized", "login required"))?;
    state
        .backend
        .session(&token)
        .ok_or_else(|| AppError::auth("unauthorized", "session expired or invalid"))
}

fn require_admin(state: &AppState, headers: &HeaderMap) -> AppResult<Session> {
    let session = require_session(state, headers)?;
    if !state.backend.has_role(&session.principal.user_id, Role::Admin) {
        warn!(target: "server", user_id = %session.principal.user_id, "ledger mutation without admin grant");
        return Err(AppError::forbidden("forbidden", "admin role required"));
    }
    Ok(session)
}

fn auth_error(err: AuthError) -> Response {
    let status = StatusCode::from_u16(AppError::from(err.clone()).http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(serde_json::json!({"status": "error", "error": err}))).into_response()
}

#[derive(Debug, Deserialize)]
struct SignupPayload {
    email: String,
    password: String,
    #[serde(default)]
    redirect_to: Option<String>,
}

async fn signup(State(state): State<AppState>, Json(payload): Json<SignupPayload>) -> Response {
    if let Some(r) = &payload.redirect_to {
        info!(target: "server", redirect_to = %r, "signup with redirect");
    }
    let backend = state.backend.clone();
    let res = tokio::task::spawn_blocking(move || backend.register(&payload.email, &payload.password))
        .await
        .unwrap_or_else(|e| Err(AuthError::unavailable(e.to_string())));
    match res {
        Ok(principal) => (StatusCode::OK, Json(principal)).into_response(),
        Err(e) => auth_error(e),
    }
}

async fn login(State(state): State<AppState>, Json(payload): Json<LoginRequest>) -> Response {
    let backend = state.backend.clone();
    let res = tokio::task::spawn_blocking(move || backend.authenticate(&payload))
        .await
        .unwrap_or_else(|e| Err(AuthError::unavailable(e.to_string())));
    match res {
        Ok(session) => (StatusCode::OK, Json(session)).into_response(),
        Err(e) => auth_error(e),
    }
}

async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(token) = bearer_token(&headers) {
        state.backend.end_session(&token);
    }
    (StatusCode::OK, Json(serde_json::json!({"status": "ok"}))).into_response()
}

async fn current_session(State(state): State<AppState>, headers: HeaderMap) -> Response {
    match bearer_token(&headers).and_then(|t| state.backend.session(&t)) {
        Some(session) => (StatusCode::OK, Json(session)).into_response(),
        None => auth_error(AuthError::InvalidCredentials),
    }
}

async fn role_check(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((user_id, role)): Path<(String, String)>,
) -> AppResult<Json<RoleCheck>> {
    let role: Role = role.parse().map_err(|e: String| AppError::user("unknown_role".to_string(), e))?;
    let session = require_session(&state, &headers)?;
    if session.principal.user_id != user_id {
        return Err(AppError::forbidden("forbidden", "roles of other principals are not readable"));
    }
    Ok(Json(RoleCheck { has_role: state.backend.has_role(&user_id, role) }))
}

async fn list_collections(State(state): State<AppState>) -> Json<Vec<Collection>> {
    Json(state.ledger.list_collections())
}

async fn create_collection(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<NewCollection>,
) -> AppResult<(StatusCode, Json<Collection>)> {
    require_admin(&state, &headers)?;
    Ok((StatusCode::CREATED, Json(state.ledger.insert_collection(payload)?)))
}

async fn update_collection(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(payload): Json<CollectionPatch>,
) -> AppResult<Json<Collection>> {
    require_admin(&state, &headers)?;
    Ok(Json(state.ledger.update_collection(id, payload)?))
}

async fn delete_collection(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Collection>> {
    require_admin(&state, &headers)?;
    Ok(Json(state.ledger.delete_collection(id)?))
}

async fn list_expenses(State(state): State<AppState>) -> Json<Vec<Expense>> {
    Json(state.ledger.list_expenses())
}

async fn create_expense(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<NewExpense>,
) -> AppResult<(StatusCode, Json<Expense>)> {
    require_admin(&state, &headers)?;
    Ok((StatusCode::CREATED, Json(state.ledger.insert_expense(payload)?)))
}

async fn update_expense(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(payload): Json<ExpensePatch>,
) -> AppResult<Json<Expense>> {
    require_admin(&state, &headers)?;
    Ok(Json(state.ledger.update_expense(id, payload)?))
}

async fn delete_expense(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Expense>> {
    require_admin(&state, &headers)?;
    Ok(Json(state.ledger.delete_expense(id)?))
}

async fn summary(State(state): State<AppState>) -> Json<LedgerSummary> {
    Json(state.ledger.summary())
}

fn function_cors_headers() -> HeaderMap {
    let mut h = HeaderMap::new();
    h.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    h.insert(ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static(FUNCTION_ALLOW_HEADERS));
    h
}

async fn verify_admin(State(state): State<AppState>, body: Bytes) -> Response {
    let out = state.verifier.respond(&body);
    let status = StatusCode::from_u16(out.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, function_cors_headers(), Json(out.body)).into_response()
}

async fn verify_admin_preflight() -> Response {
    (StatusCode::OK, function_cors_headers()).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_parsing() {
        let mut h = HeaderMap::new();
        assert_eq!(bearer_token(&h), None);
        h.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert_eq!(bearer_token(&h).as_deref(), Some("abc"));
        h.insert(AUTHORIZATION, HeaderValue::from_static("bearer   xyz "));
        assert_eq!(bearer_token(&h).as_deref(), Some("xyz"));
        h.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&h), None);
        h.insert(AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(bearer_token(&h), None);
    }
}
