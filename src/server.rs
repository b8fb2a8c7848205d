//!
//! docket HTTP server
//! ------------------
//! This module defines the Axum-based HTTP API for docket.
//!
//! Responsibilities:
//! - Session management with a simple cookie + CSRF token model.
//! - Login/logout/password endpoints backed by the identity module.
//! - Role-gated account administration, document requests, notifications.
//! - Background idle-session sweep.
//! - Default administrator seeding and startup inventory logs.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{routing::{get, post}, Router, extract::{State, Path}, Json};
use axum::response::{IntoResponse, Response};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, error};
use anyhow::Context;

use crate::error::AppError;
use crate::identity::{can_access, AuthManager, JsonAccountStore, LoginRequest, NewAccount, Role, Session, SessionManager};
use crate::notify::NotificationStore;
use crate::requests::RequestStore;
use crate::security::AuthPolicy;

const SESSION_COOKIE: &str = "docket_session";

/// Shared server state injected into all handlers.
#[derive(Clone)]
pub struct AppState {
    pub auth: Arc<AuthManager>,
    pub requests: Arc<RequestStore>,
    pub notifications: Arc<NotificationStore>,
}

fn parse_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    let raw = headers.get(axum::http::header::COOKIE)?.to_str().ok()?;
    for part in raw.split(';') {
        let part = part.trim();
        if let Some((k, v)) = part.split_once('=') {
            if k == name { return Some(v.to_string()); }
        }
    }
    None
}

fn set_session_cookie(token: &str) -> HeaderValue {
    // Secure, HttpOnly cookie scoped to path / with SameSite=Strict
    HeaderValue::from_str(&format!("{}={}; HttpOnly; Secure; SameSite=Strict; Path=/", SESSION_COOKIE, token)).unwrap()
}

fn clear_session_cookie() -> HeaderValue {
    HeaderValue::from_str(&format!("{}=deleted; Expires=Thu, 01 Jan 1970 00:00:00 GMT; HttpOnly; Secure; SameSite=Strict; Path=/", SESSION_COOKIE)).unwrap()
}

fn fail(e: AppError) -> Response {
    let status = StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let code = e.code_str();
    let message = e.message();
    (status, Json(json!({"status": "error", "code": code, "message": message, "error": e}))).into_response()
}

/// Resolve the calling session and gate it against the route table. While a
/// password change is pending, everything except the change itself (and
/// logout/me/csrf) is refused.
fn gate(state: &AppState, headers: &HeaderMap, target: &str) -> Result<Session, AppError> {
    let token = parse_cookie(headers, SESSION_COOKIE).ok_or(AppError::Unauthorized)?;
    let sess = state.auth.current(&token).ok_or(AppError::Unauthorized)?;
    if sess.password_change_required
        && !matches!(target, "/password" | "/me" | "/csrf" | "/logout")
    {
        return Err(AppError::forbidden("password change required before continuing"));
    }
    if !can_access(sess.principal.role, target) {
        return Err(AppError::forbidden(format!("role {} cannot access {}", sess.principal.role, target)));
    }
    Ok(sess)
}

fn validate_csrf(sess: &Session, headers: &HeaderMap) -> Result<(), AppError> {
    let provided = headers.get("x-csrf-token").and_then(|v| v.to_str().ok());
    if provided == Some(sess.csrf.as_str()) { Ok(()) } else { Err(AppError::forbidden("invalid csrf token")) }
}

#[derive(Deserialize)]
struct LoginPayload {
    #[serde(default)]
    handle: String,
    #[serde(default)]
    password: String,
}

async fn login(State(state): State<AppState>, headers: HeaderMap, Json(payload): Json<LoginPayload>) -> Response {
    let ip = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.split(',').next().unwrap_or(s).trim().to_string());
    let req = LoginRequest { handle: payload.handle, password: payload.password, ip };
    match state.auth.login(&req) {
        Ok(resp) => {
            let mut h = HeaderMap::new();
            h.insert("Set-Cookie", set_session_cookie(&resp.session.token));
            let body = json!({
                "status": "ok",
                "role": resp.session.principal.role,
                "display_name": resp.session.principal.display_name,
                "password_change_required": resp.session.password_change_required,
                "csrf": resp.session.csrf,
            });
            (StatusCode::OK, h, Json(body)).into_response()
        }
        Err(e) => fail(e),
    }
}

async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    // Idempotent: a missing or dead session still clears the cookie.
    if let Some(token) = parse_cookie(&headers, SESSION_COOKIE) {
        if let Some(sess) = state.auth.current(&token) {
            if let Err(e) = validate_csrf(&sess, &headers) { return fail(e); }
        }
        state.auth.logout(&token);
    }
    let mut h = HeaderMap::new();
    h.insert("Set-Cookie", clear_session_cookie());
    (StatusCode::OK, h, Json(json!({"status": "ok"}))).into_response()
}

async fn get_csrf(State(state): State<AppState>, headers: HeaderMap) -> Response {
    match gate(&state, &headers, "/csrf") {
        Ok(sess) => (StatusCode::OK, Json(json!({"csrf": sess.csrf}))).into_response(),
        Err(e) => fail(e),
    }
}

async fn me(State(state): State<AppState>, headers: HeaderMap) -> Response {
    match gate(&state, &headers, "/me") {
        Ok(sess) => {
            let unread = state.notifications.unread_count(&sess.principal.account_id);
            (StatusCode::OK, Json(json!({
                "principal": sess.principal,
                "password_change_required": sess.password_change_required,
                "unread_notifications": unread,
            }))).into_response()
        }
        Err(e) => fail(e),
    }
}

#[derive(Deserialize)]
struct PasswordPayload {
    new_password: String,
}

async fn change_password(State(state): State<AppState>, headers: HeaderMap, Json(payload): Json<PasswordPayload>) -> Response {
    let sess = match gate(&state, &headers, "/password") { Ok(s) => s, Err(e) => return fail(e) };
    if let Err(e) = validate_csrf(&sess, &headers) { return fail(e); }
    match state.auth.update_password(&sess.principal.account_id, &payload.new_password) {
        Ok(()) => {
            state.auth.sessions.clear_password_change(&sess.token);
            (StatusCode::OK, Json(json!({"status": "ok"}))).into_response()
        }
        Err(e) => fail(e),
    }
}

#[derive(Deserialize)]
struct NewAccountPayload {
    display_name: String,
    handle: String,
    role: Role,
    #[serde(default)]
    org_id: Option<String>,
}

async fn admin_create_account(State(state): State<AppState>, headers: HeaderMap, Json(payload): Json<NewAccountPayload>) -> Response {
    let sess = match gate(&state, &headers, "/admin/accounts") { Ok(s) => s, Err(e) => return fail(e) };
    if let Err(e) = validate_csrf(&sess, &headers) { return fail(e); }
    let new = NewAccount {
        display_name: payload.display_name,
        handle: payload.handle,
        role: payload.role,
        org_id: payload.org_id,
    };
    match state.auth.create_account(new) {
        Ok((rec, temp)) => (StatusCode::OK, Json(json!({
            "status": "ok",
            "id": rec.id,
            "handle": rec.handle,
            "role": rec.canonical_role(),
            // shown exactly once; only the hash is stored
            "temp_password": temp,
            "temp_expires_at": rec.temp_expires_at,
        }))).into_response(),
        Err(e) => fail(e),
    }
}

async fn admin_list_accounts(State(state): State<AppState>, headers: HeaderMap) -> Response {
    match gate(&state, &headers, "/admin/accounts") {
        Ok(_) => match state.auth.list_accounts() {
            Ok(accounts) => {
                let rows: Vec<serde_json::Value> = accounts
                    .iter()
                    .map(|a| json!({
                        "id": a.id,
                        "display_name": a.display_name,
                        "handle": a.handle,
                        "role": a.canonical_role(),
                        "active": a.active,
                        "failed_attempts": a.failed_attempts,
                        "locked_at": a.locked_at,
                        "last_login_at": a.last_login_at,
                        "org_id": a.org_id,
                    }))
                    .collect();
                (StatusCode::OK, Json(json!({"accounts": rows}))).into_response()
            }
            Err(e) => fail(e),
        },
        Err(e) => fail(e),
    }
}

async fn admin_unlock(State(state): State<AppState>, headers: HeaderMap, Path(id): Path<String>) -> Response {
    let sess = match gate(&state, &headers, "/admin/accounts") { Ok(s) => s, Err(e) => return fail(e) };
    if let Err(e) = validate_csrf(&sess, &headers) { return fail(e); }
    match state.auth.unlock_account(&id) {
        Ok(rec) => (StatusCode::OK, Json(json!({"status": "ok", "handle": rec.handle, "active": rec.active}))).into_response(),
        Err(e) => fail(e),
    }
}

#[derive(Deserialize)]
struct RolePayload {
    role: Role,
}

async fn admin_set_role(State(state): State<AppState>, headers: HeaderMap, Path(id): Path<String>, Json(payload): Json<RolePayload>) -> Response {
    let sess = match gate(&state, &headers, "/admin/accounts") { Ok(s) => s, Err(e) => return fail(e) };
    if let Err(e) = validate_csrf(&sess, &headers) { return fail(e); }
    match state.auth.set_role(&id, payload.role) {
        Ok(rec) => (StatusCode::OK, Json(json!({"status": "ok", "handle": rec.handle, "role": rec.canonical_role()}))).into_response(),
        Err(e) => fail(e),
    }
}

async fn admin_reset_credential(State(state): State<AppState>, headers: HeaderMap, Path(id): Path<String>) -> Response {
    let sess = match gate(&state, &headers, "/admin/accounts") { Ok(s) => s, Err(e) => return fail(e) };
    if let Err(e) = validate_csrf(&sess, &headers) { return fail(e); }
    match state.auth.issue_temp_credential(&id) {
        Ok(temp) => (StatusCode::OK, Json(json!({"status": "ok", "temp_password": temp}))).into_response(),
        Err(e) => fail(e),
    }
}

async fn admin_deactivate(State(state): State<AppState>, headers: HeaderMap, Path(id): Path<String>) -> Response {
    let sess = match gate(&state, &headers, "/admin/accounts") { Ok(s) => s, Err(e) => return fail(e) };
    if let Err(e) = validate_csrf(&sess, &headers) { return fail(e); }
    match state.auth.deactivate(&id) {
        Ok(rec) => (StatusCode::OK, Json(json!({"status": "ok", "handle": rec.handle, "active": rec.active}))).into_response(),
        Err(e) => fail(e),
    }
}

/// Active staff (administrator + user) account ids, for request fan-out.
fn staff_account_ids(state: &AppState) -> Vec<String> {
    match state.auth.list_accounts() {
        Ok(accounts) => accounts
            .iter()
            .filter(|a| a.active && matches!(a.canonical_role(), Role::Administrator | Role::User))
            .map(|a| a.id.clone())
            .collect(),
        Err(e) => {
            error!("staff lookup for fan-out failed: {}", e);
            Vec::new()
        }
    }
}

/// Active account ids of one organization, for response fan-out.
fn org_account_ids(state: &AppState, org_id: &str) -> Vec<String> {
    match state.auth.list_accounts() {
        Ok(accounts) => accounts
            .iter()
            .filter(|a| a.active && a.org_id.as_deref() == Some(org_id))
            .map(|a| a.id.clone())
            .collect(),
        Err(e) => {
            error!("org lookup for fan-out failed: {}", e);
            Vec::new()
        }
    }
}

#[derive(Deserialize)]
struct SubmitPayload {
    title: String,
    #[serde(default)]
    detail: String,
}

async fn submit_request(State(state): State<AppState>, headers: HeaderMap, Json(payload): Json<SubmitPayload>) -> Response {
    let sess = match gate(&state, &headers, "/requests") { Ok(s) => s, Err(e) => return fail(e) };
    if let Err(e) = validate_csrf(&sess, &headers) { return fail(e); }
    if sess.principal.role != Role::Organization {
        return fail(AppError::forbidden("only organization accounts submit requests"));
    }
    let Some(org_id) = sess.principal.attrs.org_id.clone() else {
        return fail(AppError::validation("organization account has no org_id"));
    };
    match state.requests.submit(&org_id, &sess.principal.account_id, &payload.title, &payload.detail) {
        Ok(req) => {
            let recipients = staff_account_ids(&state);
            if let Err(e) = state.notifications.fan_out(
                &recipients,
                &format!("New request: {}", req.title),
                Some(&req.id),
            ) {
                error!("notification fan-out failed: {}", e);
            }
            (StatusCode::OK, Json(json!({"status": "ok", "request": req}))).into_response()
        }
        Err(e) => fail(e),
    }
}

async fn list_requests(State(state): State<AppState>, headers: HeaderMap) -> Response {
    match gate(&state, &headers, "/requests") {
        Ok(sess) => {
            let rows = match sess.principal.role {
                // Organizations only ever see their own
                Role::Organization => match sess.principal.attrs.org_id.as_deref() {
                    Some(org) => state.requests.list_for_org(org),
                    None => Vec::new(),
                },
                Role::Administrator | Role::User => state.requests.list_all(),
            };
            (StatusCode::OK, Json(json!({"requests": rows}))).into_response()
        }
        Err(e) => fail(e),
    }
}

fn staff_only(sess: &Session) -> Result<(), AppError> {
    match sess.principal.role {
        Role::Administrator | Role::User => Ok(()),
        Role::Organization => Err(AppError::forbidden("staff only")),
    }
}

async fn review_request(State(state): State<AppState>, headers: HeaderMap, Path(id): Path<String>) -> Response {
    let sess = match gate(&state, &headers, "/requests") { Ok(s) => s, Err(e) => return fail(e) };
    if let Err(e) = validate_csrf(&sess, &headers) { return fail(e); }
    if let Err(e) = staff_only(&sess) { return fail(e); }
    match state.requests.begin_review(&id) {
        Ok(req) => (StatusCode::OK, Json(json!({"status": "ok", "request": req}))).into_response(),
        Err(e) => fail(e),
    }
}

#[derive(Deserialize)]
struct RespondPayload {
    response: String,
}

async fn respond_request(State(state): State<AppState>, headers: HeaderMap, Path(id): Path<String>, Json(payload): Json<RespondPayload>) -> Response {
    let sess = match gate(&state, &headers, "/requests") { Ok(s) => s, Err(e) => return fail(e) };
    if let Err(e) = validate_csrf(&sess, &headers) { return fail(e); }
    if let Err(e) = staff_only(&sess) { return fail(e); }
    match state.requests.respond(&id, &sess.principal.account_id, &payload.response) {
        Ok(req) => {
            let recipients = org_account_ids(&state, &req.org_id);
            if let Err(e) = state.notifications.fan_out(
                &recipients,
                &format!("Response to: {}", req.title),
                Some(&req.id),
            ) {
                error!("notification fan-out failed: {}", e);
            }
            (StatusCode::OK, Json(json!({"status": "ok", "request": req}))).into_response()
        }
        Err(e) => fail(e),
    }
}

async fn close_request(State(state): State<AppState>, headers: HeaderMap, Path(id): Path<String>) -> Response {
    let sess = match gate(&state, &headers, "/requests") { Ok(s) => s, Err(e) => return fail(e) };
    if let Err(e) = validate_csrf(&sess, &headers) { return fail(e); }
    if let Err(e) = staff_only(&sess) { return fail(e); }
    match state.requests.close(&id) {
        Ok(req) => (StatusCode::OK, Json(json!({"status": "ok", "request": req}))).into_response(),
        Err(e) => fail(e),
    }
}

async fn list_notifications(State(state): State<AppState>, headers: HeaderMap) -> Response {
    match gate(&state, &headers, "/notifications") {
        Ok(sess) => {
            let rows = state.notifications.list_for(&sess.principal.account_id);
            let unread = state.notifications.unread_count(&sess.principal.account_id);
            (StatusCode::OK, Json(json!({"notifications": rows, "unread": unread}))).into_response()
        }
        Err(e) => fail(e),
    }
}

#[derive(Deserialize)]
struct MarkReadPayload {
    ids: Vec<String>,
}

async fn mark_notifications_read(State(state): State<AppState>, headers: HeaderMap, Json(payload): Json<MarkReadPayload>) -> Response {
    let sess = match gate(&state, &headers, "/notifications") { Ok(s) => s, Err(e) => return fail(e) };
    if let Err(e) = validate_csrf(&sess, &headers) { return fail(e); }
    match state.notifications.mark_read(&sess.principal.account_id, &payload.ids) {
        Ok(n) => (StatusCode::OK, Json(json!({"status": "ok", "marked": n}))).into_response(),
        Err(e) => fail(e),
    }
}

fn log_startup_folders(data_root: &str) {
    let cwd = std::env::current_dir().ok();
    let exe = std::env::current_exe().ok();
    let data_env = std::env::var("DOCKET_DATA_FOLDER").ok();
    info!(
        target: "startup",
        "docket starting. Folder configuration: cwd={:?}, exe={:?}, data_root_param={:?}, DOCKET_DATA_FOLDER_env={:?}",
        cwd, exe, data_root, data_env
    );
}

pub fn build_state(data_root: &str, policy: AuthPolicy) -> anyhow::Result<AppState> {
    std::fs::create_dir_all(data_root)
        .with_context(|| format!("Failed to create or access data root: {}", data_root))?;
    let root = std::path::Path::new(data_root);
    let store = Arc::new(
        JsonAccountStore::open(root.join("accounts.json"))
            .with_context(|| "While opening the account store")?,
    );
    let sessions = SessionManager::new(policy.idle_timeout_ms(), Some(root.join("sessions.json")));
    let auth = Arc::new(AuthManager::new(store, sessions, policy));
    auth.ensure_default_admin().map_err(|e| anyhow::anyhow!(e.to_string()))?;
    let requests = Arc::new(RequestStore::open(root.join("requests.json"))?);
    let notifications = Arc::new(NotificationStore::open(root.join("notifications.json"))?);
    Ok(AppState { auth, requests, notifications })
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(|| async { "docket ok" }))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/csrf", get(get_csrf))
        .route("/me", get(me))
        .route("/password", post(change_password))
        .route("/admin/accounts", post(admin_create_account).get(admin_list_accounts))
        .route("/admin/accounts/{id}/unlock", post(admin_unlock))
        .route("/admin/accounts/{id}/role", post(admin_set_role))
        .route("/admin/accounts/{id}/reset", post(admin_reset_credential))
        .route("/admin/accounts/{id}/deactivate", post(admin_deactivate))
        .route("/requests", post(submit_request).get(list_requests))
        .route("/requests/{id}/review", post(review_request))
        .route("/requests/{id}/respond", post(respond_request))
        .route("/requests/{id}/close", post(close_request))
        .route("/notifications", get(list_notifications))
        .route("/notifications/read", post(mark_notifications_read))
        .with_state(state)
}

pub async fn run_with_port(http_port: u16, data_root: &str) -> anyhow::Result<()> {
    log_startup_folders(data_root);
    let policy = AuthPolicy::from_env();
    info!(
        target: "startup",
        "auth policy: max_login_attempts={}, idle_timeout_secs={}, temp_credential_ttl_secs={}",
        policy.max_login_attempts, policy.idle_timeout_secs, policy.temp_credential_ttl_secs
    );
    let sweep_secs = policy.session_sweep_secs.max(1);
    let state = build_state(data_root, policy)?;

    // Background idle-session sweep; the single timer in the process.
    let auth_for_sweep = state.auth.clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(sweep_secs)).await;
            let cleared = auth_for_sweep.sessions.sweep(AuthManager::now_ms());
            if cleared > 0 {
                info!(target: "auth", "idle sweep cleared {} session(s)", cleared);
            }
        }
    });

    let app = router(state);
    let addr: SocketAddr = format!("0.0.0.0:{}", http_port).parse()?;
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

pub async fn run() -> anyhow::Result<()> {
    let http_port: u16 = std::env::var("DOCKET_HTTP_PORT")
        .unwrap_or_else(|_| "7878".to_string())
        .parse()
        .unwrap_or(7878);
    let data_root = std::env::var("DOCKET_DATA_FOLDER").unwrap_or_else(|_| "data".to_string());
    run_with_port(http_port, &data_root).await
}
