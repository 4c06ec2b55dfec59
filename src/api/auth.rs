use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post, MethodRouter},
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{ApiError, ApiJson, AppState};
use crate::auth::{self, AuthError, AuthUser, TokenKind, REFRESH_COOKIE};

pub(super) fn routes() -> Vec<(&'static str, MethodRouter<AppState>)> {
    vec![
        ("/auth/login", post(login)),
        ("/auth/refresh", post(refresh)),
        ("/auth/logout", post(logout)),
        ("/auth/user", get(current_user)),
    ]
}

#[derive(Deserialize)]
struct LoginRequest {
    username: Option<String>,
    password: Option<String>,
}

#[derive(Deserialize, Default)]
struct RefreshRequest {
    refresh: Option<String>,
}

#[derive(Serialize)]
struct AccessResponse {
    access: String,
}

#[derive(Serialize)]
struct UserInfo {
    id: String,
    username: String,
    email: String,
}

fn refresh_cookie(token: &str, max_age_secs: i64, secure: bool) -> String {
    let mut cookie = format!(
        "{}={}; HttpOnly; SameSite=Lax; Path=/; Max-Age={}",
        REFRESH_COOKIE, token, max_age_secs
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// Refresh token from an optional JSON body `{"refresh": ...}`, else the cookie.
fn refresh_token_from(headers: &HeaderMap, body: &[u8]) -> Result<Option<String>, ApiError> {
    let request: RefreshRequest = if body.iter().all(u8::is_ascii_whitespace) {
        RefreshRequest::default()
    } else {
        serde_json::from_slice(body)
            .map_err(|e| ApiError::validation(format!("malformed JSON body: {}", e)))?
    };
    Ok(request
        .refresh
        .filter(|t| !t.trim().is_empty())
        .or_else(|| auth::cookie_value(headers, REFRESH_COOKIE).map(String::from)))
}

// POST /auth/login
async fn login(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<LoginRequest>,
) -> Result<Response, ApiError> {
    let key = req.username.clone().unwrap_or_default();
    if state.login_limiter.check_key(&key).is_err() {
        return Err(AuthError::TooManyAttempts.into());
    }
    let (user, pair) = state.db.transaction(|repo| {
        let user = auth::authenticate(repo, req.username.as_deref(), req.password.as_deref())?;
        let pair = state.keys.issue_pair(&user)?;
        Ok::<_, AuthError>((user, pair))
    })?;
    tracing::info!(user = %user.id, "login");

    let cookie = refresh_cookie(&pair.refresh, state.keys.refresh_ttl().num_seconds(), state.cookie_secure);
    Ok((StatusCode::OK, [(header::SET_COOKIE, cookie)], Json(pair)).into_response())
}

// POST /auth/refresh
async fn refresh(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<AccessResponse>, ApiError> {
    let token = refresh_token_from(&headers, &body)?.ok_or(AuthError::MissingToken)?;
    let access = state.db.transaction(|repo| {
        let claims = auth::check_refresh(repo, &state.keys, &token)?;
        let user = repo.get_user(&claims.sub)?.ok_or(AuthError::InvalidToken)?;
        state.keys.issue(&user, TokenKind::Access)
    })?;
    Ok(Json(AccessResponse { access }))
}

// POST /auth/logout
async fn logout(
    State(state): State<AppState>,
    user: AuthUser,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    if let Some(token) = refresh_token_from(&headers, &body)? {
        state
            .db
            .transaction(|repo| auth::revoke_refresh(repo, &state.keys, &token, &user.id))?;
    }
    tracing::info!(user = %user.id, "logout");

    let cleared = refresh_cookie("", 0, state.cookie_secure);
    Ok((
        StatusCode::OK,
        [(header::SET_COOKIE, cleared)],
        Json(json!({ "message": "logged out" })),
    )
        .into_response())
}

// GET /auth/user
async fn current_user(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<UserInfo>, ApiError> {
    let stored = state
        .db
        .transaction(|repo| repo.get_user(&user.id))?
        .ok_or(AuthError::InvalidToken)?;
    Ok(Json(UserInfo { id: stored.id, username: stored.username, email: stored.email }))
}
