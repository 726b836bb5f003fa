use axum::extract::State;
use axum::http::header::SET_COOKIE;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{AppendHeaders, IntoResponse};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use super::SharedServices;
use crate::auth::{read_cookie, AuthError, LoginOutcome, REFRESH_COOKIE};
use crate::error::AppError;

#[derive(Debug, Deserialize)]
pub(crate) struct LoginRequest {
    email: String,
    password: String,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct RefreshRequest {
    #[serde(default)]
    refresh_token: Option<String>,
}

fn session_response(services: &SharedServices, outcome: LoginOutcome) -> impl IntoResponse {
    let [session, refresh] = services.auth.cookies(&outcome);
    let body = json!({
        "user": outcome.user,
        "access_token": outcome.session.token,
        "expires_at": outcome.session.expires_at,
        "refresh_expires_at": outcome.refresh.expires_at,
    });
    (
        AppendHeaders([(SET_COOKIE, session), (SET_COOKIE, refresh)]),
        Json(body),
    )
}

/// Refresh token from the scoped cookie, or from the body for non-browser clients.
fn presented_refresh_token(headers: &HeaderMap, body: Option<Json<RefreshRequest>>) -> Option<String> {
    read_cookie(headers, REFRESH_COOKIE).or_else(|| {
        body.and_then(|Json(request)| request.refresh_token)
            .filter(|token| !token.trim().is_empty())
    })
}

pub(crate) async fn login(
    State(services): State<SharedServices>,
    Json(request): Json<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let outcome = services
        .auth
        .login(&request.email, &request.password, Utc::now())?;
    Ok(session_response(&services, outcome))
}

pub(crate) async fn refresh(
    State(services): State<SharedServices>,
    headers: HeaderMap,
    body: Option<Json<RefreshRequest>>,
) -> Result<impl IntoResponse, AppError> {
    let token = presented_refresh_token(&headers, body).ok_or(AuthError::MissingToken)?;
    let outcome = services.auth.refresh(&token, Utc::now())?;
    Ok(session_response(&services, outcome))
}

pub(crate) async fn logout(
    State(services): State<SharedServices>,
    headers: HeaderMap,
    body: Option<Json<RefreshRequest>>,
) -> Result<impl IntoResponse, AppError> {
    if let Some(token) = presented_refresh_token(&headers, body) {
        services.auth.logout(&token, Utc::now())?;
    }
    let [session, refresh] = services.auth.logout_cookies();
    Ok((
        StatusCode::NO_CONTENT,
        AppendHeaders([(SET_COOKIE, session), (SET_COOKIE, refresh)]),
    ))
}

pub(crate) async fn me(
    State(services): State<SharedServices>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let actor = services.actor(&headers)?;
    let user = services.auth.current_user(&actor)?;
    Ok(Json(user))
}
