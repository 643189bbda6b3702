//! HTTP handlers.

use axum::{
    Json,
    extract::State,
    http::{StatusCode, header::SET_COOKIE},
    response::{AppendHeaders, IntoResponse},
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use super::error::{ApiError, ApiResult};
use super::state::AppState;
use crate::auth::{AUTH_COOKIE, CurrentUser};
use crate::chat::{Author, StoredMessage, Submission};
use crate::user::{Credentials, UserInfo};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============================================================================
// Auth Handlers
// ============================================================================

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: UserInfo,
}

/// POST /auth/register
#[instrument(skip(state, request), fields(username = %request.username))]
pub async fn register(
    State(state): State<AppState>,
    Json(request): Json<Credentials>,
) -> ApiResult<(StatusCode, Json<UserInfo>)> {
    let user = state
        .users
        .register(&request.username, &request.password)
        .await?;
    Ok((StatusCode::CREATED, Json(user.info())))
}

/// POST /auth/login
#[instrument(skip(state, request), fields(username = %request.username))]
pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<Credentials>,
) -> ApiResult<impl IntoResponse> {
    let user = state
        .users
        .verify_credentials(&request.username, &request.password)
        .await?
        .ok_or_else(|| ApiError::unauthorized("Invalid username or password"))?;

    let user_info = user.info();
    let token = state.auth.generate_token(&user_info)?;
    let cookie = format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        AUTH_COOKIE,
        token,
        state.auth.token_ttl_secs()
    );

    info!(user_id = user_info.id, "User logged in successfully");

    Ok((
        AppendHeaders([(SET_COOKIE, cookie)]),
        Json(LoginResponse {
            token,
            user: user_info,
        }),
    ))
}

/// POST /auth/logout
pub async fn logout() -> impl IntoResponse {
    let cookie = format!("{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0", AUTH_COOKIE);
    (AppendHeaders([(SET_COOKIE, cookie)]), StatusCode::NO_CONTENT)
}

// ============================================================================
// Message Handlers
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct PostMessageRequest {
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct PostMessageResponse {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stored: Option<StoredMessage>,
}

/// POST /messages
///
/// `/stock=CODE` is queued and answered later by the bot (202); anything else
/// is stored and broadcast (201).
#[instrument(skip(state, user, request), fields(user_id = user.id))]
pub async fn post_message(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(request): Json<PostMessageRequest>,
) -> ApiResult<(StatusCode, Json<PostMessageResponse>)> {
    let author = Author::new(user.id, user.username);
    match state.chat.submit(&author, &request.content).await? {
        Submission::Queued(_) => Ok((
            StatusCode::ACCEPTED,
            Json(PostMessageResponse {
                message: "Stock command received and processing".to_string(),
                stored: None,
            }),
        )),
        Submission::Broadcast(stored) => Ok((
            StatusCode::CREATED,
            Json(PostMessageResponse {
                message: "Message saved.".to_string(),
                stored: Some(stored),
            }),
        )),
    }
}

/// GET /messages
pub async fn list_messages(
    State(state): State<AppState>,
    _user: CurrentUser,
) -> ApiResult<Json<Vec<StoredMessage>>> {
    Ok(Json(state.chat.history().await?))
}
