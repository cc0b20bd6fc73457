//! Account and session handlers.

use axum::{Extension, Json, extract::State, response::IntoResponse};
use axum_extra::extract::CookieJar;
use serde::Deserialize;

use crate::domain::entities::UserPatch;
use crate::infra::http::error::{ApiError, ok_envelope};
use crate::infra::http::middleware::{CurrentUser, RequestContext};
use crate::infra::http::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationRequest {
    pub email: String,
    pub name: String,
    pub password: String,
    /// Accepted for compatibility with older clients; unused.
    #[serde(default)]
    pub invite_id: String,
}

pub async fn register(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(body): Json<RegistrationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .accounts
        .register(&body.email, &body.name, &body.password)
        .await
        .map_err(|err| ApiError::from_app(err, ctx.request_id))?;
    Ok(ok_envelope())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

pub async fn login(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    jar: CookieJar,
    Json(body): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (_, cookie) = state
        .sessions
        .login(&body.email, &body.password)
        .await
        .map_err(|err| ApiError::from_app(err.into(), ctx.request_id))?;
    Ok((jar.add(cookie), ok_envelope()))
}

pub async fn logout_me(State(state): State<AppState>, jar: CookieJar) -> impl IntoResponse {
    (jar.add(state.sessions.expired_cookie()), ok_envelope())
}

pub async fn logout_all(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    jar: CookieJar,
) -> impl IntoResponse {
    let cookie = state.sessions.logout_all(&user).await;
    (jar.add(cookie), ok_envelope())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserRequest {
    pub name: Option<String>,
    pub description: Option<String>,
}

pub async fn update_user(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Json(body): Json<UpdateUserRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .accounts
        .update_profile(
            &user,
            UserPatch {
                name: body.name,
                description: body.description,
            },
        )
        .await
        .map_err(|err| ApiError::from_app(err, ctx.request_id))?;
    Ok(ok_envelope())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub old_password: String,
    pub new_password: String,
}

pub async fn change_password(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Json(body): Json<ChangePasswordRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .accounts
        .change_password(&user, &body.old_password, &body.new_password)
        .await
        .map_err(|err| ApiError::from_app(err, ctx.request_id))?;
    Ok(ok_envelope())
}
