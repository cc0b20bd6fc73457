//! Photo upload and removal. The request body is the raw image; the
//! format tag arrives as an `ext` query parameter.

use axum::{
    Extension, Json,
    body::Bytes,
    extract::{Path, Query, State},
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};

use crate::infra::http::error::{ApiError, ok_envelope};
use crate::infra::http::middleware::{CurrentUser, RequestContext};
use crate::infra::http::state::AppState;

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    pub ext: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub photo_id: i64,
}

pub async fn upload(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(adv_id): Path<i64>,
    Query(query): Query<UploadQuery>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let photo_id = state
        .listings
        .add_photo(&user, adv_id, &query.ext, &body)
        .await
        .map_err(|err| ApiError::from_app(err, ctx.request_id))?;
    Ok(Json(UploadResponse { photo_id }))
}

pub async fn remove(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path((adv_id, photo_id)): Path<(i64, i64)>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .listings
        .delete_photo(&user, adv_id, photo_id)
        .await
        .map_err(|err| ApiError::from_app(err, ctx.request_id))?;
    Ok(ok_envelope())
}
