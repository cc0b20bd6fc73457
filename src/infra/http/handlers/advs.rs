//! Advertisement handlers: CRUD, moderation, and the public catalog.

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    response::IntoResponse,
};
use axum_extra::extract::CookieJar;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::application::sessions::AUTH_COOKIE;
use crate::cache::store::{AdvView, CreateAdvParams, ListFilter};
use crate::domain::entities::AdvPatch;
use crate::infra::http::error::{ApiError, ok_envelope};
use crate::infra::http::middleware::{CurrentUser, RequestContext};
use crate::infra::http::state::AppState;
use crate::infra::uploads::PhotoStore;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAdvRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub price: f64,
    pub currency: String,
    #[serde(default)]
    pub lang_tags: Vec<String>,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub address: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub user_comment: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAdvResponse {
    pub adv_id: i64,
}

pub async fn create(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Json(body): Json<CreateAdvRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let adv = state
        .listings
        .create_adv(
            &user,
            CreateAdvParams {
                title: body.title,
                description: body.description,
                price: body.price,
                currency: body.currency,
                lang_tags: body.lang_tags,
                country: body.country,
                city: body.city,
                address: body.address,
                latitude: body.latitude,
                longitude: body.longitude,
                user_comment: body.user_comment,
            },
        )
        .await
        .map_err(|err| ApiError::from_app(err, ctx.request_id))?;
    Ok(Json(CreateAdvResponse { adv_id: adv.id() }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAdvRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub price: Option<f64>,
    pub currency: Option<String>,
    pub lang_tags: Option<Vec<String>>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub address: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub visible: Option<bool>,
    pub user_comment: Option<String>,
}

pub async fn update(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(adv_id): Path<i64>,
    Json(body): Json<UpdateAdvRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let patch = AdvPatch {
        title: body.title,
        description: body.description,
        price: body.price,
        currency: body.currency,
        lang_tags: body.lang_tags,
        country: body.country,
        city: body.city,
        address: body.address,
        latitude: body.latitude,
        longitude: body.longitude,
        visible: body.visible,
        user_comment: body.user_comment,
    };
    state
        .listings
        .update_adv(&user, adv_id, patch)
        .await
        .map_err(|err| ApiError::from_app(err, ctx.request_id))?;
    Ok(ok_envelope())
}

pub async fn delete(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(adv_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .listings
        .delete_adv(&user, adv_id)
        .await
        .map_err(|err| ApiError::from_app(err, ctx.request_id))?;
    Ok(ok_envelope())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApproveRequest {
    #[serde(default = "default_approved")]
    pub approved: bool,
    #[serde(default)]
    pub admin_comment: String,
}

fn default_approved() -> bool {
    true
}

pub async fn approve(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(adv_id): Path<i64>,
    Json(body): Json<ApproveRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .listings
        .approve_adv(adv_id, body.approved)
        .await
        .map_err(|err| ApiError::from_app(err, ctx.request_id))?;
    Ok(ok_envelope())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoDto {
    pub id: i64,
    pub ext: &'static str,
    pub file: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvViewDto {
    pub id: i64,
    /// Owner display name, projected from the user index.
    pub user: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    pub approved: bool,
    pub lang_tags: Vec<String>,
    pub title: String,
    pub description: String,
    pub price: f64,
    pub currency: String,
    pub dollar_price: f64,
    pub country: String,
    pub city: String,
    pub address: String,
    pub latitude: f64,
    pub longitude: f64,
    pub visible: bool,
    pub user_comment: String,
    pub photos: Vec<PhotoDto>,
    pub watches: u64,
}

impl From<AdvView> for AdvViewDto {
    fn from(view: AdvView) -> Self {
        let photos = view
            .photos
            .iter()
            .map(|p| PhotoDto {
                id: p.id,
                ext: p.ext.as_str(),
                file: PhotoStore::file_name(p.id, p.ext),
            })
            .collect();
        Self {
            id: view.adv.id,
            user: view.owner_name,
            created_at: view.adv.created_at,
            updated_at: view.adv.updated_at,
            approved: view.adv.approved,
            lang_tags: view.adv.lang_tags,
            title: view.adv.title,
            description: view.adv.description,
            price: view.adv.price,
            currency: view.adv.currency,
            dollar_price: view.adv.dollar_price,
            country: view.adv.country,
            city: view.adv.city,
            address: view.adv.address,
            latitude: view.adv.latitude,
            longitude: view.adv.longitude,
            visible: view.adv.visible,
            user_comment: view.adv.user_comment,
            photos,
            watches: view.watches,
        }
    }
}

pub async fn view(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    jar: CookieJar,
    Path(adv_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    // The public view works without a session; a valid cookie unlocks
    // the owner's and admins' sight of unapproved ads.
    let token = jar.get(AUTH_COOKIE).map(|c| c.value().to_string());
    let viewer = state.sessions.authenticate(token.as_deref()).await.ok();
    let view = state
        .listings
        .view_adv(viewer.as_ref(), adv_id)
        .await
        .map_err(|err| ApiError::from_app(err, ctx.request_id))?;
    Ok(Json(AdvViewDto::from(view)))
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    /// Currency the price bounds are expressed in; defaults to USD.
    pub currency: Option<String>,
    pub min_lat: Option<f64>,
    pub max_lat: Option<f64>,
    pub min_lon: Option<f64>,
    pub max_lon: Option<f64>,
    pub country: Option<String>,
    pub address: Option<String>,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
    pub first_new: Option<bool>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResponse {
    pub advs: Vec<AdvViewDto>,
    pub count: usize,
}

pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> impl IntoResponse {
    let rate = state
        .cache
        .rate_table()
        .usd_rate(query.currency.as_deref().unwrap_or("USD"));

    let defaults = ListFilter::default();
    let filter = ListFilter {
        min_dollar: query
            .min_price
            .map(|p| p * rate)
            .unwrap_or(defaults.min_dollar),
        max_dollar: query
            .max_price
            .map(|p| p * rate)
            .unwrap_or(defaults.max_dollar),
        min_lat: query.min_lat.unwrap_or(defaults.min_lat),
        max_lat: query.max_lat.unwrap_or(defaults.max_lat),
        min_lon: query.min_lon.unwrap_or(defaults.min_lon),
        max_lon: query.max_lon.unwrap_or(defaults.max_lon),
        country: query.country.unwrap_or_default(),
        address_substring: query.address.unwrap_or_default(),
        offset: query.offset.unwrap_or(0),
        limit: query.limit.unwrap_or(defaults.limit),
        first_new: query.first_new.unwrap_or(false),
    };

    let (views, count) = state.listings.list(filter).await;
    Json(ListResponse {
        advs: views.into_iter().map(AdvViewDto::from).collect(),
        count,
    })
}

pub async fn my(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> impl IntoResponse {
    let views = state.listings.own_advs(&user).await;
    let advs: Vec<AdvViewDto> = views.into_iter().map(AdvViewDto::from).collect();
    let count = advs.len();
    Json(ListResponse { advs, count })
}
