pub mod error;
pub mod handlers;
pub mod middleware;
pub mod state;

use std::path::Path;

use axum::{
    Router,
    middleware::{from_fn, from_fn_with_state},
    routing::{delete, get, post, put},
};
use tower_http::services::ServeDir;

pub use state::AppState;

/// Assemble the full HTTP surface.
///
/// Pipeline, outermost first: request context, response logging, panic
/// recovery, per-request deadline, write admission. Authentication and
/// the admin guard are scoped to the routes that need them.
pub fn build_router(state: AppState, uploads_dir: &Path, static_dir: &Path) -> Router {
    let public = Router::new()
        .route("/registration", post(handlers::auth::register))
        .route("/login", post(handlers::auth::login))
        .route("/logout/me", get(handlers::auth::logout_me))
        .route("/adv", get(handlers::advs::list))
        .route("/adv/{id}", get(handlers::advs::view));

    let authed = Router::new()
        .route("/logout/all", get(handlers::auth::logout_all))
        .route("/user", put(handlers::auth::update_user))
        .route("/password", put(handlers::auth::change_password))
        .route("/adv", post(handlers::advs::create))
        .route("/adv/my", get(handlers::advs::my))
        .route(
            "/adv/{id}",
            put(handlers::advs::update).delete(handlers::advs::delete),
        )
        .route("/adv/{id}/photos", post(handlers::photos::upload))
        .route(
            "/adv/{id}/photos/{photo_id}",
            delete(handlers::photos::remove),
        )
        .layer(from_fn_with_state(state.clone(), middleware::authenticate));

    let admin = Router::new()
        .route("/adv/{id}/approve", put(handlers::advs::approve))
        .route("/metrics", get(handlers::status::metrics))
        .layer(from_fn(middleware::require_admin))
        .layer(from_fn_with_state(state.clone(), middleware::authenticate));

    Router::new()
        .merge(public)
        .merge(authed)
        .merge(admin)
        .nest_service("/static", ServeDir::new(static_dir))
        .nest_service("/files", ServeDir::new(uploads_dir))
        .layer(from_fn_with_state(state.clone(), middleware::admit_writes))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::enforce_deadline,
        ))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::recover_panics,
        ))
        .layer(from_fn(middleware::log_responses))
        .layer(from_fn(middleware::set_request_context))
        .with_state(state)
}
