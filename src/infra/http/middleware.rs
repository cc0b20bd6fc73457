//! Request pipeline stages.
//!
//! Order (outermost first): request context, response logging, panic
//! recovery, deadline, write admission. Authentication and admin
//! checks are route-scoped and run innermost.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderValue, Method, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::CookieJar;
use futures::FutureExt;
use tracing::{error, warn};

use crate::application::error::ErrorReport;
use crate::application::sessions::AUTH_COOKIE;
use crate::cache::entries::UserEntry;
use crate::domain::ids;

use super::error::ApiError;
use super::state::AppState;

#[derive(Debug, Clone, Copy)]
pub struct RequestContext {
    pub request_id: i64,
}

/// The authenticated principal, inserted by [`authenticate`].
#[derive(Clone)]
pub struct CurrentUser(pub Arc<UserEntry>);

pub fn request_context(request: &Request<Body>) -> RequestContext {
    request
        .extensions()
        .get::<RequestContext>()
        .copied()
        .unwrap_or(RequestContext { request_id: 0 })
}

pub async fn set_request_context(mut request: Request<Body>, next: Next) -> Response {
    let ctx = RequestContext {
        request_id: ids::next_id(),
    };
    request.extensions_mut().insert(ctx);

    let mut response = next.run(request).await;
    response.extensions_mut().insert(ctx);
    if let Ok(value) = HeaderValue::from_str(&ctx.request_id.to_string()) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

pub async fn log_responses(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();
    let request_id = request_context(&request).request_id;

    let mut response = next.run(request).await;
    let status = response.status();

    if status.is_client_error() || status.is_server_error() {
        let elapsed_ms = start.elapsed().as_millis();
        let report = response.extensions_mut().remove::<ErrorReport>();
        let (source, messages) = match report {
            Some(report) => (report.source, report.messages),
            None => ("unknown", Vec::new()),
        };
        let detail = messages
            .first()
            .cloned()
            .unwrap_or_else(|| "no diagnostic available".to_string());

        if status.is_server_error() {
            error!(
                target = "vetrina::http::response",
                status = status.as_u16(),
                method = %method,
                path = %uri.path(),
                query = uri.query().unwrap_or(""),
                elapsed_ms = elapsed_ms,
                source = source,
                detail = %detail,
                chain = ?messages,
                request_id = request_id,
                "request failed",
            );
        } else {
            warn!(
                target = "vetrina::http::response",
                status = status.as_u16(),
                method = %method,
                path = %uri.path(),
                query = uri.query().unwrap_or(""),
                elapsed_ms = elapsed_ms,
                source = source,
                detail = %detail,
                chain = ?messages,
                request_id = request_id,
                "client request error",
            );
        }
    }

    response
}

/// Convert a handler panic into a 500 envelope carrying the request id.
/// A `"not implemented"` panic is survivable; anything else raises the
/// graceful-stop latch so the supervisor restarts a clean instance.
pub async fn recover_panics(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let ctx = request_context(&request);
    match AssertUnwindSafe(next.run(request)).catch_unwind().await {
        Ok(response) => response,
        Err(panic) => {
            let detail = panic_message(&panic);
            state.stats.record_recovered_panic();
            metrics::counter!("vetrina_recovered_panics_total").increment(1);
            let survivable = detail.contains("not implemented");
            if !survivable {
                state.gate.request_stop();
            }
            error!(
                target = "vetrina::http",
                request_id = ctx.request_id,
                detail = %detail,
                survivable,
                "Recovered handler panic"
            );
            ApiError::from_message(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal server error",
                Some(ctx.request_id),
            )
            .into_response()
        }
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "opaque panic payload".to_string()
    }
}

/// Abort requests that outlive the configured deadline. Enqueued dirty
/// state is not rolled back; it is already durable semantics here.
pub async fn enforce_deadline(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let ctx = request_context(&request);
    match tokio::time::timeout(state.request_deadline, next.run(request)).await {
        Ok(response) => response,
        Err(_) => ApiError::from_message(
            StatusCode::SERVICE_UNAVAILABLE,
            "deadline exceeded",
            Some(ctx.request_id),
        )
        .into_response(),
    }
}

/// Method alone does not classify a request: `GET /logout/all` rotates
/// the session secret and dirties the user record, so it must pass the
/// same admission checks as any other write.
fn is_write(request: &Request<Body>) -> bool {
    if request.uri().path() == "/logout/all" {
        return true;
    }
    let method = request.method();
    !(*method == Method::GET || *method == Method::HEAD || *method == Method::OPTIONS)
}

/// Refuse writes while stopping or while the dirty queue sits at or
/// above the backpressure threshold. Reads always pass.
pub async fn admit_writes(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if is_write(&request) {
        let ctx = request_context(&request);
        if state.gate.is_stopping() {
            return ApiError::from_message(
                StatusCode::SERVICE_UNAVAILABLE,
                "server is stopping",
                Some(ctx.request_id),
            )
            .into_response();
        }
        let depth = state.cache.queue().depth();
        if state.gate.queue_overloaded(depth, state.backpressure_threshold) {
            metrics::counter!("vetrina_backpressure_rejects_total").increment(1);
            return ApiError::from_message(
                StatusCode::TOO_MANY_REQUESTS,
                "server is overloaded, retry later",
                Some(ctx.request_id),
            )
            .into_response();
        }
    }
    next.run(request).await
}

/// Resolve the session cookie to a user, insert it for the handler,
/// and refresh the cookie on the way out so active sessions roll
/// forward.
pub async fn authenticate(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let ctx = request_context(&request);
    let jar = CookieJar::from_headers(request.headers());
    let token = jar.get(AUTH_COOKIE).map(|c| c.value().to_string());

    let user = match state.sessions.authenticate(token.as_deref()).await {
        Ok(user) => user,
        Err(err) => {
            return ApiError::from_app(err.into(), ctx.request_id).into_response();
        }
    };

    let secret = user.record.with(|u| u.session_secret).await;
    let refreshed = state.sessions.issue_cookie(user.id(), &secret);
    request.extensions_mut().insert(CurrentUser(user));

    let mut response = next.run(request).await;
    // A handler that set its own auth cookie (logout) wins over the
    // rolling refresh.
    let already_set = response
        .headers()
        .get_all(axum::http::header::SET_COOKIE)
        .iter()
        .any(|value| {
            value
                .to_str()
                .is_ok_and(|v| v.starts_with(&format!("{AUTH_COOKIE}=")))
        });
    if !already_set
        && let Ok(value) = HeaderValue::from_str(&refreshed.to_string())
    {
        response
            .headers_mut()
            .append(axum::http::header::SET_COOKIE, value);
    }
    response
}

/// Route guard for moderation and metrics surfaces.
pub async fn require_admin(request: Request<Body>, next: Next) -> Response {
    let ctx = request_context(&request);
    let is_admin = match request.extensions().get::<CurrentUser>() {
        Some(CurrentUser(user)) => user.record.with(|u| u.is_admin).await,
        None => false,
    };
    if !is_admin {
        return ApiError::from_message(StatusCode::FORBIDDEN, "forbidden", Some(ctx.request_id))
            .into_response();
    }
    next.run(request).await
}
