use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{HeaderMap, Method, Request, StatusCode, header},
};
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;

use vetrina::application::{AccountService, ListingService, SessionManager};
use vetrina::cache::{AdmissionGate, DirtyQueue, ObjectCache};
use vetrina::domain::currency::RateTable;
use vetrina::infra::http::{self, AppState};
use vetrina::infra::telemetry::RuntimeStats;
use vetrina::infra::uploads::PhotoStore;

struct TestApp {
    router: Router,
    cache: Arc<ObjectCache>,
    gate: Arc<AdmissionGate>,
    _uploads: TempDir,
}

fn test_app() -> TestApp {
    test_app_with_threshold(10_000)
}

fn test_app_with_threshold(backpressure_threshold: usize) -> TestApp {
    let cache = Arc::new(ObjectCache::new(
        RateTable::builtin(),
        Arc::new(DirtyQueue::new()),
    ));
    let uploads = tempfile::tempdir().expect("tempdir");
    let photos = Arc::new(PhotoStore::open(uploads.path()).expect("photo store"));
    let gate = Arc::new(AdmissionGate::new());
    let state = AppState {
        cache: cache.clone(),
        sessions: Arc::new(SessionManager::new(cache.clone(), String::new())),
        accounts: Arc::new(AccountService::new(cache.clone())),
        listings: Arc::new(ListingService::new(cache.clone(), photos)),
        gate: gate.clone(),
        stats: Arc::new(RuntimeStats::new()),
        backpressure_threshold,
        request_deadline: Duration::from_secs(5),
    };
    let router = http::build_router(state, uploads.path(), uploads.path());
    TestApp {
        router,
        cache,
        gate,
        _uploads: uploads,
    }
}

async fn send(app: &TestApp, request: Request<Body>) -> (StatusCode, Value, HeaderMap) {
    let response = app.router.clone().oneshot(request).await.expect("request");
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = to_bytes(response.into_body(), 1 << 20).await.expect("body");
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("json body")
    };
    (status, body, headers)
}

fn json_request(method: Method, uri: &str, body: &Value, cookie: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = cookie {
        builder = builder.header(header::COOKIE, format!("auth_token={token}"));
    }
    builder.body(Body::from(body.to_string())).expect("request")
}

fn get_request(uri: &str, cookie: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(Method::GET).uri(uri);
    if let Some(token) = cookie {
        builder = builder.header(header::COOKIE, format!("auth_token={token}"));
    }
    builder.body(Body::empty()).expect("request")
}

fn auth_cookie_value(headers: &HeaderMap) -> String {
    let raw = headers
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with("auth_token="))
        .expect("auth cookie");
    raw.split(';')
        .next()
        .and_then(|pair| pair.strip_prefix("auth_token="))
        .expect("cookie value")
        .to_string()
}

async fn register_and_login(app: &TestApp, email: &str) -> String {
    let (status, body, _) = send(
        app,
        json_request(
            Method::POST,
            "/registration",
            &json!({"email": email, "name": "Tester", "password": "hunter2"}),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "register: {body}");
    assert_eq!(body["result"], "OK");

    let (status, body, headers) = send(
        app,
        json_request(
            Method::POST,
            "/login",
            &json!({"email": email, "password": "hunter2"}),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "login: {body}");
    auth_cookie_value(&headers)
}

async fn create_adv(app: &TestApp, cookie: &str, price: f64) -> i64 {
    let (status, body, _) = send(
        app,
        json_request(
            Method::POST,
            "/adv",
            &json!({
                "title": "Sunny flat",
                "description": "two rooms with a view",
                "price": price,
                "currency": "USD",
                "country": "US",
                "city": "NY",
                "address": "5 Ave",
                "latitude": 40.7,
                "longitude": -74.0
            }),
            Some(cookie),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "create adv: {body}");
    body["advId"].as_i64().expect("advId")
}

async fn approve_directly(app: &TestApp, adv_id: i64) {
    let adv = app.cache.find_adv(adv_id).await.expect("adv");
    app.cache.approve_adv(&adv, true).await;
}

async fn promote_admin(app: &TestApp, email: &str) {
    let user = app.cache.find_user_by_login(email).await.expect("user");
    let _ = user.record.mutate(|u| u.is_admin = true).await;
}

#[tokio::test]
async fn registration_login_and_adv_round_trip() {
    let app = test_app();
    let cookie = register_and_login(&app, "owner@example.com").await;

    let adv_id = create_adv(&app, &cookie, 120.0).await;

    let (status, body, _) = send(&app, get_request("/adv/my", Some(&cookie))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);
    assert_eq!(body["advs"][0]["id"].as_i64(), Some(adv_id));
    assert_eq!(body["advs"][0]["user"], "Tester");

    // The owner sees the ad before moderation.
    let (status, body, _) = send(&app, get_request(&format!("/adv/{adv_id}"), Some(&cookie))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["title"], "Sunny flat");
    assert_eq!(body["approved"], false);
    assert_eq!(body["dollarPrice"], 120.0);
}

#[tokio::test]
async fn missing_cookie_is_unauthorized_with_envelope() {
    let app = test_app();
    let (status, body, headers) = send(&app, get_request("/adv/my", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["errMessage"], "authentication required");
    assert!(body["requestId"].as_i64().is_some());
    assert!(headers.contains_key("x-request-id"));
}

#[tokio::test]
async fn authenticated_response_refreshes_the_cookie() {
    let app = test_app();
    let cookie = register_and_login(&app, "owner@example.com").await;

    let (status, _, headers) = send(&app, get_request("/adv/my", Some(&cookie))).await;
    assert_eq!(status, StatusCode::OK);
    let refreshed = auth_cookie_value(&headers);
    assert!(!refreshed.is_empty());
}

#[tokio::test]
async fn logout_all_invalidates_replayed_cookie() {
    let app = test_app();
    let cookie = register_and_login(&app, "owner@example.com").await;

    let (status, body, headers) = send(&app, get_request("/logout/all", Some(&cookie))).await;
    assert_eq!(status, StatusCode::OK, "logout: {body}");
    // The logout response blanks the cookie instead of refreshing it.
    assert_eq!(auth_cookie_value(&headers), "");

    let (status, body, _) = send(&app, get_request("/adv/my", Some(&cookie))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["errMessage"], "bad token");
}

#[tokio::test]
async fn logout_me_expires_cookie_without_a_session() {
    let app = test_app();
    let (status, body, headers) = send(&app, get_request("/logout/me", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], "OK");
    let raw = headers
        .get(header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .expect("set-cookie");
    assert!(raw.starts_with("auth_token="));
    assert!(raw.contains("Max-Age=0"));
}

#[tokio::test]
async fn unapproved_adv_is_locked_until_moderated() {
    let app = test_app();
    let owner = register_and_login(&app, "owner@example.com").await;
    let adv_id = create_adv(&app, &owner, 120.0).await;

    let (status, body, _) = send(&app, get_request(&format!("/adv/{adv_id}"), None)).await;
    assert_eq!(status, StatusCode::LOCKED);
    assert_eq!(body["errMessage"], "advertisement awaits moderation");

    let admin = register_and_login(&app, "admin@example.com").await;
    promote_admin(&app, "admin@example.com").await;
    let (status, body, _) = send(
        &app,
        json_request(
            Method::PUT,
            &format!("/adv/{adv_id}/approve"),
            &json!({"approved": true}),
            Some(&admin),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "approve: {body}");

    let (status, body, _) = send(&app, get_request(&format!("/adv/{adv_id}"), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["approved"], true);
    assert_eq!(body["watches"], 1);
}

#[tokio::test]
async fn non_admin_cannot_reach_moderation_or_metrics() {
    let app = test_app();
    let owner = register_and_login(&app, "owner@example.com").await;
    let adv_id = create_adv(&app, &owner, 120.0).await;

    let (status, body, _) = send(
        &app,
        json_request(
            Method::PUT,
            &format!("/adv/{adv_id}/approve"),
            &json!({"approved": true}),
            Some(&owner),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["errMessage"], "forbidden");

    let (status, _, _) = send(&app, get_request("/metrics", Some(&owner))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn admin_metrics_report_queue_depth() {
    let app = test_app();
    let admin = register_and_login(&app, "admin@example.com").await;
    promote_admin(&app, "admin@example.com").await;

    let (status, body, _) = send(&app, get_request("/metrics", Some(&admin))).await;
    assert_eq!(status, StatusCode::OK);
    // The registration itself is still waiting for the flusher.
    assert_eq!(body["unsavedQueueDepth"].as_u64(), Some(1));
    assert!(body["instanceStartTime"].as_str().is_some());
}

#[tokio::test]
async fn forbidden_words_reject_the_write_without_enqueueing() {
    let app = test_app();
    let cookie = register_and_login(&app, "owner@example.com").await;
    let depth_before = app.cache.queue().depth();

    let (status, body, _) = send(
        &app,
        json_request(
            Method::POST,
            "/adv",
            &json!({
                "title": "Sunny flat",
                "description": "fuck this listing",
                "price": 10.0,
                "currency": "USD",
                "latitude": 0.0,
                "longitude": 0.0
            }),
            Some(&cookie),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errMessage"], "forbidden words: [fuck]");
    assert_eq!(app.cache.queue().depth(), depth_before);
}

#[tokio::test]
async fn price_filter_converts_bounds_and_counts_matches() {
    let app = test_app();
    let cookie = register_and_login(&app, "owner@example.com").await;
    for price in [50.0, 200.0, 900.0] {
        let adv_id = create_adv(&app, &cookie, price).await;
        approve_directly(&app, adv_id).await;
    }

    let (status, body, _) = send(&app, get_request("/adv?minPrice=100&maxPrice=500", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);
    assert_eq!(body["advs"][0]["price"], 200.0);

    // Without bounds the whole catalog comes back cheapest first.
    let (status, body, _) = send(&app, get_request("/adv", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 3);
    assert_eq!(body["advs"][0]["price"], 50.0);
}

#[tokio::test]
async fn overloaded_queue_rejects_writes_but_serves_reads() {
    let app = test_app_with_threshold(3);
    // No flusher is running, so every registration stays queued.
    for i in 0..3 {
        let (status, _, _) = send(
            &app,
            json_request(
                Method::POST,
                "/registration",
                &json!({
                    "email": format!("user{i}@example.com"),
                    "name": "Tester",
                    "password": "hunter2"
                }),
                None,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }
    assert_eq!(app.cache.queue().depth(), 3);

    let (status, body, _) = send(
        &app,
        json_request(
            Method::POST,
            "/registration",
            &json!({
                "email": "late@example.com",
                "name": "Tester",
                "password": "hunter2"
            }),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["errMessage"], "server is overloaded, retry later");

    let (status, _, _) = send(&app, get_request("/adv", None)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn photo_upload_and_removal_round_trip() {
    let app = test_app();
    let cookie = register_and_login(&app, "owner@example.com").await;
    let adv_id = create_adv(&app, &cookie, 120.0).await;

    let request = Request::builder()
        .method(Method::POST)
        .uri(format!("/adv/{adv_id}/photos?ext=jpg"))
        .header(header::COOKIE, format!("auth_token={cookie}"))
        .body(Body::from(&b"payload"[..]))
        .expect("request");
    let (status, body, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK, "upload: {body}");
    let photo_id = body["photoId"].as_i64().expect("photoId");

    let (status, body, _) = send(&app, get_request(&format!("/adv/{adv_id}"), Some(&cookie))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["photos"][0]["id"].as_i64(), Some(photo_id));
    assert_eq!(body["photos"][0]["file"], format!("{photo_id}.jpg"));

    let request = Request::builder()
        .method(Method::DELETE)
        .uri(format!("/adv/{adv_id}/photos/{photo_id}"))
        .header(header::COOKIE, format!("auth_token={cookie}"))
        .body(Body::empty())
        .expect("request");
    let (status, _, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body, _) = send(&app, get_request(&format!("/adv/{adv_id}"), Some(&cookie))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["photos"].as_array().map(Vec::len), Some(0));
}

#[tokio::test]
async fn stopping_gate_refuses_writes_but_serves_reads() {
    let app = test_app();
    let cookie = register_and_login(&app, "owner@example.com").await;
    let adv_id = create_adv(&app, &cookie, 120.0).await;
    approve_directly(&app, adv_id).await;

    app.gate.request_stop();

    let (status, body, _) = send(
        &app,
        json_request(
            Method::POST,
            "/registration",
            &json!({"email": "late@example.com", "name": "A", "password": "hunter2"}),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["errMessage"], "server is stopping");

    let (status, body, _) = send(&app, get_request(&format!("/adv/{adv_id}"), None)).await;
    assert_eq!(status, StatusCode::OK, "reads still pass: {body}");
}

#[tokio::test]
async fn logout_all_is_refused_while_stopping() {
    let app = test_app();
    let cookie = register_and_login(&app, "owner@example.com").await;

    app.gate.request_stop();

    // GET on the wire, but it rotates the session secret.
    let (status, body, _) = send(&app, get_request("/logout/all", Some(&cookie))).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["errMessage"], "server is stopping");

    // The rotation never ran, so the session still authenticates reads.
    let (status, _, _) = send(&app, get_request("/adv/my", Some(&cookie))).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn logout_all_is_refused_under_backpressure() {
    let app = test_app_with_threshold(3);
    let cookie = register_and_login(&app, "owner@example.com").await;
    for i in 0..2 {
        let (status, _, _) = send(
            &app,
            json_request(
                Method::POST,
                "/registration",
                &json!({
                    "email": format!("filler{i}@example.com"),
                    "name": "Tester",
                    "password": "hunter2"
                }),
                None,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }
    assert_eq!(app.cache.queue().depth(), 3);

    let (status, body, _) = send(&app, get_request("/logout/all", Some(&cookie))).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["errMessage"], "server is overloaded, retry later");

    let (status, _, _) = send(&app, get_request("/adv/my", Some(&cookie))).await;
    assert_eq!(status, StatusCode::OK);
}
