//! Full-pipeline tests over the assembled router: auth, rate limits,
//! collection DDL, record CRUD with exact decimals, batch semantics and
//! the health endpoint, all against in-memory SQLite.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use moon_api::{build_router, AppState, Config};
use serde_json::{json, Value};
use tower::ServiceExt;

const ADMIN_PASSWORD: &str = "bootstrap-pass";

async fn setup() -> (Arc<AppState>, Router) {
    let mut config = Config::default();
    config.jwt.secret = "pipeline-test-secret".into();
    config.database.database = ":memory:".into();
    config.auth.bootstrap_admin = Some(moon_api::config::BootstrapAdmin {
        username: "root".into(),
        email: "root@example.com".into(),
        password: ADMIN_PASSWORD.into(),
    });
    let state = AppState::initialize(config).await.expect("startup");
    let router = build_router(state.clone());
    (state, router)
}

async fn call(
    router: &Router,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("Authorization", format!("Bearer {}", token));
    }
    let request = match body {
        Some(body) => builder
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

async fn login(router: &Router, username: &str, password: &str) -> (StatusCode, Value) {
    call(
        router,
        Method::POST,
        "/auth:login",
        None,
        Some(json!({ "username": username, "password": password })),
    )
    .await
}

async fn admin_token(router: &Router) -> String {
    let (status, body) = login(router, "root", ADMIN_PASSWORD).await;
    assert_eq!(status, StatusCode::OK, "admin login: {}", body);
    body["access_token"].as_str().unwrap().to_string()
}

async fn create_products(router: &Router, token: &str) {
    let (status, body) = call(
        router,
        Method::POST,
        "/collections:create",
        Some(token),
        Some(json!({
            "name": "products",
            "columns": [
                {"name": "title", "type": "string", "nullable": false},
                {"name": "price", "type": "decimal", "nullable": false},
                {"name": "slug", "type": "string", "nullable": false, "unique": true},
            ],
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "collection create: {}", body);
}

#[tokio::test]
async fn test_health_is_public_and_live() {
    let (_state, router) = setup().await;
    let (status, body) = call(&router, Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "live");
    assert_eq!(body["name"], "moon");
    let version = body["version"].as_str().unwrap();
    assert_eq!(version.split('.').count(), 2);
}

#[tokio::test]
async fn test_bearer_only_authentication() {
    let (_state, router) = setup().await;

    let (status, body) = call(&router, Method::GET, "/collections:list", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "authentication_required");

    // A non-bearer header is still unauthenticated.
    let request = Request::builder()
        .method(Method::GET)
        .uri("/collections:list")
        .header("X-API-Key", "moon_live_whatever")
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // A malformed bearer token is a format error.
    let (status, body) = call(
        &router,
        Method::GET,
        "/collections:list",
        Some("definitely-not-a-token"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "invalid_token_format");
}

#[tokio::test]
async fn test_login_and_collection_lifecycle() {
    let (_state, router) = setup().await;
    let token = admin_token(&router).await;

    create_products(&router, &token).await;

    let (status, body) = call(
        &router,
        Method::GET,
        "/collections:get?name=products",
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = body["fields"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["name"].as_str().unwrap())
        .collect();
    assert_eq!(
        names,
        vec!["id", "title", "price", "slug", "created_at", "updated_at"]
    );

    // Recreating the same collection conflicts.
    let (status, body) = call(
        &router,
        Method::POST,
        "/collections:create",
        Some(&token),
        Some(json!({"name": "products", "columns": [{"name": "x", "type": "text"}]})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT, "{}", body);
    assert_eq!(body["error"], "duplicate");

    let (status, body) = call(&router, Method::GET, "/collections:list", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);
    assert_eq!(body["collections"][0]["name"], "products");
    assert_eq!(body["collections"][0]["field_count"], 3);
    assert_eq!(body["collections"][0]["records_count"], 0);
}

#[tokio::test]
async fn test_record_crud_with_exact_decimal() {
    let (_state, router) = setup().await;
    let token = admin_token(&router).await;
    create_products(&router, &token).await;

    let (status, body) = call(
        &router,
        Method::POST,
        "/products:create",
        Some(&token),
        Some(json!({"data": {"title": "Wireless Mouse", "price": "29.99", "slug": "wm-01"}})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    let id = body["data"]["id"].as_str().unwrap().to_string();
    assert_eq!(id.len(), 26);
    assert_eq!(body["data"]["price"], "29.99");

    let (status, body) = call(
        &router,
        Method::GET,
        &format!("/products:get?id={}", id),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["price"], "29.99");
    assert_eq!(body["data"]["title"], "Wireless Mouse");

    // Server fields are never client-writable.
    let (status, body) = call(
        &router,
        Method::POST,
        "/products:create",
        Some(&token),
        Some(json!({"data": {"title": "X", "price": "1.00", "slug": "x", "id": "custom"}})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");

    // Partial update touches only what it names.
    let (status, body) = call(
        &router,
        Method::POST,
        "/products:update",
        Some(&token),
        Some(json!({"data": {"id": id, "price": "31.00"}})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["data"]["price"], "31.00");
    assert_eq!(body["data"]["title"], "Wireless Mouse");

    // Destroy, then the repeat is not found.
    let (status, _) = call(
        &router,
        Method::POST,
        "/products:destroy",
        Some(&token),
        Some(json!({"data": {"id": id}})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = call(
        &router,
        Method::POST,
        "/products:destroy",
        Some(&token),
        Some(json!({"data": {"id": id}})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
}

#[tokio::test]
async fn test_atomic_batch_rolls_back_on_duplicate() {
    let (_state, router) = setup().await;
    let token = admin_token(&router).await;
    create_products(&router, &token).await;

    let (status, body) = call(
        &router,
        Method::POST,
        "/products:create?atomic=true",
        Some(&token),
        Some(json!({"data": [
            {"title": "A", "price": "1.00", "slug": "a"},
            {"title": "B", "price": "1.0", "slug": "a"},
        ]})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT, "{}", body);
    assert_eq!(body["error"], "duplicate");

    let (status, body) = call(&router, Method::GET, "/products:count", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["value"], 0, "atomic failure left no rows");
}

#[tokio::test]
async fn test_best_effort_batch_reports_per_item() {
    let (_state, router) = setup().await;
    let token = admin_token(&router).await;
    create_products(&router, &token).await;

    let (status, body) = call(
        &router,
        Method::POST,
        "/products:create?atomic=false",
        Some(&token),
        Some(json!({"data": [
            {"title": "A", "price": "1.00", "slug": "a"},
            {"title": "B", "price": "1.0", "slug": "a"},
        ]})),
    )
    .await;
    assert_eq!(status, StatusCode::MULTI_STATUS, "{}", body);
    assert_eq!(body["results"][0]["status"], "created");
    assert_eq!(body["results"][1]["status"], "failed");
    assert_eq!(body["results"][1]["error_code"], "duplicate");
    assert_eq!(body["summary"]["total"], 2);
    assert_eq!(body["summary"]["succeeded"], 1);
    assert_eq!(body["summary"]["failed"], 1);

    let (_, body) = call(&router, Method::GET, "/products:count", Some(&token), None).await;
    assert_eq!(body["value"], 1);
}

#[tokio::test]
async fn test_list_filter_sort_limit_cursor() {
    let (_state, router) = setup().await;
    let token = admin_token(&router).await;
    create_products(&router, &token).await;

    for (title, price, slug) in [("A", "5.00", "a"), ("B", "20.00", "b"), ("C", "30.00", "c")] {
        let (status, _) = call(
            &router,
            Method::POST,
            "/products:create",
            Some(&token),
            Some(json!({"data": {"title": title, "price": price, "slug": slug}})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, body) = call(
        &router,
        Method::GET,
        "/products:list?price%5Bgt%5D=10&sort=-price&limit=1",
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    let data = body["data"].as_array().unwrap();
    assert_eq!(data.len(), 1);
    assert_eq!(data[0]["price"], "30.00");
    assert_eq!(body["total"], 2);
    assert!(body["next_cursor"].is_string(), "one more matching row exists");

    // Aggregations over the same filter set.
    let (_, body) = call(
        &router,
        Method::GET,
        "/products:sum?field=price",
        Some(&token),
        None,
    )
    .await;
    assert_eq!(body["value"], "55.00");

    let (status, body) = call(
        &router,
        Method::GET,
        "/products:sum?field=title",
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "unsupported_operation");
}

#[tokio::test]
async fn test_login_limiter_blocks_sixth_attempt() {
    let (_state, router) = setup().await;

    for _ in 0..5 {
        let (status, _) = login(&router, "ghost", "wrong").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
    let (status, body) = login(&router, "ghost", "wrong").await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"], "login_attempts_exceeded");

    // A different username from the same address still logs in.
    let (status, _) = login(&router, "root", ADMIN_PASSWORD).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_refresh_rotation_is_single_use() {
    let (_state, router) = setup().await;
    let (status, body) = login(&router, "root", ADMIN_PASSWORD).await;
    assert_eq!(status, StatusCode::OK);
    let refresh = body["refresh_token"].as_str().unwrap().to_string();

    let (status, rotated) = call(
        &router,
        Method::POST,
        "/auth:refresh",
        None,
        Some(json!({ "refresh_token": refresh })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", rotated);
    assert!(rotated["access_token"].is_string());

    // Replaying the consumed token fails uniformly.
    let (status, body) = call(
        &router,
        Method::POST,
        "/auth:refresh",
        None,
        Some(json!({ "refresh_token": refresh })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "invalid_credentials");
}

#[tokio::test]
async fn test_write_gate_and_admin_gate() {
    let (_state, router) = setup().await;
    let admin = admin_token(&router).await;
    create_products(&router, &admin).await;

    let (status, _) = call(
        &router,
        Method::POST,
        "/users:create",
        Some(&admin),
        Some(json!({
            "username": "reader",
            "email": "reader@example.com",
            "password": "reader-pass",
            "can_write": false,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = login(&router, "reader", "reader-pass").await;
    assert_eq!(status, StatusCode::OK);
    let reader = body["access_token"].as_str().unwrap().to_string();

    // Reads pass, writes are gated, admin surfaces are closed.
    let (status, _) = call(&router, Method::GET, "/products:list", Some(&reader), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(
        &router,
        Method::POST,
        "/products:create",
        Some(&reader),
        Some(json!({"data": {"title": "X", "price": "1.00", "slug": "x"}})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "write_permission_required");

    let (status, body) = call(&router, Method::GET, "/users:list", Some(&reader), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "admin_required");
}

#[tokio::test]
async fn test_apikey_round_trip() {
    let (_state, router) = setup().await;
    let admin = admin_token(&router).await;
    create_products(&router, &admin).await;

    let (status, body) = call(
        &router,
        Method::POST,
        "/apikeys:create",
        Some(&admin),
        Some(json!({ "name": "ci-bot", "can_write": true })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    let key = body["key"].as_str().unwrap().to_string();
    assert!(key.starts_with("moon_live_"));
    assert_eq!(key.len(), 74);

    let (status, body) = call(
        &router,
        Method::POST,
        "/products:create",
        Some(&key),
        Some(json!({"data": {"title": "Via key", "price": "2.50", "slug": "vk"}})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);

    // A tampered key fails credentials, not format.
    let mut bad = key.clone();
    let last = bad.pop().unwrap();
    bad.push(if last == 'A' { 'B' } else { 'A' });
    let (status, body) = call(&router, Method::GET, "/products:list", Some(&bad), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "invalid_credentials");
}

#[tokio::test]
async fn test_idempotency_key_replays_create() {
    let (_state, router) = setup().await;
    let admin = admin_token(&router).await;
    create_products(&router, &admin).await;

    let payload = json!({"data": {"title": "Once", "price": "9.99", "slug": "once"}});
    let request = |body: Value| {
        Request::builder()
            .method(Method::POST)
            .uri("/products:create")
            .header("Authorization", format!("Bearer {}", admin))
            .header("Content-Type", "application/json")
            .header("Idempotency-Key", "op-42")
            .body(Body::from(body.to_string()))
            .unwrap()
    };

    let first = router.clone().oneshot(request(payload.clone())).await.unwrap();
    assert_eq!(first.status(), StatusCode::CREATED);
    let first: Value = serde_json::from_slice(
        &axum::body::to_bytes(first.into_body(), usize::MAX).await.unwrap(),
    )
    .unwrap();

    let second = router.clone().oneshot(request(payload)).await.unwrap();
    assert_eq!(second.status(), StatusCode::CREATED);
    let second: Value = serde_json::from_slice(
        &axum::body::to_bytes(second.into_body(), usize::MAX).await.unwrap(),
    )
    .unwrap();

    assert_eq!(first["data"]["id"], second["data"]["id"], "same response replayed");

    let (_, body) = call(&router, Method::GET, "/products:count", Some(&admin), None).await;
    assert_eq!(body["value"], 1);
}

#[tokio::test]
async fn test_collection_update_alters_live() {
    let (_state, router) = setup().await;
    let admin = admin_token(&router).await;
    create_products(&router, &admin).await;

    let (status, _) = call(
        &router,
        Method::POST,
        "/products:create",
        Some(&admin),
        Some(json!({"data": {"title": "A", "price": "1.00", "slug": "a"}})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = call(
        &router,
        Method::POST,
        "/collections:update",
        Some(&admin),
        Some(json!({
            "name": "products",
            "add_columns": [{"name": "note", "type": "text", "nullable": true}],
            "rename_columns": [{"old_name": "slug", "new_name": "handle"}],
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    let names: Vec<&str> = body["fields"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["name"].as_str().unwrap())
        .collect();
    assert!(names.contains(&"note"));
    assert!(names.contains(&"handle"));
    assert!(!names.contains(&"slug"));

    // The altered schema serves immediately.
    let (status, body) = call(
        &router,
        Method::POST,
        "/products:create",
        Some(&admin),
        Some(json!({"data": {"title": "B", "price": "2.00", "handle": "b", "note": "fresh"}})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    assert_eq!(body["data"]["note"], "fresh");

    // Old rows read NULL for the added column.
    let (_, body) = call(
        &router,
        Method::GET,
        "/products:list?sort=title",
        Some(&admin),
        None,
    )
    .await;
    assert_eq!(body["data"][0]["note"], Value::Null);

    // SQLite cannot modify column types in place.
    let (status, body) = call(
        &router,
        Method::POST,
        "/collections:update",
        Some(&admin),
        Some(json!({
            "name": "products",
            "modify_columns": [{"name": "title", "type": "text"}],
        })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "unsupported_operation");
}

#[tokio::test]
async fn test_health_reports_down_after_pool_close() {
    let (state, router) = setup().await;
    state.db.close().await;

    let (status, body) = call(&router, Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK, "health is always 200");
    assert_eq!(body["status"], "down");
}

#[tokio::test]
async fn test_rate_limit_headers_present() {
    let (_state, router) = setup().await;
    let admin = admin_token(&router).await;

    let request = Request::builder()
        .method(Method::GET)
        .uri("/collections:list")
        .header("Authorization", format!("Bearer {}", admin))
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("X-RateLimit-Limit").unwrap(),
        "100"
    );
    assert!(response.headers().contains_key("X-RateLimit-Remaining"));
    assert!(response.headers().contains_key("X-RateLimit-Reset"));
    assert!(response.headers().contains_key("X-Request-Id"));
}
