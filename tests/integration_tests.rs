use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
    response::Response,
};
use futures::future::join_all;
use gym_booking::settings::Settings;
use gym_booking::store::{
    CapacityGuard, Document, DocumentId, DocumentStore, Filter, GuardedInsert, MemoryStore,
    StoreError, StoredDocument,
};
use gym_booking::{AppState, build_router};
use serde_json::{Value, json};
use tower::Service;

/// Helper function to create a router over a fresh in-memory store
fn create_test_app() -> Router {
    let state = AppState::new(Settings::default(), Arc::new(MemoryStore::new()));
    build_router(state)
}

/// Store whose backend is unreachable: every operation fails.
struct UnreachableStore;

fn connection_refused() -> StoreError {
    StoreError::Unavailable("connection refused".into())
}

#[async_trait]
impl DocumentStore for UnreachableStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Err(connection_refused())
    }

    async fn list_collections(&self) -> Result<Vec<String>, StoreError> {
        Err(connection_refused())
    }

    async fn insert(&self, _: &str, _: Document) -> Result<DocumentId, StoreError> {
        Err(connection_refused())
    }

    async fn find(
        &self,
        _: &str,
        _: &Filter,
        _: Option<usize>,
    ) -> Result<Vec<StoredDocument>, StoreError> {
        Err(connection_refused())
    }

    async fn find_by_id(
        &self,
        _: &str,
        _: DocumentId,
    ) -> Result<Option<StoredDocument>, StoreError> {
        Err(connection_refused())
    }

    async fn count(&self, _: &str, _: &Filter) -> Result<u64, StoreError> {
        Err(connection_refused())
    }

    async fn upsert_by(
        &self,
        _: &str,
        _: &str,
        _: &str,
        _: Document,
    ) -> Result<DocumentId, StoreError> {
        Err(connection_refused())
    }

    async fn insert_within_capacity(
        &self,
        _: &CapacityGuard<'_>,
        _: Document,
    ) -> Result<GuardedInsert, StoreError> {
        Err(connection_refused())
    }
}

fn create_unreachable_app() -> Router {
    let state = AppState::new(Settings::default(), Arc::new(UnreachableStore));
    build_router(state)
}

/// Helper to extract response body as JSON
async fn response_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn get(app: &mut Router, uri: &str) -> Response {
    app.call(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn post_json(app: &mut Router, uri: &str, body: Value) -> Response {
    app.call(
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
    )
    .await
    .unwrap()
}

fn hiit(capacity: i64) -> Value {
    json!({
        "title": "HIIT",
        "coach": "Ana",
        "duration_minutes": 45,
        "capacity": capacity,
        "schedule_iso": "2025-01-01T18:00:00Z"
    })
}

async fn create_class(app: &mut Router, capacity: i64) -> String {
    let response = post_json(app, "/api/classes", hiit(capacity)).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = response_json(response).await;
    body["id"].as_str().unwrap().to_string()
}

fn booking(class_id: &str, name: &str) -> Value {
    json!({
        "class_id": class_id,
        "name": name,
        "email": format!("{}@example.com", name.to_lowercase()),
    })
}

#[tokio::test]
async fn test_root_endpoint() {
    // Arrange
    let mut app = create_test_app();

    // Act
    let response = get(&mut app, "/").await;

    // Assert
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["message"], "Gym Booking API is running");
}

#[tokio::test]
async fn test_diagnostics_lists_collections() {
    // Arrange
    let mut app = create_test_app();
    create_class(&mut app, 5).await;

    // Act
    let response = get(&mut app, "/test").await;

    // Assert
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["backend"], "running");
    assert_eq!(body["database"], "connected");
    assert_eq!(body["database_backend"], "memory");
    assert_eq!(body["collections"], json!(["gymclass"]));
}

#[tokio::test]
async fn test_create_class_returns_string_id() {
    // Arrange
    let mut app = create_test_app();

    // Act
    let id = create_class(&mut app, 10).await;

    // Assert
    let response = get(&mut app, "/api/classes").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    let classes = body.as_array().unwrap();
    assert_eq!(classes.len(), 1);
    assert_eq!(classes[0]["_id"], json!(id));
    assert_eq!(classes[0]["title"], "HIIT");
    assert_eq!(classes[0]["tags"], json!([]));
}

#[tokio::test]
async fn test_create_class_out_of_range() {
    // Arrange
    let mut app = create_test_app();
    let cases = [
        ("duration_minutes", json!(14)),
        ("duration_minutes", json!(181)),
        ("capacity", json!(0)),
        ("capacity", json!(101)),
    ];

    for (field, value) in cases {
        let mut payload = hiit(5);
        payload[field] = value.clone();

        // Act
        let response = post_json(&mut app, "/api/classes", payload).await;

        // Assert
        assert_eq!(
            response.status(),
            StatusCode::UNPROCESSABLE_ENTITY,
            "{field}={value}"
        );
        let body = response_json(response).await;
        assert_eq!(body["errors"][0]["field"], field);
    }

    let response = get(&mut app, "/api/classes").await;
    let body = response_json(response).await;
    assert!(body.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_create_class_missing_field() {
    // Arrange
    let mut app = create_test_app();
    let mut payload = hiit(5);
    payload.as_object_mut().unwrap().remove("coach");

    // Act
    let response = post_json(&mut app, "/api/classes", payload).await;

    // Assert
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = response_json(response).await;
    assert_eq!(body["errors"][0]["field"], "body");
}

#[tokio::test]
async fn test_create_class_malformed_json() {
    // Arrange
    let mut app = create_test_app();

    // Act
    let response = app
        .call(
            Request::builder()
                .method("POST")
                .uri("/api/classes")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await
        .unwrap();

    // Assert
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_list_classes_limit() {
    // Arrange
    let mut app = create_test_app();
    for _ in 0..5 {
        create_class(&mut app, 5).await;
    }

    // Act
    let limited = response_json(get(&mut app, "/api/classes?limit=2").await).await;
    let default = response_json(get(&mut app, "/api/classes").await).await;

    // Assert
    assert_eq!(limited.as_array().unwrap().len(), 2);
    assert_eq!(default.as_array().unwrap().len(), 5);
}

#[tokio::test]
async fn test_booking_scenario_capacity_one() {
    // Arrange
    let mut app = create_test_app();
    let class_id = create_class(&mut app, 1).await;

    // Act
    let first = post_json(&mut app, "/api/bookings", booking(&class_id, "Sam")).await;
    let second = post_json(&mut app, "/api/bookings", booking(&class_id, "Alex")).await;

    // Assert
    assert_eq!(first.status(), StatusCode::CREATED);
    let body = response_json(first).await;
    assert!(body["id"].is_string());

    assert_eq!(second.status(), StatusCode::CONFLICT);
    let body = response_json(second).await;
    assert_eq!(body["detail"], "Class is fully booked");
}

#[tokio::test]
async fn test_booking_fills_capacity_exactly() {
    // Arrange
    let mut app = create_test_app();
    let capacity = 4;
    let class_id = create_class(&mut app, capacity).await;

    // Act & Assert
    for n in 0..capacity {
        let response = post_json(
            &mut app,
            "/api/bookings",
            booking(&class_id, &format!("Member{n}")),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
    }
    let response = post_json(&mut app, "/api/bookings", booking(&class_id, "Late")).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let listed = response_json(get(&mut app, &format!("/api/bookings?class_id={class_id}")).await).await;
    assert_eq!(listed.as_array().unwrap().len(), capacity as usize);
}

#[tokio::test]
async fn test_booking_invalid_class_reference() {
    // Arrange
    let mut app = create_test_app();

    // Act
    let response = post_json(&mut app, "/api/bookings", booking("not-an-id", "Sam")).await;

    // Assert
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = response_json(response).await;
    assert_eq!(body["detail"], "Invalid class_id");
}

#[tokio::test]
async fn test_booking_unknown_class() {
    // Arrange
    let mut app = create_test_app();
    let missing = "0b6f3c1e-2f57-4a5e-9a0e-4d4c1f0e8a11";

    // Act
    let response = post_json(&mut app, "/api/bookings", booking(missing, "Sam")).await;

    // Assert
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = response_json(response).await;
    assert_eq!(body["detail"], "Class not found");
}

#[tokio::test]
async fn test_booking_invalid_email() {
    // Arrange
    let mut app = create_test_app();
    let class_id = create_class(&mut app, 3).await;
    let mut payload = booking(&class_id, "Sam");
    payload["email"] = json!("sam-at-example");

    // Act
    let response = post_json(&mut app, "/api/bookings", payload).await;

    // Assert
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = response_json(response).await;
    assert_eq!(body["errors"][0]["field"], "email");
}

#[tokio::test]
async fn test_list_bookings_filter_and_limit() {
    // Arrange
    let mut app = create_test_app();
    let yoga = create_class(&mut app, 10).await;
    let spin = create_class(&mut app, 10).await;
    for n in 0..3 {
        post_json(&mut app, "/api/bookings", booking(&yoga, &format!("Yogi{n}"))).await;
    }
    post_json(&mut app, "/api/bookings", booking(&spin, "Rider")).await;

    // Act
    let all = response_json(get(&mut app, "/api/bookings").await).await;
    let yoga_only = response_json(get(&mut app, &format!("/api/bookings?class_id={yoga}")).await).await;
    let yoga_upper = response_json(
        get(
            &mut app,
            &format!("/api/bookings?class_id={}", yoga.to_uppercase()),
        )
        .await,
    )
    .await;
    let limited = response_json(get(&mut app, "/api/bookings?limit=1").await).await;
    let garbage = response_json(get(&mut app, "/api/bookings?class_id=garbage").await).await;

    // Assert
    assert_eq!(all.as_array().unwrap().len(), 4);
    let yoga_only = yoga_only.as_array().unwrap();
    assert_eq!(yoga_only.len(), 3);
    assert!(yoga_only.iter().all(|b| b["class_id"] == json!(yoga)));
    assert_eq!(yoga_upper.as_array().unwrap().len(), 3);
    assert_eq!(limited.as_array().unwrap().len(), 1);
    assert!(garbage.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_concurrent_bookings_never_overbook() {
    // Arrange
    let app = create_test_app();
    let mut setup = app.clone();
    let capacity = 3;
    let class_id = create_class(&mut setup, capacity).await;

    // Act
    let attempts = (0..25).map(|n| {
        let mut app = app.clone();
        let payload = booking(&class_id, &format!("Racer{n}"));
        async move { post_json(&mut app, "/api/bookings", payload).await.status() }
    });
    let statuses = join_all(attempts).await;

    // Assert
    let created = statuses
        .iter()
        .filter(|s| **s == StatusCode::CREATED)
        .count();
    let conflicts = statuses
        .iter()
        .filter(|s| **s == StatusCode::CONFLICT)
        .count();
    assert_eq!(created, capacity as usize);
    assert_eq!(conflicts, 25 - capacity as usize);
}

#[tokio::test]
async fn test_plugin_upsert_never_duplicates() {
    // Arrange
    let mut app = create_test_app();

    // Act
    let first = post_json(
        &mut app,
        "/api/plugins/payments.stripe",
        json!({"enabled": true, "config": {"api_key": "pk_test", "currency": "EUR"}}),
    )
    .await;
    let second = post_json(
        &mut app,
        "/api/plugins/payments.stripe",
        json!({"enabled": false, "config": {"currency": "USD"}}),
    )
    .await;

    // Assert
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(second.status(), StatusCode::OK);
    let first_id = response_json(first).await["id"].clone();
    let second_id = response_json(second).await["id"].clone();
    assert_eq!(first_id, second_id);

    let plugins = response_json(get(&mut app, "/api/plugins").await).await;
    let plugins = plugins.as_array().unwrap();
    assert_eq!(plugins.len(), 1);
    assert_eq!(plugins[0]["_id"], first_id);
    assert_eq!(plugins[0]["key"], "payments.stripe");
    assert_eq!(plugins[0]["name"], "Payments Stripe");
    assert_eq!(plugins[0]["enabled"], false);
    assert_eq!(plugins[0]["config"], json!({"currency": "USD"}));
}

#[tokio::test]
async fn test_plugin_defaults() {
    // Arrange
    let mut app = create_test_app();

    // Act
    let response = post_json(&mut app, "/api/plugins/reminders.sms", json!({})).await;

    // Assert
    assert_eq!(response.status(), StatusCode::OK);
    let plugins = response_json(get(&mut app, "/api/plugins").await).await;
    assert_eq!(plugins[0]["enabled"], true);
    assert_eq!(plugins[0]["config"], json!({}));
    assert_eq!(plugins[0]["name"], "Reminders Sms");
}

#[tokio::test]
async fn test_plugin_config_must_be_object() {
    // Arrange
    let mut app = create_test_app();

    // Act
    let response = post_json(
        &mut app,
        "/api/plugins/payments.stripe",
        json!({"enabled": true, "config": "nope"}),
    )
    .await;

    // Assert
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_cors_allows_any_origin() {
    // Arrange
    let mut app = create_test_app();

    // Act
    let response = app
        .call(
            Request::builder()
                .method("OPTIONS")
                .uri("/api/classes")
                .header(header::ORIGIN, "https://studio.example")
                .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
                .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "content-type")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    // Assert
    assert_eq!(response.status(), StatusCode::OK);
    let allow_origin = response
        .headers()
        .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
        .unwrap();
    assert_eq!(allow_origin, "https://studio.example");
}

#[tokio::test]
async fn test_openapi_json_served() {
    // Arrange
    let mut app = create_test_app();

    // Act
    let response = get(&mut app, "/openapi.json").await;

    // Assert
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert!(body["paths"]["/api/bookings"].is_object());
}

#[tokio::test]
async fn test_list_classes_malformed_limit() {
    // Arrange
    let mut app = create_test_app();

    for uri in [
        "/api/classes?limit=-1",
        "/api/classes?limit=abc",
        "/api/bookings?limit=-1",
    ] {
        // Act
        let response = get(&mut app, uri).await;

        // Assert
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY, "{uri}");
        let body = response_json(response).await;
        assert_eq!(body["detail"], "Validation failed");
        let errors = body["errors"].as_array().unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0]["field"], "query");
    }
}

#[tokio::test]
async fn test_create_class_accepts_whole_number_floats() {
    // Arrange
    let mut app = create_test_app();
    let mut payload = hiit(5);
    payload["duration_minutes"] = json!(45.0);
    payload["capacity"] = json!(2.0);

    // Act
    let response = post_json(&mut app, "/api/classes", payload).await;

    // Assert
    assert_eq!(response.status(), StatusCode::CREATED);
    let classes = response_json(get(&mut app, "/api/classes").await).await;
    assert_eq!(classes[0]["capacity"], json!(2));
}

#[tokio::test]
async fn test_diagnostics_reports_unreachable_store() {
    // Arrange
    let mut app = create_unreachable_app();

    // Act
    let response = get(&mut app, "/test").await;

    // Assert
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["backend"], "running");
    assert_eq!(body["database_backend"], "postgres");
    assert_eq!(
        body["database"],
        "error: document store unavailable: connection refused"
    );
    assert_eq!(body["collections"], json!([]));
}

#[tokio::test]
async fn test_unreachable_store_is_server_error() {
    // Arrange
    let mut app = create_unreachable_app();
    let class_id = DocumentId::new().to_string();

    // Act
    let responses = vec![
        post_json(&mut app, "/api/classes", hiit(5)).await,
        get(&mut app, "/api/classes").await,
        post_json(&mut app, "/api/bookings", booking(&class_id, "Sam")).await,
        get(&mut app, "/api/bookings").await,
        get(&mut app, "/api/plugins").await,
        post_json(&mut app, "/api/plugins/payments.stripe", json!({})).await,
    ];

    // Assert
    for response in responses {
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = response_json(response).await;
        assert_eq!(body["detail"], "Document store error");
    }
}
