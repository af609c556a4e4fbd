//! Router-level tests for the ingestion endpoint and the admin API.

mod test_utils;

use std::sync::Arc;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use periscope::ingestion::{Aggregator, Subscription};
use periscope::server::create_app;
use test_utils::{OPERATOR_TOKEN, create_project, setup_test_db, test_state};

struct TestApp {
    router: Router,
    aggregator: Arc<Aggregator>,
    subscription: Option<Subscription>,
    db: sea_orm::DatabaseConnection,
}

async fn test_app() -> TestApp {
    let db = setup_test_db().await.expect("db");
    let aggregator = Arc::new(Aggregator::new(16));
    let subscription = aggregator.subscribe().expect("subscription");
    TestApp {
        router: create_app(test_state(db.clone(), Arc::clone(&aggregator))),
        aggregator,
        subscription: Some(subscription),
        db,
    }
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.expect("response");
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}

fn admin(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", OPERATOR_TOKEN));
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("request"),
        None => builder.body(Body::empty()).expect("request"),
    }
}

fn envelope(event: &Value) -> String {
    format!(
        "{}\n{}\n{}\n",
        json!({ "event_id": event["event_id"], "sent_at": "2024-05-01T12:00:00Z" }),
        json!({ "type": "event" }),
        event
    )
}

fn ingest(public_id: &str, auth: Option<&str>, body: String) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(format!("/api/{}/envelope", public_id))
        .header(header::CONTENT_TYPE, "application/x-sentry-envelope");
    if let Some(auth) = auth {
        builder = builder.header("X-Sentry-Auth", auth);
    }
    builder.body(Body::from(body)).expect("request")
}

fn sample_event() -> Value {
    json!({
        "event_id": "0f3c2a1b",
        "fingerprint": ["orders", "create"],
        "exception": { "values": [{ "type": "KeyError", "value": "missing sku" }] }
    })
}

#[tokio::test]
async fn health_and_docs_are_public() {
    let app = test_app().await;

    for uri in ["/", "/healthz", "/readyz", "/openapi.json"] {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let (status, _) = send(&app.router, request).await;
        assert_eq!(status, StatusCode::OK, "GET {uri}");
    }
}

#[tokio::test]
async fn responses_carry_trace_id() {
    let app = test_app().await;
    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/healthz")
                .header("x-trace-id", "trace-abc")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.headers().get("x-trace-id").unwrap(), "trace-abc");
}

#[tokio::test]
async fn admin_routes_require_operator_token() {
    let app = test_app().await;

    let anonymous = Request::builder()
        .method("POST")
        .uri("/api/admin/projects")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({ "name": "x" }).to_string()))
        .unwrap();
    let (status, body) = send(&app.router, anonymous).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHORIZED");

    let wrong = Request::builder()
        .uri("/api/admin/projects/1")
        .header(header::AUTHORIZATION, "Bearer nope")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app.router, wrong).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn project_lifecycle_through_admin_api() {
    let app = test_app().await;

    let (status, created) = send(
        &app.router,
        admin("POST", "/api/admin/projects", Some(json!({ "name": "storefront" }))),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let project = &created["project"];
    assert_eq!(project["name"], "storefront");
    assert_eq!(project["public_id"].as_str().unwrap().len(), 8);
    assert_eq!(project["ingestion_api_keys"].as_array().unwrap().len(), 1);

    let id = project["id"].as_i64().unwrap();
    let (status, fetched) = send(
        &app.router,
        admin("GET", &format!("/api/admin/projects/{id}"), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["project"]["public_id"], project["public_id"]);

    let (status, _) = send(
        &app.router,
        admin("POST", "/api/admin/projects", Some(json!({ "name": "storefront" }))),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = send(
        &app.router,
        admin("POST", "/api/admin/projects", Some(json!({ "name": "  " }))),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app.router, admin("GET", "/api/admin/projects/9999", None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, alerts) = send(
        &app.router,
        admin("GET", &format!("/api/admin/projects/{id}/alerts"), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(alerts["alerts"], json!([]));
}

#[tokio::test]
async fn destination_creation_validates_type_and_url() {
    let app = test_app().await;
    let project_id = create_project(&app.db, "hooks").await.unwrap().project.id;
    let uri = format!("/api/admin/projects/{project_id}/alert_notification_destinations");

    let (status, created) = send(
        &app.router,
        admin(
            "POST",
            &uri,
            Some(json!({
                "type": "generic_webhook",
                "webhook_url": "https://hooks.example.com/in",
                "webhook_headers": { "X-Token": "abc" }
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["type"], "webhook.generic");
    assert_eq!(created["configuration"]["url"], "https://hooks.example.com/in");
    assert_eq!(created["configuration"]["headers"]["X-Token"], "abc");

    let (status, created) = send(
        &app.router,
        admin("POST", &uri, Some(json!({ "type": "internal_logger" }))),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["type"], "internal.logger");

    let (status, _) = send(
        &app.router,
        admin("POST", &uri, Some(json!({ "type": "pager" }))),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app.router,
        admin(
            "POST",
            &uri,
            Some(json!({ "type": "slack_webhook", "webhook_url": "not a url" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app.router,
        admin(
            "POST",
            "/api/admin/projects/4242/alert_notification_destinations",
            Some(json!({ "type": "internal_logger" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn ingestion_status_codes() {
    let app = test_app().await;
    let project = create_project(&app.db, "ingest").await.unwrap();
    let public_id = project.project.public_id.clone();
    let key = project.keys[0].key.clone();
    let auth = format!("Sentry sentry_version=7, sentry_key={key}, sentry_client=test/1.0");
    let body = envelope(&sample_event());

    let (status, _) = send(
        &app.router,
        ingest(&public_id, Some(&auth), "{}\n{}\nnot-json".to_string()),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app.router, ingest("unknownid", Some(&auth), body.clone())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app.router, ingest(&public_id, None, body.clone())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(
        &app.router,
        ingest(&public_id, Some("Sentry sentry_version=7"), body.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(
        &app.router,
        ingest(&public_id, Some("Sentry sentry_key=wrong"), body.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, accepted) = send(&app.router, ingest(&public_id, Some(&auth), body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(accepted["id"], "0f3c2a1b");
}

#[tokio::test]
async fn accepted_event_reaches_the_aggregator() {
    let mut app = test_app().await;
    let project = create_project(&app.db, "reach").await.unwrap();
    let auth = format!("Sentry sentry_key={}", project.keys[0].key);

    let (status, _) = send(
        &app.router,
        ingest(
            &project.project.public_id,
            Some(&auth),
            envelope(&sample_event()),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let stopped = CancellationToken::new();
    stopped.cancel();
    let subscription = app.subscription.take().expect("subscription");
    app.aggregator.consume(subscription, stopped).await;

    let batches = app.aggregator.flush();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0][0].project_event.project_id, project.project.id);
    assert_eq!(batches[0][0].project_event.title, "missing sku");
}

#[tokio::test]
async fn publish_failure_returns_500() {
    let app = test_app().await;
    let project = create_project(&app.db, "closed").await.unwrap();
    let auth = format!("Sentry sentry_key={}", project.keys[0].key);

    drop(app.subscription);

    let (status, body) = send(
        &app.router,
        ingest(
            &project.project.public_id,
            Some(&auth),
            envelope(&sample_event()),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["code"], "INTERNAL_SERVER_ERROR");
}
