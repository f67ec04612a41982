//! Payment API surface: creation, status reads, manual verification,
//! the per-user creation limit, and the audit export.

mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use common::*;
use serde_json::json;
use soko_payments::models::events;
use tower::ServiceExt;
use uuid::Uuid;

#[tokio::test]
async fn create_payment_returns_checkout_details() {
    let app = TestApp::build();
    app.mock.push_create_ok("pay_ext_1", "https://pay.lygos.test/checkout/1");

    let response = app
        .post_json("/payments", create_payment_body(5000, "lygos"))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let body = read_json(response).await;
    assert_eq!(body["status"], json!("PENDING"));
    assert_eq!(body["amount"], json!(5000));
    assert_eq!(
        body["checkout_url"],
        json!("https://pay.lygos.test/checkout/1")
    );
    assert!(Uuid::parse_str(body["transaction_id"].as_str().unwrap()).is_ok());
}

#[tokio::test]
async fn free_tier_payment_completes_immediately() {
    let app = TestApp::build();

    let response = app
        .post_json("/payments", create_payment_body(0, "lygos"))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let body = read_json(response).await;
    assert_eq!(body["status"], json!("COMPLETED"));
    assert!(body["checkout_url"].is_null());
    assert_eq!(app.ads.ad_count(), 1);
}

#[tokio::test]
async fn create_payment_requires_an_authenticated_user() {
    let app = TestApp::build();

    let request = Request::builder()
        .method("POST")
        .uri("/payments")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(create_payment_body(5000, "lygos").to_string()))
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn create_payment_rejects_invalid_payloads() {
    let app = TestApp::build();

    let response = app
        .post_json("/payments", create_payment_body(20_000_000, "lygos"))
        .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let mut bad_email = create_payment_body(5000, "lygos");
    bad_email["customer"]["email"] = json!("not-an-email");
    let response = app.post_json("/payments", bad_email).await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn get_payment_reports_remaining_window() {
    let app = TestApp::build();
    let id = app.create_pending_payment().await;

    let response = app.get(&format!("/payments/{id}")).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = read_json(response).await;
    assert_eq!(body["status"], json!("PENDING"));
    let remaining = body["expires_in_seconds"].as_u64().unwrap();
    // 24 hour window, freshly created.
    assert!(remaining > 86_000 && remaining <= 86_400);
}

#[tokio::test]
async fn get_unknown_payment_is_not_found() {
    let app = TestApp::build();
    let response = app.get(&format!("/payments/{}", Uuid::new_v4())).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn verify_endpoint_applies_the_polled_status() {
    let app = TestApp::build();
    let id = app.create_pending_payment().await;
    app.mock.push_verify_status("completed");

    let response = app.post_json(&format!("/payments/{id}/verify"), json!({})).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = read_json(response).await;
    assert_eq!(body["outcome"], json!("applied"));
    assert_eq!(body["status"], json!("COMPLETED"));
    assert_eq!(app.ads.ad_count(), 1);
}

#[tokio::test]
async fn sixth_creation_attempt_in_the_window_is_rate_limited() {
    let app = TestApp::build();

    for _ in 0..5 {
        app.mock.push_create_ok("pay_ext", "https://pay.test/checkout");
        let response = app
            .post_json("/payments", create_payment_body(5000, "lygos"))
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    let response = app
        .post_json("/payments", create_payment_body(5000, "lygos"))
        .await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key("retry-after"));

    let body = read_json(response).await;
    assert_eq!(body["code"], json!("RATE_LIMIT_EXCEEDED"));
    assert_eq!(
        app.audit.entries_of_type(events::SUSPICIOUS_ACTIVITY).len(),
        1
    );
}

#[tokio::test]
async fn health_endpoint_answers() {
    let app = TestApp::build();
    let response = app.get("/health").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["status"], json!("ok"));
}

#[tokio::test]
async fn audit_export_produces_filtered_csv() {
    let app = TestApp::build();
    app.mock.push_create_ok("pay_ext_1", "https://pay.test/checkout");
    let response = app
        .post_json("/payments", create_payment_body(5000, "lygos"))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app.get("/audit/export").await;
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(content_type.starts_with("text/csv"));

    let csv = read_text(response).await;
    let mut lines = csv.lines();
    assert_eq!(
        lines.next().unwrap(),
        "Date,TransactionID,EventType,IPAddress,UserAgent,EventData,SecurityFlags"
    );
    assert!(csv.contains(events::TRANSACTION_CREATED));
    assert!(csv.contains(events::PAYMENT_INITIATED));

    // Filtering narrows the export to the requested event type.
    let response = app
        .get("/audit/export?event_type=payment_initiated")
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let filtered = read_text(response).await;
    assert!(filtered.contains(events::PAYMENT_INITIATED));
    assert!(!filtered.contains(events::TRANSACTION_CREATED));
}

#[tokio::test]
async fn responses_carry_a_request_id() {
    let app = TestApp::build();

    // Minted when the caller sends none.
    let response = app.get("/health").await;
    let minted = response
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .unwrap()
        .to_string();
    assert!(Uuid::parse_str(&minted).is_ok());

    // Echoed back verbatim when supplied.
    let request = Request::builder()
        .method("GET")
        .uri("/health")
        .header("x-request-id", "trace-me-7")
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(
        response.headers().get("x-request-id").unwrap(),
        "trace-me-7"
    );
}

#[tokio::test]
async fn metrics_labels_use_the_route_template() {
    soko_payments::services::metrics::init_metrics();
    let app = TestApp::build();
    let id = app.create_pending_payment().await;

    let response = app.get(&format!("/payments/{id}")).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.get("/metrics").await;
    let body = read_text(response).await;
    assert!(body.contains("http_requests_total"));
    assert!(body.contains(r#"route="/payments/:id""#));
    // Raw ids must not leak into label values.
    assert!(!body.contains(&id.to_string()));
}
