mod common;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use common::{dec, Fixture};
use condo_billing::api::{self, AppState};
use serde_json::{json, Value};
use tower::ServiceExt;

fn app(fx: &Fixture) -> Router {
    api::router(AppState::new(fx.store.clone(), &fx.config))
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Vec<u8>) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(body.map_or_else(Body::empty, |b| Body::from(b.to_string())))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, bytes.to_vec())
}

async fn send_json(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let (status, bytes) = send(app, method, uri, body).await;
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn health() {
    let fx = Fixture::new();
    let (status, body) = send(&app(&fx), "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"OK");
}

#[tokio::test]
async fn closing_flow_over_http() {
    let fx = Fixture::new();
    let units = fx.units(1, &["0.5", "0.3", "0.2"]).await;
    let app = app(&fx);

    let (status, body) = send_json(
        &app,
        "POST",
        "/api/condominiums/1/expenses",
        Some(json!({ "period": "202401", "net": "84033.61", "tax": "15966.39" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let (status, body) = send_json(
        &app,
        "POST",
        "/api/condominiums/1/closings",
        Some(json!({ "period": "202401" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["summary"]["invoices"], 3);
    assert_eq!(body["data"]["invoices"].as_array().unwrap().len(), 3);

    let (status, csv) = send(&app, "GET", "/api/condominiums/1/closings/202401/export", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(String::from_utf8(csv).unwrap().lines().count(), 4);

    let (status, body) = send_json(
        &app,
        "POST",
        &format!("/api/units/{}/payments", units[0].id),
        Some(json!({ "amount": "60000", "method": "transferencia" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["applications"].as_array().unwrap().len(), 1);
    let payment_id = body["data"]["payment"]["id"].as_i64().unwrap();

    let (status, body) = send_json(&app, "GET", &format!("/api/payments/{payment_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["payment"]["id"], payment_id);

    let invoices = fx.payments.invoices_for_unit(units[0].id).await.unwrap();
    assert_eq!(invoices[0].total_paid, dec("50000"));
}

#[tokio::test]
async fn batch_closing_reports_each_condominium() {
    let fx = Fixture::new();
    fx.units(1, &["1"]).await;
    fx.units(2, &["0.5", "0.5"]).await;
    let app = app(&fx);

    let (status, body) = send_json(
        &app,
        "POST",
        "/api/closings/batch",
        Some(json!({ "condominium_ids": [1, 2, 3], "period": "202401" })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);
    let results = body["data"].as_array().unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(results[0]["success"], true);
    assert_eq!(results[1]["summary"]["invoices"], 2);
    assert_eq!(results[2]["success"], false);
}

#[tokio::test]
async fn error_statuses() {
    let fx = Fixture::new();
    let unit = fx.units(1, &["1"]).await.remove(0);
    let app = app(&fx);

    let (status, body) = send_json(
        &app,
        "POST",
        &format!("/api/units/{}/payments", unit.id),
        Some(json!({ "amount": "0", "method": "efectivo" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);

    let (status, _) = send_json(
        &app,
        "POST",
        "/api/condominiums/1/closings",
        Some(json!({ "period": "2024-01" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send_json(&app, "GET", "/api/payments/999", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send_json(
        &app,
        "POST",
        "/api/units/999/payments",
        Some(json!({ "amount": "100", "method": "efectivo" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send_json(
        &app,
        "POST",
        "/api/condominiums/5/closings",
        Some(json!({ "period": "202401" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, body) = send_json(&app, "POST", "/api/condominiums/5/proration-rules/default", None).await;
    assert_eq!(status, StatusCode::OK);
    let rule_id = body["data"]["id"].as_i64().unwrap();
    let (status, body) = send_json(&app, "POST", &format!("/api/proration-rules/{rule_id}/factors"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], 0);
}
