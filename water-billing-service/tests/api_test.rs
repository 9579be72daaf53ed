mod common;

use common::TestApp;
use serde_json::{json, Value};

#[tokio::test]
async fn health_and_readiness() {
    let app = TestApp::spawn().await;

    let response = app.get("/health").await;
    assert!(response.status().is_success());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "water-billing-service");

    let response = app.get("/ready").await;
    assert!(response.status().is_success());

    let response = app.get("/metrics").await;
    assert!(response.status().is_success());
    assert!(response.headers().contains_key("x-request-id"));
}

/// Subscription type, rate, customer and a January reading; returns
/// `(customer_id, usage_id)`.
async fn seed(app: &TestApp) -> (String, String) {
    let response = app
        .post(
            "/subscription-types",
            json!({
                "name": "Residential",
                "monthly_fee": 50_000,
                "maintenance_fee": 10_000
            }),
        )
        .await;
    assert_eq!(response.status(), 201);
    let subscription: Value = response.json().await.unwrap();
    let subscription_id = subscription["subscription_type_id"].as_str().unwrap().to_string();

    let response = app
        .post_admin(
            "/water-rates",
            json!({
                "subscription_type_id": subscription_id,
                "amount_per_m3": 5_000,
                "effective_date": "2024-01-01"
            }),
        )
        .await;
    assert_eq!(response.status(), 201);

    let response = app
        .post(
            "/customers",
            json!({
                "name": "Siti Rahma",
                "meter_number": "MTR-0001",
                "subscription_type_id": subscription_id,
                "registration_date": "2023-12-01"
            }),
        )
        .await;
    assert_eq!(response.status(), 201);
    let customer: Value = response.json().await.unwrap();
    let customer_id = customer["customer_id"].as_str().unwrap().to_string();

    let response = app
        .post(
            "/usages",
            json!({
                "customer_id": customer_id,
                "usage_month": "2024-01",
                "meter_end": 40
            }),
        )
        .await;
    assert_eq!(response.status(), 201);
    let usage: Value = response.json().await.unwrap();
    assert_eq!(usage["usage_month"], "2024-01-01");
    let usage_id = usage["usage_id"].as_str().unwrap().to_string();

    (customer_id, usage_id)
}

#[tokio::test]
async fn invoice_and_payment_flow() {
    let app = TestApp::spawn().await;
    let (customer_id, usage_id) = seed(&app).await;

    let response = app
        .post(
            "/invoices",
            json!({
                "customer_id": customer_id,
                "usage_id": usage_id,
                "issue_date": "2024-01-31"
            }),
        )
        .await;
    assert_eq!(response.status(), 201);
    let invoice: Value = response.json().await.unwrap();
    assert_eq!(invoice["total_amount"], 260_000);
    assert_eq!(invoice["status"], "unpaid");
    assert_eq!(invoice["due_date"], "2024-02-14");
    assert_eq!(invoice["total_display"], "Rp 260.000");
    let invoice_id = invoice["invoice_id"].as_str().unwrap().to_string();

    // Missing reference for a bank transfer.
    let response = app
        .post(
            "/payments",
            json!({ "invoice_id": invoice_id, "amount": 100_000, "method": "bank_transfer" }),
        )
        .await;
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "validation_error");

    let response = app
        .post(
            "/payments",
            json!({
                "invoice_id": invoice_id,
                "amount": 100_000,
                "method": "bank_transfer",
                "reference_number": "TRX1",
                "payment_date": "2024-02-01"
            }),
        )
        .await;
    assert_eq!(response.status(), 201);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["invoice"]["status"], "partial");
    assert_eq!(body["invoice"]["amount_due"], 160_000);
    assert_eq!(body["payment"]["status"], "completed");
    assert_eq!(body["payment"]["recorded_by"], "operator-1");
    let payment_id = body["payment"]["payment_id"].as_str().unwrap().to_string();

    // Overpayment.
    let response = app
        .post(
            "/payments",
            json!({ "invoice_id": invoice_id, "amount": 160_001, "method": "cash" }),
        )
        .await;
    assert_eq!(response.status(), 409);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "conflict");

    // Voiding needs the admin role.
    let void_path = format!("/payments/{}/void", payment_id);
    let response = app.post(&void_path, json!({ "reason": "Bounced" })).await;
    assert_eq!(response.status(), 403);

    let response = app.post_admin(&void_path, json!({ "reason": "Bounced" })).await;
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["payment"]["status"], "voided");
    assert_eq!(body["invoice"]["status"], "unpaid");
    assert_eq!(body["invoice"]["amount_due"], 260_000);

    let response = app.post_admin(&void_path, json!({ "reason": "Again" })).await;
    assert_eq!(response.status(), 422);

    let response = app.get(&format!("/invoices/{}/payments", invoice_id)).await;
    let payments: Value = response.json().await.unwrap();
    assert_eq!(payments.as_array().unwrap().len(), 1);

    let response = app.get(&format!("/customers/{}/outstanding", customer_id)).await;
    let outstanding: Value = response.json().await.unwrap();
    assert_eq!(outstanding.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn outstanding_report_over_http() {
    let app = TestApp::spawn().await;
    let (customer_id, usage_id) = seed(&app).await;
    let response = app
        .post(
            "/invoices",
            json!({ "customer_id": customer_id, "usage_id": usage_id, "issue_date": "2024-01-31" }),
        )
        .await;
    assert_eq!(response.status(), 201);

    let response = app.get("/reports/outstanding?as_of=2024-03-20").await;
    assert_eq!(response.status(), 200);
    let report: Value = response.json().await.unwrap();
    assert_eq!(report["total_outstanding"], 260_000);
    assert_eq!(report["buckets"].as_array().unwrap().len(), 5);
    assert_eq!(report["invoices"][0]["bucket"], "31-60");
    assert_eq!(report["invoices"][0]["days_overdue"], 35);

    let response = app
        .get("/reports/outstanding?start_date=2024-03-01&end_date=2024-02-01")
        .await;
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn overdue_sweep_and_listing() {
    let app = TestApp::spawn().await;
    let (customer_id, usage_id) = seed(&app).await;
    app.post(
        "/invoices",
        json!({ "customer_id": customer_id, "usage_id": usage_id, "issue_date": "2024-01-31" }),
    )
    .await;

    let response = app.post("/invoices/overdue-sweep?as_of=2024-03-01", json!({})).await;
    assert_eq!(response.status(), 403);

    let response = app
        .post_admin("/invoices/overdue-sweep?as_of=2024-03-01", json!({}))
        .await;
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["updated"], 1);

    let response = app.get("/invoices?status=overdue").await;
    let invoices: Value = response.json().await.unwrap();
    assert_eq!(invoices.as_array().unwrap().len(), 1);

    let response = app.get("/invoices?status=settled").await;
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn billing_run_over_http() {
    let app = TestApp::spawn().await;
    seed(&app).await;

    let response = app
        .post(
            "/billing-runs",
            json!({ "usage_month": "2024-01", "issue_date": "2024-01-31" }),
        )
        .await;
    assert_eq!(response.status(), 200);
    let report: Value = response.json().await.unwrap();
    assert_eq!(report["generated"], 1);
    assert_eq!(report["total_billed"], 260_000);
}

#[tokio::test]
async fn requests_without_operator_are_rejected() {
    let app = TestApp::spawn().await;

    let response = app
        .client
        .post(app.url("/subscription-types"))
        .json(&json!({ "name": "Residential" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);

    let response = app
        .post_as("superuser", "/subscription-types", json!({ "name": "Residential" }))
        .await;
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn rate_administration_requires_admin() {
    let app = TestApp::spawn().await;
    let response = app
        .post("/subscription-types", json!({ "name": "Commercial", "monthly_fee": 75_000 }))
        .await;
    let subscription: Value = response.json().await.unwrap();
    let subscription_id = subscription["subscription_type_id"].as_str().unwrap();

    let response = app
        .post(
            "/water-rates",
            json!({
                "subscription_type_id": subscription_id,
                "amount_per_m3": 7_000,
                "effective_date": "2024-01-01"
            }),
        )
        .await;
    assert_eq!(response.status(), 403);

    let response = app
        .get(&format!(
            "/water-rates/resolve?subscription_type_id={}&date=2024-05-01",
            subscription_id
        ))
        .await;
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn customer_lifecycle_over_http() {
    let app = TestApp::spawn().await;
    let (customer_id, _) = seed(&app).await;
    let suspend = format!("/customers/{}/suspend", customer_id);

    let response = app.post(&suspend, json!({ "reason": "Unpaid balance" })).await;
    assert_eq!(response.status(), 403);

    let response = app.post_admin(&suspend, json!({ "reason": "Unpaid balance" })).await;
    assert_eq!(response.status(), 200);
    let customer: Value = response.json().await.unwrap();
    assert_eq!(customer["status"], "suspended");

    let response = app.post_admin(&suspend, json!({})).await;
    assert_eq!(response.status(), 422);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "state_error");

    // Suspended customers are left out of the run.
    let response = app
        .post(
            "/billing-runs",
            json!({ "usage_month": "2024-01", "issue_date": "2024-01-31" }),
        )
        .await;
    let report: Value = response.json().await.unwrap();
    assert_eq!(report["generated"], 0);

    let response = app
        .post_admin(&format!("/customers/{}/activate", customer_id), json!({}))
        .await;
    assert_eq!(response.status(), 200);
    let customer: Value = response.json().await.unwrap();
    assert_eq!(customer["status"], "active");

    let response = app
        .post_admin(
            &format!("/customers/{}/deactivate", uuid::Uuid::new_v4()),
            json!({}),
        )
        .await;
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn revenue_and_usage_reports_over_http() {
    let app = TestApp::spawn().await;
    let (customer_id, usage_id) = seed(&app).await;
    app.post(
        "/invoices",
        json!({ "customer_id": customer_id, "usage_id": usage_id, "issue_date": "2024-01-31" }),
    )
    .await;

    let response = app.get("/reports/revenue").await;
    assert_eq!(response.status(), 200);
    let report: Value = response.json().await.unwrap();
    assert_eq!(report["total_revenue"], 260_000);
    assert_eq!(report["invoice_count"], 1);
    assert_eq!(report["monthly"][0]["month"], "2024-01-01");
    assert_eq!(report["by_subscription_type"][0]["subscription_type"], "Residential");

    let response = app.get("/reports/usage?start_date=2024-01-01&end_date=2024-01-31").await;
    assert_eq!(response.status(), 200);
    let report: Value = response.json().await.unwrap();
    assert_eq!(report["reading_count"], 1);
    assert_eq!(report["high_consumers"][0]["meter_number"], "MTR-0001");
    assert_eq!(report["high_consumers"][0]["customer_id"], customer_id.as_str());

    for path in ["/reports/revenue", "/reports/usage"] {
        let response = app
            .get(&format!("{}?start_date=2024-03-01&end_date=2024-02-01", path))
            .await;
        assert_eq!(response.status(), 400);
    }
}

#[tokio::test]
async fn fees_and_amounts_beyond_bounds_are_rejected() {
    let app = TestApp::spawn().await;

    let response = app
        .post(
            "/subscription-types",
            json!({ "name": "Industrial", "monthly_fee": i64::MAX }),
        )
        .await;
    assert_eq!(response.status(), 400);

    let (customer_id, usage_id) = seed(&app).await;
    let response = app
        .post(
            "/invoices",
            json!({ "customer_id": customer_id, "usage_id": usage_id, "issue_date": "2024-01-31" }),
        )
        .await;
    let invoice: Value = response.json().await.unwrap();
    let response = app
        .post(
            "/payments",
            json!({
                "invoice_id": invoice["invoice_id"],
                "amount": i64::MAX,
                "method": "cash"
            }),
        )
        .await;
    assert_eq!(response.status(), 400);
}
