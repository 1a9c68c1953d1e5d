//! Payment ledger integration tests: creation preconditions, the state
//! machine, overpayment rejection, installment plans, and the overdue sweep.

mod common;

use chrono::{Months, Utc};
use common::TestApp;
use payments_service::dtos::{PaymentResponse, RecordDetailResponse};
use rust_decimal::Decimal;
use serde_json::json;
use uuid::Uuid;

fn dec(s: &str) -> Decimal {
    s.parse().unwrap()
}

#[tokio::test]
async fn create_payment_for_completed_order() {
    let app = TestApp::spawn().await;

    let payment = app.seed_contado_payment("1000.00").await;

    assert!(payment.code.starts_with("PAG-"));
    assert_eq!(payment.total_amount, dec("1000.00"));
    assert_eq!(payment.paid_amount, dec("0.00"));
    assert_eq!(payment.pending_amount, dec("1000.00"));
    assert_eq!(payment.installment_count, 1);
    assert_eq!(payment.installments_paid, 0);
    assert_eq!(payment.state.as_str(), "pending");
}

#[tokio::test]
async fn create_payment_rejects_unfinished_order() {
    let app = TestApp::spawn().await;

    let response = app
        .put_json(
            "/work-orders",
            &json!({
                "code": "OT-UNFINISHED",
                "state": "in_progress",
                "total": "500.00",
                "client_name": "Juan Pérez"
            }),
        )
        .await;
    let body: serde_json::Value = response.json().await.unwrap();
    let order_id = body["id"].as_str().unwrap();

    let response = app
        .post_json(
            "/payments",
            &json!({ "work_order_id": order_id, "kind": "contado" }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 400);
}

#[tokio::test]
async fn create_payment_rejects_unknown_order() {
    let app = TestApp::spawn().await;

    let response = app
        .post_json(
            "/payments",
            &json!({ "work_order_id": Uuid::new_v4(), "kind": "contado" }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn duplicate_active_payment_is_rejected_until_cancelled() {
    let app = TestApp::spawn().await;

    let payment = app.seed_contado_payment("800.00").await;

    // Second ledger for the same order is a conflict while one is active.
    let response = app
        .post_json(
            "/payments",
            &json!({ "work_order_id": payment.work_order_id, "kind": "contado" }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 409);

    // Cancelling frees the order for a fresh ledger.
    let response = app
        .post_json(&format!("/payments/{}/cancel", payment.id), &json!({}))
        .await;
    assert_eq!(response.status().as_u16(), 200);

    let response = app
        .post_json(
            "/payments",
            &json!({ "work_order_id": payment.work_order_id, "kind": "contado" }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 201);
}

#[tokio::test]
async fn contado_forces_a_single_installment() {
    let app = TestApp::spawn().await;
    let order_id = app.seed_completed_order("600.00").await;

    let response = app
        .post_json(
            "/payments",
            &json!({ "work_order_id": order_id, "kind": "contado", "installment_count": 5 }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 201);
    let payment: PaymentResponse = response.json().await.unwrap();
    assert_eq!(payment.installment_count, 1);
}

#[tokio::test]
async fn credito_requires_due_date() {
    let app = TestApp::spawn().await;
    let order_id = app.seed_completed_order("600.00").await;

    let response = app
        .post_json(
            "/payments",
            &json!({ "work_order_id": order_id, "kind": "credito", "installment_count": 3 }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 400);
}

#[tokio::test]
async fn recording_payments_walks_the_state_machine() {
    let app = TestApp::spawn().await;
    let order_id = app.seed_completed_order("1000.00").await;
    let staff_id = app.seed_staff("secretary").await;

    let due = Utc::now().date_naive() + Months::new(1);
    let response = app
        .post_json(
            "/payments",
            &json!({
                "work_order_id": order_id,
                "kind": "credito",
                "installment_count": 2,
                "due_date": due
            }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 201);
    let payment: PaymentResponse = response.json().await.unwrap();

    // First installment: pending -> partially_paid.
    let response = app
        .post_json(
            &format!("/payments/{}/details", payment.id),
            &json!({ "amount": "400.00", "method": "cash", "recorded_by": staff_id }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 201);
    let recorded: RecordDetailResponse = response.json().await.unwrap();
    assert_eq!(recorded.payment.state.as_str(), "partially_paid");
    assert_eq!(recorded.payment.paid_amount, dec("400.00"));
    assert_eq!(recorded.payment.pending_amount, dec("600.00"));
    assert_eq!(recorded.payment.installments_paid, 1);
    assert_eq!(recorded.detail.installment_number, 1);

    // Second installment settles: partially_paid -> fully_paid.
    let response = app
        .post_json(
            &format!("/payments/{}/details", payment.id),
            &json!({ "amount": "600.00", "method": "cash", "recorded_by": staff_id }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 201);
    let recorded: RecordDetailResponse = response.json().await.unwrap();
    assert_eq!(recorded.payment.state.as_str(), "fully_paid");
    assert_eq!(recorded.payment.paid_amount, dec("1000.00"));
    assert_eq!(recorded.payment.installments_paid, 2);

    // The detail log matches the aggregate.
    let shown = app.show_payment(payment.id).await;
    let details = shown["details"].as_array().unwrap();
    assert_eq!(details.len(), 2);
    let sum: Decimal = details
        .iter()
        .map(|d| d["amount"].as_str().unwrap().parse::<Decimal>().unwrap())
        .sum();
    assert_eq!(sum, dec("1000.00"));
    assert_eq!(
        shown["paid_amount"].as_str().unwrap().parse::<Decimal>().unwrap(),
        dec("1000.00")
    );
}

#[tokio::test]
async fn overpayment_is_rejected_and_state_unchanged() {
    let app = TestApp::spawn().await;
    let payment = app.seed_contado_payment("1000.00").await;
    let staff_id = app.seed_staff("owner").await;

    let response = app
        .post_json(
            &format!("/payments/{}/details", payment.id),
            &json!({ "amount": "400.00", "method": "cash", "recorded_by": staff_id }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 201);

    // 700 > the 600 still pending.
    let response = app
        .post_json(
            &format!("/payments/{}/details", payment.id),
            &json!({ "amount": "700.00", "method": "cash", "recorded_by": staff_id }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 422);

    let shown = app.show_payment(payment.id).await;
    assert_eq!(shown["state"], "partially_paid");
    assert_eq!(
        shown["paid_amount"].as_str().unwrap().parse::<Decimal>().unwrap(),
        dec("400.00")
    );
    assert_eq!(shown["details"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn only_counter_staff_may_record_payments() {
    let app = TestApp::spawn().await;
    let payment = app.seed_contado_payment("300.00").await;

    let mechanic_id = app.seed_staff("mechanic").await;
    let response = app
        .post_json(
            &format!("/payments/{}/details", payment.id),
            &json!({ "amount": "300.00", "method": "cash", "recorded_by": mechanic_id }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 403);

    // An id that resolves to nobody is a validation failure, not a crash.
    let response = app
        .post_json(
            &format!("/payments/{}/details", payment.id),
            &json!({ "amount": "300.00", "method": "cash", "recorded_by": Uuid::new_v4() }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 400);
}

#[tokio::test]
async fn terms_cannot_change_after_first_installment() {
    let app = TestApp::spawn().await;
    let order_id = app.seed_completed_order("900.00").await;
    let staff_id = app.seed_staff("secretary").await;

    let due = Utc::now().date_naive() + Months::new(1);
    let response = app
        .post_json(
            "/payments",
            &json!({
                "work_order_id": order_id,
                "kind": "credito",
                "installment_count": 3,
                "due_date": due
            }),
        )
        .await;
    let payment: PaymentResponse = response.json().await.unwrap();

    // Editable while pending and empty.
    let response = app
        .patch_json(
            &format!("/payments/{}", payment.id),
            &json!({ "kind": "credito", "installment_count": 4, "due_date": due }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 200);
    let updated: PaymentResponse = response.json().await.unwrap();
    assert_eq!(updated.installment_count, 4);

    let response = app
        .post_json(
            &format!("/payments/{}/details", payment.id),
            &json!({ "amount": "225.00", "method": "cash", "recorded_by": staff_id }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 201);

    // Frozen once money moved.
    let response = app
        .patch_json(
            &format!("/payments/{}", payment.id),
            &json!({ "kind": "contado", "installment_count": 1 }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 409);
}

#[tokio::test]
async fn installment_plan_splits_the_total_by_month() {
    let app = TestApp::spawn().await;
    let order_id = app.seed_completed_order("1500.00").await;

    let due = Utc::now().date_naive() + Months::new(2);
    let response = app
        .post_json(
            "/payments",
            &json!({
                "work_order_id": order_id,
                "kind": "credito",
                "installment_count": 3,
                "due_date": due
            }),
        )
        .await;
    let payment: PaymentResponse = response.json().await.unwrap();

    let shown = app.show_payment(payment.id).await;
    let plan = shown["installment_plan"].as_array().unwrap();
    assert_eq!(plan.len(), 3);

    for (i, line) in plan.iter().enumerate() {
        assert_eq!(line["installment_number"], (i + 1) as i64);
        assert_eq!(
            line["amount"].as_str().unwrap().parse::<Decimal>().unwrap(),
            dec("500.00")
        );
        assert_eq!(line["paid"], false);
        let expected_due = due + Months::new(i as u32);
        assert_eq!(line["due_date"].as_str().unwrap(), expected_due.to_string());
    }
}

#[tokio::test]
async fn overdue_sweep_marks_past_due_open_payments() {
    let app = TestApp::spawn().await;
    let order_id = app.seed_completed_order("700.00").await;

    let due = Utc::now().date_naive() + Months::new(1);
    let response = app
        .post_json(
            "/payments",
            &json!({
                "work_order_id": order_id,
                "kind": "credito",
                "installment_count": 2,
                "due_date": due
            }),
        )
        .await;
    let payment: PaymentResponse = response.json().await.unwrap();

    // Time-travel the due date into the past.
    sqlx::query("UPDATE payments SET due_date = CURRENT_DATE - 10 WHERE id = $1")
        .bind(payment.id)
        .execute(app.db.pool())
        .await
        .unwrap();

    let response = app.post_json("/payments/overdue/sweep", &json!({})).await;
    assert_eq!(response.status().as_u16(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["swept"], 1);

    let shown = app.show_payment(payment.id).await;
    assert_eq!(shown["state"], "overdue");

    // A second sweep finds nothing new.
    let response = app.post_json("/payments/overdue/sweep", &json!({})).await;
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["swept"], 0);
}

#[tokio::test]
async fn receipt_numbers_follow_the_method_day_sequence() {
    let app = TestApp::spawn().await;
    let payment = app.seed_contado_payment("1000.00").await;
    let staff_id = app.seed_staff("secretary").await;

    let today = Utc::now().date_naive().format("%Y%m%d").to_string();

    let response = app
        .post_json(
            &format!("/payments/{}/details", payment.id),
            &json!({ "amount": "100.00", "method": "cash", "recorded_by": staff_id }),
        )
        .await;
    let first: RecordDetailResponse = response.json().await.unwrap();
    assert_eq!(
        first.detail.receipt_number.as_deref(),
        Some(format!("EF-{today}-0001").as_str())
    );

    let response = app
        .post_json(
            &format!("/payments/{}/details", payment.id),
            &json!({ "amount": "100.00", "method": "cash", "recorded_by": staff_id }),
        )
        .await;
    let second: RecordDetailResponse = response.json().await.unwrap();
    assert_eq!(
        second.detail.receipt_number.as_deref(),
        Some(format!("EF-{today}-0002").as_str())
    );

    // A caller-supplied receipt number is kept as-is.
    let response = app
        .post_json(
            &format!("/payments/{}/details", payment.id),
            &json!({
                "amount": "100.00",
                "method": "cash",
                "recorded_by": staff_id,
                "receipt_number": "MANUAL-77"
            }),
        )
        .await;
    let third: RecordDetailResponse = response.json().await.unwrap();
    assert_eq!(third.detail.receipt_number.as_deref(), Some("MANUAL-77"));
}

#[tokio::test]
async fn listing_filters_by_state_and_search() {
    let app = TestApp::spawn().await;
    let paid = app.seed_contado_payment("100.00").await;
    let _open = app.seed_contado_payment("200.00").await;
    let staff_id = app.seed_staff("owner").await;

    let response = app
        .post_json(
            &format!("/payments/{}/details", paid.id),
            &json!({ "amount": "100.00", "method": "cash", "recorded_by": staff_id }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 201);

    let response = app.get("/payments?state=fully_paid").await;
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["total"], 1);
    assert_eq!(body["payments"][0]["id"].as_str().unwrap(), paid.id.to_string());

    // Search matches the seeded client name on every payment.
    let response = app.get("/payments?search=Juan").await;
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["total"], 2);

    let response = app.get("/payments?search=no-such-client").await;
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["total"], 0);
}

#[tokio::test]
async fn stats_track_counts_and_collections() {
    let app = TestApp::spawn().await;
    let payment = app.seed_contado_payment("400.00").await;
    let _pending = app.seed_contado_payment("250.00").await;
    let staff_id = app.seed_staff("secretary").await;

    let response = app
        .post_json(
            &format!("/payments/{}/details", payment.id),
            &json!({ "amount": "400.00", "method": "cash", "recorded_by": staff_id }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 201);

    let response = app.get("/payments/stats").await;
    let stats: serde_json::Value = response.json().await.unwrap();
    assert_eq!(stats["total"], 2);
    assert_eq!(stats["pending"], 1);
    assert_eq!(stats["fully_paid"], 1);
    assert_eq!(
        stats["collected_today"].as_str().unwrap().parse::<Decimal>().unwrap(),
        dec("400.00")
    );
}
