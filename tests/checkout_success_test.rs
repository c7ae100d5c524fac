//! Integration tests for the success-page verifier and the reconciliation
//! sweeper: the two paths that recover order state when webhook delivery
//! lags or is lost.

mod common;

use axum::http::Method;
use common::{response_json, ScriptedGateway, TestApp};
use encore_api::services::reconciliation::{sweep_once, SweepReport};

#[tokio::test]
async fn paid_session_renders_confirmation_and_persists_back() {
    let app = TestApp::new().await;
    let event = app.seed_event("Verified Show", 2500, None, true).await;
    let order = app
        .seed_order("registration", event.id, "pending", Some("cs_paid"))
        .await;
    app.gateway
        .insert_session(ScriptedGateway::paid_session("cs_paid", Some(order.id), 2500));

    let response = app
        .request(
            Method::GET,
            "/api/v1/checkout/success?session_id=cs_paid",
            None,
        )
        .await;

    assert_eq!(response.status(), 200);
    let body = response_json(response).await;
    assert_eq!(body["paid"], true);
    assert_eq!(body["amountCents"], 2500);
    assert_eq!(body["orderId"], order.id.to_string());

    // The webhook has not run, yet the local record is already reconciled.
    assert_eq!(app.order(order.id).await.status, "completed");
}

#[tokio::test]
async fn unpaid_session_surfaces_an_error_state() {
    let app = TestApp::new().await;
    let event = app.seed_event("Unpaid Show", 2500, None, true).await;
    let order = app
        .seed_order("registration", event.id, "pending", Some("cs_open"))
        .await;
    app.gateway
        .insert_session(ScriptedGateway::open_session("cs_open", Some(order.id)));

    let response = app
        .request(
            Method::GET,
            "/api/v1/checkout/success?session_id=cs_open",
            None,
        )
        .await;

    assert_eq!(response.status(), 409);
    assert_eq!(app.order(order.id).await.status, "pending");
}

#[tokio::test]
async fn unknown_session_maps_to_provider_error() {
    let app = TestApp::new().await;

    let response = app
        .request(
            Method::GET,
            "/api/v1/checkout/success?session_id=cs_missing",
            None,
        )
        .await;
    assert_eq!(response.status(), 502);

    let response = app
        .request(Method::GET, "/api/v1/checkout/success", None)
        .await;
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn paid_session_for_unknown_order_still_confirms() {
    let app = TestApp::new().await;
    app.gateway
        .insert_session(ScriptedGateway::paid_session("cs_orphan", None, 1500));

    let response = app
        .request(
            Method::GET,
            "/api/v1/checkout/success?session_id=cs_orphan",
            None,
        )
        .await;

    // Confirmation comes from the provider, not the local record.
    assert_eq!(response.status(), 200);
    let body = response_json(response).await;
    assert_eq!(body["paid"], true);
}

#[tokio::test]
async fn sweeper_reconciles_stale_pending_orders() {
    let app = TestApp::new().await;
    let event = app.seed_event("Sweep Show", 2500, None, true).await;

    let paid = app
        .seed_order("registration", event.id, "pending", Some("cs_sweep_paid"))
        .await;
    app.gateway.insert_session(ScriptedGateway::paid_session(
        "cs_sweep_paid",
        Some(paid.id),
        2500,
    ));

    let expired = app
        .seed_order("registration", event.id, "pending", Some("cs_sweep_exp"))
        .await;
    app.gateway.insert_session(ScriptedGateway::expired_session(
        "cs_sweep_exp",
        Some(expired.id),
    ));

    // Abandoned: the initiator failed before obtaining a session reference.
    let abandoned = app
        .seed_order("registration", event.id, "pending", None)
        .await;

    // Negative threshold makes every pending order stale.
    let report = sweep_once(
        &app.state.db,
        &app.state.services.orders,
        app.state.gateway.as_deref(),
        -1,
    )
    .await
    .expect("sweep");

    assert_eq!(
        report,
        SweepReport {
            completed: 1,
            expired: 2,
            still_pending: 0,
            errors: 0
        }
    );
    assert_eq!(app.order(paid.id).await.status, "completed");
    assert_eq!(app.order(expired.id).await.status, "expired");
    assert_eq!(app.order(abandoned.id).await.status, "expired");
}

#[tokio::test]
async fn sweeper_leaves_fresh_and_open_orders_alone() {
    let app = TestApp::new().await;
    let event = app.seed_event("Fresh Show", 2500, None, true).await;

    // Fresh pending order, threshold one hour: not stale yet.
    let fresh = app
        .seed_order("registration", event.id, "pending", Some("cs_fresh"))
        .await;

    let report = sweep_once(
        &app.state.db,
        &app.state.services.orders,
        app.state.gateway.as_deref(),
        3600,
    )
    .await
    .expect("sweep");

    assert_eq!(report, SweepReport::default());
    assert_eq!(app.order(fresh.id).await.status, "pending");

    // Stale but the session is still open at the provider: left pending.
    app.gateway
        .insert_session(ScriptedGateway::open_session("cs_fresh", Some(fresh.id)));
    let report = sweep_once(
        &app.state.db,
        &app.state.services.orders,
        app.state.gateway.as_deref(),
        -1,
    )
    .await
    .expect("sweep");

    assert_eq!(report.still_pending, 1);
    assert_eq!(app.order(fresh.id).await.status, "pending");
}
