use axum::{extract::State, http::HeaderMap, http::StatusCode, response::IntoResponse};
use bytes::Bytes;
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::entities::order::OrderStatus;
use crate::errors::ServiceError;
use crate::events::Event;
use crate::services::orders::TransitionOutcome;
use crate::AppState;

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_HEADER: &str = "Stripe-Signature";

/// Inbound payment provider webhook. Authoritative for final order state.
///
/// Lookup misses are acknowledged with 200 so the provider stops retrying;
/// only signature, payload, and storage failures are non-200.
#[utoipa::path(
    post,
    path = "/api/v1/payments/webhook",
    request_body = String,
    responses(
        (status = 200, description = "Webhook accepted"),
        (status = 400, description = "Invalid signature or payload", body = crate::errors::ErrorResponse),
        (status = 503, description = "Webhook secret not configured", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    let secret = state.config.stripe_webhook_secret.as_deref().ok_or_else(|| {
        ServiceError::PaymentUnavailable("webhook secret is not configured".to_string())
    })?;

    if !verify_signature(&headers, &body, secret, state.config.webhook_tolerance_secs) {
        warn!("payment webhook signature verification failed");
        return Err(ServiceError::InvalidWebhookSignature);
    }

    let event_json: Value = serde_json::from_slice(&body)
        .map_err(|e| ServiceError::BadRequest(format!("invalid webhook payload: {}", e)))?;

    let event_type = event_json.get("type").and_then(Value::as_str).unwrap_or("");
    match event_type {
        "checkout.session.completed" => {
            apply_session_transition(&state, &event_json, OrderStatus::Completed).await?;
        }
        "checkout.session.expired" => {
            apply_session_transition(&state, &event_json, OrderStatus::Expired).await?;
        }
        "payment_intent.payment_failed" => {
            // No payment-intent reference is stored locally, so there is no
            // order to correlate this back to. Logged and acknowledged.
            let reason = event_json
                .pointer("/data/object/last_payment_error/message")
                .and_then(Value::as_str)
                .map(str::to_string);
            warn!(?reason, "payment failed at provider");
            let _ = state
                .event_sender
                .send(Event::PaymentFailed {
                    session_id: None,
                    reason,
                })
                .await;
        }
        other => {
            debug!(event_type = other, "ignoring payment webhook event");
        }
    }

    Ok((StatusCode::OK, "ok"))
}

/// Applies a webhook-driven status transition. Missing metadata and unknown
/// orders are no-ops by design; only storage failures propagate so the
/// provider retries.
async fn apply_session_transition(
    state: &AppState,
    event_json: &Value,
    target: OrderStatus,
) -> Result<(), ServiceError> {
    let session = event_json.pointer("/data/object");
    let session_id = session
        .and_then(|s| s.get("id"))
        .and_then(Value::as_str);

    let Some(order_id) = session
        .and_then(|s| s.pointer("/metadata/order_id"))
        .and_then(Value::as_str)
        .and_then(|raw| Uuid::parse_str(raw).ok())
    else {
        warn!(?session_id, "webhook session has no usable order correlation metadata");
        return Ok(());
    };

    let outcome = match target {
        OrderStatus::Completed => {
            state
                .services
                .orders
                .mark_completed(order_id, session_id)
                .await?
        }
        OrderStatus::Expired => state.services.orders.mark_expired(order_id).await?,
        OrderStatus::Pending => {
            return Err(ServiceError::InternalError(
                "webhooks never transition orders to pending".to_string(),
            ))
        }
    };

    match outcome {
        TransitionOutcome::Applied => {
            info!(%order_id, status = %target, "order transitioned by webhook");
        }
        TransitionOutcome::AlreadyInState => {
            info!(%order_id, status = %target, "webhook replay; order already in state");
        }
        TransitionOutcome::Refused(current) => {
            warn!(%order_id, %current, requested = %target, "webhook transition refused");
        }
        TransitionOutcome::NotFound => {
            warn!(%order_id, "webhook references unknown order");
        }
    }

    Ok(())
}

/// Verifies a `Stripe-Signature: t=<unix>,v1=<hex>` header: HMAC-SHA256 of
/// `"{t}.{payload}"` with the shared secret, with a freshness window on `t`.
fn verify_signature(headers: &HeaderMap, payload: &Bytes, secret: &str, tolerance_secs: u64) -> bool {
    let Some(header) = headers.get(SIGNATURE_HEADER).and_then(|h| h.to_str().ok()) else {
        return false;
    };

    let mut timestamp = "";
    let mut signature = "";
    for part in header.split(',') {
        let mut it = part.trim().splitn(2, '=');
        match (it.next(), it.next()) {
            (Some("t"), Some(value)) => timestamp = value,
            (Some("v1"), Some(value)) => signature = value,
            _ => {}
        }
    }
    if timestamp.is_empty() || signature.is_empty() {
        return false;
    }

    let Ok(ts) = timestamp.parse::<i64>() else {
        return false;
    };
    let now = chrono::Utc::now().timestamp();
    if (now - ts).unsigned_abs() > tolerance_secs {
        return false;
    }

    let Ok(payload_str) = std::str::from_utf8(payload) else {
        return false;
    };
    let signed = format!("{}.{}", timestamp, payload_str);
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(signed.as_bytes());
    let expected = hex::encode(mac.finalize().into_bytes());
    constant_time_eq(&expected, signature)
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        result |= x ^ y;
    }
    result == 0
}
