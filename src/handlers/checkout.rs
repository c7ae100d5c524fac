use axum::{
    extract::{Query, State},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::warn;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::services::checkout::{CheckoutOutcome, InitiateCheckout};
use crate::services::orders::TransitionOutcome;
use crate::AppState;

/// Body for `POST /api/v1/registrations/checkout`.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationCheckoutRequest {
    pub event_id: Option<String>,
    pub email: Option<String>,
    pub name: Option<String>,
}

/// Body for `POST /api/v1/purchases/checkout`.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseCheckoutRequest {
    pub product_id: Option<String>,
    pub email: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_free: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registration_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkout_url: Option<String>,
}

impl CheckoutResponse {
    fn registration(outcome: CheckoutOutcome) -> Self {
        match outcome {
            CheckoutOutcome::Free { order_id } => Self {
                success: true,
                is_free: Some(true),
                registration_id: Some(order_id),
                order_id: None,
                checkout_url: None,
            },
            CheckoutOutcome::Hosted {
                order_id,
                checkout_url,
            } => Self {
                success: true,
                is_free: None,
                registration_id: Some(order_id),
                order_id: None,
                checkout_url: Some(checkout_url),
            },
        }
    }

    fn purchase(outcome: CheckoutOutcome) -> Self {
        match outcome {
            CheckoutOutcome::Free { order_id } => Self {
                success: true,
                is_free: Some(true),
                registration_id: None,
                order_id: Some(order_id),
                checkout_url: None,
            },
            CheckoutOutcome::Hosted {
                order_id,
                checkout_url,
            } => Self {
                success: true,
                is_free: None,
                registration_id: None,
                order_id: Some(order_id),
                checkout_url: Some(checkout_url),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SuccessQuery {
    pub session_id: Option<String>,
}

/// Confirmation rendered from provider-returned data, never from the local
/// record (webhook delivery may lag the redirect).
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationResponse {
    pub paid: bool,
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount_cents: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_email: Option<String>,
}

fn require<'a>(value: &'a Option<String>, field: &str) -> Result<&'a str, ServiceError> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(ServiceError::ValidationError(format!(
            "missing required field: {}",
            field
        ))),
    }
}

fn parse_id(raw: &str, field: &str) -> Result<Uuid, ServiceError> {
    Uuid::parse_str(raw)
        .map_err(|_| ServiceError::ValidationError(format!("{} is not a valid id", field)))
}

fn validated_input(
    id: &Option<String>,
    id_field: &str,
    email: &Option<String>,
    name: &Option<String>,
) -> Result<InitiateCheckout, ServiceError> {
    let entity_id = parse_id(require(id, id_field)?, id_field)?;
    let email = require(email, "email")?;
    if !validator::validate_email(email) {
        return Err(ServiceError::ValidationError(
            "email is not a valid address".to_string(),
        ));
    }
    let name = require(name, "name")?;
    Ok(InitiateCheckout {
        entity_id,
        email: email.to_string(),
        name: name.to_string(),
    })
}

#[utoipa::path(
    post,
    path = "/api/v1/registrations/checkout",
    request_body = RegistrationCheckoutRequest,
    responses(
        (status = 200, description = "Checkout initiated", body = CheckoutResponse),
        (status = 400, description = "Missing or malformed fields", body = crate::errors::ErrorResponse),
        (status = 404, description = "Event not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Registration closed or sold out", body = crate::errors::ErrorResponse),
        (status = 502, description = "Payment service error", body = crate::errors::ErrorResponse),
        (status = 503, description = "Payment service unavailable", body = crate::errors::ErrorResponse)
    ),
    tag = "Checkout"
)]
pub async fn initiate_registration_checkout(
    State(state): State<AppState>,
    Json(payload): Json<RegistrationCheckoutRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let input = validated_input(&payload.event_id, "eventId", &payload.email, &payload.name)?;
    let outcome = state.services.checkout.initiate_registration(input).await?;
    Ok(Json(CheckoutResponse::registration(outcome)))
}

#[utoipa::path(
    post,
    path = "/api/v1/purchases/checkout",
    request_body = PurchaseCheckoutRequest,
    responses(
        (status = 200, description = "Checkout initiated", body = CheckoutResponse),
        (status = 400, description = "Missing or malformed fields", body = crate::errors::ErrorResponse),
        (status = 404, description = "Product not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Product not available", body = crate::errors::ErrorResponse),
        (status = 502, description = "Payment service error", body = crate::errors::ErrorResponse),
        (status = 503, description = "Payment service unavailable", body = crate::errors::ErrorResponse)
    ),
    tag = "Checkout"
)]
pub async fn initiate_purchase_checkout(
    State(state): State<AppState>,
    Json(payload): Json<PurchaseCheckoutRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let input = validated_input(&payload.product_id, "productId", &payload.email, &payload.name)?;
    let outcome = state.services.checkout.initiate_purchase(input).await?;
    Ok(Json(CheckoutResponse::purchase(outcome)))
}

#[utoipa::path(
    get,
    path = "/api/v1/checkout/success",
    params(("session_id" = String, Query, description = "Provider checkout session identifier")),
    responses(
        (status = 200, description = "Payment confirmed by the provider", body = ConfirmationResponse),
        (status = 400, description = "Missing session identifier", body = crate::errors::ErrorResponse),
        (status = 409, description = "Session exists but is not paid", body = crate::errors::ErrorResponse),
        (status = 502, description = "Payment service error", body = crate::errors::ErrorResponse),
        (status = 503, description = "Payment service unavailable", body = crate::errors::ErrorResponse)
    ),
    tag = "Checkout"
)]
pub async fn checkout_success(
    State(state): State<AppState>,
    Query(query): Query<SuccessQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let session_id = require(&query.session_id, "session_id")?;
    let gateway = state.gateway.as_ref().ok_or_else(|| {
        ServiceError::PaymentUnavailable("payment provider is not configured".to_string())
    })?;

    // Independent confirmation: ask the provider, don't trust the local row.
    let session = gateway.retrieve_checkout_session(session_id).await?;
    if !session.is_paid() {
        return Err(ServiceError::PaymentIncomplete(format!(
            "session {} is not paid",
            session_id
        )));
    }

    // Read-through reconciliation: persist the confirmed state instead of
    // waiting for the webhook that may still be in flight.
    let order_id = session.order_id();
    match order_id {
        Some(order_id) => {
            match state
                .services
                .orders
                .mark_completed(order_id, Some(session.id.as_str()))
                .await
            {
                Ok(TransitionOutcome::NotFound) => {
                    warn!(%order_id, "paid session references unknown order");
                }
                Ok(_) => {}
                Err(err) => {
                    // The user still gets their confirmation; the webhook or
                    // the sweeper will retry the persist.
                    warn!(%order_id, error = %err, "failed to persist success-page confirmation");
                }
            }
        }
        None => warn!(session_id = %session.id, "paid session missing order correlation metadata"),
    }

    Ok(Json(ConfirmationResponse {
        paid: true,
        session_id: session.id.clone(),
        order_id,
        amount_cents: session.amount_total,
        customer_email: session.customer_email().map(str::to_string),
    }))
}
