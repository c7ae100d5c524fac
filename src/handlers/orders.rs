use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entities::order;
use crate::errors::ServiceError;
use crate::{ApiResponse, AppState};

/// Read-only projection of the append-only order record.
#[derive(Debug, Serialize, ToSchema)]
pub struct OrderView {
    pub id: Uuid,
    pub kind: String,
    pub entity_id: Uuid,
    pub customer_email: String,
    pub customer_name: String,
    pub amount_cents: i64,
    pub currency: String,
    pub status: String,
    pub checkout_session_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<order::Model> for OrderView {
    fn from(model: order::Model) -> Self {
        Self {
            id: model.id,
            kind: model.kind,
            entity_id: model.entity_id,
            customer_email: model.customer_email,
            customer_name: model.customer_name,
            amount_cents: model.amount_cents,
            currency: model.currency,
            status: model.status,
            checkout_session_id: model.checkout_session_id,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    params(("id" = String, Path, description = "Order identifier")),
    responses(
        (status = 200, description = "Order found", body = OrderView),
        (status = 400, description = "Malformed identifier", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    let order_id = Uuid::parse_str(&id)
        .map_err(|_| ServiceError::ValidationError("order id is not a valid uuid".to_string()))?;
    let order = state.services.orders.get_order(order_id).await?;
    Ok(Json(ApiResponse::success(OrderView::from(order))))
}
