//! Encore API Library
//!
//! Order lifecycle service for an artist/nonprofit site: event registration
//! and merchandise checkout against a hosted payment provider, with
//! webhook-driven state transitions and background reconciliation.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod migrator;
pub mod openapi;
pub mod services;

use axum::{
    routing::{get, post},
    Router,
};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use services::payments::PaymentGateway;

/// Shared per-process state. The payment gateway is constructed once at
/// startup and injected here; `None` means priced checkouts are rejected.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: events::EventSender,
    pub gateway: Option<Arc<dyn PaymentGateway>>,
    pub services: handlers::AppServices,
}

/// Standard success envelope for read endpoints.
#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: String,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

/// Assembles the application router.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/health/live", get(handlers::health::liveness))
        .route(
            "/api/v1/registrations/checkout",
            post(handlers::checkout::initiate_registration_checkout),
        )
        .route(
            "/api/v1/purchases/checkout",
            post(handlers::checkout::initiate_purchase_checkout),
        )
        .route(
            "/api/v1/checkout/success",
            get(handlers::checkout::checkout_success),
        )
        .route(
            "/api/v1/payments/webhook",
            post(handlers::payment_webhooks::payment_webhook),
        )
        .route("/api/v1/orders/:id", get(handlers::orders::get_order))
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", openapi::ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
