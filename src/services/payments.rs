use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::errors::ServiceError;

/// Placeholder the provider substitutes with the session identifier on the
/// success redirect.
pub const SESSION_ID_TEMPLATE: &str = "{CHECKOUT_SESSION_ID}";

const METADATA_ORDER_ID: &str = "order_id";
const METADATA_ENTITY_ID: &str = "entity_id";

/// Request to lazily materialize a provider-side price object.
#[derive(Debug, Clone)]
pub struct EnsurePriceRequest {
    pub entity_name: String,
    pub amount_cents: i64,
    pub currency: String,
}

/// Request to open a hosted checkout session.
#[derive(Debug, Clone)]
pub struct CreateSessionRequest {
    pub price_id: String,
    pub customer_email: String,
    /// Correlation keys embedded in the session metadata; the webhook and
    /// the success verifier map callbacks back to local records through them.
    pub order_id: Uuid,
    pub entity_id: Uuid,
    pub success_url: String,
    pub cancel_url: String,
}

/// Provider-owned checkout session, opaque except for the fields below.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub payment_status: Option<String>,
    #[serde(default)]
    pub amount_total: Option<i64>,
    #[serde(default)]
    pub customer_details: Option<CustomerDetails>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CustomerDetails {
    #[serde(default)]
    pub email: Option<String>,
}

impl CheckoutSession {
    pub fn is_paid(&self) -> bool {
        self.payment_status.as_deref() == Some("paid")
    }

    pub fn is_expired(&self) -> bool {
        self.status.as_deref() == Some("expired")
    }

    /// Local order identifier carried in the metadata correlation bag.
    pub fn order_id(&self) -> Option<Uuid> {
        self.metadata
            .get(METADATA_ORDER_ID)
            .and_then(|raw| Uuid::parse_str(raw).ok())
    }

    pub fn customer_email(&self) -> Option<&str> {
        self.customer_details
            .as_ref()
            .and_then(|details| details.email.as_deref())
    }
}

/// Seam between the order lifecycle and the payment provider. The process
/// constructs exactly one implementation at startup and injects it; tests
/// substitute fakes.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Returns the identifier of a provider price object for the entity,
    /// creating one if it does not exist yet.
    async fn ensure_price(&self, request: &EnsurePriceRequest) -> Result<String, ServiceError>;

    async fn create_checkout_session(
        &self,
        request: &CreateSessionRequest,
    ) -> Result<CheckoutSession, ServiceError>;

    async fn retrieve_checkout_session(
        &self,
        session_id: &str,
    ) -> Result<CheckoutSession, ServiceError>;
}

/// Stripe REST implementation. All writes are form-encoded POSTs against
/// `/v1`; the base URL is overridable so tests can point at a local stub.
pub struct StripeGateway {
    http: reqwest::Client,
    api_base: String,
    secret_key: String,
}

impl StripeGateway {
    pub fn new(secret_key: String, api_base: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: api_base.trim_end_matches('/').to_string(),
            secret_key,
        }
    }

    async fn post_form(
        &self,
        path: &str,
        params: &[(String, String)],
    ) -> Result<serde_json::Value, ServiceError> {
        let url = format!("{}{}", self.api_base, path);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.secret_key)
            .form(params)
            .send()
            .await
            .map_err(|e| ServiceError::PaymentProvider(format!("POST {} failed: {}", path, e)))?;

        Self::parse_response(path, response).await
    }

    async fn get_json(&self, path: &str) -> Result<serde_json::Value, ServiceError> {
        let url = format!("{}{}", self.api_base, path);
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(|e| ServiceError::PaymentProvider(format!("GET {} failed: {}", path, e)))?;

        Self::parse_response(path, response).await
    }

    async fn parse_response(
        path: &str,
        response: reqwest::Response,
    ) -> Result<serde_json::Value, ServiceError> {
        let status = response.status();
        let body: serde_json::Value = response.json().await.map_err(|e| {
            ServiceError::PaymentProvider(format!("{} returned invalid JSON: {}", path, e))
        })?;

        if !status.is_success() {
            let message = body
                .pointer("/error/message")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown provider error");
            return Err(ServiceError::PaymentProvider(format!(
                "{} returned {}: {}",
                path, status, message
            )));
        }

        Ok(body)
    }
}

fn session_params(request: &CreateSessionRequest) -> Vec<(String, String)> {
    vec![
        ("mode".to_string(), "payment".to_string()),
        ("line_items[0][price]".to_string(), request.price_id.clone()),
        ("line_items[0][quantity]".to_string(), "1".to_string()),
        (
            "customer_email".to_string(),
            request.customer_email.clone(),
        ),
        ("success_url".to_string(), request.success_url.clone()),
        ("cancel_url".to_string(), request.cancel_url.clone()),
        (
            format!("metadata[{}]", METADATA_ORDER_ID),
            request.order_id.to_string(),
        ),
        (
            format!("metadata[{}]", METADATA_ENTITY_ID),
            request.entity_id.to_string(),
        ),
    ]
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    #[instrument(skip(self))]
    async fn ensure_price(&self, request: &EnsurePriceRequest) -> Result<String, ServiceError> {
        let product = self
            .post_form(
                "/v1/products",
                &[("name".to_string(), request.entity_name.clone())],
            )
            .await?;
        let product_id = product.get("id").and_then(|v| v.as_str()).ok_or_else(|| {
            ServiceError::PaymentProvider("provider product response missing id".to_string())
        })?;

        let price = self
            .post_form(
                "/v1/prices",
                &[
                    (
                        "unit_amount".to_string(),
                        request.amount_cents.to_string(),
                    ),
                    ("currency".to_string(), request.currency.clone()),
                    ("product".to_string(), product_id.to_string()),
                ],
            )
            .await?;
        let price_id = price.get("id").and_then(|v| v.as_str()).ok_or_else(|| {
            ServiceError::PaymentProvider("provider price response missing id".to_string())
        })?;

        info!(%price_id, entity = %request.entity_name, "created provider price");
        Ok(price_id.to_string())
    }

    #[instrument(skip(self), fields(order_id = %request.order_id))]
    async fn create_checkout_session(
        &self,
        request: &CreateSessionRequest,
    ) -> Result<CheckoutSession, ServiceError> {
        let body = self
            .post_form("/v1/checkout/sessions", &session_params(request))
            .await?;
        serde_json::from_value(body).map_err(|e| {
            ServiceError::PaymentProvider(format!("unexpected checkout session shape: {}", e))
        })
    }

    async fn retrieve_checkout_session(
        &self,
        session_id: &str,
    ) -> Result<CheckoutSession, ServiceError> {
        let body = self
            .get_json(&format!("/v1/checkout/sessions/{}", session_id))
            .await?;
        serde_json::from_value(body).map_err(|e| {
            ServiceError::PaymentProvider(format!("unexpected checkout session shape: {}", e))
        })
    }
}
