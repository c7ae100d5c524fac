use std::sync::Arc;

use crate::services::checkout::CheckoutService;
use crate::services::orders::OrderService;

pub mod checkout;
pub mod health;
pub mod orders;
pub mod payment_webhooks;

/// Service instances shared across request handlers.
#[derive(Clone)]
pub struct AppServices {
    pub checkout: Arc<CheckoutService>,
    pub orders: Arc<OrderService>,
}
