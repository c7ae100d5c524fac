use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::checkout::initiate_registration_checkout,
        crate::handlers::checkout::initiate_purchase_checkout,
        crate::handlers::checkout::checkout_success,
        crate::handlers::payment_webhooks::payment_webhook,
        crate::handlers::orders::get_order,
        crate::handlers::health::health_check,
        crate::handlers::health::liveness,
    ),
    components(schemas(
        crate::handlers::checkout::RegistrationCheckoutRequest,
        crate::handlers::checkout::PurchaseCheckoutRequest,
        crate::handlers::checkout::CheckoutResponse,
        crate::handlers::checkout::ConfirmationResponse,
        crate::handlers::orders::OrderView,
        crate::handlers::health::HealthResponse,
        crate::errors::ErrorResponse,
    )),
    tags(
        (name = "Checkout", description = "Event registration and merch purchase checkout"),
        (name = "Payments", description = "Payment provider webhook processing"),
        (name = "Orders", description = "Order record lookup"),
        (name = "Health", description = "Service health")
    ),
    info(
        title = "Encore API",
        description = "Order lifecycle service: hosted checkout, webhook reconciliation, and independent payment confirmation"
    )
)]
pub struct ApiDoc;
