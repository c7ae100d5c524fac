#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::{self, Body},
    http::{Method, Request},
    response::Response,
    Router,
};
use chrono::Utc;
use hmac::{Hmac, Mac};
use sea_orm::{ActiveModelTrait, EntityTrait, PaginatorTrait, Set};
use serde_json::{json, Value};
use sha2::Sha256;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

use encore_api::{
    app_router,
    config::AppConfig,
    db,
    entities::{event, order, product},
    errors::ServiceError,
    events::EventSender,
    handlers::AppServices,
    services::{
        checkout::CheckoutService,
        orders::OrderService,
        payments::{CheckoutSession, CreateSessionRequest, EnsurePriceRequest, PaymentGateway},
    },
    AppState,
};

pub const WEBHOOK_SECRET: &str = "whsec_test_secret";

/// Scripted in-process stand-in for the payment provider. Records calls and
/// serves pre-seeded sessions for retrieval.
#[derive(Default)]
pub struct ScriptedGateway {
    pub ensure_price_calls: AtomicUsize,
    pub session_calls: AtomicUsize,
    pub fail_sessions: AtomicBool,
    sessions: Mutex<HashMap<String, CheckoutSession>>,
}

impl ScriptedGateway {
    pub fn insert_session(&self, session: CheckoutSession) {
        self.sessions
            .lock()
            .unwrap()
            .insert(session.id.clone(), session);
    }

    pub fn paid_session(id: &str, order_id: Option<Uuid>, amount_cents: i64) -> CheckoutSession {
        let mut metadata = HashMap::new();
        if let Some(order_id) = order_id {
            metadata.insert("order_id".to_string(), order_id.to_string());
        }
        CheckoutSession {
            id: id.to_string(),
            url: None,
            status: Some("complete".to_string()),
            payment_status: Some("paid".to_string()),
            amount_total: Some(amount_cents),
            customer_details: None,
            metadata,
        }
    }

    pub fn open_session(id: &str, order_id: Option<Uuid>) -> CheckoutSession {
        let mut session = Self::paid_session(id, order_id, 0);
        session.status = Some("open".to_string());
        session.payment_status = Some("unpaid".to_string());
        session.amount_total = None;
        session
    }

    pub fn expired_session(id: &str, order_id: Option<Uuid>) -> CheckoutSession {
        let mut session = Self::open_session(id, order_id);
        session.status = Some("expired".to_string());
        session
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn ensure_price(&self, _request: &EnsurePriceRequest) -> Result<String, ServiceError> {
        self.ensure_price_calls.fetch_add(1, Ordering::SeqCst);
        Ok("price_scripted_123".to_string())
    }

    async fn create_checkout_session(
        &self,
        request: &CreateSessionRequest,
    ) -> Result<CheckoutSession, ServiceError> {
        let n = self.session_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_sessions.load(Ordering::SeqCst) {
            return Err(ServiceError::PaymentProvider(
                "scripted session failure".to_string(),
            ));
        }

        let id = format!("cs_scripted_{}", n);
        let mut metadata = HashMap::new();
        metadata.insert("order_id".to_string(), request.order_id.to_string());
        metadata.insert("entity_id".to_string(), request.entity_id.to_string());
        let session = CheckoutSession {
            id: id.clone(),
            url: Some(format!("https://checkout.test/c/pay/{}", id)),
            status: Some("open".to_string()),
            payment_status: Some("unpaid".to_string()),
            amount_total: None,
            customer_details: None,
            metadata,
        };
        self.insert_session(session.clone());
        Ok(session)
    }

    async fn retrieve_checkout_session(
        &self,
        session_id: &str,
    ) -> Result<CheckoutSession, ServiceError> {
        self.sessions
            .lock()
            .unwrap()
            .get(session_id)
            .cloned()
            .ok_or_else(|| {
                ServiceError::PaymentProvider(format!("no such session: {}", session_id))
            })
    }
}

/// Application harness backed by an on-disk sqlite database in a tempdir.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub gateway: Arc<ScriptedGateway>,
    _tmp: TempDir,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::build(true).await
    }

    /// Harness without a configured webhook secret.
    pub async fn without_webhook_secret() -> Self {
        Self::build(false).await
    }

    async fn build(with_webhook_secret: bool) -> Self {
        let tmp = tempfile::tempdir().expect("tempdir");
        let db_path = tmp.path().join("encore_test.db");

        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", db_path.display()),
            "127.0.0.1".to_string(),
            0,
            "test".to_string(),
        );
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.stripe_secret_key = Some("sk_test_scripted".to_string());
        if with_webhook_secret {
            cfg.stripe_webhook_secret = Some(WEBHOOK_SECRET.to_string());
        }

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");
        let pool = Arc::new(pool);

        let (event_tx, event_rx) = mpsc::channel(64);
        let event_sender = EventSender::new(event_tx);
        tokio::spawn(encore_api::events::process_events(event_rx));

        let gateway = Arc::new(ScriptedGateway::default());
        let dyn_gateway: Option<Arc<dyn PaymentGateway>> =
            Some(gateway.clone() as Arc<dyn PaymentGateway>);

        let orders = Arc::new(OrderService::new(pool.clone(), event_sender.clone()));
        let checkout = Arc::new(CheckoutService::new(
            pool.clone(),
            dyn_gateway.clone(),
            event_sender.clone(),
            &cfg,
        ));

        let state = AppState {
            db: pool,
            config: cfg,
            event_sender,
            gateway: dyn_gateway,
            services: AppServices { checkout, orders },
        };
        let router = app_router(state.clone());

        Self {
            router,
            state,
            gateway,
            _tmp: tmp,
        }
    }

    pub async fn request(&self, method: Method, uri: &str, body: Option<Value>) -> Response {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("request");

        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router response")
    }

    pub async fn post_webhook(&self, payload: &str, signature: Option<&str>) -> Response {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri("/api/v1/payments/webhook")
            .header("content-type", "application/json");
        if let Some(signature) = signature {
            builder = builder.header("Stripe-Signature", signature);
        }
        let request = builder
            .body(Body::from(payload.to_string()))
            .expect("request");

        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router response")
    }

    pub async fn seed_event(
        &self,
        title: &str,
        price_cents: i64,
        capacity: Option<i32>,
        published: bool,
    ) -> event::Model {
        let slug = title.to_lowercase().replace(' ', "-");
        event::ActiveModel {
            id: Set(Uuid::new_v4()),
            title: Set(title.to_string()),
            slug: Set(format!("{}-{}", slug, Uuid::new_v4())),
            description: Set(None),
            starts_at: Set(None),
            price_cents: Set(price_cents),
            capacity: Set(capacity),
            published: Set(published),
            stripe_price_id: Set(None),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed event")
    }

    pub async fn seed_product(
        &self,
        name: &str,
        price_cents: i64,
        available: bool,
    ) -> product::Model {
        product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            slug: Set(format!(
                "{}-{}",
                name.to_lowercase().replace(' ', "-"),
                Uuid::new_v4()
            )),
            description: Set(None),
            price_cents: Set(price_cents),
            available: Set(available),
            stripe_price_id: Set(None),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed product")
    }

    pub async fn seed_order(
        &self,
        kind: &str,
        entity_id: Uuid,
        status: &str,
        session_id: Option<&str>,
    ) -> order::Model {
        order::ActiveModel {
            id: Set(Uuid::new_v4()),
            kind: Set(kind.to_string()),
            entity_id: Set(entity_id),
            customer_email: Set("fan@example.com".to_string()),
            customer_name: Set("Alex Fan".to_string()),
            amount_cents: Set(2500),
            currency: Set("usd".to_string()),
            status: Set(status.to_string()),
            checkout_session_id: Set(session_id.map(str::to_string)),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed order")
    }

    pub async fn order(&self, id: Uuid) -> order::Model {
        order::Entity::find_by_id(id)
            .one(&*self.state.db)
            .await
            .expect("order query")
            .expect("order exists")
    }

    pub async fn event(&self, id: Uuid) -> event::Model {
        event::Entity::find_by_id(id)
            .one(&*self.state.db)
            .await
            .expect("event query")
            .expect("event exists")
    }

    pub async fn orders_count(&self) -> u64 {
        order::Entity::find()
            .count(&*self.state.db)
            .await
            .expect("order count")
    }
}

pub async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

/// Signs a webhook payload the way the provider does: `t=<now>,v1=<hmac>`.
pub fn sign_webhook(payload: &str) -> String {
    sign_webhook_at(payload, Utc::now().timestamp())
}

pub fn sign_webhook_at(payload: &str, timestamp: i64) -> String {
    let signed = format!("{}.{}", timestamp, payload);
    let mut mac =
        Hmac::<Sha256>::new_from_slice(WEBHOOK_SECRET.as_bytes()).expect("hmac key");
    mac.update(signed.as_bytes());
    format!(
        "t={},v1={}",
        timestamp,
        hex::encode(mac.finalize().into_bytes())
    )
}

/// Builds a provider event payload carrying the session and its metadata.
pub fn webhook_payload(event_type: &str, session_id: &str, order_id: Option<Uuid>) -> String {
    let metadata = match order_id {
        Some(order_id) => json!({ "order_id": order_id.to_string() }),
        None => json!({}),
    };
    json!({
        "id": format!("evt_{}", Uuid::new_v4().simple()),
        "type": event_type,
        "data": {
            "object": {
                "id": session_id,
                "object": "checkout.session",
                "metadata": metadata
            }
        }
    })
    .to_string()
}
