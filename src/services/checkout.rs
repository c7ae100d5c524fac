use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    Set, TransactionTrait,
};
use std::sync::Arc;
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::entities::{
    event,
    order::{self, OrderKind, OrderStatus},
    product,
};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::payments::{
    CreateSessionRequest, EnsurePriceRequest, PaymentGateway, SESSION_ID_TEMPLATE,
};

/// Validated checkout request, already resolved to a concrete entity id.
#[derive(Debug, Clone)]
pub struct InitiateCheckout {
    pub entity_id: Uuid,
    pub email: String,
    pub name: String,
}

#[derive(Debug, Clone)]
pub enum CheckoutOutcome {
    /// Zero-cost order, completed locally without contacting the provider
    Free { order_id: Uuid },
    /// Pending order awaiting payment on the provider's hosted page
    Hosted {
        order_id: Uuid,
        checkout_url: String,
    },
}

/// Entity-independent view of a checkout target.
struct CheckoutTarget {
    kind: OrderKind,
    entity_id: Uuid,
    display_name: String,
    price_cents: i64,
    capacity: Option<i32>,
    stripe_price_id: Option<String>,
}

/// Checkout session initiator: validates the target, reserves capacity and
/// creates the order record, and opens a hosted checkout session for priced
/// entities.
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    gateway: Option<Arc<dyn PaymentGateway>>,
    event_sender: EventSender,
    success_url: String,
    cancel_url: String,
    currency: String,
}

impl CheckoutService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        gateway: Option<Arc<dyn PaymentGateway>>,
        event_sender: EventSender,
        config: &AppConfig,
    ) -> Self {
        Self {
            db,
            gateway,
            event_sender,
            success_url: config.checkout_success_url.clone(),
            cancel_url: config.checkout_cancel_url.clone(),
            currency: config.currency.clone(),
        }
    }

    #[instrument(skip(self, input), fields(event_id = %input.entity_id))]
    pub async fn initiate_registration(
        &self,
        input: InitiateCheckout,
    ) -> Result<CheckoutOutcome, ServiceError> {
        let event = event::Entity::find_by_id(input.entity_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Event {} not found", input.entity_id))
            })?;

        if !event.published {
            return Err(ServiceError::RegistrationClosed(format!(
                "Registration for '{}' is closed",
                event.title
            )));
        }

        let target = CheckoutTarget {
            kind: OrderKind::Registration,
            entity_id: event.id,
            display_name: event.title.clone(),
            price_cents: event.price_cents,
            capacity: event.capacity,
            stripe_price_id: event.stripe_price_id.clone(),
        };
        self.initiate(target, input).await
    }

    #[instrument(skip(self, input), fields(product_id = %input.entity_id))]
    pub async fn initiate_purchase(
        &self,
        input: InitiateCheckout,
    ) -> Result<CheckoutOutcome, ServiceError> {
        let product = product::Entity::find_by_id(input.entity_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Product {} not found", input.entity_id))
            })?;

        if !product.available {
            return Err(ServiceError::Unavailable(format!(
                "'{}' is not available for purchase",
                product.name
            )));
        }

        let target = CheckoutTarget {
            kind: OrderKind::Purchase,
            entity_id: product.id,
            display_name: product.name.clone(),
            price_cents: product.price_cents,
            capacity: None,
            stripe_price_id: product.stripe_price_id.clone(),
        };
        self.initiate(target, input).await
    }

    async fn initiate(
        &self,
        target: CheckoutTarget,
        input: InitiateCheckout,
    ) -> Result<CheckoutOutcome, ServiceError> {
        // Zero-cost orders complete locally; the provider is never contacted.
        if target.price_cents == 0 {
            let order = self
                .reserve_and_insert(&target, &input, OrderStatus::Completed)
                .await?;
            if target.kind == OrderKind::Registration {
                self.emit(Event::RegistrationCreated(order.id)).await;
            }
            self.emit(Event::OrderCompleted(order.id)).await;
            info!(order_id = %order.id, "free checkout completed");
            return Ok(CheckoutOutcome::Free { order_id: order.id });
        }

        let gateway = self.gateway.as_ref().ok_or_else(|| {
            ServiceError::PaymentUnavailable("payment provider is not configured".to_string())
        })?;

        let price_id = match &target.stripe_price_id {
            Some(existing) => existing.clone(),
            None => {
                let created = gateway
                    .ensure_price(&EnsurePriceRequest {
                        entity_name: target.display_name.clone(),
                        amount_cents: target.price_cents,
                        currency: self.currency.clone(),
                    })
                    .await?;
                self.persist_price_id(&target, &created).await?;
                created
            }
        };

        let order = self
            .reserve_and_insert(&target, &input, OrderStatus::Pending)
            .await?;
        let order_id = order.id;
        if target.kind == OrderKind::Registration {
            self.emit(Event::RegistrationCreated(order_id)).await;
        }

        // A failure past this point leaves a pending order without a session
        // reference; the reconciliation sweeper expires such abandoned rows.
        let session = gateway
            .create_checkout_session(&CreateSessionRequest {
                price_id,
                customer_email: input.email.clone(),
                order_id,
                entity_id: target.entity_id,
                success_url: format!("{}?session_id={}", self.success_url, SESSION_ID_TEMPLATE),
                cancel_url: self.cancel_url.clone(),
            })
            .await?;

        let mut active: order::ActiveModel = order.into();
        active.checkout_session_id = Set(Some(session.id.clone()));
        active.updated_at = Set(Some(Utc::now()));
        active.update(&*self.db).await?;

        let checkout_url = session.url.ok_or_else(|| {
            ServiceError::PaymentProvider("checkout session missing hosted url".to_string())
        })?;

        info!(%order_id, session_id = %session.id, "hosted checkout session created");
        Ok(CheckoutOutcome::Hosted {
            order_id,
            checkout_url,
        })
    }

    /// Capacity reservation and order insert run in one transaction so two
    /// concurrent checkouts cannot both pass the count at the boundary.
    async fn reserve_and_insert(
        &self,
        target: &CheckoutTarget,
        input: &InitiateCheckout,
        status: OrderStatus,
    ) -> Result<order::Model, ServiceError> {
        let txn = self.db.begin().await?;

        if let Some(capacity) = target.capacity {
            let taken = order::Entity::find()
                .filter(order::Column::Kind.eq(target.kind.to_string()))
                .filter(order::Column::EntityId.eq(target.entity_id))
                .filter(order::Column::Status.ne(OrderStatus::Expired.to_string()))
                .count(&txn)
                .await?;
            if taken >= capacity.max(0) as u64 {
                txn.rollback().await?;
                return Err(ServiceError::SoldOut(format!(
                    "'{}' is sold out",
                    target.display_name
                )));
            }
        }

        let model = order::ActiveModel {
            id: Set(Uuid::new_v4()),
            kind: Set(target.kind.to_string()),
            entity_id: Set(target.entity_id),
            customer_email: Set(input.email.clone()),
            customer_name: Set(input.name.clone()),
            amount_cents: Set(target.price_cents),
            currency: Set(self.currency.clone()),
            status: Set(status.to_string()),
            checkout_session_id: Set(None),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        };
        let inserted = model.insert(&txn).await?;
        txn.commit().await?;
        Ok(inserted)
    }

    async fn persist_price_id(
        &self,
        target: &CheckoutTarget,
        price_id: &str,
    ) -> Result<(), ServiceError> {
        match target.kind {
            OrderKind::Registration => {
                if let Some(model) = event::Entity::find_by_id(target.entity_id)
                    .one(&*self.db)
                    .await?
                {
                    let mut active: event::ActiveModel = model.into();
                    active.stripe_price_id = Set(Some(price_id.to_string()));
                    active.updated_at = Set(Some(Utc::now()));
                    active.update(&*self.db).await?;
                }
            }
            OrderKind::Purchase => {
                if let Some(model) = product::Entity::find_by_id(target.entity_id)
                    .one(&*self.db)
                    .await?
                {
                    let mut active: product::ActiveModel = model.into();
                    active.stripe_price_id = Set(Some(price_id.to_string()));
                    active.updated_at = Set(Some(Utc::now()));
                    active.update(&*self.db).await?;
                }
            }
        }
        Ok(())
    }

    async fn emit(&self, event: Event) {
        if let Err(err) = self.event_sender.send(event).await {
            error!(error = %err, "failed to emit checkout event");
        }
    }
}
