use chrono::Utc;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set};
use std::sync::Arc;
use tracing::{error, instrument, warn};
use uuid::Uuid;

use crate::entities::order::{self, OrderStatus};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};

/// Result of attempting a status transition. Lookup misses and replays are
/// outcomes rather than errors because webhook processing must acknowledge
/// them without failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    Applied,
    AlreadyInState,
    /// The record is in a terminal state the transition may not leave
    Refused(OrderStatus),
    NotFound,
}

/// Read access plus the single mutation point for order status. The webhook
/// receiver, the success-page verifier, and the reconciliation sweeper all
/// funnel through `mark_completed`/`mark_expired`, which is what makes
/// concurrent delivery of the same outcome a safe no-op.
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
}

impl OrderService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    pub async fn find_order(&self, order_id: Uuid) -> Result<Option<order::Model>, ServiceError> {
        Ok(order::Entity::find_by_id(order_id).one(&*self.db).await?)
    }

    pub async fn get_order(&self, order_id: Uuid) -> Result<order::Model, ServiceError> {
        self.find_order(order_id).await?.ok_or_else(|| {
            ServiceError::NotFound(format!("Order with ID {} not found", order_id))
        })
    }

    #[instrument(skip(self))]
    pub async fn mark_completed(
        &self,
        order_id: Uuid,
        session_id: Option<&str>,
    ) -> Result<TransitionOutcome, ServiceError> {
        let outcome = self
            .transition(order_id, OrderStatus::Completed, session_id)
            .await?;
        if outcome == TransitionOutcome::Applied {
            self.emit(Event::OrderCompleted(order_id)).await;
        }
        Ok(outcome)
    }

    #[instrument(skip(self))]
    pub async fn mark_expired(&self, order_id: Uuid) -> Result<TransitionOutcome, ServiceError> {
        let outcome = self.transition(order_id, OrderStatus::Expired, None).await?;
        if outcome == TransitionOutcome::Applied {
            self.emit(Event::OrderExpired(order_id)).await;
        }
        Ok(outcome)
    }

    async fn transition(
        &self,
        order_id: Uuid,
        next: OrderStatus,
        session_id: Option<&str>,
    ) -> Result<TransitionOutcome, ServiceError> {
        let Some(existing) = order::Entity::find_by_id(order_id).one(&*self.db).await? else {
            return Ok(TransitionOutcome::NotFound);
        };

        let current = existing.status_enum()?;
        if current == next {
            return Ok(TransitionOutcome::AlreadyInState);
        }
        if !current.can_transition(next) {
            warn!(
                %order_id,
                current = %current,
                requested = %next,
                "refusing status transition out of terminal state"
            );
            return Ok(TransitionOutcome::Refused(current));
        }

        let missing_session_ref = existing.checkout_session_id.is_none();
        let mut active: order::ActiveModel = existing.into();
        active.status = Set(next.to_string());
        active.updated_at = Set(Some(Utc::now()));
        if missing_session_ref {
            if let Some(sid) = session_id {
                active.checkout_session_id = Set(Some(sid.to_string()));
            }
        }
        active.update(&*self.db).await?;

        Ok(TransitionOutcome::Applied)
    }

    async fn emit(&self, event: Event) {
        if let Err(err) = self.event_sender.send(event).await {
            error!(error = %err, "failed to emit order lifecycle event");
        }
    }
}
