use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::ServiceError;

/// Persisted order/registration record. Append-only: rows are created by the
/// checkout initiator and mutated only through status transitions; there is
/// no deletion path.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// "registration" (event) or "purchase" (product)
    pub kind: String,

    /// Reference to the event or product this order is for
    pub entity_id: Uuid,

    pub customer_email: String,
    pub customer_name: String,

    /// Amount in minor currency units (cents)
    pub amount_cents: i64,
    pub currency: String,

    pub status: String,

    /// Identifier of the provider-hosted checkout session, once one exists
    pub checkout_session_id: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn status_enum(&self) -> Result<OrderStatus, ServiceError> {
        self.status.parse().map_err(|_| {
            ServiceError::InternalError(format!(
                "order {} has unrecognized status '{}'",
                self.id, self.status
            ))
        })
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, ToSchema,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Completed,
    Expired,
}

impl OrderStatus {
    /// The lifecycle admits `pending -> completed` and `pending -> expired`,
    /// each at most once. `completed` and `expired` are terminal.
    pub fn can_transition(self, next: OrderStatus) -> bool {
        matches!(
            (self, next),
            (OrderStatus::Pending, OrderStatus::Completed)
                | (OrderStatus::Pending, OrderStatus::Expired)
        )
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, ToSchema,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OrderKind {
    Registration,
    Purchase,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_transitions_once_to_a_terminal_state() {
        assert!(OrderStatus::Pending.can_transition(OrderStatus::Completed));
        assert!(OrderStatus::Pending.can_transition(OrderStatus::Expired));
    }

    #[test]
    fn terminal_states_never_transition() {
        assert!(!OrderStatus::Completed.can_transition(OrderStatus::Pending));
        assert!(!OrderStatus::Completed.can_transition(OrderStatus::Expired));
        assert!(!OrderStatus::Expired.can_transition(OrderStatus::Pending));
        assert!(!OrderStatus::Expired.can_transition(OrderStatus::Completed));
    }

    #[test]
    fn self_transition_is_not_a_transition() {
        assert!(!OrderStatus::Pending.can_transition(OrderStatus::Pending));
        assert!(!OrderStatus::Completed.can_transition(OrderStatus::Completed));
        assert!(!OrderStatus::Expired.can_transition(OrderStatus::Expired));
    }

    #[test]
    fn status_round_trips_through_strings() {
        assert_eq!(OrderStatus::Pending.to_string(), "pending");
        assert_eq!("completed".parse::<OrderStatus>(), Ok(OrderStatus::Completed));
        assert!("refunded".parse::<OrderStatus>().is_err());
        assert_eq!(OrderKind::Registration.to_string(), "registration");
    }
}
