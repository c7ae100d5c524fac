use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// A registerable event (show, fundraiser, workshop).
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize, Validate)]
#[sea_orm(table_name = "events")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[validate(length(min = 1, max = 200, message = "Title must be between 1 and 200 characters"))]
    pub title: String,

    #[sea_orm(unique)]
    pub slug: String,

    pub description: Option<String>,
    pub starts_at: Option<DateTime<Utc>>,

    /// Registration price in minor currency units; 0 means a free event
    pub price_cents: i64,

    /// Maximum number of live registrations; None means unlimited
    pub capacity: Option<i32>,

    /// Registration is only open while the event is published
    pub published: bool,

    /// Lazily created provider price object, reused across checkouts
    pub stripe_price_id: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn is_free(&self) -> bool {
        self.price_cents == 0
    }
}
