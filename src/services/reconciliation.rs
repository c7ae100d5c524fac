use chrono::{Duration as ChronoDuration, Utc};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::entities::order::{self, OrderStatus};
use crate::errors::ServiceError;
use crate::services::orders::OrderService;
use crate::services::payments::PaymentGateway;

/// Counters from one reconciliation pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub completed: u64,
    pub expired: u64,
    pub still_pending: u64,
    pub errors: u64,
}

/// Spawns the periodic reconciliation task. Webhooks are the authoritative
/// transition path, but they can be lost; this sweep re-queries the provider
/// for stale pending orders and expires abandoned ones that never obtained a
/// session reference.
pub fn start_sweeper(
    db: Arc<DatabaseConnection>,
    orders: Arc<OrderService>,
    gateway: Option<Arc<dyn PaymentGateway>>,
    interval_secs: u64,
    pending_max_age_secs: i64,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match sweep_once(&db, &orders, gateway.as_deref(), pending_max_age_secs).await {
                Ok(report) if report == SweepReport::default() => {}
                Ok(report) => info!(?report, "reconciliation sweep finished"),
                Err(err) => error!(error = %err, "reconciliation sweep failed"),
            }
        }
    })
}

/// One reconciliation pass over pending orders older than the threshold.
pub async fn sweep_once(
    db: &DatabaseConnection,
    orders: &OrderService,
    gateway: Option<&dyn PaymentGateway>,
    pending_max_age_secs: i64,
) -> Result<SweepReport, ServiceError> {
    let cutoff = Utc::now() - ChronoDuration::seconds(pending_max_age_secs);
    let stale = order::Entity::find()
        .filter(order::Column::Status.eq(OrderStatus::Pending.to_string()))
        .filter(order::Column::CreatedAt.lt(cutoff))
        .all(db)
        .await?;

    let mut report = SweepReport::default();
    for record in stale {
        match (&record.checkout_session_id, gateway) {
            (None, _) => {
                // Initiator-side gateway failure left this row without a
                // session; nothing can ever complete it.
                orders.mark_expired(record.id).await?;
                info!(order_id = %record.id, "expired abandoned order without session reference");
                report.expired += 1;
            }
            (Some(session_id), Some(gateway)) => {
                match gateway.retrieve_checkout_session(session_id).await {
                    Ok(session) if session.is_paid() => {
                        orders
                            .mark_completed(record.id, Some(session_id.as_str()))
                            .await?;
                        info!(order_id = %record.id, %session_id, "reconciled paid order missed by webhook");
                        report.completed += 1;
                    }
                    Ok(session) if session.is_expired() => {
                        orders.mark_expired(record.id).await?;
                        report.expired += 1;
                    }
                    Ok(_) => {
                        report.still_pending += 1;
                    }
                    Err(err) => {
                        warn!(order_id = %record.id, error = %err, "provider lookup failed during sweep");
                        report.errors += 1;
                    }
                }
            }
            (Some(_), None) => {
                // No gateway configured; leave the record for a later pass.
                report.still_pending += 1;
            }
        }
    }

    Ok(report)
}
