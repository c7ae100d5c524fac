use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Domain events emitted by the order lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    RegistrationCreated(Uuid),
    OrderCompleted(Uuid),
    OrderExpired(Uuid),
    PaymentFailed {
        session_id: Option<String>,
        reason: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously. Delivery is best-effort; callers log
    /// failures rather than failing the request.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

/// Background consumer that records lifecycle events in the log stream.
pub async fn process_events(mut receiver: mpsc::Receiver<Event>) {
    while let Some(event) = receiver.recv().await {
        match event {
            Event::RegistrationCreated(order_id) => {
                info!(%order_id, "registration created");
            }
            Event::OrderCompleted(order_id) => {
                info!(%order_id, "order completed");
            }
            Event::OrderExpired(order_id) => {
                info!(%order_id, "order expired");
            }
            Event::PaymentFailed { session_id, reason } => {
                // No payment-intent reference is persisted, so there is no
                // order to correlate this to; record it for operators.
                warn!(?session_id, ?reason, "payment failed at provider");
            }
        }
    }
    info!("event channel closed; event processor exiting");
}
