use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::ReviewState;

/// Published after a response has been persisted.
///
/// Delivery is at-least-once from the consumer's point of view: a consumer
/// that re-reads after lagging may see the same `event_id` twice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewRecorded {
    pub event_id: Uuid,
    pub quality: u8,
    pub answered_at: DateTime<Utc>,
    pub state: ReviewState,
}

impl ReviewRecorded {
    pub fn new(state: ReviewState, quality: u8, answered_at: DateTime<Utc>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            quality,
            answered_at,
            state,
        }
    }
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ReviewRecorded>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ReviewRecorded> {
        self.tx.subscribe()
    }

    /// Never fails the caller; an undelivered event is logged instead.
    pub fn publish(&self, event: ReviewRecorded) {
        let event_id = event.event_id;
        let key = event.state.key();
        match self.tx.send(event) {
            Ok(receivers) => log::debug!("published {} for {} to {} receivers", event_id, key, receivers),
            Err(_) => log::warn!("review event {} for {} not delivered: no subscribers", event_id, key),
        }
    }
}
