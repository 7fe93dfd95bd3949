use serde::{Deserialize, Serialize};
use std::time::Duration;
use trove_model::{
    CardId, CardNotificationKind, CollectionId, CreateNotificationRequest,
    UserId,
};

/// What a single qualifying event adds to a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Contribution {
    Library,
    Collection(CollectionId),
}

/// Buffered state for one aggregation key, stored as camelCase JSON.
///
/// `timestamp` is set once at creation and doubles as the buffer's epoch:
/// merges never move it, so the window is always measured from the first
/// event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingAggregation {
    pub card_id: CardId,
    pub actor_id: UserId,
    pub recipient_user_id: UserId,
    #[serde(default)]
    pub collection_ids: Vec<CollectionId>,
    #[serde(default)]
    pub has_library_event: bool,
    #[serde(default)]
    pub has_collection_events: bool,
    pub timestamp: i64,
}

impl PendingAggregation {
    pub fn new(
        card_id: CardId,
        actor_id: UserId,
        recipient_user_id: UserId,
        now_ms: i64,
    ) -> Self {
        Self {
            card_id,
            actor_id,
            recipient_user_id,
            collection_ids: Vec::new(),
            has_library_event: false,
            has_collection_events: false,
            timestamp: now_ms,
        }
    }

    pub fn epoch(&self) -> i64 {
        self.timestamp
    }

    /// Fold an event into the buffer. Flags only ever turn on and collection
    /// ids are kept unique in arrival order.
    pub fn merge(&mut self, contribution: Contribution) {
        match contribution {
            Contribution::Library => self.has_library_event = true,
            Contribution::Collection(collection_id) => {
                self.has_collection_events = true;
                if !self.collection_ids.contains(&collection_id) {
                    self.collection_ids.push(collection_id);
                }
            }
        }
    }

    /// `now - timestamp <= window`, inclusive at the boundary.
    pub fn is_within_window(&self, now_ms: i64, window: Duration) -> bool {
        let window_ms = i64::try_from(window.as_millis()).unwrap_or(i64::MAX);
        now_ms.saturating_sub(self.timestamp) <= window_ms
    }

    /// Notification request for this buffer. `None` for a buffer that never
    /// received an event.
    pub fn to_request(&self) -> Option<CreateNotificationRequest> {
        let kind = CardNotificationKind::from_flags(
            self.has_library_event,
            self.has_collection_events,
        )?;

        let collection_ids = if self.collection_ids.is_empty() {
            None
        } else {
            Some(self.collection_ids.clone())
        };

        Some(CreateNotificationRequest {
            recipient: self.recipient_user_id.clone(),
            actor: self.actor_id.clone(),
            card_id: self.card_id,
            kind,
            collection_ids,
        })
    }
}
