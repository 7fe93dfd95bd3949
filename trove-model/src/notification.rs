use chrono::{DateTime, Utc};

use crate::ids::{CardId, CollectionId, NotificationId, UserId};

/// Which story an aggregated card notification tells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "SCREAMING_SNAKE_CASE"))]
pub enum CardNotificationKind {
    /// Someone saved your card into their library.
    AddedToLibrary,
    /// Someone filed your card into one or more collections.
    AddedToCollections,
    /// Both of the above inside one aggregation window.
    AddedToLibraryAndCollections,
}

impl CardNotificationKind {
    /// Pick the variant from the accumulated event flags. Returns `None` when
    /// neither flag is set, which never happens for a buffer seeded by an
    /// event.
    pub fn from_flags(has_library: bool, has_collections: bool) -> Option<Self> {
        match (has_library, has_collections) {
            (true, true) => Some(Self::AddedToLibraryAndCollections),
            (true, false) => Some(Self::AddedToLibrary),
            (false, true) => Some(Self::AddedToCollections),
            (false, false) => None,
        }
    }
}

/// Command payload accepted by the notification-creation collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct CreateNotificationRequest {
    pub recipient: UserId,
    pub actor: UserId,
    pub card_id: CardId,
    pub kind: CardNotificationKind,
    /// `None` when the card was not filed into any collection; never
    /// `Some(vec![])`.
    pub collection_ids: Option<Vec<CollectionId>>,
}

/// A notification already persisted by the downstream store.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct NotificationRecord {
    pub id: NotificationId,
    pub recipient: UserId,
    pub actor: UserId,
    pub card_id: CardId,
    pub kind: CardNotificationKind,
    pub collection_ids: Vec<CollectionId>,
    pub created_at: DateTime<Utc>,
}
