//! Card domain events consumed by the notification pipeline.

use chrono::{DateTime, Utc};

use crate::ids::{CardId, CollectionId, UserId};

/// A curator saved a card into their library.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct CardAddedToLibrary {
    pub card_id: CardId,
    pub curator_id: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// A user filed a card into one of their collections.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct CardAddedToCollection {
    pub card_id: CardId,
    pub collection_id: CollectionId,
    pub added_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// A curator withdrew a card from their library.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct CardRemovedFromLibrary {
    pub card_id: CardId,
    pub curator_id: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "type", rename_all = "camelCase"))]
pub enum CardEvent {
    AddedToLibrary(CardAddedToLibrary),
    AddedToCollection(CardAddedToCollection),
    RemovedFromLibrary(CardRemovedFromLibrary),
}

impl CardEvent {
    pub fn card_id(&self) -> CardId {
        match self {
            CardEvent::AddedToLibrary(e) => e.card_id,
            CardEvent::AddedToCollection(e) => e.card_id,
            CardEvent::RemovedFromLibrary(e) => e.card_id,
        }
    }

    /// The user who performed the action (curator or collection owner).
    pub fn actor(&self) -> &UserId {
        match self {
            CardEvent::AddedToLibrary(e) => &e.curator_id,
            CardEvent::AddedToCollection(e) => &e.added_by,
            CardEvent::RemovedFromLibrary(e) => &e.curator_id,
        }
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            CardEvent::AddedToLibrary(e) => e.occurred_at,
            CardEvent::AddedToCollection(e) => e.occurred_at,
            CardEvent::RemovedFromLibrary(e) => e.occurred_at,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CardEvent::AddedToLibrary(_) => "card_added_to_library",
            CardEvent::AddedToCollection(_) => "card_added_to_collection",
            CardEvent::RemovedFromLibrary(_) => "card_removed_from_library",
        }
    }
}

impl From<CardAddedToLibrary> for CardEvent {
    fn from(event: CardAddedToLibrary) -> Self {
        CardEvent::AddedToLibrary(event)
    }
}

impl From<CardAddedToCollection> for CardEvent {
    fn from(event: CardAddedToCollection) -> Self {
        CardEvent::AddedToCollection(event)
    }
}

impl From<CardRemovedFromLibrary> for CardEvent {
    fn from(event: CardRemovedFromLibrary) -> Self {
        CardEvent::RemovedFromLibrary(event)
    }
}
