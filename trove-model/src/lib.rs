//! Core data model definitions shared across Trove crates.
#![allow(missing_docs)]

pub mod card_events;
pub mod error;
pub mod ids;
pub mod notification;

pub use card_events::{
    CardAddedToCollection, CardAddedToLibrary, CardEvent,
    CardRemovedFromLibrary,
};
pub use error::{ModelError, Result as ModelResult};
pub use ids::{CardId, CollectionId, NotificationId, UserId};
pub use notification::{
    CardNotificationKind, CreateNotificationRequest, NotificationRecord,
};
