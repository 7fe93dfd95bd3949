//! Boundaries between the saga and the systems it coordinates with.

pub mod clock;
pub mod directory;
pub mod notifications;
pub mod store;

pub use clock::{Clock, SystemClock, TokioClock};
pub use directory::{CardDirectory, CardProvenance};
pub use notifications::NotificationCommands;
pub use store::{CoordinationStore, expiry_secs};
