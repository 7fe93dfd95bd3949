pub mod key;
pub mod pending;

pub use key::{AggregationKey, StoreKeys};
pub use pending::{Contribution, PendingAggregation};
