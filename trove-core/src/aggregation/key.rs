use serde::{Deserialize, Serialize};
use std::fmt;
use trove_model::{CardId, UserId};

/// Identity of one "someone acted on this card" story for one recipient:
/// `{card}-{actor}-{recipient}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AggregationKey(String);

impl AggregationKey {
    pub fn new(card_id: CardId, actor: &UserId, recipient: &UserId) -> Self {
        Self(format!("{}{recipient}", Self::prefix_for(card_id, actor)))
    }

    /// Leading part shared by every key of one (card, actor) pair.
    pub fn prefix_for(card_id: CardId, actor: &UserId) -> String {
        format!("{card_id}-{actor}-")
    }

    pub fn starts_with_card_and_actor(
        &self,
        card_id: CardId,
        actor: &UserId,
    ) -> bool {
        self.0.starts_with(&Self::prefix_for(card_id, actor))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AggregationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Namespaced store keys derived from an [`AggregationKey`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreKeys {
    prefix: String,
}

impl StoreKeys {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn pending(&self, key: &AggregationKey) -> String {
        format!("{}:pending:{}", self.prefix, key)
    }

    pub fn lock(&self, key: &AggregationKey) -> String {
        format!("{}:lock:{}", self.prefix, key)
    }

    pub fn due_index(&self) -> String {
        format!("{}:flush-due", self.prefix)
    }
}

impl Default for StoreKeys {
    fn default() -> Self {
        Self::new(trove_config::constants::DEFAULT_KEY_PREFIX)
    }
}
