use async_trait::async_trait;
use trove_model::{CardId, UserId};

use crate::error::DownstreamError;

/// Where a card came from. A card saved "via" another card points back at
/// it; the owner of that card is who gets notified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardProvenance {
    pub card_id: CardId,
    pub via_card_id: Option<CardId>,
    pub via_owner: Option<UserId>,
}

impl CardProvenance {
    /// The recipient for notifications about this card, if any.
    pub fn recipient(&self) -> Option<&UserId> {
        self.via_card_id.and(self.via_owner.as_ref())
    }
}

#[async_trait]
pub trait CardDirectory: Send + Sync {
    /// `Ok(None)` when the card is unknown.
    async fn card_provenance(
        &self,
        card_id: CardId,
    ) -> Result<Option<CardProvenance>, DownstreamError>;
}
