use async_trait::async_trait;
use trove_model::{
    CardId, CreateNotificationRequest, NotificationId, NotificationRecord,
    UserId,
};

use crate::error::DownstreamError;

/// Notification persistence owned by another part of the system.
#[async_trait]
pub trait NotificationCommands: Send + Sync {
    async fn create_notification(
        &self,
        request: CreateNotificationRequest,
    ) -> Result<NotificationId, DownstreamError>;

    async fn find_by_card_and_actor(
        &self,
        card_id: CardId,
        actor: &UserId,
    ) -> Result<Vec<NotificationRecord>, DownstreamError>;

    async fn delete_notification(
        &self,
        id: NotificationId,
    ) -> Result<(), DownstreamError>;
}
