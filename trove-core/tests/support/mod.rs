//! Shared fakes for saga integration tests.
#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use trove_core::{
    CardNotificationSaga, SagaPorts, SagaSettings,
    error::{DownstreamError, StoreError, StoreResult},
    infra::InMemoryCoordinationStore,
    ports::{
        CardDirectory, CardProvenance, CoordinationStore,
        NotificationCommands, TokioClock,
    },
};
use trove_model::{
    CardAddedToCollection, CardAddedToLibrary, CardEvent, CardId,
    CardRemovedFromLibrary, CollectionId, CreateNotificationRequest,
    NotificationId, NotificationRecord, UserId,
};

pub const TEST_PREFIX: &str = "test:notif";
pub const EPOCH_ORIGIN_MS: i64 = 1_700_000_000_000;

pub struct InMemoryDirectory {
    cards: Mutex<HashMap<CardId, CardProvenance>>,
    fail_lookups: AtomicBool,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self {
            cards: Mutex::new(HashMap::new()),
            fail_lookups: AtomicBool::new(false),
        }
    }

    pub async fn insert(&self, provenance: CardProvenance) {
        self.cards
            .lock()
            .await
            .insert(provenance.card_id, provenance);
    }

    pub async fn remove(&self, card_id: CardId) {
        self.cards.lock().await.remove(&card_id);
    }

    pub fn fail_lookups(&self, fail: bool) {
        self.fail_lookups.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl CardDirectory for InMemoryDirectory {
    async fn card_provenance(
        &self,
        card_id: CardId,
    ) -> Result<Option<CardProvenance>, DownstreamError> {
        if self.fail_lookups.load(Ordering::SeqCst) {
            return Err(DownstreamError::CardLookup("directory offline".into()));
        }
        Ok(self.cards.lock().await.get(&card_id).cloned())
    }
}

pub struct InMemoryNotifications {
    records: Mutex<Vec<NotificationRecord>>,
}

impl InMemoryNotifications {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
        }
    }

    pub async fn all(&self) -> Vec<NotificationRecord> {
        self.records.lock().await.clone()
    }
}

#[async_trait]
impl NotificationCommands for InMemoryNotifications {
    async fn create_notification(
        &self,
        request: CreateNotificationRequest,
    ) -> Result<NotificationId, DownstreamError> {
        let record = NotificationRecord {
            id: NotificationId::new(),
            recipient: request.recipient,
            actor: request.actor,
            card_id: request.card_id,
            kind: request.kind,
            collection_ids: request.collection_ids.unwrap_or_default(),
            created_at: Utc::now(),
        };
        let id = record.id;
        self.records.lock().await.push(record);
        Ok(id)
    }

    async fn find_by_card_and_actor(
        &self,
        card_id: CardId,
        actor: &UserId,
    ) -> Result<Vec<NotificationRecord>, DownstreamError> {
        Ok(self
            .records
            .lock()
            .await
            .iter()
            .filter(|r| r.card_id == card_id && &r.actor == actor)
            .cloned()
            .collect())
    }

    async fn delete_notification(
        &self,
        id: NotificationId,
    ) -> Result<(), DownstreamError> {
        self.records.lock().await.retain(|r| r.id != id);
        Ok(())
    }
}

/// Store that yields to the scheduler before every operation so concurrent
/// tasks interleave between reads and writes.
#[derive(Debug, Default)]
pub struct YieldingStore {
    inner: InMemoryCoordinationStore,
}

#[async_trait]
impl CoordinationStore for YieldingStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        tokio::task::yield_now().await;
        self.inner.get(key).await
    }

    async fn set(
        &self,
        key: &str,
        value: &str,
        expiry_secs: u64,
        only_if_absent: bool,
    ) -> StoreResult<bool> {
        tokio::task::yield_now().await;
        self.inner.set(key, value, expiry_secs, only_if_absent).await
    }

    async fn setex(
        &self,
        key: &str,
        expiry_secs: u64,
        value: &str,
    ) -> StoreResult<()> {
        tokio::task::yield_now().await;
        self.inner.setex(key, expiry_secs, value).await
    }

    async fn del(&self, key: &str) -> StoreResult<()> {
        tokio::task::yield_now().await;
        self.inner.del(key).await
    }

    async fn zadd(
        &self,
        index: &str,
        member: &str,
        score: i64,
    ) -> StoreResult<()> {
        tokio::task::yield_now().await;
        self.inner.zadd(index, member, score).await
    }

    async fn zrange_by_score(
        &self,
        index: &str,
        max_score: i64,
        limit: usize,
    ) -> StoreResult<Vec<String>> {
        tokio::task::yield_now().await;
        self.inner.zrange_by_score(index, max_score, limit).await
    }

    async fn zrem(&self, index: &str, member: &str) -> StoreResult<bool> {
        tokio::task::yield_now().await;
        self.inner.zrem(index, member).await
    }

    async fn ping(&self) -> StoreResult<()> {
        self.inner.ping().await
    }
}

/// Store whose due-index removals can be switched to fail.
#[derive(Debug, Default)]
pub struct FlakyIndexStore {
    inner: InMemoryCoordinationStore,
    fail_zrem: AtomicBool,
}

impl FlakyIndexStore {
    pub fn fail_zrem(&self, fail: bool) {
        self.fail_zrem.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl CoordinationStore for FlakyIndexStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.inner.get(key).await
    }

    async fn set(
        &self,
        key: &str,
        value: &str,
        expiry_secs: u64,
        only_if_absent: bool,
    ) -> StoreResult<bool> {
        self.inner.set(key, value, expiry_secs, only_if_absent).await
    }

    async fn setex(
        &self,
        key: &str,
        expiry_secs: u64,
        value: &str,
    ) -> StoreResult<()> {
        self.inner.setex(key, expiry_secs, value).await
    }

    async fn del(&self, key: &str) -> StoreResult<()> {
        self.inner.del(key).await
    }

    async fn zadd(
        &self,
        index: &str,
        member: &str,
        score: i64,
    ) -> StoreResult<()> {
        self.inner.zadd(index, member, score).await
    }

    async fn zrange_by_score(
        &self,
        index: &str,
        max_score: i64,
        limit: usize,
    ) -> StoreResult<Vec<String>> {
        self.inner.zrange_by_score(index, max_score, limit).await
    }

    async fn zrem(&self, index: &str, member: &str) -> StoreResult<bool> {
        if self.fail_zrem.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("zrem refused".into()));
        }
        self.inner.zrem(index, member).await
    }

    async fn ping(&self) -> StoreResult<()> {
        self.inner.ping().await
    }
}

pub struct Fixture {
    pub saga: CardNotificationSaga,
    pub store: Arc<dyn CoordinationStore>,
    pub directory: Arc<InMemoryDirectory>,
    pub notifications: Arc<InMemoryNotifications>,
}

impl Fixture {
    /// Default window (3000 ms) and retry policy, timer on.
    pub fn new() -> Self {
        Self::with_settings(
            Arc::new(InMemoryCoordinationStore::new()),
            test_settings(),
        )
    }

    pub fn with_settings(
        store: Arc<dyn CoordinationStore>,
        settings: SagaSettings,
    ) -> Self {
        let directory = Arc::new(InMemoryDirectory::new());
        let notifications = Arc::new(InMemoryNotifications::new());
        let ports = ports(
            Arc::clone(&store),
            directory.clone(),
            notifications.clone(),
        );

        Self {
            saga: CardNotificationSaga::new(ports, settings),
            store,
            directory,
            notifications,
        }
    }

    /// A card `actor` could save that was reached via a card owned by
    /// `owner`.
    pub async fn card_via(&self, owner: &UserId) -> CardId {
        let card_id = CardId::new();
        self.directory
            .insert(CardProvenance {
                card_id,
                via_card_id: Some(CardId::new()),
                via_owner: Some(owner.clone()),
            })
            .await;
        card_id
    }

    pub async fn due_members(&self) -> Vec<String> {
        self.store
            .zrange_by_score(&self.saga.keys().due_index(), i64::MAX, 1_000)
            .await
            .expect("due index readable")
    }
}

pub fn ports(
    store: Arc<dyn CoordinationStore>,
    directory: Arc<InMemoryDirectory>,
    notifications: Arc<InMemoryNotifications>,
) -> SagaPorts {
    SagaPorts::new(store, directory, notifications)
        .with_clock(Arc::new(TokioClock::starting_at(EPOCH_ORIGIN_MS)))
}

pub fn test_settings() -> SagaSettings {
    SagaSettings {
        key_prefix: TEST_PREFIX.to_string(),
        ..SagaSettings::default()
    }
}

pub fn window(ms: u64) -> SagaSettings {
    let window = Duration::from_millis(ms);
    SagaSettings {
        window,
        entry_ttl: window + Duration::from_secs(5),
        ..test_settings()
    }
}

pub fn user(name: &str) -> UserId {
    UserId::new(format!("did:plc:{name}")).expect("valid user id")
}

pub fn library_add(card_id: CardId, actor: &UserId) -> CardEvent {
    CardAddedToLibrary {
        card_id,
        curator_id: actor.clone(),
        occurred_at: Utc::now(),
    }
    .into()
}

pub fn collection_add(
    card_id: CardId,
    actor: &UserId,
    collection_id: CollectionId,
) -> CardEvent {
    CardAddedToCollection {
        card_id,
        collection_id,
        added_by: actor.clone(),
        occurred_at: Utc::now(),
    }
    .into()
}

pub fn removal(card_id: CardId, actor: &UserId) -> CardEvent {
    CardRemovedFromLibrary {
        card_id,
        curator_id: actor.clone(),
        occurred_at: Utc::now(),
    }
    .into()
}

pub async fn sleep_ms(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}
