//! Card notification saga.
//!
//! Workers that share nothing but the coordination store feed card events
//! through [`CardNotificationSaga::handle_event`]. Library and collection
//! additions for the same (card, actor, recipient) inside one aggregation
//! window collapse into a single buffered entry that is flushed into exactly
//! one notification after the window. Removals cancel both the in-flight
//! buffer and anything already emitted.
//!
//! Every read and write of a buffer happens under its distributed lock.

use std::{any::type_name_of_val, fmt, sync::Arc, time::Duration};
use tracing::{debug, error, info, instrument, warn};
use trove_config::{Config, constants::*};
use trove_model::{CardEvent, CardId, NotificationId, UserId};

use crate::{
    aggregation::{AggregationKey, Contribution, PendingAggregation, StoreKeys},
    error::{Result, SagaError, StoreError},
    flush::{FlushJob, FlushScheduler, scheduler::JOB_SCAN_LIMIT},
    lock::{DistributedLock, RetryPolicy},
    ports::{
        CardDirectory, Clock, CoordinationStore, NotificationCommands,
        SystemClock, expiry_secs,
    },
};

/// Tunables for the saga, normally taken from [`Config`].
#[derive(Debug, Clone, PartialEq)]
pub struct SagaSettings {
    pub window: Duration,
    /// Expiry of both the lock and the pending buffer.
    pub entry_ttl: Duration,
    pub retry: RetryPolicy,
    pub key_prefix: String,
    /// Arm an in-process timer for every created buffer.
    pub flush_timer: bool,
}

impl Default for SagaSettings {
    fn default() -> Self {
        let window = Duration::from_millis(DEFAULT_AGGREGATION_WINDOW_MS);
        Self {
            window,
            entry_ttl: window + Duration::from_millis(DEFAULT_TTL_MARGIN_MS),
            retry: RetryPolicy::default(),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            flush_timer: true,
        }
    }
}

impl From<&Config> for SagaSettings {
    fn from(config: &Config) -> Self {
        Self {
            window: config.aggregation.window,
            entry_ttl: config.entry_ttl(),
            retry: RetryPolicy::from(&config.lock),
            key_prefix: config.aggregation.key_prefix.clone(),
            flush_timer: config.flush.timer,
        }
    }
}

/// Collaborators the saga is wired to.
#[derive(Clone)]
pub struct SagaPorts {
    pub store: Arc<dyn CoordinationStore>,
    pub directory: Arc<dyn CardDirectory>,
    pub notifications: Arc<dyn NotificationCommands>,
    pub clock: Arc<dyn Clock>,
}

impl fmt::Debug for SagaPorts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SagaPorts")
            .field("store", &type_name_of_val(self.store.as_ref()))
            .field("directory", &type_name_of_val(self.directory.as_ref()))
            .field(
                "notifications",
                &type_name_of_val(self.notifications.as_ref()),
            )
            .field("clock", &self.clock)
            .finish()
    }
}

impl SagaPorts {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        directory: Arc<dyn CardDirectory>,
        notifications: Arc<dyn NotificationCommands>,
    ) -> Self {
        Self {
            store,
            directory,
            notifications,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

/// Why an event produced no aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    UnknownCard,
    NoViaProvenance,
    NoRecipient,
    SelfNotification,
}

/// What handling one event did. Handling never fails; problems downstream
/// surface as [`SagaOutcome::Degraded`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SagaOutcome {
    Ignored(IgnoreReason),
    /// A new buffer was written and its flush scheduled.
    Created,
    /// The event was folded into a live buffer.
    Merged,
    /// The lock could not be acquired; the event was discarded.
    Dropped,
    Cancelled {
        notifications_deleted: usize,
        buffer_cleared: bool,
    },
    Degraded {
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    Emitted(NotificationId),
    /// The notification command failed; the buffer was discarded anyway.
    EmitFailed,
    LockBusy,
    NothingPending,
    /// The buffer belongs to a newer epoch with its own job.
    StaleEpoch,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub claimed: usize,
    pub emitted: usize,
}

enum Recipient {
    Resolved(UserId),
    Ignored(IgnoreReason),
}

enum Aggregated {
    Merged,
    Created { job: FlushJob, queued: bool },
}

struct SagaInner {
    ports: SagaPorts,
    settings: SagaSettings,
    keys: StoreKeys,
    lock: DistributedLock,
    scheduler: FlushScheduler,
}

/// Entry point for card events. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct CardNotificationSaga {
    inner: Arc<SagaInner>,
}

impl fmt::Debug for CardNotificationSaga {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CardNotificationSaga")
            .field("ports", &self.inner.ports)
            .field("settings", &self.inner.settings)
            .finish()
    }
}

impl CardNotificationSaga {
    pub fn new(ports: SagaPorts, settings: SagaSettings) -> Self {
        let keys = StoreKeys::new(settings.key_prefix.clone());
        let lock = DistributedLock::new(
            Arc::clone(&ports.store),
            settings.retry.clone(),
            settings.entry_ttl,
        );
        let scheduler = FlushScheduler::new(
            Arc::clone(&ports.store),
            keys.clone(),
            settings.window,
        );

        Self {
            inner: Arc::new(SagaInner {
                ports,
                settings,
                keys,
                lock,
                scheduler,
            }),
        }
    }

    pub fn settings(&self) -> &SagaSettings {
        &self.inner.settings
    }

    pub fn keys(&self) -> &StoreKeys {
        &self.inner.keys
    }

    pub fn scheduler(&self) -> &FlushScheduler {
        &self.inner.scheduler
    }

    #[instrument(skip(self, event), fields(event = event.name(), card = %event.card_id()))]
    pub async fn handle_event(&self, event: &CardEvent) -> SagaOutcome {
        let result = match event {
            CardEvent::AddedToLibrary(e) => {
                self.aggregate(e.card_id, &e.curator_id, Contribution::Library)
                    .await
            }
            CardEvent::AddedToCollection(e) => {
                self.aggregate(
                    e.card_id,
                    &e.added_by,
                    Contribution::Collection(e.collection_id),
                )
                .await
            }
            CardEvent::RemovedFromLibrary(e) => {
                self.cancel(e.card_id, &e.curator_id).await
            }
        };

        match result {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(error = %err, "card notification handling degraded");
                SagaOutcome::Degraded {
                    reason: err.to_string(),
                }
            }
        }
    }

    /// Emit the buffer a job was scheduled for. Takes the lock with a single
    /// attempt and does nothing if it is busy, the buffer is gone, or the
    /// buffer has moved on to a newer epoch.
    #[instrument(skip(self), fields(key = %job.key, epoch = job.epoch))]
    pub async fn flush(&self, job: &FlushJob) -> Result<FlushOutcome> {
        let lock_key = self.inner.keys.lock(&job.key);
        let Some(guard) = self.inner.lock.try_acquire(&lock_key).await? else {
            warn!("flush skipped; aggregation lock is busy");
            return Ok(FlushOutcome::LockBusy);
        };

        let result = self.flush_locked(job).await;
        guard.release().await;
        result
    }

    /// Take the key's lock, claim the job from the due index and flush it.
    /// `None` when another trigger claimed it first. A busy lock leaves the
    /// job queued so a later sweep can retry it.
    #[instrument(skip(self), fields(key = %job.key, epoch = job.epoch))]
    pub async fn claim_and_flush(
        &self,
        job: &FlushJob,
    ) -> Result<Option<FlushOutcome>> {
        let lock_key = self.inner.keys.lock(&job.key);
        let Some(guard) = self.inner.lock.try_acquire(&lock_key).await? else {
            warn!("flush deferred; aggregation lock is busy");
            return Ok(Some(FlushOutcome::LockBusy));
        };

        let result = match self.inner.scheduler.claim(job).await {
            Ok(true) => self.flush_locked(job).await.map(Some),
            Ok(false) => {
                debug!("flush job already claimed");
                Ok(None)
            }
            Err(err) => Err(err.into()),
        };
        guard.release().await;
        result
    }

    /// Claim and flush up to `limit` jobs that are overdue by more than
    /// `grace`.
    pub async fn flush_due(
        &self,
        grace: Duration,
        limit: usize,
    ) -> Result<SweepReport> {
        let grace_ms = i64::try_from(grace.as_millis()).unwrap_or(i64::MAX);
        let cutoff = self.now_ms().saturating_sub(grace_ms);
        let jobs = self.inner.scheduler.due(cutoff, limit).await?;

        let mut report = SweepReport::default();
        // Sequential: two jobs for one key would otherwise race for its lock.
        for job in &jobs {
            match self.claim_and_flush(job).await {
                Ok(Some(FlushOutcome::LockBusy)) | Ok(None) => {}
                Ok(Some(outcome)) => {
                    report.claimed += 1;
                    if matches!(outcome, FlushOutcome::Emitted(_)) {
                        report.emitted += 1;
                    }
                }
                Err(err) => {
                    warn!(key = %job.key, epoch = job.epoch, error = %err, "overdue flush failed");
                }
            }
        }

        if report.claimed > 0 {
            debug!(claimed = report.claimed, emitted = report.emitted, "flushed overdue jobs");
        }
        Ok(report)
    }

    async fn aggregate(
        &self,
        card_id: CardId,
        actor: &UserId,
        contribution: Contribution,
    ) -> Result<SagaOutcome> {
        let recipient = match self.resolve_recipient(card_id, actor).await? {
            Recipient::Resolved(recipient) => recipient,
            Recipient::Ignored(reason) => {
                debug!(?reason, "event does not qualify for a notification");
                return Ok(SagaOutcome::Ignored(reason));
            }
        };

        let key = AggregationKey::new(card_id, actor, &recipient);
        let Some(guard) =
            self.inner.lock.acquire(&self.inner.keys.lock(&key)).await
        else {
            warn!(key = %key, "dropping card event; aggregation lock unavailable");
            return Ok(SagaOutcome::Dropped);
        };

        let result = self
            .merge_or_create(&key, card_id, actor, &recipient, contribution)
            .await;
        guard.release().await;

        match result? {
            Aggregated::Merged => Ok(SagaOutcome::Merged),
            Aggregated::Created { job, queued } => {
                if self.inner.settings.flush_timer {
                    self.spawn_flush_timer(job, queued);
                }
                Ok(SagaOutcome::Created)
            }
        }
    }

    async fn resolve_recipient(
        &self,
        card_id: CardId,
        actor: &UserId,
    ) -> Result<Recipient> {
        let Some(provenance) =
            self.inner.ports.directory.card_provenance(card_id).await?
        else {
            return Ok(Recipient::Ignored(IgnoreReason::UnknownCard));
        };

        if provenance.via_card_id.is_none() {
            return Ok(Recipient::Ignored(IgnoreReason::NoViaProvenance));
        }

        let Some(recipient) = provenance.via_owner else {
            return Ok(Recipient::Ignored(IgnoreReason::NoRecipient));
        };

        if &recipient == actor {
            return Ok(Recipient::Ignored(IgnoreReason::SelfNotification));
        }

        Ok(Recipient::Resolved(recipient))
    }

    /// Must be called with the key's lock held.
    async fn merge_or_create(
        &self,
        key: &AggregationKey,
        card_id: CardId,
        actor: &UserId,
        recipient: &UserId,
        contribution: Contribution,
    ) -> Result<Aggregated> {
        let now = self.now_ms();
        let pending_key = self.inner.keys.pending(key);

        match self.read_pending(&pending_key).await? {
            Some(mut pending)
                if pending.is_within_window(now, self.inner.settings.window) =>
            {
                pending.merge(contribution);
                self.write_pending(&pending_key, &pending).await?;
                debug!(key = %key, epoch = pending.epoch(), "merged into pending aggregation");
                return Ok(Aggregated::Merged);
            }
            Some(stale) => self.flush_stale(key, &stale).await,
            None => {}
        }

        let mut pending = PendingAggregation::new(
            card_id,
            actor.clone(),
            recipient.clone(),
            now,
        );
        pending.merge(contribution);
        self.write_pending(&pending_key, &pending).await?;

        let job = FlushJob::new(key.clone(), now);
        let queued = match self.inner.scheduler.enqueue(&job).await {
            Ok(()) => true,
            Err(err) => {
                warn!(key = %key, error = %err, "flush job not queued; relying on the timer");
                false
            }
        };

        debug!(key = %key, epoch = now, "created pending aggregation");
        Ok(Aggregated::Created { job, queued })
    }

    /// A buffer past its window that no flush has consumed yet. Emit it now
    /// before it is replaced; its own job finds a newer epoch and skips.
    async fn flush_stale(
        &self,
        key: &AggregationKey,
        stale: &PendingAggregation,
    ) {
        let job = FlushJob::new(key.clone(), stale.epoch());
        if let Err(err) = self.inner.scheduler.claim(&job).await {
            debug!(key = %key, error = %err, "could not remove stale flush job");
        }
        info!(key = %key, epoch = stale.epoch(), "flushing buffer that outlived its window");
        self.emit(stale).await;
    }

    async fn flush_locked(&self, job: &FlushJob) -> Result<FlushOutcome> {
        let pending_key = self.inner.keys.pending(&job.key);

        let Some(pending) = self.read_pending(&pending_key).await? else {
            debug!("nothing pending to flush");
            return Ok(FlushOutcome::NothingPending);
        };

        if pending.epoch() != job.epoch {
            debug!(current = pending.epoch(), "flush job superseded by a newer buffer");
            return Ok(FlushOutcome::StaleEpoch);
        }

        let outcome = self.emit(&pending).await;
        self.inner.ports.store.del(&pending_key).await?;
        Ok(outcome)
    }

    async fn emit(&self, pending: &PendingAggregation) -> FlushOutcome {
        let Some(request) = pending.to_request() else {
            return FlushOutcome::NothingPending;
        };

        let kind = request.kind;
        match self
            .inner
            .ports
            .notifications
            .create_notification(request)
            .await
        {
            Ok(id) => {
                info!(
                    notification = %id,
                    recipient = %pending.recipient_user_id,
                    actor = %pending.actor_id,
                    card = %pending.card_id,
                    ?kind,
                    collections = pending.collection_ids.len(),
                    "card notification emitted"
                );
                FlushOutcome::Emitted(id)
            }
            Err(err) => {
                warn!(error = %err, card = %pending.card_id, "card notification not created");
                FlushOutcome::EmitFailed
            }
        }
    }

    fn spawn_flush_timer(&self, job: FlushJob, queued: bool) {
        let saga = self.clone();
        let window = self.inner.settings.window;

        tokio::spawn(async move {
            tokio::time::sleep(window).await;

            let result = if queued {
                saga.claim_and_flush(&job).await
            } else {
                saga.flush(&job).await.map(Some)
            };

            if let Err(err) = result {
                warn!(key = %job.key, epoch = job.epoch, error = %err, "scheduled flush failed");
            }
        });
    }

    async fn cancel(
        &self,
        card_id: CardId,
        actor: &UserId,
    ) -> Result<SagaOutcome> {
        let recipient =
            match self.inner.ports.directory.card_provenance(card_id).await {
                Ok(provenance) => provenance
                    .and_then(|p| p.recipient().cloned())
                    .filter(|recipient| recipient != actor),
                Err(err) => {
                    warn!(error = %err, "card lookup failed; cancelling without a recipient");
                    None
                }
            };

        let Some(recipient) = recipient else {
            let buffer_cleared = self.clear_unresolved(card_id, actor).await?;
            let deleted = self.delete_persisted(card_id, actor).await?;
            return Ok(SagaOutcome::Cancelled {
                notifications_deleted: deleted,
                buffer_cleared,
            });
        };

        let key = AggregationKey::new(card_id, actor, &recipient);
        let guard = self.inner.lock.acquire(&self.inner.keys.lock(&key)).await;
        if guard.is_none() {
            warn!(key = %key, "cancelling without the aggregation lock");
        }

        let result = async {
            let cleared = self.clear_buffer(&key).await?;
            let deleted = self.delete_persisted(card_id, actor).await?;
            Ok::<_, SagaError>((cleared, deleted))
        }
        .await;

        if let Some(guard) = guard {
            guard.release().await;
        }

        let (buffer_cleared, notifications_deleted) = result?;
        Ok(SagaOutcome::Cancelled {
            notifications_deleted,
            buffer_cleared,
        })
    }

    /// Must be called with the key's lock held, or as the fallback when it
    /// cannot be taken.
    async fn clear_buffer(&self, key: &AggregationKey) -> Result<bool> {
        let pending_key = self.inner.keys.pending(key);
        let pending = self.read_pending(&pending_key).await?;
        self.inner.ports.store.del(&pending_key).await?;

        let Some(pending) = pending else {
            return Ok(false);
        };

        let job = FlushJob::new(key.clone(), pending.epoch());
        if let Err(err) = self.inner.scheduler.claim(&job).await {
            warn!(key = %key, error = %err, "cancelled flush job left queued; it will find nothing pending");
        }
        info!(key = %key, "cancelled pending card notification");
        Ok(true)
    }

    /// Clear in-flight buffers of one (card, actor) pair found through the
    /// due index, for removals whose recipient cannot be resolved.
    async fn clear_unresolved(
        &self,
        card_id: CardId,
        actor: &UserId,
    ) -> Result<bool> {
        let jobs = self
            .inner
            .scheduler
            .jobs_for_card_and_actor(card_id, actor, JOB_SCAN_LIMIT)
            .await?;
        let mut keys: Vec<AggregationKey> = Vec::new();
        for job in jobs {
            if !keys.contains(&job.key) {
                keys.push(job.key);
            }
        }

        let mut cleared = false;
        for key in keys {
            let guard =
                self.inner.lock.acquire(&self.inner.keys.lock(&key)).await;
            if guard.is_none() {
                warn!(key = %key, "cancelling without the aggregation lock");
            }

            let result = self.clear_if_owned(&key, card_id, actor).await;

            if let Some(guard) = guard {
                guard.release().await;
            }
            cleared |= result?;
        }
        Ok(cleared)
    }

    /// Prefix matches can cross actors whose ids contain `-`; only clear a
    /// buffer that really belongs to this card and actor.
    async fn clear_if_owned(
        &self,
        key: &AggregationKey,
        card_id: CardId,
        actor: &UserId,
    ) -> Result<bool> {
        let owned = self
            .read_pending(&self.inner.keys.pending(key))
            .await?
            .is_some_and(|p| p.card_id == card_id && &p.actor_id == actor);
        if !owned {
            return Ok(false);
        }
        self.clear_buffer(key).await
    }

    async fn delete_persisted(
        &self,
        card_id: CardId,
        actor: &UserId,
    ) -> Result<usize> {
        let notifications = &self.inner.ports.notifications;
        let records = notifications.find_by_card_and_actor(card_id, actor).await?;

        let mut deleted = 0;
        for record in records {
            match notifications.delete_notification(record.id).await {
                Ok(()) => deleted += 1,
                Err(err) => {
                    warn!(notification = %record.id, error = %err, "failed to delete card notification");
                }
            }
        }

        if deleted > 0 {
            info!(card = %card_id, actor = %actor, deleted, "deleted card notifications");
        }
        Ok(deleted)
    }

    async fn read_pending(
        &self,
        pending_key: &str,
    ) -> Result<Option<PendingAggregation>> {
        let Some(raw) = self.inner.ports.store.get(pending_key).await? else {
            return Ok(None);
        };

        match serde_json::from_str(&raw) {
            Ok(pending) => Ok(Some(pending)),
            Err(source) => {
                let err = SagaError::CorruptPending {
                    key: pending_key.to_string(),
                    source,
                };
                error!(error = %err, "ignoring corrupt pending aggregation");
                Ok(None)
            }
        }
    }

    async fn write_pending(
        &self,
        pending_key: &str,
        pending: &PendingAggregation,
    ) -> Result<()> {
        let json = serde_json::to_string(pending).map_err(StoreError::from)?;
        self.inner
            .ports
            .store
            .setex(pending_key, expiry_secs(self.inner.settings.entry_ttl), &json)
            .await?;
        Ok(())
    }

    fn now_ms(&self) -> i64 {
        self.inner.ports.clock.now_ms()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::DownstreamError,
        infra::InMemoryCoordinationStore,
        ports::{CardProvenance, TokioClock},
    };
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::HashMap;
    use tokio::sync::Mutex;
    use trove_model::{
        CardAddedToCollection, CardAddedToLibrary, CardRemovedFromLibrary,
        CollectionId, CreateNotificationRequest, NotificationRecord,
    };

    struct InMemoryDirectory {
        cards: Mutex<HashMap<CardId, CardProvenance>>,
    }

    impl InMemoryDirectory {
        fn new() -> Self {
            Self {
                cards: Mutex::new(HashMap::new()),
            }
        }

        async fn insert(&self, provenance: CardProvenance) {
            self.cards
                .lock()
                .await
                .insert(provenance.card_id, provenance);
        }
    }

    #[async_trait]
    impl CardDirectory for InMemoryDirectory {
        async fn card_provenance(
            &self,
            card_id: CardId,
        ) -> std::result::Result<Option<CardProvenance>, DownstreamError>
        {
            Ok(self.cards.lock().await.get(&card_id).cloned())
        }
    }

    struct InMemoryNotifications {
        records: Mutex<Vec<NotificationRecord>>,
        fail_create: bool,
    }

    impl InMemoryNotifications {
        fn new() -> Self {
            Self {
                records: Mutex::new(Vec::new()),
                fail_create: false,
            }
        }

        fn failing() -> Self {
            Self {
                records: Mutex::new(Vec::new()),
                fail_create: true,
            }
        }

        async fn all(&self) -> Vec<NotificationRecord> {
            self.records.lock().await.clone()
        }
    }

    #[async_trait]
    impl NotificationCommands for InMemoryNotifications {
        async fn create_notification(
            &self,
            request: CreateNotificationRequest,
        ) -> std::result::Result<NotificationId, DownstreamError> {
            if self.fail_create {
                return Err(DownstreamError::Notification("offline".into()));
            }
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
        ) -> std::result::Result<Vec<NotificationRecord>, DownstreamError>
        {
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
        ) -> std::result::Result<(), DownstreamError> {
            self.records.lock().await.retain(|r| r.id != id);
            Ok(())
        }
    }

    struct Harness {
        saga: CardNotificationSaga,
        store: Arc<InMemoryCoordinationStore>,
        directory: Arc<InMemoryDirectory>,
        notifications: Arc<InMemoryNotifications>,
    }

    fn harness_with(
        notifications: InMemoryNotifications,
        flush_timer: bool,
    ) -> Harness {
        let store = Arc::new(InMemoryCoordinationStore::new());
        let directory = Arc::new(InMemoryDirectory::new());
        let notifications = Arc::new(notifications);

        let ports = SagaPorts::new(
            store.clone(),
            directory.clone(),
            notifications.clone(),
        )
        .with_clock(Arc::new(TokioClock::starting_at(1_000_000)));

        let settings = SagaSettings {
            key_prefix: "test".into(),
            flush_timer,
            ..SagaSettings::default()
        };

        Harness {
            saga: CardNotificationSaga::new(ports, settings),
            store,
            directory,
            notifications,
        }
    }

    fn harness() -> Harness {
        harness_with(InMemoryNotifications::new(), true)
    }

    fn user(name: &str) -> UserId {
        UserId::new(format!("did:plc:{name}")).unwrap()
    }

    async fn via_card(h: &Harness, owner: &UserId) -> CardId {
        let card_id = CardId::new();
        h.directory
            .insert(CardProvenance {
                card_id,
                via_card_id: Some(CardId::new()),
                via_owner: Some(owner.clone()),
            })
            .await;
        card_id
    }

    fn library_add(card_id: CardId, actor: &UserId) -> CardEvent {
        CardAddedToLibrary {
            card_id,
            curator_id: actor.clone(),
            occurred_at: Utc::now(),
        }
        .into()
    }

    fn collection_add(
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

    fn removal(card_id: CardId, actor: &UserId) -> CardEvent {
        CardRemovedFromLibrary {
            card_id,
            curator_id: actor.clone(),
            occurred_at: Utc::now(),
        }
        .into()
    }

    #[tokio::test(start_paused = true)]
    async fn library_then_collection_emit_one_notification() {
        let h = harness();
        let (alice, bob) = (user("alice"), user("bob"));
        let card = via_card(&h, &bob).await;
        let collection = CollectionId::new();

        assert_eq!(
            h.saga.handle_event(&library_add(card, &alice)).await,
            SagaOutcome::Created
        );
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(
            h.saga
                .handle_event(&collection_add(card, &alice, collection))
                .await,
            SagaOutcome::Merged
        );

        tokio::time::sleep(Duration::from_millis(2_400)).await;
        assert!(h.notifications.all().await.is_empty());

        tokio::time::sleep(Duration::from_millis(200)).await;
        let records = h.notifications.all().await;
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.recipient, bob);
        assert_eq!(record.actor, alice);
        assert_eq!(record.card_id, card);
        assert_eq!(
            record.kind,
            trove_model::CardNotificationKind::AddedToLibraryAndCollections
        );
        assert_eq!(record.collection_ids, vec![collection]);

        let key = AggregationKey::new(card, &alice, &bob);
        assert!(h.store.get(&h.saga.keys().pending(&key)).await.unwrap().is_none());
        assert!(h.store.get(&h.saga.keys().lock(&key)).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn unqualified_events_are_ignored() {
        let h = harness();
        let (alice, bob) = (user("alice"), user("bob"));

        let own = via_card(&h, &alice).await;
        assert_eq!(
            h.saga.handle_event(&library_add(own, &alice)).await,
            SagaOutcome::Ignored(IgnoreReason::SelfNotification)
        );

        let original = CardId::new();
        h.directory
            .insert(CardProvenance {
                card_id: original,
                via_card_id: None,
                via_owner: None,
            })
            .await;
        assert_eq!(
            h.saga.handle_event(&library_add(original, &alice)).await,
            SagaOutcome::Ignored(IgnoreReason::NoViaProvenance)
        );

        let orphan = CardId::new();
        h.directory
            .insert(CardProvenance {
                card_id: orphan,
                via_card_id: Some(CardId::new()),
                via_owner: None,
            })
            .await;
        assert_eq!(
            h.saga.handle_event(&library_add(orphan, &alice)).await,
            SagaOutcome::Ignored(IgnoreReason::NoRecipient)
        );

        assert_eq!(
            h.saga.handle_event(&library_add(CardId::new(), &bob)).await,
            SagaOutcome::Ignored(IgnoreReason::UnknownCard)
        );

        assert!(
            h.store
                .zrange_by_score(&h.saga.keys().due_index(), i64::MAX, 10)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn busy_lock_drops_the_event() {
        let h = harness();
        let (alice, bob) = (user("alice"), user("bob"));
        let card = via_card(&h, &bob).await;
        let key = AggregationKey::new(card, &alice, &bob);

        h.store
            .set(&h.saga.keys().lock(&key), "1", 3_600, true)
            .await
            .unwrap();

        assert_eq!(
            h.saga.handle_event(&library_add(card, &alice)).await,
            SagaOutcome::Dropped
        );
        assert!(h.store.get(&h.saga.keys().pending(&key)).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn corrupt_buffer_is_replaced() {
        let h = harness_with(InMemoryNotifications::new(), false);
        let (alice, bob) = (user("alice"), user("bob"));
        let card = via_card(&h, &bob).await;
        let key = AggregationKey::new(card, &alice, &bob);
        let pending_key = h.saga.keys().pending(&key);

        h.store.setex(&pending_key, 60, "{not json").await.unwrap();

        assert_eq!(
            h.saga.handle_event(&library_add(card, &alice)).await,
            SagaOutcome::Created
        );
        let raw = h.store.get(&pending_key).await.unwrap().unwrap();
        let pending: PendingAggregation = serde_json::from_str(&raw).unwrap();
        assert!(pending.has_library_event);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_emit_still_discards_the_buffer() {
        let h = harness_with(InMemoryNotifications::failing(), false);
        let (alice, bob) = (user("alice"), user("bob"));
        let card = via_card(&h, &bob).await;
        let key = AggregationKey::new(card, &alice, &bob);

        h.saga.handle_event(&library_add(card, &alice)).await;
        let job = h
            .saga
            .scheduler()
            .jobs_for(&key, 10)
            .await
            .unwrap()
            .pop()
            .unwrap();

        assert_eq!(
            h.saga.flush(&job).await.unwrap(),
            FlushOutcome::EmitFailed
        );
        assert!(h.store.get(&h.saga.keys().pending(&key)).await.unwrap().is_none());
        assert!(h.store.get(&h.saga.keys().lock(&key)).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn flush_with_busy_lock_is_a_no_op() {
        let h = harness_with(InMemoryNotifications::new(), false);
        let (alice, bob) = (user("alice"), user("bob"));
        let card = via_card(&h, &bob).await;
        let key = AggregationKey::new(card, &alice, &bob);

        h.saga.handle_event(&library_add(card, &alice)).await;
        let job = h.saga.scheduler().jobs_for(&key, 10).await.unwrap()[0].clone();

        h.store
            .set(&h.saga.keys().lock(&key), "1", 60, true)
            .await
            .unwrap();
        assert_eq!(h.saga.flush(&job).await.unwrap(), FlushOutcome::LockBusy);
        assert!(h.notifications.all().await.is_empty());
        assert!(h.store.get(&h.saga.keys().pending(&key)).await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn claim_with_busy_lock_leaves_the_job_queued() {
        let h = harness_with(InMemoryNotifications::new(), false);
        let (alice, bob) = (user("alice"), user("bob"));
        let card = via_card(&h, &bob).await;
        let key = AggregationKey::new(card, &alice, &bob);
        let lock_key = h.saga.keys().lock(&key);

        h.saga.handle_event(&library_add(card, &alice)).await;
        let job = h.saga.scheduler().jobs_for(&key, 10).await.unwrap()[0].clone();

        h.store.set(&lock_key, "1", 60, true).await.unwrap();
        assert_eq!(
            h.saga.claim_and_flush(&job).await.unwrap(),
            Some(FlushOutcome::LockBusy)
        );
        assert_eq!(
            h.saga.scheduler().jobs_for(&key, 10).await.unwrap(),
            vec![job.clone()]
        );

        h.store.del(&lock_key).await.unwrap();
        assert!(matches!(
            h.saga.claim_and_flush(&job).await.unwrap(),
            Some(FlushOutcome::Emitted(_))
        ));
        assert_eq!(h.notifications.all().await.len(), 1);
        assert!(h.saga.scheduler().jobs_for(&key, 10).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn removal_without_recipient_only_clears_persisted() {
        let h = harness();
        let alice = user("alice");
        let card = CardId::new();

        assert_eq!(
            h.saga.handle_event(&removal(card, &alice)).await,
            SagaOutcome::Cancelled {
                notifications_deleted: 0,
                buffer_cleared: false,
            }
        );
    }
}
