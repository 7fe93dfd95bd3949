use std::{any::type_name_of_val, fmt, sync::Arc, time::Duration};
use tracing::{debug, error};

use trove_model::{CardId, UserId};

use crate::{
    aggregation::{AggregationKey, StoreKeys},
    error::StoreResult,
    flush::FlushJob,
    ports::CoordinationStore,
};

/// Upper bound on due-index members scanned when looking up jobs by key.
pub const JOB_SCAN_LIMIT: usize = 10_000;

/// Durable due index of flush jobs, scored by due time in epoch ms.
///
/// Every trigger (in-process timer, sweeper, operator purge) must
/// [`claim`](Self::claim) a job before acting on it; the store's atomic
/// removal makes sure only one of them wins.
#[derive(Clone)]
pub struct FlushScheduler {
    store: Arc<dyn CoordinationStore>,
    keys: StoreKeys,
    window: Duration,
}

impl fmt::Debug for FlushScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlushScheduler")
            .field("store", &type_name_of_val(self.store.as_ref()))
            .field("due_index", &self.keys.due_index())
            .field("window", &self.window)
            .finish()
    }
}

impl FlushScheduler {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        keys: StoreKeys,
        window: Duration,
    ) -> Self {
        Self {
            store,
            keys,
            window,
        }
    }

    /// Due time of a job: its epoch plus the window.
    pub fn due_at(&self, job: &FlushJob) -> i64 {
        let window_ms =
            i64::try_from(self.window.as_millis()).unwrap_or(i64::MAX);
        job.epoch.saturating_add(window_ms)
    }

    pub async fn enqueue(&self, job: &FlushJob) -> StoreResult<()> {
        let member = job.to_member()?;
        let due_at = self.due_at(job);
        debug!(key = %job.key, epoch = job.epoch, due_at, "flush job enqueued");
        self.store
            .zadd(&self.keys.due_index(), &member, due_at)
            .await
    }

    /// Take ownership of a job. `false` when another trigger already did.
    pub async fn claim(&self, job: &FlushJob) -> StoreResult<bool> {
        let member = job.to_member()?;
        self.store.zrem(&self.keys.due_index(), &member).await
    }

    /// Jobs due at or before `cutoff_ms`, oldest first. Members that do not
    /// parse are removed from the index.
    pub async fn due(
        &self,
        cutoff_ms: i64,
        limit: usize,
    ) -> StoreResult<Vec<FlushJob>> {
        let index = self.keys.due_index();
        let members =
            self.store.zrange_by_score(&index, cutoff_ms, limit).await?;

        let mut jobs = Vec::with_capacity(members.len());
        for member in members {
            match FlushJob::from_member(&member) {
                Ok(job) => jobs.push(job),
                Err(err) => {
                    error!(member = %member, error = %err, "dropping unreadable flush job");
                    self.store.zrem(&index, &member).await?;
                }
            }
        }
        Ok(jobs)
    }

    /// Every queued job for one key, regardless of due time.
    pub async fn jobs_for(
        &self,
        key: &AggregationKey,
        limit: usize,
    ) -> StoreResult<Vec<FlushJob>> {
        Ok(self
            .due(i64::MAX, limit)
            .await?
            .into_iter()
            .filter(|job| &job.key == key)
            .collect())
    }

    /// Queued jobs for any recipient of one (card, actor) pair. Actor ids
    /// may contain `-`, so callers confirm ownership against the buffer.
    pub async fn jobs_for_card_and_actor(
        &self,
        card_id: CardId,
        actor: &UserId,
        limit: usize,
    ) -> StoreResult<Vec<FlushJob>> {
        Ok(self
            .due(i64::MAX, limit)
            .await?
            .into_iter()
            .filter(|job| job.key.starts_with_card_and_actor(card_id, actor))
            .collect())
    }
}
