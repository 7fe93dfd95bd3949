//! Operator view of aggregation state in the coordination store.

use serde::Serialize;
use std::{any::type_name_of_val, fmt, sync::Arc, time::Duration};
use tracing::info;

use crate::{
    aggregation::{AggregationKey, PendingAggregation, StoreKeys},
    error::StoreResult,
    flush::{FlushJob, FlushScheduler, scheduler::JOB_SCAN_LIMIT},
    ports::CoordinationStore,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum PendingState {
    Absent,
    Present(PendingAggregation),
    Corrupt(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DueJob {
    pub job: FlushJob,
    pub due_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregationSnapshot {
    pub key: AggregationKey,
    pub pending: PendingState,
    pub locked: bool,
    pub jobs: Vec<DueJob>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    pub pending_removed: bool,
    pub lock_removed: bool,
    pub jobs_removed: usize,
}

#[derive(Clone)]
pub struct AggregationAdmin {
    store: Arc<dyn CoordinationStore>,
    keys: StoreKeys,
    scheduler: FlushScheduler,
}

impl fmt::Debug for AggregationAdmin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregationAdmin")
            .field("store", &type_name_of_val(self.store.as_ref()))
            .field("keys", &self.keys)
            .finish()
    }
}

impl AggregationAdmin {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        keys: StoreKeys,
        window: Duration,
    ) -> Self {
        let scheduler =
            FlushScheduler::new(Arc::clone(&store), keys.clone(), window);
        Self {
            store,
            keys,
            scheduler,
        }
    }

    pub async fn inspect(
        &self,
        key: &AggregationKey,
    ) -> StoreResult<AggregationSnapshot> {
        let pending = match self.store.get(&self.keys.pending(key)).await? {
            None => PendingState::Absent,
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(pending) => PendingState::Present(pending),
                Err(_) => PendingState::Corrupt(raw),
            },
        };
        let locked = self.store.get(&self.keys.lock(key)).await?.is_some();
        let jobs = self
            .scheduler
            .jobs_for(key, JOB_SCAN_LIMIT)
            .await?
            .into_iter()
            .map(|job| self.due_job(job))
            .collect();

        Ok(AggregationSnapshot {
            key: key.clone(),
            pending,
            locked,
            jobs,
        })
    }

    /// Queued jobs due at or before `cutoff_ms`, oldest first.
    pub async fn due(
        &self,
        cutoff_ms: i64,
        limit: usize,
    ) -> StoreResult<Vec<DueJob>> {
        Ok(self
            .scheduler
            .due(cutoff_ms, limit)
            .await?
            .into_iter()
            .map(|job| self.due_job(job))
            .collect())
    }

    /// Remove the buffer, lock and queued jobs for one key without
    /// emitting anything.
    pub async fn purge(&self, key: &AggregationKey) -> StoreResult<PurgeReport> {
        let pending_key = self.keys.pending(key);
        let lock_key = self.keys.lock(key);

        let pending_removed = self.store.get(&pending_key).await?.is_some();
        let lock_removed = self.store.get(&lock_key).await?.is_some();
        self.store.del(&pending_key).await?;
        self.store.del(&lock_key).await?;

        let mut jobs_removed = 0;
        for job in self.scheduler.jobs_for(key, JOB_SCAN_LIMIT).await? {
            if self.scheduler.claim(&job).await? {
                jobs_removed += 1;
            }
        }

        let report = PurgeReport {
            pending_removed,
            lock_removed,
            jobs_removed,
        };
        info!(key = %key, ?report, "purged aggregation state");
        Ok(report)
    }

    fn due_job(&self, job: FlushJob) -> DueJob {
        DueJob {
            due_at: self.scheduler.due_at(&job),
            job,
        }
    }
}
