//! Job storage: durable job records plus the FIFO dispatch queue.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use docflow_core::{DomainError, JobId};

use super::types::{Job, JobStatus, JobUpdate};

/// Job store abstraction.
///
/// Besides plain records, the store tracks which jobs are currently
/// `processing` (and since when) so stalled work can be found after a worker dies.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new job without queueing it.
    async fn create(&self, job: Job) -> Result<(), JobStoreError>;

    /// Persist a new job and append its id to the dispatch queue atomically.
    async fn enqueue(&self, job: Job) -> Result<(), JobStoreError>;

    /// Get a job by ID. Expired jobs read as `None`.
    async fn get(&self, id: JobId) -> Result<Option<Job>, JobStoreError>;

    /// Merge the supplied fields into the stored job and return the result.
    ///
    /// Rejected with [`JobStoreError::Invariant`] if the update would move the
    /// job backwards or touch a terminal job.
    async fn update(&self, id: JobId, update: JobUpdate) -> Result<Job, JobStoreError>;

    /// Append an existing job id to the dispatch queue.
    async fn push(&self, id: JobId) -> Result<(), JobStoreError>;

    /// Pop the oldest queued id, waiting up to `timeout` for one to arrive.
    async fn pop(&self, timeout: Duration) -> Result<Option<JobId>, JobStoreError>;

    /// Jobs that entered `processing` at or before `cutoff` and never finished.
    async fn stalled(&self, cutoff: DateTime<Utc>) -> Result<Vec<JobId>, JobStoreError>;

    /// Drop `id` from the in-flight index, e.g. after its record expired.
    async fn release(&self, id: JobId) -> Result<(), JobStoreError>;
}

/// Job store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job already exists: {0}")]
    AlreadyExists(JobId),
    #[error("rejected update: {0}")]
    Invariant(String),
    #[error("concurrent update on job {0}")]
    Conflict(JobId),
    #[error("job store unavailable: {0}")]
    Unavailable(String),
    #[error("corrupt job record: {0}")]
    Corrupt(String),
}

impl From<DomainError> for JobStoreError {
    fn from(e: DomainError) -> Self {
        JobStoreError::Invariant(e.to_string())
    }
}

#[derive(Debug)]
struct Entry {
    job: Job,
    expires_at: Instant,
}

#[derive(Debug, Default)]
struct State {
    jobs: HashMap<JobId, Entry>,
    queue: VecDeque<JobId>,
    in_flight: HashMap<JobId, DateTime<Utc>>,
}

impl State {
    fn live(&mut self, id: &JobId, now: Instant) -> Option<&mut Entry> {
        if self.jobs.get(id).is_some_and(|e| e.expires_at <= now) {
            self.jobs.remove(id);
            self.in_flight.remove(id);
        }
        self.jobs.get_mut(id)
    }
}

/// In-memory job store for tests/dev.
#[derive(Debug)]
pub struct InMemoryJobStore {
    state: Mutex<State>,
    wakeup: Notify,
    retention: Duration,
}

impl InMemoryJobStore {
    pub fn new(retention: Duration) -> Self {
        Self {
            state: Mutex::new(State::default()),
            wakeup: Notify::new(),
            retention,
        }
    }

    pub fn arc(retention: Duration) -> Arc<Self> {
        Arc::new(Self::new(retention))
    }

    /// Number of ids waiting in the dispatch queue.
    pub async fn queue_len(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    async fn insert(&self, job: Job, queue: bool) -> Result<(), JobStoreError> {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        if state.live(&job.id, now).is_some() {
            return Err(JobStoreError::AlreadyExists(job.id));
        }
        let id = job.id;
        state.jobs.insert(
            id,
            Entry {
                job,
                expires_at: now + self.retention,
            },
        );
        if queue {
            state.queue.push_back(id);
        }
        drop(state);
        if queue {
            self.wakeup.notify_one();
        }
        Ok(())
    }
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(7 * 24 * 60 * 60))
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, job: Job) -> Result<(), JobStoreError> {
        self.insert(job, false).await
    }

    async fn enqueue(&self, job: Job) -> Result<(), JobStoreError> {
        self.insert(job, true).await
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>, JobStoreError> {
        let mut state = self.state.lock().await;
        Ok(state.live(&id, Instant::now()).map(|e| e.job.clone()))
    }

    async fn update(&self, id: JobId, update: JobUpdate) -> Result<Job, JobStoreError> {
        let now = Utc::now();
        let mut state = self.state.lock().await;
        let entry = state.live(&id, Instant::now()).ok_or(JobStoreError::NotFound(id))?;
        let before = entry.job.status;
        entry.job.apply(&update, now)?;
        let job = entry.job.clone();

        match job.status {
            JobStatus::Processing if before != JobStatus::Processing => {
                state.in_flight.insert(id, now);
            }
            s if s.is_terminal() => {
                state.in_flight.remove(&id);
            }
            _ => {}
        }
        Ok(job)
    }

    async fn push(&self, id: JobId) -> Result<(), JobStoreError> {
        let mut state = self.state.lock().await;
        if state.live(&id, Instant::now()).is_none() {
            return Err(JobStoreError::NotFound(id));
        }
        state.queue.push_back(id);
        drop(state);
        self.wakeup.notify_one();
        Ok(())
    }

    async fn pop(&self, timeout: Duration) -> Result<Option<JobId>, JobStoreError> {
        let deadline = Instant::now() + timeout;
        loop {
            // Register interest before checking so a concurrent push cannot be missed.
            let notified = self.wakeup.notified();
            if let Some(id) = self.state.lock().await.queue.pop_front() {
                return Ok(Some(id));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn stalled(&self, cutoff: DateTime<Utc>) -> Result<Vec<JobId>, JobStoreError> {
        let state = self.state.lock().await;
        let mut ids: Vec<(DateTime<Utc>, JobId)> = state
            .in_flight
            .iter()
            .filter(|(_, started)| **started <= cutoff)
            .map(|(id, started)| (*started, *id))
            .collect();
        ids.sort();
        Ok(ids.into_iter().map(|(_, id)| id).collect())
    }

    async fn release(&self, id: JobId) -> Result<(), JobStoreError> {
        self.state.lock().await.in_flight.remove(&id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::types::progress;
    use docflow_core::{AnalysisId, DocumentId, UserId};

    fn job() -> Job {
        Job::queued(DocumentId::new(), UserId::new(), "analyze")
    }

    #[tokio::test]
    async fn enqueue_then_pop_is_fifo() {
        let store = InMemoryJobStore::default();
        let (a, b) = (job(), job());
        let (ida, idb) = (a.id, b.id);
        store.enqueue(a).await.unwrap();
        store.enqueue(b).await.unwrap();

        assert_eq!(store.pop(Duration::from_millis(10)).await.unwrap(), Some(ida));
        assert_eq!(store.pop(Duration::from_millis(10)).await.unwrap(), Some(idb));
    }

    #[tokio::test]
    async fn enqueued_job_reads_back_queued() {
        let store = InMemoryJobStore::default();
        let j = job();
        let id = j.id;
        store.enqueue(j).await.unwrap();

        let got = store.get(id).await.unwrap().unwrap();
        assert_eq!(got.status, JobStatus::Queued);
        assert_eq!(got.progress, 0);
    }

    #[tokio::test]
    async fn duplicate_ids_are_rejected() {
        let store = InMemoryJobStore::default();
        let j = job();
        store.create(j.clone()).await.unwrap();
        assert!(matches!(store.enqueue(j).await, Err(JobStoreError::AlreadyExists(_))));
        assert_eq!(store.queue_len().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn pop_times_out_on_empty_queue() {
        let store = InMemoryJobStore::default();
        let started = Instant::now();
        assert_eq!(store.pop(Duration::from_secs(5)).await.unwrap(), None);
        assert!(started.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test]
    async fn pop_wakes_on_push() {
        let store = Arc::new(InMemoryJobStore::default());
        let j = job();
        let id = j.id;
        store.create(j).await.unwrap();

        let waiter = {
            let store = store.clone();
            tokio::spawn(async move { store.pop(Duration::from_secs(5)).await })
        };
        tokio::task::yield_now().await;
        store.push(id).await.unwrap();

        assert_eq!(waiter.await.unwrap().unwrap(), Some(id));
    }

    #[tokio::test]
    async fn update_merges_only_supplied_fields() {
        let store = InMemoryJobStore::default();
        let j = job();
        let id = j.id;
        store.create(j).await.unwrap();

        store.update(id, JobUpdate::started()).await.unwrap();
        let after = store.update(id, JobUpdate::progress(progress::ANALYZED)).await.unwrap();

        assert_eq!(after.status, JobStatus::Processing);
        assert_eq!(after.progress, 70);
        assert_eq!(after.query, "analyze");
    }

    #[tokio::test]
    async fn terminal_updates_are_rejected() {
        let store = InMemoryJobStore::default();
        let j = job();
        let id = j.id;
        store.create(j).await.unwrap();
        store.update(id, JobUpdate::failed("boom")).await.unwrap();

        let err = store.update(id, JobUpdate::started()).await.unwrap_err();
        assert!(matches!(err, JobStoreError::Invariant(_)));
    }

    #[tokio::test]
    async fn only_one_claim_succeeds() {
        let store = InMemoryJobStore::default();
        let j = job();
        let id = j.id;
        store.enqueue(j).await.unwrap();

        store.update(id, JobUpdate::started()).await.unwrap();
        let err = store.update(id, JobUpdate::started()).await.unwrap_err();
        assert!(matches!(err, JobStoreError::Invariant(_)));
        assert_eq!(store.get(id).await.unwrap().unwrap().progress, progress::STARTED);
    }

    #[tokio::test]
    async fn in_flight_index_follows_status() {
        let store = InMemoryJobStore::default();
        let j = job();
        let id = j.id;
        store.create(j).await.unwrap();

        store.update(id, JobUpdate::started()).await.unwrap();
        assert_eq!(store.stalled(Utc::now()).await.unwrap(), vec![id]);

        store.update(id, JobUpdate::completed(AnalysisId::new())).await.unwrap();
        assert!(store.stalled(Utc::now()).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn jobs_expire_after_retention() {
        let store = InMemoryJobStore::new(Duration::from_secs(60));
        let j = job();
        let id = j.id;
        store.create(j).await.unwrap();

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(store.get(id).await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(store.get(id).await.unwrap().is_none());
        assert!(matches!(
            store.update(id, JobUpdate::started()).await,
            Err(JobStoreError::NotFound(_))
        ));
    }
}
