//! Owner-scoped job lookup for polling clients.

use std::sync::Arc;

use thiserror::Error;

use docflow_core::{JobId, Owned, UserId};

use super::store::{JobStore, JobStoreError};
use super::types::Job;
use crate::cache::{keys, CacheLayer, TtlClass};

#[derive(Debug, Clone, Error)]
pub enum StatusError {
    /// Missing, expired, or owned by someone else.
    #[error("job not found: {0}")]
    NotFound(JobId),

    #[error("job store unavailable: {0}")]
    Unavailable(String),
}

impl From<JobStoreError> for StatusError {
    fn from(e: JobStoreError) -> Self {
        match e {
            JobStoreError::NotFound(id) => StatusError::NotFound(id),
            other => StatusError::Unavailable(other.to_string()),
        }
    }
}

#[derive(Clone)]
pub struct JobStatusService {
    jobs: Arc<dyn JobStore>,
    cache: CacheLayer,
}

impl JobStatusService {
    pub fn new(jobs: Arc<dyn JobStore>, cache: CacheLayer) -> Self {
        Self { jobs, cache }
    }

    /// Terminal jobs are served from cache; anything still moving is read from the store.
    pub async fn get(&self, id: JobId, requester: UserId) -> Result<Job, StatusError> {
        let key = keys::job(id);
        let job = match self.cache.get_json::<Job>(&key).await {
            Some(hit) => hit,
            None => {
                let job = self.jobs.get(id).await?.ok_or(StatusError::NotFound(id))?;
                if job.status.is_terminal() {
                    self.cache.set_json(&key, &job, TtlClass::Long).await;
                }
                job
            }
        };
        if !job.is_owned_by(requester) {
            return Err(StatusError::NotFound(id));
        }
        Ok(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::config::CacheConfig;
    use crate::jobs::store::InMemoryJobStore;
    use crate::jobs::types::{JobStatus, JobUpdate};
    use docflow_core::{AnalysisId, DocumentId};

    fn service() -> (Arc<InMemoryJobStore>, JobStatusService) {
        let store = InMemoryJobStore::arc(Duration::from_secs(3600));
        let svc = JobStatusService::new(store.clone(), CacheLayer::in_memory(CacheConfig::default()));
        (store, svc)
    }

    #[tokio::test]
    async fn owner_sees_queued_job() {
        let (store, svc) = service();
        let owner = UserId::new();
        let job = Job::queued(DocumentId::new(), owner, "q");
        let id = job.id;
        store.enqueue(job).await.unwrap();

        let got = svc.get(id, owner).await.unwrap();
        assert_eq!(got.status, JobStatus::Queued);
        assert_eq!(got.progress, 0);
    }

    #[tokio::test]
    async fn other_users_and_unknown_ids_get_not_found() {
        let (store, svc) = service();
        let job = Job::queued(DocumentId::new(), UserId::new(), "q");
        let id = job.id;
        store.enqueue(job).await.unwrap();

        assert!(matches!(svc.get(id, UserId::new()).await, Err(StatusError::NotFound(_))));
        assert!(matches!(svc.get(JobId::new(), UserId::new()).await, Err(StatusError::NotFound(_))));
    }

    #[tokio::test]
    async fn in_progress_reads_are_never_stale() {
        let (store, svc) = service();
        let owner = UserId::new();
        let job = Job::queued(DocumentId::new(), owner, "q");
        let id = job.id;
        store.enqueue(job).await.unwrap();

        assert_eq!(svc.get(id, owner).await.unwrap().status, JobStatus::Queued);
        store.update(id, JobUpdate::started()).await.unwrap();
        assert_eq!(svc.get(id, owner).await.unwrap().progress, 10);
        store.update(id, JobUpdate::completed(AnalysisId::new())).await.unwrap();

        let first = svc.get(id, owner).await.unwrap();
        let second = svc.get(id, owner).await.unwrap();
        assert_eq!(first.status, JobStatus::Completed);
        assert_eq!(first, second);
    }
}
