//! Worker pool that drains the dispatch queue and runs analyses.
//!
//! One pop loop per pool. The loop takes an execution slot before each pop, so
//! at most `concurrency` jobs run at once and nothing is popped that cannot be
//! started immediately. Each job runs on its own task; the analyzer itself runs
//! on the blocking pool.

use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, instrument, warn};

use docflow_analysis::{AnalysisRequest, Analyzer};
use docflow_core::{AnalysisId, JobId};

use super::store::{JobStore, JobStoreError};
use super::types::{progress, Job, JobStatus, JobUpdate};
use crate::cache::{keys, CacheLayer};
use crate::config::WorkerConfig;
use crate::records::{AnalysisRecord, AnalysisStore, DocumentStore};

/// Error recorded on jobs whose document record or blob is gone.
pub const DOCUMENT_MISSING: &str = "document missing";

/// What happened to one popped job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Unknown id or not `queued` any more; left untouched.
    Skipped,
    Completed(AnalysisId),
    Failed(String),
    /// The job left `processing` while we worked on it; the result was dropped.
    Abandoned,
}

/// Worker runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    pub jobs_processed: u64,
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
    pub jobs_skipped: u64,
}

#[derive(Debug, Default)]
struct Counters {
    processed: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
}

impl Counters {
    fn record(&self, outcome: &JobOutcome) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        let bucket = match outcome {
            JobOutcome::Completed(_) => &self.succeeded,
            JobOutcome::Failed(_) => &self.failed,
            JobOutcome::Skipped | JobOutcome::Abandoned => &self.skipped,
        };
        bucket.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> WorkerStats {
        WorkerStats {
            jobs_processed: self.processed.load(Ordering::Relaxed),
            jobs_succeeded: self.succeeded.load(Ordering::Relaxed),
            jobs_failed: self.failed.load(Ordering::Relaxed),
            jobs_skipped: self.skipped.load(Ordering::Relaxed),
        }
    }
}

/// Stop signal plus join handle for a background loop.
#[derive(Debug)]
pub struct TaskHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl TaskHandle {
    pub(crate) fn new(shutdown: watch::Sender<bool>, join: JoinHandle<()>) -> Self {
        Self { shutdown, join }
    }

    /// Signal the loop to stop and wait for it (and its in-flight work) to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.join.await {
            error!(error = %e, "background task ended abnormally");
        }
    }
}

/// Handle to a running worker pool.
#[derive(Debug)]
pub struct WorkerHandle {
    task: TaskHandle,
    counters: Arc<Counters>,
}

impl WorkerHandle {
    pub async fn shutdown(self) {
        self.task.shutdown().await;
    }

    pub fn stats(&self) -> WorkerStats {
        self.counters.snapshot()
    }
}

pub struct JobWorker {
    jobs: Arc<dyn JobStore>,
    documents: Arc<dyn DocumentStore>,
    analyses: Arc<dyn AnalysisStore>,
    analyzer: Arc<dyn Analyzer>,
    cache: CacheLayer,
}

impl JobWorker {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        documents: Arc<dyn DocumentStore>,
        analyses: Arc<dyn AnalysisStore>,
        analyzer: Arc<dyn Analyzer>,
        cache: CacheLayer,
    ) -> Self {
        Self {
            jobs,
            documents,
            analyses,
            analyzer,
            cache,
        }
    }

    /// Start the pop loop on the current runtime.
    pub fn spawn(self: Arc<Self>, config: WorkerConfig) -> WorkerHandle {
        let (tx, rx) = watch::channel(false);
        let counters = Arc::new(Counters::default());
        let join = tokio::spawn(run(self, config, rx, counters.clone()));
        WorkerHandle {
            task: TaskHandle::new(tx, join),
            counters,
        }
    }

    /// Run one job to a terminal state (or skip it).
    ///
    /// Errors are store failures while reading or claiming the job; everything
    /// that goes wrong after the claim is written to the job instead.
    #[instrument(skip(self), fields(job_id = %id))]
    pub async fn process(&self, id: JobId) -> Result<JobOutcome, JobStoreError> {
        let job = match self.jobs.get(id).await? {
            Some(job) => job,
            None => {
                warn!("popped id has no job record");
                return Ok(JobOutcome::Skipped);
            }
        };
        if job.status != JobStatus::Queued {
            debug!(status = %job.status, "job already handled");
            return Ok(JobOutcome::Skipped);
        }

        let document = match self.documents.get(job.document_id).await {
            Ok(Some(doc)) => doc,
            Ok(None) => return Ok(self.fail(&job, DOCUMENT_MISSING.to_string()).await),
            Err(e) => return Ok(self.fail(&job, e.to_string()).await),
        };
        if !tokio::fs::try_exists(&document.path).await.unwrap_or(false) {
            return Ok(self.fail(&job, DOCUMENT_MISSING.to_string()).await);
        }

        match self.jobs.update(id, JobUpdate::started()).await {
            Ok(_) => {}
            Err(JobStoreError::Invariant(_) | JobStoreError::Conflict(_)) => {
                debug!("job claimed elsewhere");
                return Ok(JobOutcome::Skipped);
            }
            Err(e) => return Err(e),
        }

        let analyzer = self.analyzer.clone();
        let request = AnalysisRequest::new(job.query.clone(), document.path.clone());
        let output = match tokio::task::spawn_blocking(move || analyzer.analyze(&request)).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Ok(self.fail(&job, e.to_string()).await),
            Err(join) if join.is_panic() => {
                let msg = format!("analyzer panicked: {}", panic_message(join.into_panic()));
                return Ok(self.fail(&job, msg).await);
            }
            Err(join) => return Ok(self.fail(&job, join.to_string()).await),
        };

        match self.jobs.update(id, JobUpdate::progress(progress::ANALYZED)).await {
            Ok(current) if current.status == JobStatus::Processing => {}
            Ok(_) | Err(JobStoreError::Invariant(_) | JobStoreError::NotFound(_)) => {
                warn!("job left processing during analysis; dropping result");
                return Ok(JobOutcome::Abandoned);
            }
            Err(e) => return Ok(self.fail(&job, e.to_string()).await),
        }

        let record = AnalysisRecord {
            id: AnalysisId::new(),
            document_id: job.document_id,
            user_id: job.user_id,
            job_id: Some(job.id),
            query: job.query.clone(),
            summary: output.summary,
            metrics: output.metrics,
            created_at: Utc::now(),
        };
        let analysis_id = record.id;
        if let Err(e) = self.analyses.create(record).await {
            return Ok(self.fail(&job, format!("could not store analysis: {e}")).await);
        }

        match self.jobs.update(id, JobUpdate::completed(analysis_id)).await {
            Ok(_) => {
                self.invalidate(&job).await;
                info!(analysis_id = %analysis_id, "job completed");
                Ok(JobOutcome::Completed(analysis_id))
            }
            Err(JobStoreError::Invariant(_) | JobStoreError::NotFound(_)) => {
                warn!(analysis_id = %analysis_id, "job left processing before completion");
                Ok(JobOutcome::Abandoned)
            }
            Err(e) => Ok(self.fail(&job, e.to_string()).await),
        }
    }

    async fn fail(&self, job: &Job, message: String) -> JobOutcome {
        warn!(job_id = %job.id, error = %message, "job failed");
        match self.jobs.update(job.id, JobUpdate::failed(message.clone())).await {
            Ok(_) => self.invalidate(job).await,
            Err(e) => error!(job_id = %job.id, error = %e, "could not record job failure"),
        }
        JobOutcome::Failed(message)
    }

    async fn invalidate(&self, job: &Job) {
        self.cache.invalidate_pattern(&keys::analyses_list_pattern(job.user_id)).await;
        self.cache.invalidate_pattern(&keys::job(job.id)).await;
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

async fn run(worker: Arc<JobWorker>, config: WorkerConfig, mut stop: watch::Receiver<bool>, counters: Arc<Counters>) {
    info!(worker = %config.name, concurrency = config.concurrency, "worker started");
    let slots = Arc::new(Semaphore::new(config.concurrency.max(1)));
    let mut running = JoinSet::new();

    loop {
        while let Some(done) = running.try_join_next() {
            if let Err(e) = done {
                error!(worker = %config.name, error = %e, "job task ended abnormally");
            }
        }
        if *stop.borrow() {
            break;
        }

        let permit = tokio::select! {
            _ = stop.changed() => break,
            permit = slots.clone().acquire_owned() => match permit {
                Ok(p) => p,
                Err(_) => break,
            },
        };

        // Not raced against the stop signal: a pop cancelled mid-flight could lose the id.
        let id = match worker.jobs.pop(config.pop_timeout).await {
            Ok(Some(id)) => id,
            Ok(None) => continue,
            Err(e) => {
                error!(worker = %config.name, error = %e, "queue pop failed");
                drop(permit);
                let stopped = tokio::select! {
                    _ = stop.changed() => true,
                    _ = tokio::time::sleep(config.error_backoff) => false,
                };
                if stopped {
                    break;
                }
                continue;
            }
        };

        debug!(worker = %config.name, job_id = %id, "popped job");
        let worker = worker.clone();
        let counters = counters.clone();
        running.spawn(async move {
            let _permit = permit;
            match worker.process(id).await {
                Ok(outcome) => counters.record(&outcome),
                Err(e) => error!(job_id = %id, error = %e, "job could not be processed"),
            }
        });
    }

    info!(worker = %config.name, in_flight = running.len(), "worker stopping; draining in-flight jobs");
    while let Some(done) = running.join_next().await {
        if let Err(e) = done {
            error!(worker = %config.name, error = %e, "job task ended abnormally");
        }
    }
    info!(worker = %config.name, "worker stopped");
}
