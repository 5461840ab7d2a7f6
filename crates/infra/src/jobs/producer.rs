//! Upload intake into the job queue.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use thiserror::Error;
use tracing::{info, instrument, warn};

use docflow_core::{DocumentId, JobId, UserId};

use super::store::JobStore;
use super::types::Job;
use crate::best_effort::best_effort;
use crate::cache::{keys, CacheLayer};
use crate::intake::{DocumentIntake, IntakeError, Upload};
use crate::records::{AuditRecord, AuditSink, DocumentRecord, DocumentStore, RecordStoreError};

/// Query used when the client sends none.
pub const DEFAULT_QUERY: &str = "Analyze this financial document for investment insights";

/// Route recorded in the audit trail for accepted uploads.
pub const AUDIT_PATH: &str = "/v1/documents/analyze";

#[derive(Debug, Clone, Error)]
pub enum EnqueueError {
    #[error(transparent)]
    Intake(#[from] IntakeError),

    #[error("query is {len} characters; the limit is {limit}")]
    QueryTooLong { len: usize, limit: usize },

    #[error("job queue unavailable: {0}")]
    QueueUnavailable(String),

    #[error("document store unavailable: {0}")]
    StoreUnavailable(String),
}

impl From<RecordStoreError> for EnqueueError {
    fn from(e: RecordStoreError) -> Self {
        EnqueueError::StoreUnavailable(e.to_string())
    }
}

/// Trim the query and apply the default; rejects queries over `max_chars`.
pub fn normalize_query(raw: Option<&str>, max_chars: usize) -> Result<String, EnqueueError> {
    let trimmed = raw.map(str::trim).unwrap_or_default();
    if trimmed.is_empty() {
        return Ok(DEFAULT_QUERY.to_string());
    }
    let len = trimmed.chars().count();
    if len > max_chars {
        return Err(EnqueueError::QueryTooLong { len, limit: max_chars });
    }
    Ok(trimmed.to_string())
}

/// Accepted upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enqueued {
    pub job_id: JobId,
    pub document_id: DocumentId,
    pub query: String,
    pub filename: String,
}

#[derive(Clone)]
pub struct JobProducer {
    intake: Arc<dyn DocumentIntake>,
    documents: Arc<dyn DocumentStore>,
    jobs: Arc<dyn JobStore>,
    audit: Arc<dyn AuditSink>,
    cache: CacheLayer,
    max_query_chars: usize,
}

impl JobProducer {
    pub fn new(
        intake: Arc<dyn DocumentIntake>,
        documents: Arc<dyn DocumentStore>,
        jobs: Arc<dyn JobStore>,
        audit: Arc<dyn AuditSink>,
        cache: CacheLayer,
        max_query_chars: usize,
    ) -> Self {
        Self {
            intake,
            documents,
            jobs,
            audit,
            cache,
            max_query_chars,
        }
    }

    /// Validate and store the upload, record the document, and queue a job for it.
    ///
    /// Nothing is left behind on failure: a rejected upload writes no blob, and
    /// a failed enqueue removes the document record and blob again.
    #[instrument(skip(self, upload, query), fields(user = %user, filename = %upload.filename))]
    pub async fn enqueue(&self, upload: Upload, query: Option<&str>, user: UserId) -> Result<Enqueued, EnqueueError> {
        let query = normalize_query(query, self.max_query_chars)?;

        let document_id = DocumentId::new();
        let blob = self.intake.validate_and_store(document_id, upload).await?;

        let record = DocumentRecord {
            id: document_id,
            filename: blob.filename.clone(),
            path: blob.path.clone(),
            size: blob.size,
            mime: Some(blob.mime.clone()),
            owner_id: user,
            created_at: Utc::now(),
        };
        if let Err(e) = self.documents.create(record).await {
            best_effort("intake.discard", self.intake.discard(&blob.path)).await;
            return Err(e.into());
        }

        let job = Job::queued(document_id, user, query.clone());
        let job_id = job.id;
        if let Err(e) = self.jobs.enqueue(job).await {
            warn!(document_id = %document_id, error = %e, "enqueue failed; rolling back document");
            best_effort("documents.delete", self.documents.delete(document_id)).await;
            best_effort("intake.discard", self.intake.discard(&blob.path)).await;
            return Err(EnqueueError::QueueUnavailable(e.to_string()));
        }

        self.cache.invalidate_pattern(&keys::documents_list_pattern(user)).await;
        let entry = AuditRecord::new("POST", AUDIT_PATH, Some(user), 202).with_extra(json!({
            "documentId": document_id,
            "jobId": job_id,
            "filename": blob.filename,
            "size": blob.size,
        }));
        best_effort("audit.record", self.audit.record(entry)).await;

        info!(job_id = %job_id, document_id = %document_id, "job queued");
        Ok(Enqueued {
            job_id,
            document_id,
            query,
            filename: blob.filename,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use bytes::Bytes;
    use proptest::prelude::*;

    use crate::config::{CacheConfig, IntakeConfig};
    use crate::jobs::store::JobStoreError;
    use crate::intake::tests::pdf_bytes;
    use crate::intake::PdfIntake;
    use crate::jobs::store::InMemoryJobStore;
    use crate::jobs::types::JobStatus;
    use crate::records::{InMemoryAuditLog, InMemoryRecords};
    use docflow_core::Page;

    struct DownQueue;

    #[async_trait]
    impl JobStore for DownQueue {
        async fn create(&self, _job: Job) -> Result<(), JobStoreError> {
            Err(JobStoreError::Unavailable("down".into()))
        }
        async fn enqueue(&self, _job: Job) -> Result<(), JobStoreError> {
            Err(JobStoreError::Unavailable("down".into()))
        }
        async fn get(&self, _id: JobId) -> Result<Option<Job>, JobStoreError> {
            Ok(None)
        }
        async fn update(&self, id: JobId, _u: super::super::types::JobUpdate) -> Result<Job, JobStoreError> {
            Err(JobStoreError::NotFound(id))
        }
        async fn push(&self, _id: JobId) -> Result<(), JobStoreError> {
            Err(JobStoreError::Unavailable("down".into()))
        }
        async fn pop(&self, _t: Duration) -> Result<Option<JobId>, JobStoreError> {
            Ok(None)
        }
        async fn stalled(&self, _c: chrono::DateTime<Utc>) -> Result<Vec<JobId>, JobStoreError> {
            Ok(vec![])
        }
        async fn release(&self, _id: JobId) -> Result<(), JobStoreError> {
            Ok(())
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        upload_dir: std::path::PathBuf,
        documents: Arc<InMemoryRecords<DocumentRecord>>,
        jobs: Arc<InMemoryJobStore>,
        audit: Arc<InMemoryAuditLog>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            Self {
                upload_dir: dir.path().join("uploads"),
                _dir: dir,
                documents: Arc::new(InMemoryRecords::new()),
                jobs: InMemoryJobStore::arc(Duration::from_secs(3600)),
                audit: Arc::new(InMemoryAuditLog::new()),
            }
        }

        fn producer_with(&self, jobs: Arc<dyn JobStore>) -> JobProducer {
            let intake = PdfIntake::new(IntakeConfig {
                upload_dir: self.upload_dir.clone(),
                ..IntakeConfig::default()
            });
            JobProducer::new(
                Arc::new(intake),
                self.documents.clone(),
                jobs,
                self.audit.clone(),
                CacheLayer::in_memory(CacheConfig::default()),
                50,
            )
        }

        fn producer(&self) -> JobProducer {
            self.producer_with(self.jobs.clone())
        }

        fn files(&self) -> usize {
            std::fs::read_dir(&self.upload_dir).map(|d| d.count()).unwrap_or(0)
        }
    }

    fn pdf(text: Option<&str>) -> Upload {
        Upload {
            filename: "report.pdf".into(),
            content_type: Some("application/pdf".into()),
            bytes: Bytes::from(pdf_bytes(text)),
        }
    }

    #[test]
    fn blank_query_gets_default() {
        assert_eq!(normalize_query(None, 10).unwrap(), DEFAULT_QUERY);
        assert_eq!(normalize_query(Some("   "), 10).unwrap(), DEFAULT_QUERY);
        assert_eq!(normalize_query(Some("  margins? "), 10).unwrap(), "margins?");
    }

    #[test]
    fn over_long_query_is_rejected() {
        let err = normalize_query(Some("abcdef"), 5).unwrap_err();
        assert!(matches!(err, EnqueueError::QueryTooLong { len: 6, limit: 5 }));
    }

    proptest! {
        #[test]
        fn normalized_query_is_trimmed_and_bounded(raw in ".{0,80}", limit in 1usize..60) {
            match normalize_query(Some(&raw), limit) {
                Ok(q) => {
                    prop_assert!(!q.is_empty());
                    prop_assert_eq!(q.trim(), q.as_str());
                    prop_assert!(q == DEFAULT_QUERY || q.chars().count() <= limit);
                }
                Err(EnqueueError::QueryTooLong { len, limit: l }) => prop_assert!(len > l),
                Err(other) => prop_assert!(false, "unexpected error {other}"),
            }
        }
    }

    #[tokio::test]
    async fn accepted_upload_is_queued() {
        let fx = Fixture::new();
        let out = fx
            .producer()
            .enqueue(pdf(Some("Revenue: $10 million")), Some(" growth? "), UserId::new())
            .await
            .unwrap();

        let job = fx.jobs.get(out.job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.progress, 0);
        assert_eq!(job.document_id, out.document_id);
        assert_eq!(job.query, "growth?");
        assert_eq!(fx.jobs.queue_len().await, 1);

        let doc = fx.documents.get(out.document_id).await.unwrap().unwrap();
        assert!(doc.path.exists());
        assert_eq!(doc.mime.as_deref(), Some("application/pdf"));
        assert_eq!(fx.audit.entries().await.len(), 1);
    }

    #[tokio::test]
    async fn rejected_upload_creates_nothing() {
        let fx = Fixture::new();
        let owner = UserId::new();
        let upload = Upload {
            filename: "notes.txt".into(),
            content_type: Some("text/plain".into()),
            bytes: Bytes::from_static(b"hello"),
        };
        let err = fx.producer().enqueue(upload, None, owner).await.unwrap_err();
        assert!(matches!(err, EnqueueError::Intake(IntakeError::Unsupported(_))));

        let err = fx.producer().enqueue(pdf(None), None, owner).await.unwrap_err();
        assert!(matches!(err, EnqueueError::Intake(IntakeError::Unreadable(_))));

        assert_eq!(fx.jobs.queue_len().await, 0);
        assert!(fx.documents.list(owner, Page::default()).await.unwrap().is_empty());
        assert_eq!(fx.files(), 0);
        assert!(fx.audit.entries().await.is_empty());
    }

    #[tokio::test]
    async fn long_query_is_rejected_before_storing() {
        let fx = Fixture::new();
        let err = fx
            .producer()
            .enqueue(pdf(Some("Revenue: 1")), Some(&"x".repeat(51)), UserId::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EnqueueError::QueryTooLong { .. }));
        assert_eq!(fx.files(), 0);
    }

    #[tokio::test]
    async fn queue_outage_rolls_back_document() {
        let fx = Fixture::new();
        let owner = UserId::new();
        let err = fx
            .producer_with(Arc::new(DownQueue))
            .enqueue(pdf(Some("Revenue: 1")), None, owner)
            .await
            .unwrap_err();
        assert!(matches!(err, EnqueueError::QueueUnavailable(_)));
        assert!(fx.documents.list(owner, Page::default()).await.unwrap().is_empty());
        assert_eq!(fx.files(), 0);
    }
}
