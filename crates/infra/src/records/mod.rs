//! Durable document, analysis, and audit records.
//!
//! The job pipeline only needs `create`/`get`; list and delete back the read
//! endpoints. Listings are newest-first and always scoped to one owner.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use docflow_core::{AnalysisId, DocumentId, Entity, JobId, Owned, Page, UserId};

pub mod in_memory;
pub mod postgres;

pub use in_memory::{InMemoryAuditLog, InMemoryRecords};
pub use postgres::PostgresRecordStore;

#[derive(Debug, Clone, thiserror::Error)]
pub enum RecordStoreError {
    #[error("record store unavailable: {0}")]
    Unavailable(String),
    #[error("record already exists: {0}")]
    AlreadyExists(String),
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// Metadata for an uploaded document; the bytes live at `path`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentRecord {
    pub id: DocumentId,
    pub filename: String,
    pub path: PathBuf,
    pub size: u64,
    pub mime: Option<String>,
    pub owner_id: UserId,
    pub created_at: DateTime<Utc>,
}

impl Entity for DocumentRecord {
    type Id = DocumentId;

    fn id(&self) -> DocumentId {
        self.id
    }
}

impl Owned for DocumentRecord {
    fn owner(&self) -> UserId {
        self.owner_id
    }
}

/// Persisted output of a completed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRecord {
    pub id: AnalysisId,
    pub document_id: DocumentId,
    pub user_id: UserId,
    pub job_id: Option<JobId>,
    pub query: String,
    pub summary: String,
    pub metrics: JsonValue,
    pub created_at: DateTime<Utc>,
}

impl Entity for AnalysisRecord {
    type Id = AnalysisId;

    fn id(&self) -> AnalysisId {
        self.id
    }
}

impl Owned for AnalysisRecord {
    fn owner(&self) -> UserId {
        self.user_id
    }
}

/// One line of the request audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub path: String,
    pub method: String,
    pub user: Option<UserId>,
    pub status: u16,
    pub extra: JsonValue,
    pub created_at: DateTime<Utc>,
}

impl AuditRecord {
    pub fn new(method: impl Into<String>, path: impl Into<String>, user: Option<UserId>, status: u16) -> Self {
        Self {
            path: path.into(),
            method: method.into(),
            user,
            status,
            extra: JsonValue::Null,
            created_at: Utc::now(),
        }
    }

    pub fn with_extra(mut self, extra: JsonValue) -> Self {
        self.extra = extra;
        self
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn create(&self, doc: DocumentRecord) -> Result<(), RecordStoreError>;

    async fn get(&self, id: DocumentId) -> Result<Option<DocumentRecord>, RecordStoreError>;

    async fn list(&self, owner: UserId, page: Page) -> Result<Vec<DocumentRecord>, RecordStoreError>;

    /// Returns whether a record was removed.
    async fn delete(&self, id: DocumentId) -> Result<bool, RecordStoreError>;
}

#[async_trait]
pub trait AnalysisStore: Send + Sync {
    async fn create(&self, analysis: AnalysisRecord) -> Result<(), RecordStoreError>;

    async fn get(&self, id: AnalysisId) -> Result<Option<AnalysisRecord>, RecordStoreError>;

    async fn list(
        &self,
        owner: UserId,
        document: Option<DocumentId>,
        page: Page,
    ) -> Result<Vec<AnalysisRecord>, RecordStoreError>;
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entry: AuditRecord) -> Result<(), RecordStoreError>;
}
