//! Postgres-backed record stores.
//!
//! One pool serves documents, analyses and the audit log. Queries are plain
//! runtime `sqlx::query` calls; rows are decoded by column name.

use std::path::PathBuf;

use async_trait::async_trait;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use docflow_core::{AnalysisId, DocumentId, JobId, Page, UserId};

use super::{
    AnalysisRecord, AnalysisStore, AuditRecord, AuditSink, DocumentRecord, DocumentStore, RecordStoreError,
};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS documents (
        id          UUID PRIMARY KEY,
        filename    TEXT NOT NULL,
        path        TEXT NOT NULL,
        size        BIGINT NOT NULL,
        mime        TEXT,
        owner_id    UUID NOT NULL,
        created_at  TIMESTAMPTZ NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS documents_owner_created ON documents (owner_id, created_at DESC)",
    r#"
    CREATE TABLE IF NOT EXISTS analyses (
        id           UUID PRIMARY KEY,
        document_id  UUID NOT NULL,
        user_id      UUID NOT NULL,
        job_id       UUID,
        query        TEXT NOT NULL,
        summary      TEXT NOT NULL,
        metrics      JSONB NOT NULL DEFAULT 'null'::jsonb,
        created_at   TIMESTAMPTZ NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS analyses_user_created ON analyses (user_id, created_at DESC)",
    r#"
    CREATE TABLE IF NOT EXISTS audit_logs (
        id          BIGSERIAL PRIMARY KEY,
        path        TEXT NOT NULL,
        method      TEXT NOT NULL,
        user_id     UUID,
        status      INTEGER NOT NULL,
        extra       JSONB NOT NULL DEFAULT 'null'::jsonb,
        created_at  TIMESTAMPTZ NOT NULL
    )
    "#,
];

#[derive(Debug, Clone)]
pub struct PostgresRecordStore {
    pool: PgPool,
}

impl PostgresRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, RecordStoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(db_error)?;
        Ok(Self::new(pool))
    }

    /// Create tables and indexes if they do not exist yet.
    pub async fn ensure_schema(&self) -> Result<(), RecordStoreError> {
        for stmt in SCHEMA {
            sqlx::query(stmt).execute(&self.pool).await.map_err(db_error)?;
        }
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn db_error(e: sqlx::Error) -> RecordStoreError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => RecordStoreError::AlreadyExists(db.message().to_string()),
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::ColumnNotFound(_) | sqlx::Error::Decode(_) => {
            RecordStoreError::Corrupt(e.to_string())
        }
        _ => RecordStoreError::Unavailable(e.to_string()),
    }
}

fn page_bounds(page: Page) -> (i64, i64) {
    (
        i64::try_from(page.skip()).unwrap_or(i64::MAX),
        i64::try_from(page.limit()).unwrap_or(i64::MAX),
    )
}

fn document_from_row(row: &PgRow) -> Result<DocumentRecord, RecordStoreError> {
    let size: i64 = row.try_get("size").map_err(db_error)?;
    Ok(DocumentRecord {
        id: DocumentId::from_uuid(row.try_get("id").map_err(db_error)?),
        filename: row.try_get("filename").map_err(db_error)?,
        path: PathBuf::from(row.try_get::<String, _>("path").map_err(db_error)?),
        size: u64::try_from(size).map_err(|_| RecordStoreError::Corrupt(format!("negative size {size}")))?,
        mime: row.try_get("mime").map_err(db_error)?,
        owner_id: UserId::from_uuid(row.try_get("owner_id").map_err(db_error)?),
        created_at: row.try_get("created_at").map_err(db_error)?,
    })
}

fn analysis_from_row(row: &PgRow) -> Result<AnalysisRecord, RecordStoreError> {
    Ok(AnalysisRecord {
        id: AnalysisId::from_uuid(row.try_get("id").map_err(db_error)?),
        document_id: DocumentId::from_uuid(row.try_get("document_id").map_err(db_error)?),
        user_id: UserId::from_uuid(row.try_get("user_id").map_err(db_error)?),
        job_id: row
            .try_get::<Option<Uuid>, _>("job_id")
            .map_err(db_error)?
            .map(JobId::from_uuid),
        query: row.try_get("query").map_err(db_error)?,
        summary: row.try_get("summary").map_err(db_error)?,
        metrics: row.try_get("metrics").map_err(db_error)?,
        created_at: row.try_get("created_at").map_err(db_error)?,
    })
}

#[async_trait]
impl DocumentStore for PostgresRecordStore {
    #[instrument(skip(self, doc), fields(document_id = %doc.id))]
    async fn create(&self, doc: DocumentRecord) -> Result<(), RecordStoreError> {
        let size = i64::try_from(doc.size).map_err(|_| RecordStoreError::Corrupt(format!("size {} too large", doc.size)))?;
        sqlx::query(
            r#"
            INSERT INTO documents (id, filename, path, size, mime, owner_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(doc.id.as_uuid())
        .bind(&doc.filename)
        .bind(doc.path.to_string_lossy().into_owned())
        .bind(size)
        .bind(doc.mime.as_deref())
        .bind(doc.owner_id.as_uuid())
        .bind(doc.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn get(&self, id: DocumentId) -> Result<Option<DocumentRecord>, RecordStoreError> {
        let row = sqlx::query("SELECT * FROM documents WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;
        row.as_ref().map(document_from_row).transpose()
    }

    async fn list(&self, owner: UserId, page: Page) -> Result<Vec<DocumentRecord>, RecordStoreError> {
        let (skip, limit) = page_bounds(page);
        let rows = sqlx::query(
            r#"
            SELECT * FROM documents
            WHERE owner_id = $1
            ORDER BY created_at DESC, id DESC
            OFFSET $2 LIMIT $3
            "#,
        )
        .bind(owner.as_uuid())
        .bind(skip)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        rows.iter().map(document_from_row).collect()
    }

    #[instrument(skip(self), fields(document_id = %id))]
    async fn delete(&self, id: DocumentId) -> Result<bool, RecordStoreError> {
        let result = sqlx::query("DELETE FROM documents WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl AnalysisStore for PostgresRecordStore {
    #[instrument(skip(self, analysis), fields(analysis_id = %analysis.id))]
    async fn create(&self, analysis: AnalysisRecord) -> Result<(), RecordStoreError> {
        sqlx::query(
            r#"
            INSERT INTO analyses (id, document_id, user_id, job_id, query, summary, metrics, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(analysis.id.as_uuid())
        .bind(analysis.document_id.as_uuid())
        .bind(analysis.user_id.as_uuid())
        .bind(analysis.job_id.map(Uuid::from))
        .bind(&analysis.query)
        .bind(&analysis.summary)
        .bind(&analysis.metrics)
        .bind(analysis.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn get(&self, id: AnalysisId) -> Result<Option<AnalysisRecord>, RecordStoreError> {
        let row = sqlx::query("SELECT * FROM analyses WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;
        row.as_ref().map(analysis_from_row).transpose()
    }

    async fn list(
        &self,
        owner: UserId,
        document: Option<DocumentId>,
        page: Page,
    ) -> Result<Vec<AnalysisRecord>, RecordStoreError> {
        let (skip, limit) = page_bounds(page);
        let rows = sqlx::query(
            r#"
            SELECT * FROM analyses
            WHERE user_id = $1 AND ($2::uuid IS NULL OR document_id = $2)
            ORDER BY created_at DESC, id DESC
            OFFSET $3 LIMIT $4
            "#,
        )
        .bind(owner.as_uuid())
        .bind(document.map(Uuid::from))
        .bind(skip)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        rows.iter().map(analysis_from_row).collect()
    }
}

#[async_trait]
impl AuditSink for PostgresRecordStore {
    async fn record(&self, entry: AuditRecord) -> Result<(), RecordStoreError> {
        sqlx::query(
            r#"
            INSERT INTO audit_logs (path, method, user_id, status, extra, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&entry.path)
        .bind(&entry.method)
        .bind(entry.user.map(Uuid::from))
        .bind(i32::from(entry.status))
        .bind(&entry.extra)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }
}
