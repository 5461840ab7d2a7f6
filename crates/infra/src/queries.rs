//! Owner-scoped reads (and deletes) over document and analysis records.
//!
//! Lists go through the short TTL class, single records through the long one.
//! Records owned by someone else read as not found.

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use docflow_core::{AnalysisId, DocumentId, Owned, Page, UserId};

use crate::best_effort::best_effort;
use crate::cache::{keys, CacheLayer, TtlClass};
use crate::intake::DocumentIntake;
use crate::records::{AnalysisRecord, AnalysisStore, DocumentRecord, DocumentStore, RecordStoreError};

#[derive(Debug, Clone, Error)]
pub enum QueryError {
    #[error("{kind} not found")]
    NotFound { kind: &'static str },

    #[error(transparent)]
    Store(#[from] RecordStoreError),
}

#[derive(Clone)]
pub struct RecordQueries {
    documents: Arc<dyn DocumentStore>,
    analyses: Arc<dyn AnalysisStore>,
    intake: Arc<dyn DocumentIntake>,
    cache: CacheLayer,
}

impl RecordQueries {
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        analyses: Arc<dyn AnalysisStore>,
        intake: Arc<dyn DocumentIntake>,
        cache: CacheLayer,
    ) -> Self {
        Self {
            documents,
            analyses,
            intake,
            cache,
        }
    }

    pub async fn list_documents(&self, owner: UserId, page: Page) -> Result<Vec<DocumentRecord>, QueryError> {
        let key = keys::documents_list(owner, page);
        let docs = self
            .cache
            .get_or_load(&key, TtlClass::Short, || async {
                self.documents.list(owner, page).await.map(Some)
            })
            .await?;
        Ok(docs.unwrap_or_default())
    }

    pub async fn get_document(&self, id: DocumentId, owner: UserId) -> Result<DocumentRecord, QueryError> {
        let doc = self
            .cache
            .get_or_load(&keys::document(id), TtlClass::Long, || self.documents.get(id))
            .await?;
        owned_by(doc, owner, "document")
    }

    /// Remove the record, its cache entries, and (best-effort) the stored blob.
    pub async fn delete_document(&self, id: DocumentId, owner: UserId) -> Result<(), QueryError> {
        let doc = owned_by(self.documents.get(id).await?, owner, "document")?;
        if !self.documents.delete(id).await? {
            return Err(QueryError::NotFound { kind: "document" });
        }
        self.cache.invalidate_pattern(&keys::documents_list_pattern(owner)).await;
        self.cache.invalidate_pattern(&keys::document(id)).await;
        best_effort("intake.discard", self.intake.discard(&doc.path)).await;
        info!(document_id = %id, "document deleted");
        Ok(())
    }

    pub async fn list_analyses(
        &self,
        owner: UserId,
        document: Option<DocumentId>,
        page: Page,
    ) -> Result<Vec<AnalysisRecord>, QueryError> {
        let key = keys::analyses_list(owner, document, page);
        let rows = self
            .cache
            .get_or_load(&key, TtlClass::Short, || async {
                self.analyses.list(owner, document, page).await.map(Some)
            })
            .await?;
        Ok(rows.unwrap_or_default())
    }

    pub async fn get_analysis(&self, id: AnalysisId, owner: UserId) -> Result<AnalysisRecord, QueryError> {
        let row = self
            .cache
            .get_or_load(&keys::analysis(id), TtlClass::Long, || self.analyses.get(id))
            .await?;
        owned_by(row, owner, "analysis")
    }
}

fn owned_by<T: Owned>(row: Option<T>, owner: UserId, kind: &'static str) -> Result<T, QueryError> {
    row.filter(|r| r.is_owned_by(owner)).ok_or(QueryError::NotFound { kind })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    use crate::config::{CacheConfig, IntakeConfig};
    use crate::intake::PdfIntake;
    use crate::records::InMemoryRecords;

    struct Fixture {
        dir: tempfile::TempDir,
        documents: Arc<InMemoryRecords<DocumentRecord>>,
        analyses: Arc<InMemoryRecords<AnalysisRecord>>,
        queries: RecordQueries,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let documents = Arc::new(InMemoryRecords::new());
        let analyses = Arc::new(InMemoryRecords::new());
        let intake = PdfIntake::new(IntakeConfig {
            upload_dir: dir.path().to_path_buf(),
            ..IntakeConfig::default()
        });
        let queries = RecordQueries::new(
            documents.clone(),
            analyses.clone(),
            Arc::new(intake),
            CacheLayer::in_memory(CacheConfig::default()),
        );
        Fixture {
            dir,
            documents,
            analyses,
            queries,
        }
    }

    async fn add_document(fx: &Fixture, owner: UserId) -> DocumentRecord {
        let id = DocumentId::new();
        let path = fx.dir.path().join(format!("{id}.pdf"));
        std::fs::write(&path, b"%PDF-1.5").unwrap();
        let doc = DocumentRecord {
            id,
            filename: "a.pdf".into(),
            path,
            size: 8,
            mime: Some("application/pdf".into()),
            owner_id: owner,
            created_at: Utc::now(),
        };
        DocumentStore::create(fx.documents.as_ref(), doc.clone()).await.unwrap();
        doc
    }

    #[tokio::test]
    async fn foreign_records_read_as_not_found() {
        let fx = fixture();
        let (alice, bob) = (UserId::new(), UserId::new());
        let doc = add_document(&fx, alice).await;

        assert_eq!(fx.queries.get_document(doc.id, alice).await.unwrap(), doc);
        assert!(matches!(
            fx.queries.get_document(doc.id, bob).await,
            Err(QueryError::NotFound { kind: "document" })
        ));
        assert!(matches!(
            fx.queries.delete_document(doc.id, bob).await,
            Err(QueryError::NotFound { .. })
        ));
        assert!(fx.queries.list_documents(bob, Page::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_invalidates_cached_listing_and_removes_blob() {
        let fx = fixture();
        let owner = UserId::new();
        let doc = add_document(&fx, owner).await;

        assert_eq!(fx.queries.list_documents(owner, Page::default()).await.unwrap().len(), 1);
        fx.queries.get_document(doc.id, owner).await.unwrap();

        fx.queries.delete_document(doc.id, owner).await.unwrap();
        assert!(fx.queries.list_documents(owner, Page::default()).await.unwrap().is_empty());
        assert!(matches!(
            fx.queries.get_document(doc.id, owner).await,
            Err(QueryError::NotFound { .. })
        ));
        assert!(!doc.path.exists());
    }

    #[tokio::test]
    async fn analyses_filter_by_document_and_owner() {
        let fx = fixture();
        let owner = UserId::new();
        let (a, b) = (add_document(&fx, owner).await, add_document(&fx, owner).await);
        for doc in [a.id, a.id, b.id] {
            let row = AnalysisRecord {
                id: AnalysisId::new(),
                document_id: doc,
                user_id: owner,
                job_id: None,
                query: "q".into(),
                summary: "s".into(),
                metrics: json!({}),
                created_at: Utc::now(),
            };
            AnalysisStore::create(fx.analyses.as_ref(), row).await.unwrap();
        }

        let all = fx.queries.list_analyses(owner, None, Page::default()).await.unwrap();
        assert_eq!(all.len(), 3);
        let only_a = fx.queries.list_analyses(owner, Some(a.id), Page::default()).await.unwrap();
        assert_eq!(only_a.len(), 2);
        assert!(fx.queries.get_analysis(all[0].id, owner).await.is_ok());
        assert!(fx.queries.get_analysis(all[0].id, UserId::new()).await.is_err());
    }
}
