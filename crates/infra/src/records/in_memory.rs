//! In-memory record stores for tests/dev.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use docflow_core::{AnalysisId, DocumentId, Entity, Owned, Page, UserId};

use super::{
    AnalysisRecord, AnalysisStore, AuditRecord, AuditSink, DocumentRecord, DocumentStore, RecordStoreError,
};

/// Owner-scoped records keyed by their (time-ordered) id.
#[derive(Debug)]
pub struct InMemoryRecords<T: Entity> {
    rows: RwLock<BTreeMap<T::Id, T>>,
}

impl<T> InMemoryRecords<T>
where
    T: Owned + Clone + Send + Sync,
    T::Id: Ord + Send + Sync,
{
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(BTreeMap::new()),
        }
    }

    async fn insert(&self, row: T) -> Result<(), RecordStoreError> {
        let mut rows = self.rows.write().await;
        let id = row.id();
        if rows.contains_key(&id) {
            return Err(RecordStoreError::AlreadyExists(format!("{id:?}")));
        }
        rows.insert(id, row);
        Ok(())
    }

    async fn find(&self, id: T::Id) -> Option<T> {
        self.rows.read().await.get(&id).cloned()
    }

    async fn newest_first(&self, owner: UserId, page: Page, keep: impl Fn(&T) -> bool) -> Vec<T> {
        let rows = self.rows.read().await;
        page.apply(rows.values().rev().filter(|r| r.is_owned_by(owner) && keep(*r)).cloned())
    }
}

impl<T> Default for InMemoryRecords<T>
where
    T: Owned + Clone + Send + Sync,
    T::Id: Ord + Send + Sync,
{
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for InMemoryRecords<DocumentRecord> {
    async fn create(&self, doc: DocumentRecord) -> Result<(), RecordStoreError> {
        self.insert(doc).await
    }

    async fn get(&self, id: DocumentId) -> Result<Option<DocumentRecord>, RecordStoreError> {
        Ok(self.find(id).await)
    }

    async fn list(&self, owner: UserId, page: Page) -> Result<Vec<DocumentRecord>, RecordStoreError> {
        Ok(self.newest_first(owner, page, |_| true).await)
    }

    async fn delete(&self, id: DocumentId) -> Result<bool, RecordStoreError> {
        Ok(self.rows.write().await.remove(&id).is_some())
    }
}

#[async_trait]
impl AnalysisStore for InMemoryRecords<AnalysisRecord> {
    async fn create(&self, analysis: AnalysisRecord) -> Result<(), RecordStoreError> {
        self.insert(analysis).await
    }

    async fn get(&self, id: AnalysisId) -> Result<Option<AnalysisRecord>, RecordStoreError> {
        Ok(self.find(id).await)
    }

    async fn list(
        &self,
        owner: UserId,
        document: Option<DocumentId>,
        page: Page,
    ) -> Result<Vec<AnalysisRecord>, RecordStoreError> {
        Ok(self
            .newest_first(owner, page, |a| document.is_none_or(|d| a.document_id == d))
            .await)
    }
}

/// Append-only audit log kept in memory.
#[derive(Debug, Default)]
pub struct InMemoryAuditLog {
    entries: RwLock<Vec<AuditRecord>>,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entries(&self) -> Vec<AuditRecord> {
        self.entries.read().await.clone()
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditLog {
    async fn record(&self, entry: AuditRecord) -> Result<(), RecordStoreError> {
        self.entries.write().await.push(entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use docflow_core::JobId;
    use serde_json::json;

    fn doc(owner: UserId, name: &str) -> DocumentRecord {
        DocumentRecord {
            id: DocumentId::new(),
            filename: name.to_string(),
            path: format!("data/{name}").into(),
            size: 10,
            mime: Some("application/pdf".into()),
            owner_id: owner,
            created_at: Utc::now(),
        }
    }

    fn analysis(owner: UserId, document_id: DocumentId) -> AnalysisRecord {
        AnalysisRecord {
            id: AnalysisId::new(),
            document_id,
            user_id: owner,
            job_id: Some(JobId::new()),
            query: "q".into(),
            summary: "s".into(),
            metrics: json!({}),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn documents_list_newest_first_per_owner() {
        let store = InMemoryRecords::<DocumentRecord>::new();
        let (alice, bob) = (UserId::new(), UserId::new());
        let first = doc(alice, "a.pdf");
        let second = doc(alice, "b.pdf");
        store.create(first.clone()).await.unwrap();
        store.create(doc(bob, "c.pdf")).await.unwrap();
        store.create(second.clone()).await.unwrap();

        let listed = store.list(alice, Page::default()).await.unwrap();
        assert_eq!(listed, vec![second, first]);
    }

    #[tokio::test]
    async fn paging_windows_the_listing() {
        let store = InMemoryRecords::<DocumentRecord>::new();
        let owner = UserId::new();
        for i in 0..5 {
            store.create(doc(owner, &format!("{i}.pdf"))).await.unwrap();
        }
        let page = store.list(owner, Page::new(1, 2)).await.unwrap();
        let names: Vec<_> = page.iter().map(|d| d.filename.as_str()).collect();
        assert_eq!(names, vec!["3.pdf", "2.pdf"]);
    }

    #[tokio::test]
    async fn delete_reports_whether_anything_went() {
        let store = InMemoryRecords::<DocumentRecord>::new();
        let d = doc(UserId::new(), "x.pdf");
        let id = d.id;
        store.create(d).await.unwrap();
        assert!(store.delete(id).await.unwrap());
        assert!(!store.delete(id).await.unwrap());
        assert!(store.get(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn analyses_filter_by_document() {
        let store = InMemoryRecords::<AnalysisRecord>::new();
        let owner = UserId::new();
        let (d1, d2) = (DocumentId::new(), DocumentId::new());
        let keep = analysis(owner, d1);
        store.create(keep.clone()).await.unwrap();
        store.create(analysis(owner, d2)).await.unwrap();

        let only_d1 = store.list(owner, Some(d1), Page::default()).await.unwrap();
        assert_eq!(only_d1, vec![keep]);
        assert_eq!(store.list(owner, None, Page::default()).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn audit_log_appends() {
        let log = InMemoryAuditLog::new();
        log.record(AuditRecord::new("POST", "/v1/documents/analyze", None, 202))
            .await
            .unwrap();
        assert_eq!(log.entries().await.len(), 1);
    }
}
