//! Request/response DTOs and JSON mapping helpers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use docflow_core::{DocumentId, JobId, Page};
use docflow_infra::records::DocumentRecord;

/// `?skip=&limit=` on list endpoints.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct ListParams {
    pub skip: Option<u64>,
    pub limit: Option<u64>,
}

impl ListParams {
    pub fn page(&self) -> Page {
        Page::new(self.skip.unwrap_or(0), self.limit.unwrap_or(Page::DEFAULT_LIMIT))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisListParams {
    pub document_id: Option<String>,
    pub skip: Option<u64>,
    pub limit: Option<u64>,
}

impl AnalysisListParams {
    pub fn page(&self) -> Page {
        ListParams {
            skip: self.skip,
            limit: self.limit,
        }
        .page()
    }
}

/// Body of a `202 Accepted` upload response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeAccepted {
    pub status: &'static str,
    pub query: String,
    pub file_processed: String,
    pub document_id: DocumentId,
    pub job_id: JobId,
}

/// Document metadata as exposed to clients (storage path omitted).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentView {
    pub id: DocumentId,
    pub filename: String,
    pub size: u64,
    pub mime: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<DocumentRecord> for DocumentView {
    fn from(doc: DocumentRecord) -> Self {
        Self {
            id: doc.id,
            filename: doc.filename,
            size: doc.size,
            mime: doc.mime,
            created_at: doc.created_at,
        }
    }
}
