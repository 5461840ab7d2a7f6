//! Cache key scheme. Every write path invalidates through the `*_pattern` helpers.

use docflow_core::{AnalysisId, DocumentId, JobId, Page, UserId};

pub fn documents_list(owner: UserId, page: Page) -> String {
    format!("docs:list:{owner}:{}:{}", page.skip(), page.limit())
}

pub fn documents_list_pattern(owner: UserId) -> String {
    format!("docs:list:{owner}:*")
}

pub fn document(id: DocumentId) -> String {
    format!("docs:get:{id}")
}

pub fn analyses_list(owner: UserId, document: Option<DocumentId>, page: Page) -> String {
    let doc = document.map(|d| d.to_string()).unwrap_or_default();
    format!("analyses:list:{owner}:{doc}:{}:{}", page.skip(), page.limit())
}

pub fn analyses_list_pattern(owner: UserId) -> String {
    format!("analyses:list:{owner}:*")
}

pub fn analysis(id: AnalysisId) -> String {
    format!("analyses:get:{id}")
}

pub fn job(id: JobId) -> String {
    format!("jobs:get:{id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::glob::matches;

    #[test]
    fn list_patterns_cover_every_page_and_filter() {
        let owner = UserId::new();
        let pattern = analyses_list_pattern(owner);
        assert!(matches(&pattern, &analyses_list(owner, None, Page::default())));
        assert!(matches(&pattern, &analyses_list(owner, Some(DocumentId::new()), Page::new(40, 20))));
        assert!(!matches(&pattern, &analyses_list(UserId::new(), None, Page::default())));
        assert!(matches(&documents_list_pattern(owner), &documents_list(owner, Page::new(3, 7))));
    }
}
