use std::path::PathBuf;

use crate::result::{AnalysisError, AnalysisOutput};

/// Input to a single analysis run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisRequest {
    /// Normalised user query (never empty).
    pub query: String,

    /// Location of the stored document blob.
    pub document_path: PathBuf,
}

impl AnalysisRequest {
    pub fn new(query: impl Into<String>, document_path: impl Into<PathBuf>) -> Self {
        Self {
            query: query.into(),
            document_path: document_path.into(),
        }
    }
}

/// Produces an analysis for a stored document.
///
/// Implementations may block and may be slow; they must not mutate job state.
pub trait Analyzer: Send + Sync + 'static {
    fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisOutput, AnalysisError>;
}

impl<F> Analyzer for F
where
    F: Fn(&AnalysisRequest) -> Result<AnalysisOutput, AnalysisError> + Send + Sync + 'static,
{
    fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisOutput, AnalysisError> {
        self(request)
    }
}
