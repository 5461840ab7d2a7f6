use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

/// Result of an analysis run, ready to be persisted as an analysis record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisOutput {
    /// Human-readable report (markdown).
    pub summary: String,

    /// Structured figures backing the summary (analyzer-specific shape).
    pub metrics: JsonValue,
}

impl AnalysisOutput {
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            metrics: JsonValue::Null,
        }
    }

    pub fn with_metrics(mut self, metrics: JsonValue) -> Self {
        self.metrics = metrics;
        self
    }
}

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("document unreadable: {0}")]
    Unreadable(String),

    #[error("analysis failed: {0}")]
    Failed(String),
}
