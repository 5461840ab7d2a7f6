//! `docflow-analysis`
//!
//! **Responsibility:** the analysis boundary invoked by workers.
//!
//! This crate is storage-agnostic and synchronous:
//! - It reads a document from the path it is handed and returns a result.
//! - It never touches job state; callers (infra workers) own the lifecycle.
//! - Work here is CPU/IO bound, so async callers run it on a blocking thread.

pub mod analyzer;
pub mod financial;
pub mod pdf_text;
pub mod result;

pub use analyzer::{AnalysisRequest, Analyzer};
pub use financial::{FinancialAnalyzer, FinancialMetrics};
pub use pdf_text::{extract_text, PdfTextError};
pub use result::{AnalysisError, AnalysisOutput};
