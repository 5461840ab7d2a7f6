//! `docflow-core`: shared domain building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, the domain error model, and small value objects used by every
//! other crate in the workspace.

pub mod entity;
pub mod error;
pub mod id;
pub mod page;
pub mod value_object;

pub use entity::{Entity, Owned};
pub use error::{DomainError, DomainResult};
pub use id::{AnalysisId, DocumentId, JobId, UserId};
pub use page::Page;
pub use value_object::ValueObject;
