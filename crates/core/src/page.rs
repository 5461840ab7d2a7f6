//! Pagination window for list endpoints.

use serde::{Deserialize, Serialize};

use crate::value_object::ValueObject;

/// A `skip`/`limit` window over an ordered listing.
///
/// `limit` is clamped into `1..=Page::MAX_LIMIT` on construction so callers never
/// have to re-check it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    skip: u64,
    limit: u64,
}

impl ValueObject for Page {}

impl Page {
    pub const DEFAULT_LIMIT: u64 = 20;
    pub const MAX_LIMIT: u64 = 100;

    pub fn new(skip: u64, limit: u64) -> Self {
        Self {
            skip,
            limit: limit.clamp(1, Self::MAX_LIMIT),
        }
    }

    pub fn skip(&self) -> u64 {
        self.skip
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Apply the window to an already-ordered iterator.
    pub fn apply<T>(&self, items: impl IntoIterator<Item = T>) -> Vec<T> {
        items
            .into_iter()
            .skip(self.skip as usize)
            .take(self.limit as usize)
            .collect()
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(0, Self::DEFAULT_LIMIT)
    }
}
