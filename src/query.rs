//! # Stage: Query Service
//!
//! ## Responsibility
//! The read operations the dashboard exposes: list, count, and the four
//! grouped aggregations. Each one composes a [`ParticipantFilter`] with one
//! store read.
//!
//! ## Guarantees
//! - Read-only
//! - Pagination bounds are validated, never clamped
//! - A chart never filters on its own grouping dimension
//! - Unmatched filters yield empty results, not errors

use crate::error::{DashboardError, Result};
use crate::filter::{Dimension, ParticipantFilter};
use crate::models::{GroupCount, Participant};
use crate::store::Store;

// ---------------------------------------------------------------------------
// Pagination
// ---------------------------------------------------------------------------

pub const DEFAULT_LIMIT: u32 = 100;
pub const MAX_LIMIT: u32 = 500;
pub const DEFAULT_OFFSET: u64 = 0;

/// A validated `limit`/`offset` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    limit: u32,
    offset: u64,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            offset: DEFAULT_OFFSET,
        }
    }
}

impl Page {
    /// Validate raw values; `None` takes the default.
    ///
    /// # Errors
    /// [`DashboardError::Validation`] when `limit` is outside `1..=500` or
    /// `offset` is negative.
    pub fn new(limit: Option<i64>, offset: Option<i64>) -> Result<Self> {
        let limit = match limit {
            None => DEFAULT_LIMIT,
            Some(n) if n < 1 => {
                return Err(DashboardError::validation("limit", "must be greater than or equal to 1"))
            }
            Some(n) if n > i64::from(MAX_LIMIT) => {
                return Err(DashboardError::validation(
                    "limit",
                    format!("must be less than or equal to {MAX_LIMIT}"),
                ))
            }
            Some(n) => n as u32,
        };
        let offset = match offset {
            None => DEFAULT_OFFSET,
            Some(n) if n < 0 => {
                return Err(DashboardError::validation("offset", "must be greater than or equal to 0"))
            }
            Some(n) => n as u64,
        };
        Ok(Self { limit, offset })
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }
}

// ---------------------------------------------------------------------------
// QueryService
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct QueryService {
    store: Store,
}

impl QueryService {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Matching participants in insertion order, one page at a time.
    pub async fn list(&self, filter: &ParticipantFilter, page: Page) -> Result<Vec<Participant>> {
        self.store.list(filter.clone(), page.limit, page.offset).await
    }

    /// Total matching participants.
    pub async fn count(&self, filter: &ParticipantFilter) -> Result<u64> {
        self.store.count(filter.clone()).await
    }

    /// Per-value counts of `dim`, with any criterion on `dim` itself ignored.
    ///
    /// Age buckets come back in ascending numeric order; the other dimensions
    /// carry no ordering contract.
    pub async fn group_by(&self, dim: Dimension, filter: &ParticipantFilter) -> Result<Vec<GroupCount>> {
        self.store.group_counts(dim, filter.clone().without(dim)).await
    }

    pub async fn by_gender(&self, filter: &ParticipantFilter) -> Result<Vec<GroupCount>> {
        self.group_by(Dimension::Gender, filter).await
    }

    pub async fn by_state(&self, filter: &ParticipantFilter) -> Result<Vec<GroupCount>> {
        self.group_by(Dimension::State, filter).await
    }

    pub async fn by_age(&self, filter: &ParticipantFilter) -> Result<Vec<GroupCount>> {
        self.group_by(Dimension::Age, filter).await
    }

    pub async fn by_diagnosis(&self, filter: &ParticipantFilter) -> Result<Vec<GroupCount>> {
        self.group_by(Dimension::Diagnosis, filter).await
    }
}
