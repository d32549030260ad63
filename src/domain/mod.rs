//! Marketplace domain: records, derived figures and lifecycle rules.
//!
//! Nothing in this module performs I/O. Derived numbers (CO2 equivalents,
//! token counts, revenue splits, footprint totals) are computed by explicit
//! functions that the application layer calls before persisting a record.

pub mod compensation;
pub mod footprint;
pub mod production;
pub mod profile;
pub mod split;
pub mod token;
pub mod transaction;
pub mod user;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DomainError {
    #[error("{0}")]
    Invalid(String),
    #[error("{entity} cannot move from '{from}' to '{to}'")]
    Transition {
        entity: &'static str,
        from: String,
        to: String,
    },
}

pub fn invalid(message: impl Into<String>) -> DomainError {
    DomainError::Invalid(message.into())
}

pub const DEFAULT_PAGE_LIMIT: u32 = 20;
pub const MAX_PAGE_LIMIT: u32 = 100;

/// 1-based page selection shared by every paginated listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub limit: u32,
}

impl PageRequest {
    pub fn new(page: Option<u32>, limit: Option<u32>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            limit: limit
                .unwrap_or(DEFAULT_PAGE_LIMIT)
                .clamp(1, MAX_PAGE_LIMIT),
        }
    }

    pub fn offset(&self) -> u64 {
        (self.page as u64 - 1) * self.limit as u64
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(None, None)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paged<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    pub total_pages: u64,
}

impl<T> Paged<T> {
    pub fn new(items: Vec<T>, total: u64, request: PageRequest) -> Self {
        let limit = request.limit as u64;
        Self {
            items,
            page: request.page,
            limit: request.limit,
            total,
            total_pages: total.div_ceil(limit),
        }
    }

    /// Cuts one page out of an already filtered and ordered result set.
    pub fn from_all(all: Vec<T>, request: PageRequest) -> Self {
        let total = all.len() as u64;
        let items = all
            .into_iter()
            .skip(request.offset() as usize)
            .take(request.limit as usize)
            .collect();
        Self::new(items, total, request)
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Paged<U> {
        Paged {
            items: self.items.into_iter().map(f).collect(),
            page: self.page,
            limit: self.limit,
            total: self.total,
            total_pages: self.total_pages,
        }
    }
}

/// Rounds to six decimals, the precision tCANE amounts carry on the ledger.
pub fn round6(value: f64) -> f64 {
    (value * 1_000_000.0).round() / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_request_clamps_limit_and_page() {
        let req = PageRequest::new(Some(0), Some(1_000));
        assert_eq!(req.page, 1);
        assert_eq!(req.limit, MAX_PAGE_LIMIT);
        assert_eq!(PageRequest::default().limit, DEFAULT_PAGE_LIMIT);
    }

    #[test]
    fn from_all_slices_the_requested_page() {
        let paged = Paged::from_all((1..=45).collect::<Vec<_>>(), PageRequest::new(Some(3), Some(20)));
        assert_eq!(paged.items, vec![41, 42, 43, 44, 45]);
        assert_eq!(paged.total, 45);
        assert_eq!(paged.total_pages, 3);
    }
}
