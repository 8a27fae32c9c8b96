//! Pagination types shared by every adapter.

use crate::{StoreError, StoreResult};
use serde::{Deserialize, Serialize};

/// A request for a page of results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    /// The page number (1-indexed).
    pub page: u64,
    /// The number of items per page. Zero yields an empty page.
    pub per_page: u64,
}

impl PageRequest {
    /// Creates a new page request.
    pub fn new(page: u64, per_page: u64) -> StoreResult<Self> {
        if page == 0 {
            return Err(StoreError::validation("page must be at least 1"));
        }
        Ok(Self { page, per_page })
    }

    /// Returns the offset for database queries.
    #[must_use]
    pub const fn offset(&self) -> u64 {
        (self.page.saturating_sub(1)).saturating_mul(self.per_page)
    }

    /// Returns the limit for database queries.
    #[must_use]
    pub const fn limit(&self) -> u64 {
        self.per_page
    }
}

/// Pagination parameters as they arrive from a request boundary.
///
/// Absence of either field means "no pagination".
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PageParams {
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

impl PageParams {
    /// Converts boundary parameters into an optional page request.
    pub fn into_request(self) -> StoreResult<Option<PageRequest>> {
        match (self.page, self.per_page) {
            (Some(page), Some(per_page)) => PageRequest::new(page, per_page).map(Some),
            _ => Ok(None),
        }
    }
}

/// The slice of rows a backend should return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    /// Every matching row.
    All,
    /// `limit` rows starting at `offset`. A zero limit means no rows.
    Slice { offset: u64, limit: u64 },
}

/// Metadata describing a page of results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageMetadata {
    /// The total number of items across all pages.
    pub total_elements: u64,
    /// The current page number (1-indexed).
    pub page: u64,
    /// The number of items per page.
    pub per_page: u64,
}

/// Derives the backend window and page metadata from a total count.
#[must_use]
pub fn paginate(total: u64, request: Option<PageRequest>) -> (Window, PageMetadata) {
    match request {
        None => (
            Window::All,
            PageMetadata {
                total_elements: total,
                page: 1,
                per_page: total,
            },
        ),
        Some(req) => (
            Window::Slice {
                offset: req.offset(),
                limit: req.limit(),
            },
            PageMetadata {
                total_elements: total,
                page: req.page,
                per_page: req.per_page,
            },
        ),
    }
}

/// A page of results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PagedResult<T> {
    /// Information about this page.
    pub metadata: PageMetadata,
    /// The items on this page.
    pub data: Vec<T>,
}

impl<T> PagedResult<T> {
    /// Creates a new page.
    #[must_use]
    pub const fn new(metadata: PageMetadata, data: Vec<T>) -> Self {
        Self { metadata, data }
    }

    /// Creates a page from a full, already ordered result set.
    ///
    /// Used by backends that cannot page on the server.
    #[must_use]
    pub fn from_all(items: Vec<T>, request: Option<PageRequest>) -> Self {
        let (window, metadata) = paginate(items.len() as u64, request);
        let data = match window {
            Window::All => items,
            Window::Slice { offset, limit } => items
                .into_iter()
                .skip(usize::try_from(offset).unwrap_or(usize::MAX))
                .take(usize::try_from(limit).unwrap_or(usize::MAX))
                .collect(),
        };
        Self { metadata, data }
    }

    /// Maps the page content to a different type.
    #[must_use]
    pub fn map<U, F: FnMut(T) -> U>(self, f: F) -> PagedResult<U> {
        PagedResult {
            metadata: self.metadata,
            data: self.data.into_iter().map(f).collect(),
        }
    }

    /// Returns true if the page is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the number of items on this page.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns the total number of elements across all pages.
    #[must_use]
    pub const fn total_elements(&self) -> u64 {
        self.metadata.total_elements
    }

    /// Returns the total number of pages.
    #[must_use]
    pub const fn total_pages(&self) -> u64 {
        if self.metadata.per_page == 0 {
            0
        } else {
            self.metadata.total_elements.div_ceil(self.metadata.per_page)
        }
    }

    /// Returns true if there is a next page.
    #[must_use]
    pub const fn has_next(&self) -> bool {
        self.metadata.page < self.total_pages()
    }

    /// Returns true if there is a previous page.
    #[must_use]
    pub const fn has_previous(&self) -> bool {
        self.metadata.page > 1
    }
}

impl<T> IntoIterator for PagedResult<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.data.into_iter()
    }
}
