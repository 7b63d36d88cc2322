//! Paging

use serde::{Deserialize, Serialize};

/// Default page size
pub const DEFAULT_PAGE_SIZE: u64 = 20;

/// Zero-based page request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    /// Page number, starting at 0
    pub page: u64,
    /// Items per page
    pub size: u64,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: 0,
            size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl Pagination {
    /// Page `page` of `size` items
    pub fn new(page: u64, size: u64) -> Self {
        Self { page, size }
    }

    /// Offset of the first item
    pub fn offset(&self) -> u64 {
        self.page.saturating_mul(self.size)
    }
}

/// One page of results with the total count
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    /// Items on this page
    pub items: Vec<T>,
    /// Page number
    pub page: u64,
    /// Requested page size
    pub size: u64,
    /// Total matching items across all pages
    pub total_count: u64,
}

impl<T> Page<T> {
    /// Build a page for a request
    pub fn new(items: Vec<T>, pagination: Pagination, total_count: u64) -> Self {
        Self {
            items,
            page: pagination.page,
            size: pagination.size,
            total_count,
        }
    }

    /// Number of pages
    pub fn total_pages(&self) -> u64 {
        if self.size == 0 {
            return 0;
        }
        self.total_count.div_ceil(self.size)
    }

    /// Whether a later page exists
    pub fn has_next(&self) -> bool {
        self.page + 1 < self.total_pages()
    }

    /// Whether this page has no items
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Number of items on this page
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Transform the items, keeping the paging
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            page: self.page,
            size: self.size,
            total_count: self.total_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pagination_offset() {
        assert_eq!(Pagination::default().offset(), 0);
        assert_eq!(Pagination::new(3, 20).offset(), 60);
        assert_eq!(Pagination::new(u64::MAX, 20).offset(), u64::MAX);
    }

    #[test]
    fn test_page_counts() {
        let page = Page::new(vec![1, 2], Pagination::new(0, 2), 5);
        assert_eq!(page.total_pages(), 3);
        assert!(page.has_next());

        let last = Page::new(vec![5], Pagination::new(2, 2), 5);
        assert!(!last.has_next());

        let empty: Page<u8> = Page::new(vec![], Pagination::new(0, 0), 0);
        assert_eq!(empty.total_pages(), 0);
        assert!(empty.is_empty());
    }

    #[test]
    fn test_map() {
        let page = Page::new(vec![1, 2], Pagination::new(1, 2), 4).map(|n| n * 10);
        assert_eq!(page.items, vec![10, 20]);
        assert_eq!(page.page, 1);
        assert_eq!(page.total_count, 4);
    }
}
