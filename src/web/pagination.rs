use serde::{Deserialize, Serialize};

const MAX_PER_PAGE: u64 = 500;

/// One-based page request as received in the query string.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PageQuery {
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

impl PageQuery {
    pub fn resolve(&self, default_size: u64) -> Pagination {
        Pagination {
            page: self.page.unwrap_or(1),
            per_page: self.per_page.unwrap_or(default_size),
        }
        .check()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Pagination {
    pub page: u64,
    pub per_page: u64,
}

impl Default for Pagination {
    fn default() -> Self {
        Self { page: 1, per_page: 40 }
    }
}

impl Pagination {
    pub fn new(page: u64, per_page: u64) -> Self {
        Self { page, per_page }.check()
    }

    pub fn offset(&self) -> u64 {
        self.page.saturating_sub(1).saturating_mul(self.per_page)
    }

    pub fn limit(&self) -> u64 {
        self.per_page
    }

    pub fn check(&self) -> Self {
        Self {
            page: self.page.max(1),
            per_page: match self.per_page {
                0 => Self::default().per_page,
                size => size.min(MAX_PER_PAGE),
            },
        }
    }
}
