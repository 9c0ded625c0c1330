/// Pagination and filtering parameters for the submission history.
use serde::Serialize;

use crate::model::Label;

pub const DEFAULT_PAGE: u32 = 1;
pub const DEFAULT_LIMIT: u32 = 10;
pub const MAX_LIMIT: u32 = 100;

/// A 1-based page request. Construction clamps `page >= 1` and
/// `1 <= limit <= MAX_LIMIT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    page: u32,
    limit: u32,
}

impl Pagination {
    pub fn new(page: u32, limit: u32) -> Self {
        Self {
            page: page.max(1),
            limit: limit.clamp(1, MAX_LIMIT),
        }
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.limit)
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE, DEFAULT_LIMIT)
    }
}

/// `all` or a single label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResultFilter {
    #[default]
    All,
    Only(Label),
}

impl ResultFilter {
    /// Parse a query value. Returns `None` for anything other than `all` or a
    /// known label.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "all" => Some(ResultFilter::All),
            other => other.parse::<Label>().ok().map(ResultFilter::Only),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubmissionFilters {
    pub result: ResultFilter,
    /// Case-insensitive substring matched against the action or guideline text.
    pub search: Option<String>,
    pub confidence_min: Option<f64>,
    pub confidence_max: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubmissionQuery {
    pub pagination: Pagination,
    pub filters: SubmissionFilters,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationMeta {
    pub page: u32,
    pub limit: u32,
    pub total_count: u64,
    pub total_pages: u64,
    pub has_next_page: bool,
    pub has_previous_page: bool,
}

impl PaginationMeta {
    pub fn new(pagination: Pagination, total_count: u64) -> Self {
        let page = pagination.page();
        let limit = pagination.limit();
        let total_pages = total_count.div_ceil(u64::from(limit));
        Self {
            page,
            limit,
            total_count,
            total_pages,
            has_next_page: u64::from(page) < total_pages,
            has_previous_page: page > 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub pagination: PaginationMeta,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_first_page_of_ten() {
        let p = Pagination::default();
        assert_eq!((p.page(), p.limit(), p.offset()), (1, 10, 0));
    }

    #[test]
    fn construction_clamps_out_of_range_values() {
        let p = Pagination::new(0, 0);
        assert_eq!((p.page(), p.limit()), (1, 1));
        assert_eq!(Pagination::new(3, 1_000).limit(), MAX_LIMIT);
        assert_eq!(Pagination::new(3, 20).offset(), 40);
    }

    #[test]
    fn default_page_over_twenty_five_rows() {
        let meta = PaginationMeta::new(Pagination::default(), 25);
        assert_eq!(
            meta,
            PaginationMeta {
                page: 1,
                limit: 10,
                total_count: 25,
                total_pages: 3,
                has_next_page: true,
                has_previous_page: false,
            }
        );
    }

    #[test]
    fn middle_page_has_both_neighbours() {
        let meta = PaginationMeta::new(Pagination::new(2, 5), 25);
        assert_eq!(meta.total_pages, 5);
        assert!(meta.has_next_page);
        assert!(meta.has_previous_page);
    }

    #[test]
    fn last_page_has_no_next() {
        let meta = PaginationMeta::new(Pagination::new(3, 10), 25);
        assert!(!meta.has_next_page);
        assert!(meta.has_previous_page);
    }

    #[test]
    fn zero_rows_means_zero_pages() {
        let meta = PaginationMeta::new(Pagination::default(), 0);
        assert_eq!(meta.total_pages, 0);
        assert!(!meta.has_next_page);
        assert!(!meta.has_previous_page);
    }

    #[test]
    fn result_filter_parsing() {
        assert_eq!(ResultFilter::parse("all"), Some(ResultFilter::All));
        assert_eq!(
            ResultFilter::parse("deviates"),
            Some(ResultFilter::Only(Label::Deviates))
        );
        assert_eq!(ResultFilter::parse("bogus"), None);
    }

    #[test]
    fn meta_serialises_camel_case() {
        let value = serde_json::to_value(PaginationMeta::new(Pagination::default(), 25)).unwrap();
        assert_eq!(value["totalCount"], 25);
        assert_eq!(value["totalPages"], 3);
        assert_eq!(value["hasNextPage"], true);
        assert_eq!(value["hasPreviousPage"], false);
    }
}
