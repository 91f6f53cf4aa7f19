use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_LIMIT: u32 = 20;
pub const MAX_LIMIT: u32 = 250;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// List query parameters. Timestamps are milliseconds since the epoch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryFilter {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub created_after: Option<i64>,
    pub created_before: Option<i64>,
    pub updated_after: Option<i64>,
    pub updated_before: Option<i64>,
    pub sort_by: Option<SortOrder>,
    /// Only honored on admin audit paths.
    #[serde(default)]
    pub include_archived: bool,
}

impl QueryFilter {
    /// Page number, with 0 and absent treated as 1.
    pub fn page(&self) -> u32 {
        self.page.unwrap_or(1).max(1)
    }

    /// Page size: 0 and absent mean the default, anything above the ceiling
    /// is clamped.
    pub fn limit(&self) -> u32 {
        match self.limit {
            None | Some(0) => DEFAULT_LIMIT,
            Some(l) => l.min(MAX_LIMIT),
        }
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page() - 1) * u64::from(self.limit())
    }

    pub fn sort(&self) -> SortOrder {
        self.sort_by.unwrap_or_default()
    }

    pub fn created_range(&self) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
        (
            self.created_after.and_then(DateTime::from_timestamp_millis),
            self.created_before.and_then(DateTime::from_timestamp_millis),
        )
    }

    pub fn updated_range(&self) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
        (
            self.updated_after.and_then(DateTime::from_timestamp_millis),
            self.updated_before.and_then(DateTime::from_timestamp_millis),
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub filtered_count: u64,
    pub total_count: u64,
}

/// One page of a list result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListPage<T> {
    pub data: Vec<T>,
    pub pagination: Pagination,
}

impl<T> ListPage<T> {
    pub fn empty(filter: &QueryFilter) -> Self {
        Self {
            data: Vec::new(),
            pagination: Pagination {
                page: filter.page(),
                limit: filter.limit(),
                filtered_count: 0,
                total_count: 0,
            },
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> ListPage<U> {
        ListPage {
            data: self.data.into_iter().map(f).collect(),
            pagination: self.pagination,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_and_clamping() {
        let f = QueryFilter::default();
        assert_eq!(f.page(), 1);
        assert_eq!(f.limit(), DEFAULT_LIMIT);

        let f = QueryFilter { page: Some(0), limit: Some(0), ..Default::default() };
        assert_eq!(f.page(), 1);
        assert_eq!(f.limit(), 20);

        let f = QueryFilter { limit: Some(1000), ..Default::default() };
        assert_eq!(f.limit(), 250);
    }

    #[test]
    fn offset_follows_page_and_limit() {
        let f = QueryFilter { page: Some(3), limit: Some(10), ..Default::default() };
        assert_eq!(f.offset(), 20);
    }

    #[test]
    fn parses_sort_order() {
        let f: QueryFilter = serde_json::from_str(r#"{"sort_by":"desc"}"#).unwrap();
        assert_eq!(f.sort(), SortOrder::Desc);
    }

    #[test]
    fn empty_page_reports_requested_bounds() {
        let f = QueryFilter { page: Some(2), limit: Some(5), ..Default::default() };
        let page: ListPage<u32> = ListPage::empty(&f);
        assert!(page.data.is_empty());
        assert_eq!(page.pagination.page, 2);
        assert_eq!(page.pagination.limit, 5);
    }
}
