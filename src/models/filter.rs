use crate::models::job::JobState;

/// Inclusive range of unix timestamps; open ends are unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeRange {
    pub from: Option<i64>,
    pub to: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub states: Vec<JobState>,
    pub cluster: Option<String>,
    pub user: Option<String>,
    pub job_id: Option<i64>,
    pub start_time: Option<TimeRange>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub items_per_page: i64,
    /// 1-based.
    pub page: i64,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            items_per_page: 25,
            page: 1,
        }
    }
}

impl PageRequest {
    /// `None` when the offset does not fit an `i64`.
    pub fn checked_offset(&self) -> Option<i64> {
        (self.page.max(1) - 1).checked_mul(self.items_per_page.max(0))
    }

    pub fn offset(&self) -> i64 {
        (self.page.max(1) - 1).saturating_mul(self.items_per_page.max(0))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderField {
    StartTime,
    Duration,
    NumNodes,
}

impl OrderField {
    pub fn column(&self) -> &'static str {
        match self {
            OrderField::StartTime => "start_time",
            OrderField::Duration => "duration",
            OrderField::NumNodes => "num_nodes",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderBy {
    pub field: OrderField,
    pub direction: SortDirection,
}

impl Default for OrderBy {
    fn default() -> Self {
        Self {
            field: OrderField::StartTime,
            direction: SortDirection::Desc,
        }
    }
}

impl OrderBy {
    pub fn to_sql(&self) -> String {
        let direction = match self.direction {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        };
        format!("{} {}", self.field.column(), direction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_offset() {
        assert_eq!(PageRequest::default().offset(), 0);
        let page = PageRequest {
            items_per_page: 10,
            page: 3,
        };
        assert_eq!(page.offset(), 20);
        let page = PageRequest {
            items_per_page: 10,
            page: 0,
        };
        assert_eq!(page.offset(), 0);
    }

    #[test]
    fn test_page_offset_overflow() {
        let page = PageRequest {
            items_per_page: 1_000_000_000_000,
            page: 1_000_000_000_000,
        };
        assert_eq!(page.checked_offset(), None);
        assert_eq!(page.offset(), i64::MAX);

        let page = PageRequest {
            items_per_page: 10,
            page: 3,
        };
        assert_eq!(page.checked_offset(), Some(20));
    }

    #[test]
    fn test_default_order_is_newest_first() {
        assert_eq!(OrderBy::default().to_sql(), "start_time DESC");
    }
}
