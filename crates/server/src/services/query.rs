//! Listing pipeline helpers: page window math, pagination metadata, sort
//! parsing, and LIKE-pattern escaping. Filters themselves are an enumerated
//! schema bound as SQL parameters in the route handlers; raw caller input is
//! never spliced into query text.

use serde::Serialize;

use crate::error::{AppError, Result};

pub const DEFAULT_PAGE: i64 = 1;
pub const DEFAULT_LIMIT: i64 = 10;

#[derive(Debug, Clone, Copy)]
pub struct PageParams {
    pub page: i64,
    pub limit: i64,
}

impl PageParams {
    pub fn new(page: Option<i64>, limit: Option<i64>) -> Result<Self> {
        let page = page.unwrap_or(DEFAULT_PAGE);
        let limit = limit.unwrap_or(DEFAULT_LIMIT);
        if page <= 0 {
            return Err(AppError::Validation(
                "page must be a positive integer".to_string(),
            ));
        }
        if limit <= 0 {
            return Err(AppError::Validation(
                "limit must be a positive integer".to_string(),
            ));
        }
        Ok(Self { page, limit })
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1) * self.limit
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageRef {
    pub page: i64,
    pub limit: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Pagination {
    pub next: Option<PageRef>,
    pub prev: Option<PageRef>,
}

pub fn total_pages(total: i64, limit: i64) -> i64 {
    (total + limit - 1) / limit
}

pub fn paginate(total: i64, params: &PageParams) -> Pagination {
    let next = (params.page * params.limit < total).then_some(PageRef {
        page: params.page + 1,
        limit: params.limit,
    });
    let prev = (params.page > 1).then_some(PageRef {
        page: params.page - 1,
        limit: params.limit,
    });
    Pagination { next, prev }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDir {
    Asc,
    Desc,
}

impl SortDir {
    pub fn sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// `sort=key` is ascending, `sort=-key` descending.
pub fn split_sort(raw: &str) -> (&str, SortDir) {
    match raw.strip_prefix('-') {
        Some(key) => (key, SortDir::Desc),
        None => (raw, SortDir::Asc),
    }
}

/// Lowercased `%needle%` with LIKE metacharacters escaped; pair with
/// `ESCAPE '\'` and a LOWER()ed column for case-insensitive substring match.
pub fn search_pattern(needle: &str) -> String {
    let mut pattern = String::with_capacity(needle.len() + 2);
    pattern.push('%');
    for c in needle.to_lowercase().chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply() {
        let p = PageParams::new(None, None).unwrap();
        assert_eq!((p.page, p.limit), (1, 10));
        assert_eq!(p.offset(), 0);
    }

    #[test]
    fn non_positive_page_or_limit_is_rejected() {
        assert!(PageParams::new(Some(0), None).is_err());
        assert!(PageParams::new(None, Some(0)).is_err());
        assert!(PageParams::new(None, Some(-3)).is_err());
    }

    #[test]
    fn window_math() {
        let p = PageParams::new(Some(3), Some(10)).unwrap();
        assert_eq!(p.offset(), 20);
        assert_eq!(total_pages(23, 10), 3);
        assert_eq!(total_pages(0, 10), 0);
        assert_eq!(total_pages(30, 10), 3);
    }

    #[test]
    fn pagination_refs_for_23_items() {
        let limit = Some(10);
        let first = paginate(23, &PageParams::new(Some(1), limit).unwrap());
        assert_eq!(first.next, Some(PageRef { page: 2, limit: 10 }));
        assert_eq!(first.prev, None);

        let last = paginate(23, &PageParams::new(Some(3), limit).unwrap());
        assert_eq!(last.next, None);
        assert_eq!(last.prev, Some(PageRef { page: 2, limit: 10 }));
    }

    #[test]
    fn sort_prefix_controls_direction() {
        assert_eq!(split_sort("createdAt"), ("createdAt", SortDir::Asc));
        assert_eq!(split_sort("-deadline"), ("deadline", SortDir::Desc));
    }

    #[test]
    fn search_pattern_escapes_and_lowercases() {
        assert_eq!(search_pattern("Robot"), "%robot%");
        assert_eq!(search_pattern("50%_done"), "%50\\%\\_done%");
    }
}
