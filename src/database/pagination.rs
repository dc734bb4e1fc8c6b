use serde::{Deserialize, Serialize};

use crate::{
    constants::{MAX_PAGE_SIZE, RECIPE_COUNT_PER_PAGE},
    error::ValidationError,
};

/// `?page=N&limit=M` as sent by the client. Pages start at 1.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageQuery {
    pub page: i64,
    pub limit: i64,
}

impl Default for PageQuery {
    fn default() -> Self {
        Self {
            page: 1,
            limit: RECIPE_COUNT_PER_PAGE,
        }
    }
}

impl PageQuery {
    pub fn new(page: i64, limit: i64) -> Self {
        Self {
            page: page.max(1),
            limit: limit.clamp(1, MAX_PAGE_SIZE),
        }
    }

    pub fn from_params(
        page: Option<&str>,
        limit: Option<&str>,
        default_limit: i64,
    ) -> Result<Self, ValidationError> {
        let raw_page = page;
        let page = parse_positive("page", page)?.unwrap_or(1);
        let limit = parse_positive("limit", limit)?.unwrap_or(default_limit);
        let query = Self::new(page, limit);

        if (query.page - 1).checked_mul(query.limit).is_none() {
            return Err(ValidationError::InvalidPage {
                field: "page",
                value: raw_page.unwrap_or_default().trim().to_string(),
            });
        }
        Ok(query)
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.limit)
    }
}

fn parse_positive(field: &'static str, value: Option<&str>) -> Result<Option<i64>, ValidationError> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(v) => match v.parse::<i64>() {
            Ok(n) if n >= 1 => Ok(Some(n)),
            _ => Err(ValidationError::InvalidPage {
                field,
                value: v.to_string(),
            }),
        },
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct PageContext<T> {
    pub rows: Vec<T>,
    pub total_rows: i64,
    pub page: i64,
    pub page_count: i64,
    pub next_page: Option<i64>,
    pub prev_page: Option<i64>,
    pub page_list: Vec<(String, i64)>,
    pub message: Option<String>,
}

impl<T> PageContext<T> {
    pub fn from_rows(rows: Vec<T>, total_rows: i64, query: PageQuery) -> Self {
        if rows.len() <= 0 {
            return Self::no_rows();
        }
        let page_size = query.limit;
        let page_count = (total_rows + page_size - 1) / page_size;
        let page = query.page.min(page_count.max(1));

        let next_page = if page < page_count { Some(page + 1) } else { None };
        let prev_page = if page > 1 { Some(page - 1) } else { None };

        let page_list = (1..=page_count)
            .map(|n| {
                let label = if n == page {
                    String::from("...")
                } else {
                    format!("{n}")
                };

                (label, n)
            })
            .collect();

        let first = query.offset().saturating_add(1);
        Self {
            rows,
            total_rows,
            page,
            page_count,
            next_page,
            prev_page,
            page_list,
            message: Some(format!(
                "{} - {} / {}",
                first,
                query.offset().saturating_add(page_size).min(total_rows),
                total_rows
            )),
        }
    }

    pub fn no_rows() -> Self {
        Self {
            rows: vec![],
            total_rows: 0,
            page: 1,
            page_count: 0,
            next_page: None,
            prev_page: None,
            page_list: vec![(String::from("1"), 1)],
            message: Some(String::from("No results")),
        }
    }

    pub fn map<U, F: FnMut(T) -> U>(self, f: F) -> PageContext<U> {
        PageContext {
            rows: self.rows.into_iter().map(f).collect(),
            total_rows: self.total_rows,
            page: self.page,
            page_count: self.page_count,
            next_page: self.next_page,
            prev_page: self.prev_page,
            page_list: self.page_list,
            message: self.message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_defaults_and_bounds() {
        let query = PageQuery::from_params(None, None, 6).unwrap();
        assert_eq!(query, PageQuery { page: 1, limit: 6 });
        assert_eq!(query.offset(), 0);

        let query = PageQuery::from_params(Some("3"), Some("1000"), 6).unwrap();
        assert_eq!(query, PageQuery { page: 3, limit: 100 });
        assert_eq!(query.offset(), 200);

        assert_eq!(
            PageQuery::from_params(Some("0"), None, 6),
            Err(ValidationError::InvalidPage {
                field: "page",
                value: "0".to_string()
            })
        );
        assert!(PageQuery::from_params(None, Some("abc"), 6).is_err());
    }

    #[test]
    fn huge_page_is_rejected() {
        assert_eq!(
            PageQuery::from_params(Some("9223372036854775807"), None, 6),
            Err(ValidationError::InvalidPage {
                field: "page",
                value: "9223372036854775807".to_string()
            })
        );

        let last = i64::MAX / 6 + 1;
        let query = PageQuery::from_params(Some(&last.to_string()), None, 6).unwrap();
        assert_eq!(query.offset(), (last - 1) * 6);
        assert!(PageQuery::from_params(Some(&(last + 1).to_string()), None, 6).is_err());

        assert_eq!(PageQuery::new(i64::MAX, 100).offset(), i64::MAX);
    }

    #[test]
    fn middle_page_links_both_ways() {
        let page = PageContext::from_rows(vec![1, 2, 3, 4, 5, 6], 14, PageQuery::new(2, 6));

        assert_eq!(page.page_count, 3);
        assert_eq!(page.prev_page, Some(1));
        assert_eq!(page.next_page, Some(3));
        assert_eq!(
            page.page_list,
            vec![
                ("1".to_string(), 1),
                ("...".to_string(), 2),
                ("3".to_string(), 3)
            ]
        );
        assert_eq!(page.message.as_deref(), Some("7 - 12 / 14"));
    }

    #[test]
    fn last_page_has_no_next() {
        let page = PageContext::from_rows(vec![13, 14], 14, PageQuery::new(3, 6));

        assert_eq!(page.next_page, None);
        assert_eq!(page.prev_page, Some(2));
        assert_eq!(page.message.as_deref(), Some("13 - 14 / 14"));
    }

    #[test]
    fn empty_rows() {
        let page: PageContext<i32> = PageContext::from_rows(vec![], 0, PageQuery::default());

        assert_eq!(page.total_rows, 0);
        assert_eq!(page.next_page, None);
        assert_eq!(page.message.as_deref(), Some("No results"));
    }
}
