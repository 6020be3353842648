//! Page and sort parameters from query strings, and the paged response shape.

use crate::client::Direction;
use crate::error::AppError;
use serde::Serialize;
use std::collections::HashMap;

pub const DEFAULT_PAGE_SIZE: u64 = 10;
pub const MAX_PAGE_SIZE: u64 = 100;

/// 1-indexed page and a page size clamped to `1..=MAX_PAGE_SIZE`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageParams {
    pub page: u64,
    pub page_size: u64,
}

impl Default for PageParams {
    fn default() -> Self {
        PageParams {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl PageParams {
    pub fn new(page: u64, page_size: u64) -> Self {
        PageParams {
            page: page.max(1),
            page_size: if page_size == 0 { DEFAULT_PAGE_SIZE } else { page_size.min(MAX_PAGE_SIZE) },
        }
    }

    /// Reads `page` and `pageSize` (also `page_size`). Missing values take defaults.
    pub fn from_query(params: &HashMap<String, String>) -> Result<Self, AppError> {
        let page = parse_u64(params, &["page"])?.unwrap_or(1);
        let size = parse_u64(params, &["pageSize", "page_size"])?.unwrap_or(DEFAULT_PAGE_SIZE);
        Ok(Self::new(page, size))
    }
}

fn parse_u64(params: &HashMap<String, String>, keys: &[&str]) -> Result<Option<u64>, AppError> {
    for k in keys {
        if let Some(raw) = params.get(*k).map(|s| s.trim()).filter(|s| !s.is_empty()) {
            return raw
                .parse::<u64>()
                .map(Some)
                .map_err(|_| AppError::BadRequest(format!("参数 {} 无效", k)));
        }
    }
    Ok(None)
}

/// Convert a single identifier from camelCase to snake_case ("createdAt" -> "created_at").
pub fn to_snake_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 4);
    for (i, c) in s.chars().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SortParams {
    pub column: String,
    pub direction: Direction,
}

impl SortParams {
    /// `sortBy` (camelCase accepted) restricted to `allowed`; `sortOrder` is `asc` or `desc`.
    pub fn from_query(
        params: &HashMap<String, String>,
        allowed: &[&str],
        default_column: &str,
        default_direction: Direction,
    ) -> Result<Self, AppError> {
        let column = match params.get("sortBy").or_else(|| params.get("sort_by")).map(|s| s.trim()) {
            None | Some("") => default_column.to_string(),
            Some(raw) => {
                let snake = to_snake_case(raw);
                if !allowed.contains(&snake.as_str()) {
                    return Err(AppError::BadRequest(format!("不支持的排序字段: {}", raw)));
                }
                snake
            }
        };
        let direction = match params
            .get("sortOrder")
            .or_else(|| params.get("sort_order"))
            .map(|s| s.trim().to_lowercase())
            .as_deref()
        {
            None | Some("") => default_direction,
            Some("asc") => Direction::Asc,
            Some("desc") => Direction::Desc,
            Some(other) => return Err(AppError::BadRequest(format!("不支持的排序方向: {}", other))),
        };
        Ok(SortParams { column, direction })
    }
}

/// Paged response: `{items, total, page, pageSize, totalPages}`.
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PageData<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub page_size: u64,
    pub total_pages: u64,
}

impl<T> PageData<T> {
    pub fn new(items: Vec<T>, total: u64, params: PageParams) -> Self {
        PageData {
            items,
            total,
            page: params.page,
            page_size: params.page_size,
            total_pages: total.div_ceil(params.page_size),
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> PageData<U> {
        PageData {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            page_size: self.page_size,
            total_pages: self.total_pages,
        }
    }
}
