//! Wire types for the warehouse API.

use crate::error::{ApiError, Result};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};

const DEFAULT_PAGE_SIZE: u32 = 10;
const MAX_PAGE_SIZE: u32 = 100;

/// Generic response wrapper used by every backend endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct ApiEnvelope<T> {
    #[serde(default = "default_success")]
    pub success: bool,
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub data: Option<T>,
    #[serde(default)]
    pub field_errors: Vec<FieldError>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

fn default_success() -> bool {
    true
}

impl<T> ApiEnvelope<T> {
    /// Unwrap `data`, turning `success: false` into [`ApiError::Rejected`].
    pub fn into_data(self, status: u16) -> Result<T> {
        if !self.success {
            return Err(ApiError::Rejected {
                status,
                code: self.error_code,
                message: self.message.unwrap_or_default(),
                field_errors: self.field_errors,
            });
        }
        self.data
            .ok_or_else(|| ApiError::InvalidResponse("response carries no data".to_string()))
    }
}

/// Validation failure for a single input field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    #[serde(alias = "defaultMessage")]
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warehouse {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub manager: Option<String>,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub updated_at: Option<DateTime<Utc>>,
}

fn default_active() -> bool {
    true
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(i64),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Text(text) => text,
        Id::Number(number) => number.to_string(),
    })
}

/// Accepts RFC 3339 or a zone-less `YYYY-MM-DDTHH:MM:SS`, read as UTC.
fn lenient_timestamp<'de, D>(deserializer: D) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(raw) = Option::<String>::deserialize(deserializer)? else {
        return Ok(None);
    };
    if let Ok(parsed) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(Some(parsed.with_timezone(&Utc)));
    }
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| Some(Utc.from_utc_datetime(&naive)))
        .map_err(serde::de::Error::custom)
}

/// Filters and paging for the warehouse list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarehouseQuery {
    /// Zero-based page index.
    pub page: u32,
    pub size: u32,
    pub search: Option<String>,
    pub is_active: Option<bool>,
}

impl Default for WarehouseQuery {
    fn default() -> Self {
        Self {
            page: 0,
            size: DEFAULT_PAGE_SIZE,
            search: None,
            is_active: None,
        }
    }
}

impl WarehouseQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, page: u32) -> Self {
        self.page = page;
        self
    }

    pub fn size(mut self, size: u32) -> Self {
        self.size = size;
        self
    }

    pub fn search(mut self, term: impl Into<String>) -> Self {
        self.search = Some(term.into());
        self
    }

    pub fn active(mut self, is_active: bool) -> Self {
        self.is_active = Some(is_active);
        self
    }

    /// Query parameters in the backend's naming. Page size is clamped to
    /// `1..=100` and blank search terms are omitted.
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("page", self.page.to_string()),
            ("size", self.size.clamp(1, MAX_PAGE_SIZE).to_string()),
        ];
        if let Some(search) = self.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            pairs.push(("search", search.to_string()));
        }
        if let Some(is_active) = self.is_active {
            pairs.push(("is_active", is_active.to_string()));
        }
        pairs
    }
}

/// One page of results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub size: u32,
}

impl<T> Page<T> {
    pub fn total_pages(&self) -> u64 {
        if self.size == 0 {
            return 0;
        }
        self.total.div_ceil(u64::from(self.size))
    }

    pub fn has_next(&self) -> bool {
        u64::from(self.page) + 1 < self.total_pages()
    }
}

/// List payloads come either paged or as a bare array.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum PageData<T> {
    Paged {
        #[serde(alias = "content", alias = "data")]
        items: Vec<T>,
        #[serde(default, alias = "total_elements", alias = "totalElements")]
        total: Option<u64>,
        #[serde(default)]
        page: Option<u32>,
        #[serde(default)]
        size: Option<u32>,
    },
    Items(Vec<T>),
}

impl<T> PageData<T> {
    pub(crate) fn into_page(self, query: &WarehouseQuery) -> Page<T> {
        match self {
            PageData::Paged {
                items,
                total,
                page,
                size,
            } => Page {
                total: total.unwrap_or(items.len() as u64),
                items,
                page: page.unwrap_or(query.page),
                size: size.unwrap_or(query.size),
            },
            PageData::Items(items) => Page {
                total: items.len() as u64,
                page: query.page,
                size: query.size,
                items,
            },
        }
    }
}
