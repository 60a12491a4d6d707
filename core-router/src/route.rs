use crate::error::{Result, RouteError};
use serde::{Deserialize, Serialize};
use std::fmt;
use url::form_urlencoded;

/// An in-app location: an absolute path plus query parameters.
///
/// Routes never carry a scheme or host, so a route can't point outside the
/// application.
///
/// ```
/// use core_router::Route;
///
/// let route = Route::parse("/warehouses?page=2#top").unwrap();
/// assert_eq!(route.path(), "/warehouses");
/// assert_eq!(route.query_value("page"), Some("2"));
/// assert_eq!(route.to_string(), "/warehouses?page=2");
///
/// assert!(Route::parse("https://evil.example/login").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Route {
    path: String,
    query: Vec<(String, String)>,
}

impl Route {
    /// Route for `path`; a missing leading `/` is added.
    pub fn new(path: impl Into<String>) -> Self {
        let path = path.into();
        let path = if path.starts_with('/') {
            path
        } else {
            format!("/{}", path)
        };
        Self {
            path,
            query: Vec::new(),
        }
    }

    /// Parse a path with optional query and fragment. The fragment is dropped.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.contains("://") || raw.starts_with("//") || raw.contains('\\') {
            return Err(RouteError::External(raw.to_string()));
        }

        let without_fragment = raw.split('#').next().unwrap_or_default();
        let (path, query) = match without_fragment.split_once('?') {
            Some((path, query)) => (path, query),
            None => (without_fragment, ""),
        };

        if !path.starts_with('/') {
            return Err(RouteError::NotAbsolute(raw.to_string()));
        }

        Ok(Self {
            path: path.to_string(),
            query: form_urlencoded::parse(query.as_bytes())
                .map(|(key, value)| (key.into_owned(), value.into_owned()))
                .collect(),
        })
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        self.query.retain(|(existing, _)| *existing != key);
        self.query.push((key, value.into()));
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> &[(String, String)] {
        &self.query
    }

    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value.as_str())
    }

    /// Whether both routes point at the same path, ignoring the query.
    pub fn same_path(&self, other: &Route) -> bool {
        self.path.trim_end_matches('/') == other.path.trim_end_matches('/')
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)?;
        if !self.query.is_empty() {
            let query = form_urlencoded::Serializer::new(String::new())
                .extend_pairs(&self.query)
                .finish();
            write!(f, "?{}", query)?;
        }
        Ok(())
    }
}
