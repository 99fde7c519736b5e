//! # Path Redaction
//!
//! Absolute paths in reports leak deployment layout and waste width in a chat
//! window. Registered literal prefixes are replaced by `..` before a path is
//! rendered.

use std::sync::RwLock;

/// Placeholder written in place of a filtered prefix
pub const FILTER_MARKER: &str = "..";

/// Ordered set of literal substrings to redact from paths
#[derive(Debug, Default)]
pub struct PathFilter {
    filters: RwLock<Vec<String>>,
}

impl PathFilter {
    pub fn new<I, S>(filters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let filter = Self::default();
        filter.set_filters(filters);
        filter
    }

    /// Replaces the registered filters
    pub fn set_filters<I, S>(&self, filters: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let normalized: Vec<String> = filters
            .into_iter()
            .map(|f| normalize_separators(&f.into()))
            .filter(|f| !f.is_empty())
            .collect();

        match self.filters.write() {
            Ok(mut guard) => *guard = normalized,
            Err(poisoned) => *poisoned.into_inner() = normalized,
        }
    }

    /// Appends a filter after the existing ones
    pub fn add_filter<S: Into<String>>(&self, filter: S) {
        let filter = normalize_separators(&filter.into());
        if filter.is_empty() {
            return;
        }
        match self.filters.write() {
            Ok(mut guard) => guard.push(filter),
            Err(poisoned) => poisoned.into_inner().push(filter),
        }
    }

    /// Currently registered filters, in application order
    pub fn filters(&self) -> Vec<String> {
        match self.filters.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Normalizes separators, then applies every filter in registration order
    pub fn filter(&self, path: &str) -> String {
        let mut path = normalize_separators(path);
        let filters = match self.filters.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        for filter in filters.iter() {
            path = path.replace(filter.as_str(), FILTER_MARKER);
        }
        path
    }
}

fn normalize_separators(path: &str) -> String {
    path.replace('\\', "/")
}
