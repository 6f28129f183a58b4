//! Session history of test runs and forecasts
//!
//! Newest entries first. Ids are assigned from the history length at
//! insertion time, so they stay stable while the history grows.

mod export;

pub use export::{export_csv, export_json, CsvRow, ExportFormat};

use chrono::Local;
use serde::{Deserialize, Serialize};

pub const ITEMS_PER_PAGE: usize = 20;
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One history item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry<T> {
    pub id: String,
    pub timestamp: String,
    #[serde(flatten)]
    pub record: T,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct History<T> {
    entries: Vec<Entry<T>>,
}

impl<T> Default for History<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<T> History<T> {
    /// Prepend a record, returning its id
    pub fn add(&mut self, record: T) -> String {
        let id = (self.entries.len() + 1).to_string();
        self.entries.insert(
            0,
            Entry {
                id: id.clone(),
                timestamp: Local::now().format(TIMESTAMP_FORMAT).to_string(),
                record,
            },
        );
        id
    }

    pub fn entries(&self) -> &[Entry<T>] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// A run of the statistical test page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestRecord {
    pub test_name: String,
    pub filename: Option<String>,
    pub columns_used: Vec<String>,
    pub p_value: Option<f64>,
    pub stat_value: Option<f64>,
    pub interpretation: String,
    pub full_results: serde_json::Value,
}

/// One page of a list
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: usize,
    pub per_page: usize,
    pub total: usize,
    pub total_pages: usize,
    pub has_prev: bool,
    pub has_next: bool,
    pub prev_num: Option<usize>,
    pub next_num: Option<usize>,
}

/// Slice `items` into pages; the requested page is clamped into range
pub fn paginate<T: Clone>(items: &[T], page: usize, per_page: usize) -> Page<T> {
    let per_page = if per_page == 0 { ITEMS_PER_PAGE } else { per_page };
    let total = items.len();
    let total_pages = total.div_ceil(per_page).max(1);
    let page = page.clamp(1, total_pages);
    let start = (page - 1) * per_page;
    let end = (start + per_page).min(total);

    Page {
        items: items.get(start..end).map(<[T]>::to_vec).unwrap_or_default(),
        page,
        per_page,
        total,
        total_pages,
        has_prev: page > 1,
        has_next: page < total_pages,
        prev_num: (page > 1).then(|| page - 1),
        next_num: (page < total_pages).then(|| page + 1),
    }
}
