//! Tabular datasets
//!
//! A small column store for uploaded CSV/Excel files and fetched quotes.
//! Cells are kept as raw strings; numeric views are coerced on demand the
//! way `pandas.to_numeric(errors="coerce")` would.

mod dates;
mod filename;
mod loader;

pub use dates::parse_datetime;
pub use filename::secure_filename;
pub use loader::{load_bytes, load_path, LoadedFile};

use crate::types::PriceBar;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;

/// Tokens read as missing values
pub const NA_TOKENS: &[&str] = &[
    "", "#N/A", "#N/A N/A", "#NA", "-1.#IND", "-1.#QNAN", "-NaN", "-nan", "1.#IND", "1.#QNAN",
    "<NA>", "N/A", "NA", "NULL", "NaN", "None", "n/a", "nan", "null",
];

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("File not found: {0}")]
    NotFound(String),
    #[error("{0}")]
    Empty(String),
    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),
    #[error("Could not read file: {0}")]
    Parse(String),
    #[error("Column not found: {0}")]
    MissingColumn(String),
    #[error("{0}")]
    NoData(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Inferred column type, named after the pandas dtypes clients expect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DType {
    #[serde(rename = "int64")]
    Int64,
    #[serde(rename = "float64")]
    Float64,
    #[serde(rename = "bool")]
    Bool,
    #[serde(rename = "object")]
    Object,
}

impl DType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DType::Int64 => "int64",
            DType::Float64 => "float64",
            DType::Bool => "bool",
            DType::Object => "object",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, DType::Int64 | DType::Float64)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub values: Vec<Option<String>>,
}

impl Column {
    pub fn new(name: impl Into<String>, values: Vec<Option<String>>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    pub fn from_f64(name: impl Into<String>, values: &[f64]) -> Self {
        Self::new(
            name,
            values
                .iter()
                .map(|v| v.is_finite().then(|| v.to_string()))
                .collect(),
        )
    }

    /// Coerce every cell to f64; unparseable and non-finite cells become None
    pub fn numeric(&self) -> Vec<Option<f64>> {
        self.values
            .iter()
            .map(|v| v.as_deref().and_then(parse_number))
            .collect()
    }

    pub fn dtype(&self) -> DType {
        let present: Vec<&str> = self.values.iter().flatten().map(|s| s.trim()).collect();
        if self.values.is_empty() {
            return DType::Object;
        }
        if present.is_empty() {
            return DType::Float64;
        }
        let has_missing = present.len() < self.values.len();
        if present.iter().all(|s| s.parse::<i64>().is_ok()) {
            return if has_missing { DType::Float64 } else { DType::Int64 };
        }
        if present.iter().all(|s| parse_number(s).is_some() || is_nan_literal(s)) {
            return DType::Float64;
        }
        if !has_missing && present.iter().all(|s| parse_bool(s).is_some()) {
            return DType::Bool;
        }
        DType::Object
    }
}

/// Column-oriented table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataFrame {
    columns: Vec<Column>,
}

impl DataFrame {
    /// Build from columns of equal length
    pub fn new(columns: Vec<Column>) -> Result<Self, DatasetError> {
        if let Some(first) = columns.first() {
            let len = first.values.len();
            if let Some(bad) = columns.iter().find(|c| c.values.len() != len) {
                return Err(DatasetError::Parse(format!(
                    "column '{}' has {} rows, expected {}",
                    bad.name,
                    bad.values.len(),
                    len
                )));
            }
        }
        Ok(Self { columns })
    }

    /// Build from a header and row-major cells. Short rows are padded with
    /// missing values, long rows truncated; blank and duplicate headers are
    /// renamed (`Unnamed: 2`, `Price.1`).
    pub fn from_rows(headers: Vec<String>, rows: Vec<Vec<Option<String>>>) -> Self {
        let names = dedupe_headers(headers);
        let mut columns: Vec<Column> = names
            .into_iter()
            .map(|n| Column::new(n, Vec::with_capacity(rows.len())))
            .collect();
        for row in rows {
            let mut cells = row.into_iter();
            for col in columns.iter_mut() {
                col.values.push(cells.next().flatten());
            }
        }
        Self { columns }
    }

    /// OHLCV frame with a `Date` column, as saved after a quote fetch
    pub fn from_price_bars(bars: &[PriceBar]) -> Self {
        let date_only = bars.iter().all(|b| b.date.time() == chrono::NaiveTime::MIN);
        let fmt = if date_only { "%Y-%m-%d" } else { "%Y-%m-%d %H:%M:%S" };
        let num = |v: Option<f64>| v.filter(|x| x.is_finite()).map(|x| x.to_string());
        Self {
            columns: vec![
                Column::new(
                    "Date",
                    bars.iter().map(|b| Some(b.date.format(fmt).to_string())).collect(),
                ),
                Column::new("Open", bars.iter().map(|b| num(b.open)).collect()),
                Column::new("High", bars.iter().map(|b| num(b.high)).collect()),
                Column::new("Low", bars.iter().map(|b| num(b.low)).collect()),
                Column::new("Close", bars.iter().map(|b| num(Some(b.close))).collect()),
                Column::new("Volume", bars.iter().map(|b| num(b.volume)).collect()),
            ],
        }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn n_rows(&self) -> usize {
        self.columns.first().map_or(0, |c| c.values.len())
    }

    /// No rows or no columns
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty() || self.n_rows() == 0
    }

    pub fn dtypes(&self) -> BTreeMap<String, String> {
        self.columns
            .iter()
            .map(|c| (c.name.clone(), c.dtype().as_str().to_string()))
            .collect()
    }

    /// First `n` rows rendered as strings, missing cells as ""
    pub fn preview(&self, n: usize) -> Vec<Vec<String>> {
        (0..self.n_rows().min(n))
            .map(|i| {
                self.columns
                    .iter()
                    .map(|c| c.values[i].clone().unwrap_or_default())
                    .collect()
            })
            .collect()
    }

    pub fn numeric(&self, name: &str) -> Result<Vec<Option<f64>>, DatasetError> {
        self.column(name)
            .map(Column::numeric)
            .ok_or_else(|| DatasetError::MissingColumn(name.to_string()))
    }

    /// Names of int/float columns, in frame order
    pub fn numeric_columns(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| c.dtype().is_numeric())
            .map(|c| c.name.clone())
            .collect()
    }

    /// Selected columns coerced to numbers, keeping only rows where every
    /// selected value is present. Returned column-major.
    pub fn select_numeric_complete(&self, names: &[String]) -> Result<Vec<Vec<f64>>, DatasetError> {
        let raw = names
            .iter()
            .map(|n| self.numeric(n))
            .collect::<Result<Vec<_>, _>>()?;
        let mut out = vec![Vec::new(); raw.len()];
        for row in 0..self.n_rows() {
            if raw.iter().all(|col| col[row].is_some()) {
                for (dst, col) in out.iter_mut().zip(&raw) {
                    dst.push(col[row].unwrap_or_default());
                }
            }
        }
        if out.first().map_or(true, Vec::is_empty) {
            return Err(DatasetError::NoData(
                "No valid numeric data in the selected columns".to_string(),
            ));
        }
        Ok(out)
    }

    /// Add or replace a column
    pub fn set_column(&mut self, column: Column) -> Result<(), DatasetError> {
        if !self.columns.is_empty() && column.values.len() != self.n_rows() {
            return Err(DatasetError::Parse(format!(
                "column '{}' has {} rows, expected {}",
                column.name,
                column.values.len(),
                self.n_rows()
            )));
        }
        match self.columns.iter_mut().find(|c| c.name == column.name) {
            Some(existing) => *existing = column,
            None => self.columns.push(column),
        }
        Ok(())
    }

    pub fn to_csv_bytes(&self) -> Result<Vec<u8>, DatasetError> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        let map_err = |e: csv::Error| DatasetError::Parse(e.to_string());
        writer.write_record(self.columns.iter().map(|c| c.name.as_str())).map_err(map_err)?;
        for i in 0..self.n_rows() {
            writer
                .write_record(self.columns.iter().map(|c| c.values[i].as_deref().unwrap_or("")))
                .map_err(map_err)?;
        }
        writer
            .into_inner()
            .map_err(|e| DatasetError::Parse(e.to_string()))
    }
}

/// Parse a numeric cell; NaN and infinities count as missing
pub fn parse_number(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

fn is_nan_literal(s: &str) -> bool {
    matches!(s.to_lowercase().as_str(), "nan" | "inf" | "-inf" | "infinity" | "-infinity")
}

fn parse_bool(s: &str) -> Option<bool> {
    match s {
        "True" | "TRUE" | "true" => Some(true),
        "False" | "FALSE" | "false" => Some(false),
        _ => None,
    }
}

pub(crate) fn is_na(cell: &str) -> bool {
    NA_TOKENS.contains(&cell.trim())
}

fn dedupe_headers(headers: Vec<String>) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    headers
        .into_iter()
        .enumerate()
        .map(|(i, h)| {
            let base = if h.trim().is_empty() {
                format!("Unnamed: {}", i)
            } else {
                h.trim().to_string()
            };
            let mut name = base.clone();
            let mut n = 1;
            while !seen.insert(name.clone()) {
                name = format!("{}.{}", base, n);
                n += 1;
            }
            name
        })
        .collect()
}
