//! Chart data computed from the session dataset
//!
//! Every function works on the loaded `DataFrame` and returns plain
//! serializable figures; drawing is left to the client.

use crate::dataset::{parse_datetime, DataFrame, DatasetError};
use crate::stats::descriptive::{self, BoxStats, Histogram, Summary};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

pub const DEFAULT_BINS: usize = 30;
pub const MAX_BINS: usize = 200;
const TOP_PAIRS: usize = 10;
const MISSING_GROUP: &str = "NA";

#[derive(Debug, Error)]
pub enum VizError {
    #[error("Column not found: {0}")]
    MissingColumn(String),
    #[error("Column '{0}' has no numeric values")]
    NotNumeric(String),
    #[error("{0}")]
    Invalid(String),
    #[error(transparent)]
    Dataset(#[from] DatasetError),
}

fn require<'a>(frame: &'a DataFrame, name: &str) -> Result<&'a crate::dataset::Column, VizError> {
    frame
        .column(name)
        .ok_or_else(|| VizError::MissingColumn(name.to_string()))
}

fn numeric_values(frame: &DataFrame, name: &str) -> Result<Vec<f64>, VizError> {
    let values: Vec<f64> = require(frame, name)?.numeric().into_iter().flatten().collect();
    if values.is_empty() {
        return Err(VizError::NotNumeric(name.to_string()));
    }
    Ok(values)
}

/// `describe()` of every numeric column
pub fn summary(frame: &DataFrame) -> BTreeMap<String, Summary> {
    frame
        .numeric_columns()
        .into_iter()
        .filter_map(|name| {
            let values: Vec<f64> = frame.column(&name)?.numeric().into_iter().flatten().collect();
            Some((name, descriptive::describe(&values)))
        })
        .collect()
}

pub fn histogram(frame: &DataFrame, column: &str, bins: Option<usize>) -> Result<Histogram, VizError> {
    let bins = bins.unwrap_or(DEFAULT_BINS).clamp(1, MAX_BINS);
    Ok(descriptive::histogram(&numeric_values(frame, column)?, bins))
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupBox {
    pub group: String,
    #[serde(flatten)]
    pub stats: BoxStats,
}

/// Box-plot figures of `column`, optionally one box per value of `group`
pub fn boxplot(frame: &DataFrame, column: &str, group: Option<&str>) -> Result<Vec<GroupBox>, VizError> {
    let Some(group) = group.filter(|g| !g.is_empty()) else {
        return Ok(vec![GroupBox {
            group: column.to_string(),
            stats: descriptive::box_stats(&numeric_values(frame, column)?),
        }]);
    };

    let values = require(frame, column)?.numeric();
    let keys = &require(frame, group)?.values;
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<f64>> = HashMap::new();
    for (key, value) in keys.iter().zip(values) {
        let Some(v) = value else { continue };
        let key = key.clone().unwrap_or_else(|| MISSING_GROUP.to_string());
        if !groups.contains_key(&key) {
            order.push(key.clone());
        }
        groups.entry(key).or_default().push(v);
    }
    if order.is_empty() {
        return Err(VizError::NotNumeric(column.to_string()));
    }
    Ok(order
        .into_iter()
        .map(|g| {
            let stats = descriptive::box_stats(groups.get(&g).map(Vec::as_slice).unwrap_or_default());
            GroupBox { group: g, stats }
        })
        .collect())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrelationPair {
    pub x: String,
    pub y: String,
    pub r: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Correlation {
    pub columns: Vec<String>,
    pub matrix: Vec<Vec<f64>>,
    pub top_pairs: Vec<CorrelationPair>,
}

/// Pearson matrix over complete rows, with the strongest pairs by |r|
pub fn correlation(frame: &DataFrame, columns: Option<&[String]>) -> Result<Correlation, VizError> {
    let columns: Vec<String> = match columns {
        Some(cols) if !cols.is_empty() => {
            for c in cols {
                require(frame, c)?;
            }
            cols.to_vec()
        }
        _ => frame.numeric_columns(),
    };
    if columns.len() < 2 {
        return Err(VizError::Invalid(
            "At least two numeric columns are required for a correlation matrix".into(),
        ));
    }

    let rows = frame.select_numeric_complete(&columns)?;
    let series: Vec<Vec<f64>> = (0..columns.len())
        .map(|j| rows.iter().map(|r| r[j]).collect())
        .collect();

    let k = columns.len();
    let mut matrix = vec![vec![0.0; k]; k];
    let mut pairs = Vec::new();
    for i in 0..k {
        matrix[i][i] = 1.0;
        for j in (i + 1)..k {
            let r = descriptive::finite_or_zero(descriptive::pearson(&series[i], &series[j]));
            matrix[i][j] = r;
            matrix[j][i] = r;
            pairs.push(CorrelationPair {
                x: columns[i].clone(),
                y: columns[j].clone(),
                r,
            });
        }
    }
    pairs.sort_by(|a, b| b.r.abs().total_cmp(&a.r.abs()));
    pairs.truncate(TOP_PAIRS);

    Ok(Correlation {
        columns,
        matrix,
        top_pairs: pairs,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryCount {
    pub value: String,
    pub count: usize,
}

/// Value counts, most frequent first; missing values are skipped
pub fn categories(frame: &DataFrame, column: &str, limit: Option<usize>) -> Result<Vec<CategoryCount>, VizError> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for v in require(frame, column)?.values.iter().flatten() {
        *counts.entry(v.as_str()).or_default() += 1;
    }
    let mut out: Vec<CategoryCount> = counts
        .into_iter()
        .map(|(value, count)| CategoryCount {
            value: value.to_string(),
            count,
        })
        .collect();
    out.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.value.cmp(&b.value)));
    if let Some(limit) = limit {
        out.truncate(limit);
    }
    Ok(out)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregation {
    Sum,
    Mean,
    Count,
    Median,
}

impl Aggregation {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "sum" => Some(Aggregation::Sum),
            "mean" | "avg" => Some(Aggregation::Mean),
            "count" => Some(Aggregation::Count),
            "median" => Some(Aggregation::Median),
            _ => None,
        }
    }

    fn apply(&self, values: &[f64]) -> f64 {
        match self {
            Aggregation::Sum => values.iter().sum(),
            Aggregation::Mean => descriptive::finite_or_zero(descriptive::mean(values)),
            Aggregation::Count => values.len() as f64,
            Aggregation::Median => descriptive::finite_or_zero(descriptive::median(values)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregatePoint {
    pub key: String,
    pub value: f64,
}

/// `y` aggregated per distinct value of `x`, keys in sorted order
pub fn aggregate(frame: &DataFrame, x: &str, y: &str, agg: Aggregation) -> Result<Vec<AggregatePoint>, VizError> {
    let keys = &require(frame, x)?.values;
    let values = require(frame, y)?.numeric();
    let mut groups: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for (key, value) in keys.iter().zip(values) {
        if let (Some(k), Some(v)) = (key, value) {
            groups.entry(k.clone()).or_default().push(v);
        }
    }
    Ok(groups
        .into_iter()
        .map(|(key, vals)| AggregatePoint {
            value: agg.apply(&vals),
            key,
        })
        .collect())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinePoint {
    pub x: String,
    pub y: Option<f64>,
}

/// `y` against `x`; when every `x` parses as a date the points are sorted
/// chronologically, otherwise file order is kept
pub fn line(frame: &DataFrame, x: &str, y: &str) -> Result<Vec<LinePoint>, VizError> {
    let xs = &require(frame, x)?.values;
    let ys = require(frame, y)?.numeric();
    let mut points: Vec<(Option<chrono::NaiveDateTime>, LinePoint)> = xs
        .iter()
        .zip(ys)
        .filter_map(|(xv, yv)| {
            let xv = xv.clone()?;
            Some((parse_datetime(&xv), LinePoint { x: xv, y: yv }))
        })
        .collect();
    if !points.is_empty() && points.iter().all(|(d, _)| d.is_some()) {
        points.sort_by_key(|(d, _)| *d);
    }
    Ok(points.into_iter().map(|(_, p)| p).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> DataFrame {
        let rows = vec![
            ["2024-01-03", "A", "3", "30"],
            ["2024-01-01", "B", "1", "10"],
            ["2024-01-02", "A", "2", "20"],
            ["2024-01-04", "B", "", "40"],
            ["2024-01-05", "A", "100", "35"],
        ];
        DataFrame::from_rows(
            vec!["Date".into(), "Kind".into(), "X".into(), "Y".into()],
            rows.into_iter()
                .map(|r| r.iter().map(|v| (!v.is_empty()).then(|| v.to_string())).collect())
                .collect(),
        )
    }

    #[test]
    fn test_summary_numeric_only() {
        let s = summary(&frame());
        assert_eq!(s.keys().collect::<Vec<_>>(), vec!["X", "Y"]);
        assert_eq!(s["X"].count, 4);
        assert_eq!(s["Y"].max, 40.0);
    }

    #[test]
    fn test_histogram_and_missing_column() {
        let h = histogram(&frame(), "Y", Some(3)).unwrap();
        assert_eq!(h.counts.iter().sum::<usize>(), 5);
        assert_eq!(h.edges.len(), 4);
        assert!(matches!(histogram(&frame(), "Z", None), Err(VizError::MissingColumn(_))));
        assert!(matches!(histogram(&frame(), "Kind", None), Err(VizError::NotNumeric(_))));
    }

    #[test]
    fn test_grouped_boxplot() {
        let boxes = boxplot(&frame(), "X", Some("Kind")).unwrap();
        assert_eq!(boxes.len(), 2);
        assert_eq!(boxes[0].group, "A");
        assert_eq!(boxes[0].stats.count, 3);
        assert_eq!(boxes[1].stats.count, 1);

        let single = boxplot(&frame(), "X", None).unwrap();
        assert_eq!(single[0].stats.outliers, vec![100.0]);
    }

    #[test]
    fn test_correlation() {
        let c = correlation(&frame(), None).unwrap();
        assert_eq!(c.columns, vec!["X", "Y"]);
        assert_eq!(c.matrix[0][0], 1.0);
        assert_eq!(c.matrix[0][1], c.matrix[1][0]);
        assert_eq!(c.top_pairs.len(), 1);

        let one = vec!["X".to_string()];
        assert!(matches!(correlation(&frame(), Some(&one)), Err(VizError::Invalid(_))));
    }

    #[test]
    fn test_categories_and_aggregate() {
        let cats = categories(&frame(), "Kind", None).unwrap();
        assert_eq!(cats[0], CategoryCount { value: "A".into(), count: 3 });

        let sums = aggregate(&frame(), "Kind", "Y", Aggregation::Sum).unwrap();
        assert_eq!(sums[0], AggregatePoint { key: "A".into(), value: 85.0 });
        let counts = aggregate(&frame(), "Kind", "X", Aggregation::Count).unwrap();
        assert_eq!(counts[1].value, 1.0);
        assert_eq!(Aggregation::from_str("avg"), Some(Aggregation::Mean));
        assert_eq!(Aggregation::from_str("max"), None);
    }

    #[test]
    fn test_line_sorted_by_date() {
        let pts = line(&frame(), "Date", "Y").unwrap();
        assert_eq!(pts[0].x, "2024-01-01");
        assert_eq!(pts[4].y, Some(35.0));
        let by_kind = line(&frame(), "Kind", "Y").unwrap();
        assert_eq!(by_kind[0].x, "A");
        assert_eq!(by_kind[0].y, Some(30.0));
    }
}
