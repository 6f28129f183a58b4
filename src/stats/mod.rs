//! Statistical Tests
//!
//! Non-parametric and normality tests run on the columns of the session
//! dataset, with the interpretation and result text shown to the user.

pub mod descriptive;
mod nonparametric;
mod normality;
mod ranking;

pub use nonparametric::{friedman, kruskal, mann_whitney, spearman, wilcoxon};
pub use normality::{kolmogorov_smirnov, shapiro_wilk};
pub use ranking::rankdata;

use crate::dataset::{DataFrame, DatasetError};
use descriptive::{histogram, qq_plot, Histogram, QqPlot};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Significance level used for every interpretation
pub const ALPHA: f64 = 0.05;

#[derive(Debug, Error)]
pub enum StatsError {
    #[error("Unknown test: {0}")]
    UnknownTest(String),
    #[error("{test} requires {rule}, got {got}")]
    ColumnCount {
        test: &'static str,
        rule: ColumnRule,
        got: usize,
    },
    #[error(transparent)]
    Data(#[from] DatasetError),
    #[error("{0}")]
    InsufficientData(String),
    #[error("{0}")]
    Degenerate(String),
    #[error("Numerical error: {0}")]
    Numerical(String),
}

/// Statistic and two-sided p-value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TestStatistic {
    pub statistic: f64,
    pub p_value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestKind {
    #[serde(rename = "wilcoxon")]
    Wilcoxon,
    #[serde(rename = "mannwhitney")]
    MannWhitney,
    Kruskal,
    Spearman,
    Friedman,
    KolmogorovSmirnov,
    ShapiroWilk,
}

/// How many columns a test takes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "count", rename_all = "snake_case")]
pub enum ColumnRule {
    Exactly(usize),
    AtLeast(usize),
}

impl ColumnRule {
    pub fn accepts(&self, n: usize) -> bool {
        match *self {
            ColumnRule::Exactly(k) => n == k,
            ColumnRule::AtLeast(k) => n >= k,
        }
    }
}

impl fmt::Display for ColumnRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnRule::Exactly(1) => write!(f, "exactly 1 column"),
            ColumnRule::Exactly(k) => write!(f, "exactly {} columns", k),
            ColumnRule::AtLeast(k) => write!(f, "at least {} columns", k),
        }
    }
}

impl TestKind {
    pub const ALL: [TestKind; 7] = [
        TestKind::Wilcoxon,
        TestKind::MannWhitney,
        TestKind::Kruskal,
        TestKind::Spearman,
        TestKind::Friedman,
        TestKind::KolmogorovSmirnov,
        TestKind::ShapiroWilk,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TestKind::Wilcoxon => "wilcoxon",
            TestKind::MannWhitney => "mannwhitney",
            TestKind::Kruskal => "kruskal",
            TestKind::Spearman => "spearman",
            TestKind::Friedman => "friedman",
            TestKind::KolmogorovSmirnov => "kolmogorov_smirnov",
            TestKind::ShapiroWilk => "shapiro_wilk",
        }
    }

    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "wilcoxon" => Some(TestKind::Wilcoxon),
            "mannwhitney" | "mann_whitney" => Some(TestKind::MannWhitney),
            "kruskal" | "kruskal_wallis" => Some(TestKind::Kruskal),
            "spearman" => Some(TestKind::Spearman),
            "friedman" => Some(TestKind::Friedman),
            "kolmogorov_smirnov" | "ks" => Some(TestKind::KolmogorovSmirnov),
            "shapiro_wilk" | "shapiro" => Some(TestKind::ShapiroWilk),
            _ => None,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            TestKind::Wilcoxon => "Wilcoxon signed-rank test",
            TestKind::MannWhitney => "Mann-Whitney U test",
            TestKind::Kruskal => "Kruskal-Wallis H test",
            TestKind::Spearman => "Spearman rank correlation",
            TestKind::Friedman => "Friedman test",
            TestKind::KolmogorovSmirnov => "Kolmogorov-Smirnov test",
            TestKind::ShapiroWilk => "Shapiro-Wilk test",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            TestKind::Wilcoxon => "Compares two paired samples (before/after measurements).",
            TestKind::MannWhitney => "Compares the distributions of two independent samples.",
            TestKind::Kruskal => "Compares the distributions of two or more independent samples.",
            TestKind::Spearman => "Measures the monotonic association between two variables.",
            TestKind::Friedman => "Compares three or more related samples (repeated measures).",
            TestKind::KolmogorovSmirnov => {
                "Checks whether a sample follows a normal distribution fitted to it."
            }
            TestKind::ShapiroWilk => "Checks whether a sample comes from a normal distribution.",
        }
    }

    pub fn column_rule(&self) -> ColumnRule {
        match self {
            TestKind::Wilcoxon | TestKind::MannWhitney | TestKind::Spearman => {
                ColumnRule::Exactly(2)
            }
            TestKind::KolmogorovSmirnov | TestKind::ShapiroWilk => ColumnRule::Exactly(1),
            TestKind::Kruskal => ColumnRule::AtLeast(2),
            TestKind::Friedman => ColumnRule::AtLeast(3),
        }
    }

    pub fn is_normality(&self) -> bool {
        matches!(self, TestKind::KolmogorovSmirnov | TestKind::ShapiroWilk)
    }

    /// Human reading of a p-value at [`ALPHA`]
    pub fn interpret(&self, p_value: f64, statistic: f64) -> String {
        let significant = p_value < ALPHA;
        match self {
            _ if self.is_normality() => {
                if significant {
                    "Distribution is NOT normal".to_string()
                } else {
                    "Distribution compatible with normality".to_string()
                }
            }
            TestKind::Spearman => {
                if significant {
                    format!("Significant correlation (rho={:.3})", statistic)
                } else {
                    format!("No significant correlation (rho={:.3})", statistic)
                }
            }
            _ => {
                if significant {
                    "Significant difference detected".to_string()
                } else {
                    "No significant difference".to_string()
                }
            }
        }
    }
}

impl fmt::Display for TestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Check the number of selected columns against the test's rule
pub fn validate_test_requirements(test: &str, n_columns: usize) -> Result<TestKind, StatsError> {
    let kind = TestKind::from_str(test).ok_or_else(|| StatsError::UnknownTest(test.to_string()))?;
    let rule = kind.column_rule();
    if !rule.accepts(n_columns) {
        return Err(StatsError::ColumnCount {
            test: kind.as_str(),
            rule,
            got: n_columns,
        });
    }
    Ok(kind)
}

/// Distribution charts attached to single-column tests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributionChart {
    pub histogram: Histogram,
    pub qq: QqPlot,
}

/// Full outcome of one test run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub test: TestKind,
    pub test_name: String,
    pub columns: Vec<String>,
    pub n_observations: usize,
    pub statistic: f64,
    pub p_value: f64,
    pub alpha: f64,
    pub significant: bool,
    pub interpretation: String,
    pub results_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chart: Option<DistributionChart>,
}

/// Run `kind` on `columns` of `frame`. Values are coerced to numbers and
/// rows with a missing value in any selected column are dropped first.
pub fn run_test(
    frame: &DataFrame,
    kind: TestKind,
    columns: &[String],
) -> Result<TestResult, StatsError> {
    let rule = kind.column_rule();
    if !rule.accepts(columns.len()) {
        return Err(StatsError::ColumnCount {
            test: kind.as_str(),
            rule,
            got: columns.len(),
        });
    }
    let data = frame.select_numeric_complete(columns)?;
    let n_observations = data[0].len();

    let outcome = match kind {
        TestKind::Wilcoxon => wilcoxon(&data[0], &data[1])?,
        TestKind::MannWhitney => mann_whitney(&data[0], &data[1])?,
        TestKind::Kruskal => kruskal(&data)?,
        TestKind::Spearman => spearman(&data[0], &data[1])?,
        TestKind::Friedman => friedman(&data)?,
        TestKind::KolmogorovSmirnov => kolmogorov_smirnov(&data[0])?,
        TestKind::ShapiroWilk => shapiro_wilk(&data[0])?,
    };

    let chart = kind.is_normality().then(|| DistributionChart {
        histogram: histogram(&data[0], 30),
        qq: qq_plot(&data[0]),
    });
    let interpretation = kind.interpret(outcome.p_value, outcome.statistic);
    let results_text = format!(
        "{}\nColumns: {}\nObservations: {}\nStatistic: {:.4}\np-value: {:.4}\n{}",
        kind.display_name(),
        columns.join(", "),
        n_observations,
        outcome.statistic,
        outcome.p_value,
        interpretation
    );

    Ok(TestResult {
        test: kind,
        test_name: kind.display_name().to_string(),
        columns: columns.to_vec(),
        n_observations,
        statistic: outcome.statistic,
        p_value: outcome.p_value,
        alpha: ALPHA,
        significant: outcome.p_value < ALPHA,
        interpretation,
        results_text,
        chart,
    })
}
