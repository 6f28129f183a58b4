//! Descriptive statistics used by the charts and the forecast metrics

use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};
use std::cmp::Ordering;

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Standard deviation with `ddof` delta degrees of freedom (NaN when undefined)
pub fn std_dev(values: &[f64], ddof: usize) -> f64 {
    let n = values.len();
    if n <= ddof {
        return f64::NAN;
    }
    let m = mean(values);
    let ss: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    (ss / (n - ddof) as f64).sqrt()
}

pub fn sorted(values: &[f64]) -> Vec<f64> {
    let mut v = values.to_vec();
    v.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    v
}

/// Linear-interpolated quantile of already sorted data
pub fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        n => {
            let pos = q.clamp(0.0, 1.0) * (n - 1) as f64;
            let lo = pos.floor() as usize;
            let hi = pos.ceil() as usize;
            sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
        }
    }
}

pub fn median(values: &[f64]) -> f64 {
    quantile_sorted(&sorted(values), 0.5)
}

/// Pearson correlation; NaN when either side is constant
pub fn pearson(x: &[f64], y: &[f64]) -> f64 {
    let n = x.len().min(y.len());
    if n < 2 {
        return f64::NAN;
    }
    let (mx, my) = (mean(&x[..n]), mean(&y[..n]));
    let mut sxy = 0.0;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    for i in 0..n {
        let dx = x[i] - mx;
        let dy = y[i] - my;
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }
    if sxx == 0.0 || syy == 0.0 {
        return f64::NAN;
    }
    (sxy / (sxx * syy).sqrt()).clamp(-1.0, 1.0)
}

/// `describe()`-style summary of one column
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub count: usize,
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    #[serde(rename = "25%")]
    pub q25: f64,
    #[serde(rename = "50%")]
    pub median: f64,
    #[serde(rename = "75%")]
    pub q75: f64,
    pub max: f64,
}

pub fn describe(values: &[f64]) -> Summary {
    let s = sorted(values);
    Summary {
        count: s.len(),
        mean: finite_or_zero(mean(&s)),
        std: finite_or_zero(std_dev(&s, 1)),
        min: finite_or_zero(quantile_sorted(&s, 0.0)),
        q25: finite_or_zero(quantile_sorted(&s, 0.25)),
        median: finite_or_zero(quantile_sorted(&s, 0.5)),
        q75: finite_or_zero(quantile_sorted(&s, 0.75)),
        max: finite_or_zero(quantile_sorted(&s, 1.0)),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Histogram {
    /// `bins + 1` bin edges
    pub edges: Vec<f64>,
    pub counts: Vec<usize>,
}

/// Equal-width histogram; the last bin is closed on the right
pub fn histogram(values: &[f64], bins: usize) -> Histogram {
    let bins = bins.max(1);
    if values.is_empty() {
        return Histogram {
            edges: Vec::new(),
            counts: Vec::new(),
        };
    }
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let (lo, hi) = if min == max { (min - 0.5, max + 0.5) } else { (min, max) };
    let width = (hi - lo) / bins as f64;

    let edges = (0..=bins).map(|i| lo + width * i as f64).collect();
    let mut counts = vec![0; bins];
    for v in values {
        let idx = (((v - lo) / width) as usize).min(bins - 1);
        counts[idx] += 1;
    }
    Histogram { edges, counts }
}

/// Box-plot figures, whiskers at 1.5 IQR
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoxStats {
    pub count: usize,
    pub min: f64,
    pub q1: f64,
    pub median: f64,
    pub q3: f64,
    pub max: f64,
    pub lower_whisker: f64,
    pub upper_whisker: f64,
    pub outliers: Vec<f64>,
}

pub fn box_stats(values: &[f64]) -> BoxStats {
    let s = sorted(values);
    let q1 = quantile_sorted(&s, 0.25);
    let q3 = quantile_sorted(&s, 0.75);
    let iqr = q3 - q1;
    let (low_fence, high_fence) = (q1 - 1.5 * iqr, q3 + 1.5 * iqr);
    let inside: Vec<f64> = s
        .iter()
        .copied()
        .filter(|v| *v >= low_fence && *v <= high_fence)
        .collect();
    BoxStats {
        count: s.len(),
        min: finite_or_zero(quantile_sorted(&s, 0.0)),
        q1: finite_or_zero(q1),
        median: finite_or_zero(quantile_sorted(&s, 0.5)),
        q3: finite_or_zero(q3),
        max: finite_or_zero(quantile_sorted(&s, 1.0)),
        lower_whisker: inside.first().copied().unwrap_or(0.0),
        upper_whisker: inside.last().copied().unwrap_or(0.0),
        outliers: s
            .iter()
            .copied()
            .filter(|v| *v < low_fence || *v > high_fence)
            .collect(),
    }
}

/// Normal Q-Q plot points with a least-squares reference line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QqPlot {
    pub theoretical: Vec<f64>,
    pub sample: Vec<f64>,
    pub slope: f64,
    pub intercept: f64,
}

/// Theoretical quantiles use Filliben's order-statistic medians
pub fn qq_plot(values: &[f64]) -> QqPlot {
    let sample = sorted(values);
    let n = sample.len();
    let normal = Normal::new(0.0, 1.0).ok();
    let theoretical: Vec<f64> = (1..=n)
        .map(|i| {
            let p = if n == 1 {
                0.5
            } else if i == 1 {
                1.0 - 0.5f64.powf(1.0 / n as f64)
            } else if i == n {
                0.5f64.powf(1.0 / n as f64)
            } else {
                (i as f64 - 0.3175) / (n as f64 + 0.365)
            };
            normal.as_ref().map_or(0.0, |d| d.inverse_cdf(p))
        })
        .collect();

    let mt = mean(&theoretical);
    let ms = mean(&sample);
    let sxx: f64 = theoretical.iter().map(|t| (t - mt).powi(2)).sum();
    let sxy: f64 = theoretical
        .iter()
        .zip(&sample)
        .map(|(t, s)| (t - mt) * (s - ms))
        .sum();
    let slope = if sxx > 0.0 { sxy / sxx } else { 0.0 };
    QqPlot {
        intercept: finite_or_zero(ms - slope * mt),
        slope,
        theoretical,
        sample,
    }
}

pub fn finite_or_zero(v: f64) -> f64 {
    if v.is_finite() {
        v
    } else {
        0.0
    }
}
