//! Rank-based tests: Wilcoxon, Mann-Whitney, Kruskal-Wallis, Friedman, Spearman
//!
//! Two-sided p-values with the same defaults as scipy.stats.

use super::descriptive::pearson;
use super::ranking::{rankdata, tie_groups, tie_term};
use super::{StatsError, TestStatistic};
use statrs::distribution::{ChiSquared, ContinuousCDF, Normal, StudentsT};

fn standard_normal() -> Result<Normal, StatsError> {
    Normal::new(0.0, 1.0).map_err(|e| StatsError::Numerical(e.to_string()))
}

fn chi2_sf(x: f64, df: f64) -> Result<f64, StatsError> {
    let dist = ChiSquared::new(df).map_err(|e| StatsError::Numerical(e.to_string()))?;
    Ok((1.0 - dist.cdf(x)).clamp(0.0, 1.0))
}

/// Wilcoxon signed-rank test on paired samples.
///
/// Zero differences are discarded. Without ties and with at most 50 pairs
/// the exact null distribution is used, otherwise the normal approximation
/// with tie correction. The statistic is min(W+, W-).
pub fn wilcoxon(x: &[f64], y: &[f64]) -> Result<TestStatistic, StatsError> {
    if x.len() != y.len() {
        return Err(StatsError::InsufficientData(
            "Paired samples must have the same length".to_string(),
        ));
    }
    let n_pairs = x.len();
    let d: Vec<f64> = x
        .iter()
        .zip(y)
        .map(|(a, b)| a - b)
        .filter(|v| *v != 0.0)
        .collect();
    let n = d.len();
    let had_zero = n < n_pairs;
    if n == 0 {
        return Err(StatsError::Degenerate(
            "All paired differences are zero".to_string(),
        ));
    }

    let abs: Vec<f64> = d.iter().map(|v| v.abs()).collect();
    let ranks = rankdata(&abs);
    let r_plus = d
        .iter()
        .zip(&ranks)
        .filter(|(v, _)| **v > 0.0)
        .fold(0.0, |acc, (_, r)| acc + r);
    let r_minus = d
        .iter()
        .zip(&ranks)
        .filter(|(v, _)| **v < 0.0)
        .fold(0.0, |acc, (_, r)| acc + r);
    let t = r_plus.min(r_minus);

    // dropped zeros force the normal approximation
    let p_value = if n <= 50 && !had_zero && tie_groups(&abs).is_empty() {
        (2.0 * signed_rank_cdf(n, t.round() as usize)).min(1.0)
    } else {
        let nf = n as f64;
        let mean = nf * (nf + 1.0) / 4.0;
        let var = nf * (nf + 1.0) * (2.0 * nf + 1.0) / 24.0 - tie_term(&abs) / 48.0;
        if var <= 0.0 {
            1.0
        } else {
            let z = (t - mean) / var.sqrt();
            (2.0 * standard_normal()?.cdf(-z.abs())).min(1.0)
        }
    };

    Ok(TestStatistic {
        statistic: t,
        p_value,
    })
}

/// P(T <= t) for the signed-rank statistic of n untied pairs
fn signed_rank_cdf(n: usize, t: usize) -> f64 {
    let max = n * (n + 1) / 2;
    let mut counts = vec![0.0f64; max + 1];
    counts[0] = 1.0;
    for k in 1..=n {
        for s in (k..=max).rev() {
            counts[s] += counts[s - k];
        }
    }
    let total = 2f64.powi(n as i32);
    counts.iter().take(t.min(max) + 1).sum::<f64>() / total
}

/// Mann-Whitney U test of two independent samples.
///
/// The statistic is U of the first sample. Exact unless both samples have
/// more than 8 values or there are ties, otherwise normal approximation with
/// continuity and tie corrections.
pub fn mann_whitney(x: &[f64], y: &[f64]) -> Result<TestStatistic, StatsError> {
    let (n1, n2) = (x.len(), y.len());
    if n1 == 0 || n2 == 0 {
        return Err(StatsError::InsufficientData(
            "Both samples need at least one value".to_string(),
        ));
    }
    let combined: Vec<f64> = x.iter().chain(y).copied().collect();
    let ranks = rankdata(&combined);
    let r1: f64 = ranks[..n1].iter().sum();
    let (n1f, n2f) = (n1 as f64, n2 as f64);
    let u1 = r1 - n1f * (n1f + 1.0) / 2.0;
    let u2 = n1f * n2f - u1;
    let u = u1.max(u2);

    let p_value = if !(n1 > 8 && n2 > 8) && tie_groups(&combined).is_empty() {
        (2.0 * mann_whitney_sf(n1, n2, u.round() as usize)).min(1.0)
    } else {
        let n = n1f + n2f;
        let tie = tie_term(&combined);
        let sigma = (n1f * n2f / 12.0 * ((n + 1.0) - tie / (n * (n - 1.0)))).sqrt();
        if sigma == 0.0 || !sigma.is_finite() {
            1.0
        } else {
            let z = (u - n1f * n2f / 2.0 - 0.5) / sigma;
            (2.0 * (1.0 - standard_normal()?.cdf(z))).clamp(0.0, 1.0)
        }
    };

    Ok(TestStatistic {
        statistic: u1,
        p_value,
    })
}

/// P(U >= u) under H0 for sample sizes m and n
fn mann_whitney_sf(m: usize, n: usize, u: usize) -> f64 {
    let (m, n) = (m.min(n), m.max(n));
    let max_u = m * n;
    if u > max_u {
        return 0.0;
    }
    // P(U >= u) == P(U <= mn - u) by symmetry
    let kmax = max_u - u;
    // counts[i][k]: arrangements of i x-values among the first j y-values with U = k
    let mut counts = vec![vec![0.0f64; kmax + 1]; m + 1];
    for row in counts.iter_mut() {
        row[0] = 1.0;
    }
    for j in 1..=n {
        for i in 1..=m {
            let (done, rest) = counts.split_at_mut(i);
            let (prev, cur) = (&done[i - 1], &mut rest[0]);
            for k in j..=kmax {
                cur[k] += prev[k - j];
            }
        }
    }
    let total = (1..=m).fold(1.0, |acc, i| acc * (n + i) as f64 / i as f64);
    counts[m].iter().sum::<f64>() / total
}

/// Kruskal-Wallis H test across k >= 2 groups
pub fn kruskal(groups: &[Vec<f64>]) -> Result<TestStatistic, StatsError> {
    if groups.len() < 2 {
        return Err(StatsError::InsufficientData(
            "Need at least two groups".to_string(),
        ));
    }
    if groups.iter().any(Vec::is_empty) {
        return Err(StatsError::InsufficientData(
            "Every group needs at least one value".to_string(),
        ));
    }
    let all: Vec<f64> = groups.iter().flatten().copied().collect();
    let ranks = rankdata(&all);
    let n = all.len() as f64;

    let mut offset = 0;
    let mut ssbn = 0.0;
    for g in groups {
        let r: f64 = ranks[offset..offset + g.len()].iter().sum();
        ssbn += r * r / g.len() as f64;
        offset += g.len();
    }
    let correction = 1.0 - tie_term(&all) / (n * n * n - n);
    if correction <= 0.0 {
        return Err(StatsError::Degenerate("All numbers are identical".to_string()));
    }
    let h = (12.0 / (n * (n + 1.0)) * ssbn - 3.0 * (n + 1.0)) / correction;

    Ok(TestStatistic {
        statistic: h,
        p_value: chi2_sf(h, (groups.len() - 1) as f64)?,
    })
}

/// Friedman chi-square test on k >= 3 repeated measures (columns of equal length)
pub fn friedman(columns: &[Vec<f64>]) -> Result<TestStatistic, StatsError> {
    let k = columns.len();
    if k < 3 {
        return Err(StatsError::InsufficientData(
            "Friedman needs at least three columns".to_string(),
        ));
    }
    let n = columns[0].len();
    if n == 0 || columns.iter().any(|c| c.len() != n) {
        return Err(StatsError::InsufficientData(
            "Columns must be non-empty and of equal length".to_string(),
        ));
    }

    let mut rank_sums = vec![0.0; k];
    let mut ties = 0.0;
    for row in 0..n {
        let values: Vec<f64> = columns.iter().map(|c| c[row]).collect();
        for (sum, r) in rank_sums.iter_mut().zip(rankdata(&values)) {
            *sum += r;
        }
        ties += tie_term(&values);
    }

    let (nf, kf) = (n as f64, k as f64);
    let correction = 1.0 - ties / (kf * (kf * kf - 1.0) * nf);
    if correction <= 0.0 {
        return Err(StatsError::Degenerate(
            "All rows contain identical values".to_string(),
        ));
    }
    let ssbn: f64 = rank_sums.iter().map(|r| r * r).sum();
    let q = (12.0 / (kf * nf * (kf + 1.0)) * ssbn - 3.0 * nf * (kf + 1.0)) / correction;

    Ok(TestStatistic {
        statistic: q,
        p_value: chi2_sf(q, kf - 1.0)?,
    })
}

/// Spearman rank correlation with a t-distribution p-value (df = n - 2)
pub fn spearman(x: &[f64], y: &[f64]) -> Result<TestStatistic, StatsError> {
    let n = x.len();
    if n != y.len() || n < 3 {
        return Err(StatsError::InsufficientData(
            "Spearman needs at least three paired values".to_string(),
        ));
    }
    let rho = pearson(&rankdata(x), &rankdata(y));
    if rho.is_nan() {
        return Err(StatsError::Degenerate(
            "Correlation is undefined for a constant column".to_string(),
        ));
    }

    let df = (n - 2) as f64;
    let p_value = if rho.abs() >= 1.0 {
        0.0
    } else {
        let t = rho * (df / ((1.0 - rho) * (1.0 + rho))).sqrt();
        let dist =
            StudentsT::new(0.0, 1.0, df).map_err(|e| StatsError::Numerical(e.to_string()))?;
        (2.0 * (1.0 - dist.cdf(t.abs()))).clamp(0.0, 1.0)
    };

    Ok(TestStatistic {
        statistic: rho,
        p_value,
    })
}
