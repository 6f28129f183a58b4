//! Normality tests: Kolmogorov-Smirnov against a fitted normal, Shapiro-Wilk

use super::descriptive::{mean, sorted, std_dev};
use super::{StatsError, TestStatistic};
use statrs::distribution::{ContinuousCDF, Normal};
use std::f64::consts::PI;

/// One-sample KS test against N(mean, std) estimated from the sample
/// (std with one delta degree of freedom).
///
/// The p-value is the asymptotic Kolmogorov distribution evaluated at
/// `(sqrt(n) + 0.12 + 0.11 / sqrt(n)) * D`.
pub fn kolmogorov_smirnov(values: &[f64]) -> Result<TestStatistic, StatsError> {
    let n = values.len();
    if n < 2 {
        return Err(StatsError::InsufficientData(
            "Kolmogorov-Smirnov needs at least two values".to_string(),
        ));
    }
    let sd = std_dev(values, 1);
    if !(sd > 0.0) {
        return Err(StatsError::Degenerate(
            "Standard deviation is zero".to_string(),
        ));
    }
    let dist = Normal::new(mean(values), sd).map_err(|e| StatsError::Numerical(e.to_string()))?;

    let s = sorted(values);
    let nf = n as f64;
    let mut d: f64 = 0.0;
    for (i, x) in s.iter().enumerate() {
        let cdf = dist.cdf(*x);
        let d_plus = (i + 1) as f64 / nf - cdf;
        let d_minus = cdf - i as f64 / nf;
        d = d.max(d_plus).max(d_minus);
    }

    let root = nf.sqrt();
    Ok(TestStatistic {
        statistic: d,
        p_value: kolmogorov_q((root + 0.12 + 0.11 / root) * d),
    })
}

/// Q_KS(λ) = 2 Σ (-1)^(j-1) exp(-2 j² λ²)
fn kolmogorov_q(lambda: f64) -> f64 {
    if lambda < 0.2 {
        return 1.0;
    }
    let a2 = -2.0 * lambda * lambda;
    let mut sign = 2.0;
    let mut sum = 0.0;
    let mut prev_term = 0.0f64;
    for j in 1..=100 {
        let jf = j as f64;
        let term = sign * (a2 * jf * jf).exp();
        sum += term;
        if term.abs() <= 1e-10 * prev_term.abs() || term.abs() <= 1e-16 * sum.abs() {
            return sum.clamp(0.0, 1.0);
        }
        sign = -sign;
        prev_term = term;
    }
    1.0
}

const SMALL_POLY: [f64; 6] = [0.0, 0.221157, -0.147981, -2.071190, 4.434685, -2.706056];
const SECOND_POLY: [f64; 6] = [0.0, 0.042981, -0.293762, -1.752461, 5.682633, -3.582633];

fn poly(coeffs: &[f64], x: f64) -> f64 {
    coeffs.iter().rev().fold(0.0, |acc, c| acc * x + c)
}

/// Shapiro-Wilk W with Royston's (1995) approximation of the coefficients
/// and p-value. Valid for 3 <= n <= 5000.
pub fn shapiro_wilk(values: &[f64]) -> Result<TestStatistic, StatsError> {
    let n = values.len();
    if n < 3 {
        return Err(StatsError::InsufficientData(
            "Shapiro-Wilk needs at least three values".to_string(),
        ));
    }
    if n > 5000 {
        return Err(StatsError::InsufficientData(
            "Shapiro-Wilk supports at most 5000 values".to_string(),
        ));
    }
    let x = sorted(values);
    if x[n - 1] - x[0] <= 0.0 {
        return Err(StatsError::Degenerate("All values are identical".to_string()));
    }

    let normal = Normal::new(0.0, 1.0).map_err(|e| StatsError::Numerical(e.to_string()))?;
    let nf = n as f64;
    let a = shapiro_coefficients(n, &normal);

    let m = mean(&x);
    let ss: f64 = x.iter().map(|v| (v - m).powi(2)).sum();
    let num: f64 = a.iter().zip(&x).map(|(ai, xi)| ai * xi).sum();
    let w = (num * num / ss).min(1.0);

    let p_value = if w >= 1.0 {
        1.0
    } else if n == 3 {
        (6.0 / PI * (w.sqrt().asin() - 0.75f64.sqrt().asin())).clamp(0.0, 1.0)
    } else if n <= 11 {
        let gamma = -2.273 + 0.459 * nf;
        let mu = 0.5440 - 0.39978 * nf + 0.025054 * nf.powi(2) - 0.0006714 * nf.powi(3);
        let sigma = (1.3822 - 0.77857 * nf + 0.062767 * nf.powi(2) - 0.0020322 * nf.powi(3)).exp();
        let y = -(gamma - (1.0 - w).ln()).ln();
        1.0 - normal.cdf((y - mu) / sigma)
    } else {
        let ln_n = nf.ln();
        let mu = -1.5861 - 0.31082 * ln_n - 0.083751 * ln_n.powi(2) + 0.0038915 * ln_n.powi(3);
        let sigma = (-0.4803 - 0.082676 * ln_n + 0.0030302 * ln_n.powi(2)).exp();
        let y = (1.0 - w).ln();
        1.0 - normal.cdf((y - mu) / sigma)
    };

    Ok(TestStatistic {
        statistic: w,
        p_value: p_value.clamp(0.0, 1.0),
    })
}

/// Antisymmetric weights a_1..a_n for sorted data
fn shapiro_coefficients(n: usize, normal: &Normal) -> Vec<f64> {
    if n == 3 {
        let r = 0.5f64.sqrt();
        return vec![-r, 0.0, r];
    }
    let nf = n as f64;
    let m: Vec<f64> = (1..=n)
        .map(|i| normal.inverse_cdf((i as f64 - 0.375) / (nf + 0.25)))
        .collect();
    let mm: f64 = m.iter().map(|v| v * v).sum();
    let u = 1.0 / nf.sqrt();

    let mut a = vec![0.0; n];
    let an = m[n - 1] / mm.sqrt() + poly(&SMALL_POLY, u);
    a[n - 1] = an;
    a[0] = -an;

    if n > 5 {
        let an1 = m[n - 2] / mm.sqrt() + poly(&SECOND_POLY, u);
        a[n - 2] = an1;
        a[1] = -an1;
        let phi = (mm - 2.0 * m[n - 1].powi(2) - 2.0 * m[n - 2].powi(2))
            / (1.0 - 2.0 * an.powi(2) - 2.0 * an1.powi(2));
        for i in 2..n - 2 {
            a[i] = m[i] / phi.sqrt();
        }
    } else {
        let phi = (mm - 2.0 * m[n - 1].powi(2)) / (1.0 - 2.0 * an.powi(2));
        for i in 1..n - 1 {
            a[i] = m[i] / phi.sqrt();
        }
    }
    a
}
