//! Statistical functions for checking sampled distributions

use scilib::math::basic::erf;
use std::f64::consts::SQRT_2;

/// Cumulative distribution function for standard normal distribution
pub fn normal_cdf(x: f64) -> f64 {
    0.5 * (1.0 + erf(x / SQRT_2))
}

/// Arithmetic mean, `NaN` for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation (divides by `n`), `NaN` for an empty slice.
pub fn population_std(values: &[f64]) -> f64 {
    let m = mean(values);
    let variance = values.iter().map(|x| (x - m).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// Kolmogorov-Smirnov statistic against the standard normal distribution.
///
/// The sample is compared as given, without re-standardizing, so it checks
/// both shape and location/scale. Returns the maximum difference between the
/// empirical and theoretical CDFs; `1.0` for an empty sample.
pub fn ks_test_normal(samples: &[f64]) -> f64 {
    let n = samples.len();
    if n == 0 {
        return 1.0;
    }

    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let mut max_diff: f64 = 0.0;
    for (i, &value) in sorted.iter().enumerate() {
        let theoretical_cdf = normal_cdf(value);
        let empirical_cdf_before = i as f64 / n as f64;
        let empirical_cdf_after = (i + 1) as f64 / n as f64;

        max_diff = max_diff
            .max((empirical_cdf_before - theoretical_cdf).abs())
            .max((empirical_cdf_after - theoretical_cdf).abs());
    }

    max_diff
}

/// Critical value for the KS test at the given significance level.
///
/// For large n, uses asymptotic approximation
pub fn ks_critical_value(n: usize, alpha: f64) -> f64 {
    let c_alpha = match alpha {
        a if (a - 0.10).abs() < 1e-6 => 1.22,
        a if (a - 0.05).abs() < 1e-6 => 1.36,
        a if (a - 0.01).abs() < 1e-6 => 1.63,
        _ => 1.36, // Default to 5% significance
    };

    c_alpha / (n as f64).sqrt()
}
