//! Statistical helpers used by the evidence and reflection stages.
//!
//! The normal CDF uses the Abramowitz–Stegun erf approximation (7.1.26), the
//! chi-square CDF uses the Wilson–Hilferty cube-root transform, and the probit
//! uses the A&S 26.2.23 rational approximation. The numerics intentionally
//! match these classic approximations rather than a stats crate.

use serde::{Deserialize, Serialize};

/// Result of a two-sided significance test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignificanceTest {
    /// Test statistic
    pub statistic: f64,
    /// Degrees of freedom (fractional for Welch)
    pub degrees_of_freedom: f64,
    /// Two-sided p-value
    pub p_value: f64,
    /// Whether p < 0.05
    pub significant: bool,
}

impl SignificanceTest {
    fn from_p(statistic: f64, degrees_of_freedom: f64, p_value: f64) -> Self {
        let p_value = p_value.clamp(0.0, 1.0);
        Self {
            statistic,
            degrees_of_freedom,
            p_value,
            significant: p_value < 0.05,
        }
    }
}

/// A two-sided confidence interval for a proportion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProportionInterval {
    /// Point estimate
    pub estimate: f64,
    /// Lower bound
    pub lower: f64,
    /// Upper bound
    pub upper: f64,
    /// Confidence level the interval was built at
    pub confidence: f64,
}

/// erf via Abramowitz–Stegun 7.1.26 (max abs error ~1.5e-7).
#[must_use]
pub fn erf(x: f64) -> f64 {
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();

    let a1 = 0.254_829_592;
    let a2 = -0.284_496_736;
    let a3 = 1.421_413_741;
    let a4 = -1.453_152_027;
    let a5 = 1.061_405_429;
    let p = 0.327_591_1;

    let t = 1.0 / (1.0 + p * x);
    let y = 1.0 - (((((a5 * t + a4) * t) + a3) * t + a2) * t + a1) * t * (-x * x).exp();
    sign * y
}

/// Standard normal CDF via the erf approximation.
#[must_use]
pub fn normal_cdf(x: f64) -> f64 {
    0.5 * (1.0 + erf(x / std::f64::consts::SQRT_2))
}

/// Inverse standard normal CDF via A&S 26.2.23 (rational approximation).
#[must_use]
pub fn normal_quantile(p: f64) -> f64 {
    let p = p.clamp(1e-9, 1.0 - 1e-9);
    let (tail, sign) = if p < 0.5 { (p, -1.0) } else { (1.0 - p, 1.0) };
    let t = (-2.0 * tail.ln()).sqrt();

    let c0 = 2.515_517;
    let c1 = 0.802_853;
    let c2 = 0.010_328;
    let d1 = 1.432_788;
    let d2 = 0.189_269;
    let d3 = 0.001_308;

    let z = t - (c0 + c1 * t + c2 * t * t) / (1.0 + d1 * t + d2 * t * t + d3 * t * t * t);
    sign * z
}

/// Chi-square CDF via the Wilson–Hilferty approximation.
#[must_use]
pub fn chi_square_cdf(x: f64, k: f64) -> f64 {
    if x <= 0.0 || k <= 0.0 {
        return 0.0;
    }
    let v = 2.0 / (9.0 * k);
    let z = ((x / k).powf(1.0 / 3.0) - (1.0 - v)) / v.sqrt();
    normal_cdf(z)
}

/// Shannon entropy in nats over a (possibly unnormalized) distribution.
/// Non-positive masses are skipped.
#[must_use]
pub fn shannon_entropy(masses: &[f64]) -> f64 {
    let total: f64 = masses.iter().filter(|m| **m > 0.0).sum();
    if total <= 0.0 {
        return 0.0;
    }
    masses
        .iter()
        .filter(|m| **m > 0.0)
        .map(|m| {
            let p = m / total;
            -p * p.ln()
        })
        .sum()
}

/// Mutual information in nats of a joint probability table.
/// The table is normalized before use; empty or degenerate tables yield 0.
#[must_use]
pub fn mutual_information(joint: &[Vec<f64>]) -> f64 {
    let total: f64 = joint
        .iter()
        .flat_map(|row| row.iter())
        .filter(|p| **p > 0.0)
        .sum();
    if total <= 0.0 {
        return 0.0;
    }

    let rows = joint.len();
    let cols = joint.iter().map(Vec::len).max().unwrap_or(0);
    let mut row_marginals = vec![0.0; rows];
    let mut col_marginals = vec![0.0; cols];
    for (i, row) in joint.iter().enumerate() {
        for (j, mass) in row.iter().enumerate() {
            if *mass > 0.0 {
                row_marginals[i] += mass / total;
                col_marginals[j] += mass / total;
            }
        }
    }

    let mut mi = 0.0;
    for (i, row) in joint.iter().enumerate() {
        for (j, mass) in row.iter().enumerate() {
            if *mass > 0.0 {
                let p = mass / total;
                mi += p * (p / (row_marginals[i] * col_marginals[j])).ln();
            }
        }
    }
    mi.max(0.0)
}

/// Welch's two-sample t-test with a normal-approximated p-value.
/// Returns `None` when either sample has fewer than two observations or zero
/// combined variance.
#[must_use]
pub fn welch_t_test(a: &[f64], b: &[f64]) -> Option<SignificanceTest> {
    if a.len() < 2 || b.len() < 2 {
        return None;
    }
    let (mean_a, var_a) = mean_and_variance(a);
    let (mean_b, var_b) = mean_and_variance(b);
    let na = a.len() as f64;
    let nb = b.len() as f64;

    let se2 = var_a / na + var_b / nb;
    if se2 <= 0.0 {
        return None;
    }

    let t = (mean_a - mean_b) / se2.sqrt();
    let df = se2 * se2
        / ((var_a / na).powi(2) / (na - 1.0) + (var_b / nb).powi(2) / (nb - 1.0));
    let p = 2.0 * (1.0 - normal_cdf(t.abs()));
    Some(SignificanceTest::from_p(t, df, p))
}

/// Chi-square test of independence on a contingency table of counts.
/// Returns `None` for degenerate tables (fewer than 2 rows/columns or a zero
/// marginal).
#[must_use]
pub fn chi_square_test(observed: &[Vec<f64>]) -> Option<SignificanceTest> {
    let rows = observed.len();
    let cols = observed.first().map(Vec::len)?;
    if rows < 2 || cols < 2 || observed.iter().any(|r| r.len() != cols) {
        return None;
    }

    let total: f64 = observed.iter().flat_map(|r| r.iter()).sum();
    if total <= 0.0 {
        return None;
    }
    let row_totals: Vec<f64> = observed.iter().map(|r| r.iter().sum()).collect();
    let col_totals: Vec<f64> = (0..cols)
        .map(|j| observed.iter().map(|r| r[j]).sum())
        .collect();
    if row_totals.iter().any(|t| *t <= 0.0) || col_totals.iter().any(|t| *t <= 0.0) {
        return None;
    }

    let mut statistic = 0.0;
    for (i, row) in observed.iter().enumerate() {
        for (j, obs) in row.iter().enumerate() {
            let expected = row_totals[i] * col_totals[j] / total;
            statistic += (obs - expected).powi(2) / expected;
        }
    }

    let df = ((rows - 1) * (cols - 1)) as f64;
    let p = 1.0 - chi_square_cdf(statistic, df);
    Some(SignificanceTest::from_p(statistic, df, p))
}

/// Pearson correlation with a Fisher-z significance test.
/// Returns `None` for fewer than 4 paired observations or zero variance.
#[must_use]
pub fn correlation_test(x: &[f64], y: &[f64]) -> Option<(f64, SignificanceTest)> {
    let n = x.len();
    if n != y.len() || n < 4 {
        return None;
    }
    let nf = n as f64;
    let mean_x = x.iter().sum::<f64>() / nf;
    let mean_y = y.iter().sum::<f64>() / nf;

    let mut sxy = 0.0;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    for i in 0..n {
        let dx = x[i] - mean_x;
        let dy = y[i] - mean_y;
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }
    if sxx <= 0.0 || syy <= 0.0 {
        return None;
    }

    let r = (sxy / (sxx * syy).sqrt()).clamp(-0.999_999, 0.999_999);
    let z = r.atanh() * (nf - 3.0).sqrt();
    let p = 2.0 * (1.0 - normal_cdf(z.abs()));
    Some((r, SignificanceTest::from_p(z, nf - 3.0, p)))
}

/// Cohen's d with a pooled standard deviation.
/// Returns `None` when either sample has fewer than two observations or the
/// pooled variance is zero.
#[must_use]
pub fn cohens_d(a: &[f64], b: &[f64]) -> Option<f64> {
    if a.len() < 2 || b.len() < 2 {
        return None;
    }
    let (mean_a, var_a) = mean_and_variance(a);
    let (mean_b, var_b) = mean_and_variance(b);
    let na = a.len() as f64;
    let nb = b.len() as f64;
    let pooled = (((na - 1.0) * var_a + (nb - 1.0) * var_b) / (na + nb - 2.0)).sqrt();
    if pooled <= 0.0 {
        return None;
    }
    Some((mean_a - mean_b) / pooled)
}

/// Wilson score interval for a proportion.
#[must_use]
pub fn proportion_ci(successes: u64, trials: u64, confidence: f64) -> Option<ProportionInterval> {
    if trials == 0 || successes > trials {
        return None;
    }
    let confidence = confidence.clamp(0.5, 0.999_999);
    let n = trials as f64;
    let p = successes as f64 / n;
    let z = normal_quantile(1.0 - (1.0 - confidence) / 2.0);
    let z2 = z * z;

    let denom = 1.0 + z2 / n;
    let center = (p + z2 / (2.0 * n)) / denom;
    let half = (z / denom) * (p * (1.0 - p) / n + z2 / (4.0 * n * n)).sqrt();

    Some(ProportionInterval {
        estimate: p,
        lower: (center - half).max(0.0),
        upper: (center + half).min(1.0),
        confidence,
    })
}

fn mean_and_variance(xs: &[f64]) -> (f64, f64) {
    let n = xs.len() as f64;
    let mean = xs.iter().sum::<f64>() / n;
    let var = xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (mean, var)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_erf_reference_points() {
        assert!(erf(0.0).abs() < 1e-12);
        assert!((erf(1.0) - 0.842_700_79).abs() < 1e-6);
        assert!((erf(-1.0) + 0.842_700_79).abs() < 1e-6);
        assert!((erf(3.0) - 0.999_977_91).abs() < 1e-6);
    }

    #[test]
    fn test_normal_cdf_symmetry() {
        assert!((normal_cdf(0.0) - 0.5).abs() < 1e-9);
        assert!((normal_cdf(1.96) - 0.975).abs() < 1e-3);
        assert!((normal_cdf(-1.96) - 0.025).abs() < 1e-3);
    }

    #[test]
    fn test_normal_quantile_inverts_cdf() {
        for p in [0.05, 0.25, 0.5, 0.9, 0.975] {
            let z = normal_quantile(p);
            assert!((normal_cdf(z) - p).abs() < 2e-3, "p={p}");
        }
    }

    #[test]
    fn test_chi_square_cdf_median_near_df() {
        // For k df, the median of chi-square is roughly k(1 - 2/(9k))^3
        let k: f64 = 5.0;
        let median = k * (1.0 - 2.0 / (9.0 * k)).powi(3);
        assert!((chi_square_cdf(median, k) - 0.5).abs() < 0.01);
    }

    #[test]
    fn test_entropy_uniform_is_log_n() {
        let h = shannon_entropy(&[0.25, 0.25, 0.25, 0.25]);
        assert!((h - 4f64.ln()).abs() < 1e-9);
    }

    #[test]
    fn test_entropy_degenerate_is_zero() {
        assert_eq!(shannon_entropy(&[1.0, 0.0, 0.0]), 0.0);
        assert_eq!(shannon_entropy(&[]), 0.0);
    }

    #[test]
    fn test_mutual_information_independent_is_zero() {
        let joint = vec![vec![0.25, 0.25], vec![0.25, 0.25]];
        assert!(mutual_information(&joint).abs() < 1e-9);
    }

    #[test]
    fn test_mutual_information_dependent_is_positive() {
        let joint = vec![vec![0.5, 0.0], vec![0.0, 0.5]];
        assert!((mutual_information(&joint) - 2f64.ln()).abs() < 1e-9);
    }

    #[test]
    fn test_welch_detects_separated_samples() {
        let a = vec![1.0, 1.1, 0.9, 1.05, 0.95];
        let b = vec![2.0, 2.1, 1.9, 2.05, 1.95];
        let test = welch_t_test(&a, &b).unwrap();
        assert!(test.significant);
        assert!(test.statistic < 0.0);
    }

    #[test]
    fn test_welch_rejects_tiny_samples() {
        assert!(welch_t_test(&[1.0], &[2.0, 3.0]).is_none());
    }

    #[test]
    fn test_chi_square_detects_association() {
        let observed = vec![vec![30.0, 10.0], vec![10.0, 30.0]];
        let test = chi_square_test(&observed).unwrap();
        assert!(test.significant);
        assert_eq!(test.degrees_of_freedom, 1.0);
    }

    #[test]
    fn test_chi_square_balanced_not_significant() {
        let observed = vec![vec![20.0, 20.0], vec![20.0, 20.0]];
        let test = chi_square_test(&observed).unwrap();
        assert!(!test.significant);
    }

    #[test]
    fn test_chi_square_rejects_zero_marginal() {
        let observed = vec![vec![0.0, 0.0], vec![10.0, 30.0]];
        assert!(chi_square_test(&observed).is_none());
    }

    #[test]
    fn test_correlation_perfect_line() {
        let x = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let y = vec![2.0, 4.0, 6.0, 8.0, 10.0];
        let (r, test) = correlation_test(&x, &y).unwrap();
        assert!(r > 0.999);
        assert!(test.significant);
    }

    #[test]
    fn test_correlation_requires_variance() {
        let x = vec![1.0, 1.0, 1.0, 1.0];
        let y = vec![2.0, 4.0, 6.0, 8.0];
        assert!(correlation_test(&x, &y).is_none());
    }

    #[test]
    fn test_cohens_d_sign_and_scale() {
        let a = vec![2.0, 2.2, 1.8, 2.1, 1.9];
        let b = vec![1.0, 1.2, 0.8, 1.1, 0.9];
        let d = cohens_d(&a, &b).unwrap();
        assert!(d > 2.0);
        assert!(cohens_d(&b, &a).unwrap() < -2.0);
    }

    #[test]
    fn test_proportion_ci_contains_estimate() {
        let ci = proportion_ci(30, 100, 0.95).unwrap();
        assert!((ci.estimate - 0.3).abs() < 1e-12);
        assert!(ci.lower < 0.3 && 0.3 < ci.upper);
        assert!(ci.lower >= 0.0 && ci.upper <= 1.0);
    }

    #[test]
    fn test_proportion_ci_narrows_with_n() {
        let small = proportion_ci(5, 10, 0.95).unwrap();
        let large = proportion_ci(500, 1000, 0.95).unwrap();
        assert!((large.upper - large.lower) < (small.upper - small.lower));
    }

    #[test]
    fn test_proportion_ci_rejects_bad_input() {
        assert!(proportion_ci(0, 0, 0.95).is_none());
        assert!(proportion_ci(5, 3, 0.95).is_none());
    }
}
