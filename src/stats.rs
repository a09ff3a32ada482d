//! The statistical kernel (§4.4): Welch's t-test on relative difference,
//! Welch–Satterthwaite degrees of freedom, Holm–Bonferroni multi-comparison
//! correction, O'Brien–Fleming alpha spending, and sample-size/power formulas.
//!
//! Distribution CDFs/PPFs come from `statrs` (Normal, StudentsT) rather than a
//! hand-rolled numerical approximation — the same "reach for the crate that
//! already does this" approach clarium takes for its own dependency stack.

use statrs::distribution::{ContinuousCDF, Normal, StudentsT};

pub const DEFAULT_CONFIDENCE_LEVEL: f64 = 0.95;
pub const DEFAULT_POWER: f64 = 0.8;

fn std_normal() -> Normal {
    Normal::new(0.0, 1.0).expect("standard normal parameters are always valid")
}

/// Standard normal CDF, Φ.
pub fn norm_cdf(x: f64) -> f64 {
    if x.is_nan() {
        return f64::NAN;
    }
    std_normal().cdf(x)
}

/// Standard normal quantile (inverse CDF), Φ⁻¹.
pub fn norm_ppf(p: f64) -> f64 {
    if !(0.0..=1.0).contains(&p) {
        return f64::NAN;
    }
    std_normal().inverse_cdf(p)
}

/// Student's t CDF with `df` degrees of freedom. Non-finite or non-positive
/// `df` is a numeric anomaly, not an error (§9): it propagates as NaN.
pub fn t_cdf(x: f64, df: f64) -> f64 {
    match StudentsT::new(0.0, 1.0, df) {
        Ok(t) => t.cdf(x),
        Err(_) => f64::NAN,
    }
}

/// Student's t quantile (inverse CDF) with `df` degrees of freedom.
pub fn t_ppf(p: f64, df: f64) -> f64 {
    if !(0.0..=1.0).contains(&p) {
        return f64::NAN;
    }
    match StudentsT::new(0.0, 1.0, df) {
        Ok(t) => t.inverse_cdf(p),
        Err(_) => f64::NAN,
    }
}

/// Per-variant descriptive moments derived from an `AggregatedGoalRow` triple.
#[derive(Debug, Clone, Copy)]
pub struct Moments {
    pub count: f64,
    pub mean: f64,
    pub std: f64,
}

impl Moments {
    /// `mean = sum_value/count`, `std = sqrt((sum_sqr_value - sum_value^2/count)/(count-1))` (§4.4).
    pub fn from_sums(count: f64, sum_value: f64, sum_sqr_value: f64) -> Self {
        let mean = sum_value / count;
        let std = ((sum_sqr_value - sum_value * sum_value / count) / (count - 1.0)).sqrt();
        Moments { count, mean, std }
    }
}

/// Result of Welch's t-test on the relative difference of one treatment vs. control.
#[derive(Debug, Clone, Copy)]
pub struct WelchResult {
    pub rel_diff: f64,
    pub rel_se: f64,
    pub t: f64,
    pub df: f64,
    pub p: f64,
    pub conf_int: f64,
}

/// Welch's t-test on relative difference (§4.4). `alpha_half = confidence_level + (1-confidence_level)/2`.
pub fn welch_ttest(control: Moments, treatment: Moments, confidence_level: f64) -> WelchResult {
    let (mean_0, std_0, count_0) = (control.mean, control.std, control.count);
    let (mean_i, std_i, count_i) = (treatment.mean, treatment.std, treatment.count);

    let rel_diff = (mean_i - mean_0) / mean_0.abs();
    let rel_se = ((mean_i * mean_i * std_0 * std_0) / (mean_0 * mean_0 * count_0) + (std_i * std_i) / count_i).sqrt()
        / mean_0;
    let t = rel_diff / rel_se;

    let num = (std_0 * std_0 / count_0 + std_i * std_i / count_i).powi(2);
    let den = std_0.powi(4) / (count_0 * count_0 * (count_0 - 1.0)) + std_i.powi(4) / (count_i * count_i * (count_i - 1.0));
    let df = round5(num / den).trunc();

    let p = 2.0 * (1.0 - t_cdf(t.abs(), df));
    let alpha_half = confidence_level + (1.0 - confidence_level) / 2.0;
    let conf_int = rel_se * t_ppf(alpha_half, df);

    WelchResult { rel_diff, rel_se, t, df, p, conf_int }
}

fn round5(x: f64) -> f64 {
    (x * 1e5).round() / 1e5
}

/// Holm–Bonferroni step-down correction across `k-1` treatment p-values,
/// applied only when `k >= 3` (§4.4). Returns adjusted p-values in the same
/// order as the input.
pub fn holm_bonferroni(pvalues: &[f64]) -> Vec<f64> {
    let k = pvalues.len();
    let mut indexed: Vec<(usize, f64)> = pvalues.iter().copied().enumerate().collect();
    indexed.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

    let mut adjusted_sorted = vec![0.0; k];
    let mut running_max = 0.0_f64;
    for (rank, &(_, p)) in indexed.iter().enumerate() {
        let multiplier = (k - rank) as f64;
        let candidate = (multiplier * p).min(1.0);
        running_max = running_max.max(candidate);
        adjusted_sorted[rank] = running_max;
    }

    let mut out = vec![0.0; k];
    for (rank, &(orig_idx, _)) in indexed.iter().enumerate() {
        out[orig_idx] = adjusted_sorted[rank];
    }
    out
}

/// Widen a raw confidence interval per the Holm-adjusted p-value (§4.4):
/// `alpha_adj = (adj_p/raw_p) * alpha` (ratio treated as 1 when `raw_p == 0`),
/// `conf_int_adj = se * T_ppf(1 - alpha_adj/2, df)`.
pub fn widen_conf_int_for_holm(se: f64, df: f64, alpha: f64, raw_p: f64, adj_p: f64) -> f64 {
    let ratio = if raw_p == 0.0 { 1.0 } else { adj_p / raw_p };
    let alpha_adj = ratio * alpha;
    se * t_ppf(1.0 - alpha_adj / 2.0, df)
}

/// O'Brien–Fleming alpha spending (§4.4). `total_length`/`actual_day` are in
/// days; `actual_day` must already be clamped to `[1, total_length]` by the
/// caller. Returns the *working confidence level* for this evaluation
/// (`1 - alpha_spent`).
pub fn obf_alpha_spending(confidence_level: f64, total_length: f64, actual_day: f64) -> f64 {
    let alpha = 1.0 - confidence_level;
    let t = actual_day / total_length;
    let q = norm_ppf(1.0 - alpha / 2.0);
    let alpha_spent = 2.0 - 2.0 * norm_cdf(q / t.sqrt());
    round4(1.0 - alpha_spent)
}

fn round4(x: f64) -> f64 {
    (x * 1e4).round() / 1e4
}

/// Required sample size per variant (§4.4), general form. `alpha* = alpha/(k-1)`
/// (Bonferroni over treatments). Errors on `minimum_effect <= 0` or `n_variants < 2`.
pub fn required_sample_size_per_variant(
    confidence_level: f64,
    power: f64,
    n_variants: u32,
    minimum_effect: f64,
    mean_0: f64,
    std_0: f64,
    std_i: Option<f64>,
) -> Result<f64, String> {
    if minimum_effect <= 0.0 {
        return Err(format!("minimum_effect must be > 0, got {minimum_effect}"));
    }
    if n_variants < 2 {
        return Err(format!("n_variants must be >= 2, got {n_variants}"));
    }
    let std_i = std_i.unwrap_or(std_0);
    let alpha = 1.0 - confidence_level;
    let alpha_star = alpha / (n_variants - 1) as f64;
    let z_alpha = norm_ppf(1.0 - alpha_star / 2.0);
    let z_power = norm_ppf(power);
    let confidence_and_power = (z_alpha + z_power).powi(2);
    let two_vars = std_0 * std_0 + std_i * std_i;
    let delta = mean_0 * minimum_effect;
    Ok(confidence_and_power * two_vars / (delta * delta))
}

/// Bernoulli convenience form: `std_0^2 = p(1-p)`, `std_i^2 = p'(1-p')` with
/// `p' = p(1+MEI)` (§4.4). Errors on `p not in [0,1]` in addition to the
/// general-form errors.
pub fn required_sample_size_per_variant_bernoulli(
    confidence_level: f64,
    power: f64,
    n_variants: u32,
    minimum_effect: f64,
    p: f64,
) -> Result<f64, String> {
    if !(0.0..=1.0).contains(&p) {
        return Err(format!("p must be in [0, 1], got {p}"));
    }
    let p_prime = p * (1.0 + minimum_effect);
    let std_0 = (p * (1.0 - p)).sqrt();
    let std_i = (p_prime * (1.0 - p_prime)).sqrt();
    required_sample_size_per_variant(confidence_level, power, n_variants, minimum_effect, p, std_0, Some(std_i))
}

/// Achieved power from a realized sample size `n` against the required size
/// `n_req` (§4.4). NaN when `n_variants < 2`.
pub fn power_from_required_sample_size_per_variant(
    confidence_level: f64,
    n_variants: u32,
    n: f64,
    n_req: f64,
) -> f64 {
    if n_variants < 2 {
        return f64::NAN;
    }
    let alpha = 1.0 - confidence_level;
    let alpha_star = alpha / (n_variants - 1) as f64;
    let z_alpha = norm_ppf(1.0 - alpha_star / 2.0);
    let z_beta = (n / n_req).sqrt() * (z_alpha + norm_ppf(DEFAULT_POWER)) - z_alpha;
    norm_cdf(z_beta)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn welch_ttest_matches_testable_property() {
        let control = Moments { count: 1000.0, mean: 1.0, std: 0.5 };
        let treatment = Moments { count: 1000.0, mean: 1.05, std: 0.5 };
        let r = welch_ttest(control, treatment, 0.95);
        assert!((r.rel_diff - 0.05).abs() < 1e-9);
        assert!(r.p > 0.0 && r.p < 0.05);
        assert!(r.conf_int > 0.0);
        assert!(r.df > 1990.0 && r.df < 2000.0);
    }

    #[test]
    fn obf_alpha_spending_matches_fixed_points() {
        assert!((obf_alpha_spending(0.95, 14.0, 14.0) - 0.95).abs() < 1e-3);
        assert!((obf_alpha_spending(0.95, 14.0, 1.0) - 1.0).abs() < 1e-2);
        assert!((obf_alpha_spending(0.95, 28.0, 28.0) - 0.95).abs() < 1e-3);
    }

    #[test]
    fn obf_alpha_spending_is_deterministic_in_alpha_total_actual() {
        let a = obf_alpha_spending(0.95, 10.0, 6.0);
        let b = obf_alpha_spending(0.95, 10.0, 6.0);
        assert_eq!(a, b);
    }

    #[test]
    fn sample_size_equal_variance() {
        let n = required_sample_size_per_variant(0.95, 0.8, 2, 0.10, 0.2, 1.2, None).unwrap();
        assert!((n - 56512.0).abs() / 56512.0 < 0.01);
    }

    #[test]
    fn sample_size_bernoulli() {
        let n2 = required_sample_size_per_variant_bernoulli(0.95, 0.8, 2, 0.05, 0.4).unwrap();
        assert!((n2 - 9490.0).abs() / 9490.0 < 0.02);
        let n3 = required_sample_size_per_variant_bernoulli(0.95, 0.8, 3, 0.05, 0.4).unwrap();
        assert!((n3 - 11455.0).abs() / 11455.0 < 0.02);
    }

    #[test]
    fn sample_size_rejects_invalid_inputs() {
        assert!(required_sample_size_per_variant(0.95, 0.8, 2, -0.1, 0.2, 1.2, None).is_err());
        assert!(required_sample_size_per_variant(0.95, 0.8, 1, 0.1, 0.2, 1.2, None).is_err());
        assert!(required_sample_size_per_variant_bernoulli(0.95, 0.8, 2, 0.05, 1.5).is_err());
    }

    #[test]
    fn holm_bonferroni_is_monotonic_and_bounded() {
        let raw = vec![0.2, 0.001, 0.04];
        let adj = holm_bonferroni(&raw);
        for p in &adj {
            assert!(*p <= 1.0);
        }
        assert!(adj[1] <= adj[2]);
    }

    /// §9 "Sequential analysis idempotence": `spending(alpha, T, T) == alpha`
    /// for any total length, not just the fixed points in §8.
    #[test]
    fn obf_alpha_spending_hits_full_confidence_at_any_total_length() {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        for _ in 0..50 {
            let total_length = rng.gen_range(1.0..365.0);
            let confidence_level = rng.gen_range(0.80..0.999);
            let spent = obf_alpha_spending(confidence_level, total_length, total_length);
            assert!((spent - confidence_level).abs() < 1e-3, "total_length={total_length}, confidence_level={confidence_level}, got={spent}");
        }
    }

    /// Adjusted p-values from Holm-Bonferroni must never exceed 1 and must
    /// never rank-invert the sorted raw p-values, for arbitrary random inputs.
    #[test]
    fn holm_bonferroni_is_monotonic_for_random_pvalues() {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        for _ in 0..50 {
            let k = rng.gen_range(2..8);
            let raw: Vec<f64> = (0..k).map(|_| rng.gen_range(0.0..1.0)).collect();
            let adj = holm_bonferroni(&raw);
            for p in &adj {
                assert!(*p <= 1.0 && *p >= 0.0);
            }
            let mut indexed: Vec<(usize, f64)> = raw.iter().copied().enumerate().collect();
            indexed.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
            for w in indexed.windows(2) {
                assert!(adj[w[0].0] <= adj[w[1].0] + 1e-12);
            }
        }
    }
}
