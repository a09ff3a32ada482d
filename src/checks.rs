//! Check evaluators: SRM (sample-ratio mismatch) and SumRatio (§4.5).
//!
//! Grounded on `toolkit/check.py`'s `SrmCheck.evaluate_agg`: collect exposure
//! counts per variant from the denominator expression, run a chi-square
//! goodness-of-fit test against a uniform expected distribution. Division by
//! zero in the expected counts is tolerated (§4.5) and surfaces as NaN/Inf,
//! exactly as the core's numeric-anomalies-are-data design note requires (§9).

use statrs::distribution::{ChiSquared, ContinuousCDF};

use crate::error::AppError;
use crate::expr::Expr;
use crate::table::{AggregatedGoalRow, VariantIndex};

/// One check's output row set: `(variable_id, value)` pairs (§3 Evaluation.checks).
pub type CheckStats = Vec<(String, f64)>;

/// Chi-square goodness-of-fit against a uniform expected distribution.
/// Returns `(test_stat, p_value)`. NaN/Inf in `observed` or a zero expected
/// count are numeric anomalies, not errors (§4.5) — they flow straight through.
pub fn chisquare_goodness_of_fit(observed: &[f64]) -> (f64, f64) {
    let k = observed.len();
    let total: f64 = observed.iter().sum();
    let expected = total / k as f64;

    let stat: f64 = observed.iter().map(|&o| (o - expected).powi(2) / expected).sum();

    let df = (k - 1).max(1) as f64;
    let p = match ChiSquared::new(df) {
        Ok(dist) => 1.0 - dist.cdf(stat),
        Err(_) => f64::NAN,
    };
    (stat, p)
}

/// SRM: sample-ratio mismatch check over exposure counts (§4.5).
pub struct SrmCheck {
    pub id: i64,
    pub name: String,
    pub denominator: Expr,
    pub confidence_level: f64,
}

impl SrmCheck {
    pub const DEFAULT_CONFIDENCE_LEVEL: f64 = 0.999;

    pub fn new(id: i64, name: impl Into<String>, denominator: &str, confidence_level: Option<f64>) -> Result<Self, AppError> {
        Ok(SrmCheck {
            id,
            name: name.into(),
            denominator: crate::goal::parse_expression(denominator)?,
            confidence_level: confidence_level.unwrap_or(Self::DEFAULT_CONFIDENCE_LEVEL),
        })
    }

    pub fn evaluate(&self, variants: &VariantIndex, rows: &[AggregatedGoalRow]) -> Result<CheckStats, AppError> {
        let exposures = self.denominator.eval_agg(variants, rows);
        if exposures.is_empty() {
            return Err(AppError::check("SRM check has no variants to compare"));
        }
        let (stat, p) = chisquare_goodness_of_fit(&exposures);
        Ok(vec![
            ("p_value".to_string(), p),
            ("test_stat".to_string(), stat),
            ("confidence_level".to_string(), self.confidence_level),
        ])
    }
}

/// SumRatio: ratio of two summed goal counts vs. a threshold (§4.5).
pub struct SumRatioCheck {
    pub id: i64,
    pub name: String,
    pub nominator: Expr,
    pub denominator: Expr,
    pub max_ratio: f64,
    pub confidence_level: f64,
}

impl SumRatioCheck {
    pub const DEFAULT_CONFIDENCE_LEVEL: f64 = 0.999;
    pub const DEFAULT_MAX_RATIO: f64 = 0.01;

    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: i64,
        name: impl Into<String>,
        nominator: &str,
        denominator: &str,
        max_ratio: Option<f64>,
        confidence_level: Option<f64>,
    ) -> Result<Self, AppError> {
        Ok(SumRatioCheck {
            id,
            name: name.into(),
            nominator: crate::goal::parse_expression(nominator)?,
            denominator: crate::goal::parse_expression(denominator)?,
            max_ratio: max_ratio.unwrap_or(Self::DEFAULT_MAX_RATIO),
            confidence_level: confidence_level.unwrap_or(Self::DEFAULT_CONFIDENCE_LEVEL),
        })
    }

    pub fn evaluate(&self, variants: &VariantIndex, rows: &[AggregatedGoalRow]) -> Result<CheckStats, AppError> {
        let nom_vec = self.nominator.eval_agg(variants, rows);
        let denom_vec = self.denominator.eval_agg(variants, rows);
        if nom_vec.is_empty() || denom_vec.is_empty() {
            return Err(AppError::check("SumRatio check has no variants to compare"));
        }
        let sum_nom: f64 = nom_vec.iter().sum();
        let sum_denom: f64 = denom_vec.iter().sum();
        let sum_ratio = sum_nom / sum_denom;

        let (stat, p) = chisquare_goodness_of_fit(&[sum_denom, sum_denom - sum_nom]);
        Ok(vec![
            ("sum_ratio".to_string(), sum_ratio),
            ("max_sum_ratio".to_string(), self.max_ratio),
            ("p_value".to_string(), p),
            ("test_stat".to_string(), stat),
            ("confidence_level".to_string(), self.confidence_level),
        ])
    }
}

/// A check is either an SRM or a SumRatio evaluator; each runs in its own
/// try-scope at the orchestrator level (§9 "Check isolation").
pub enum CheckKind {
    Srm(SrmCheck),
    SumRatio(SumRatioCheck),
}

impl CheckKind {
    pub fn id(&self) -> i64 {
        match self {
            CheckKind::Srm(c) => c.id,
            CheckKind::SumRatio(c) => c.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            CheckKind::Srm(c) => &c.name,
            CheckKind::SumRatio(c) => &c.name,
        }
    }

    pub fn evaluate(&self, variants: &VariantIndex, rows: &[AggregatedGoalRow]) -> Result<CheckStats, AppError> {
        match self {
            CheckKind::Srm(c) => c.evaluate(variants, rows),
            CheckKind::SumRatio(c) => c.evaluate(variants, rows),
        }
    }

    /// Union of goal references needed to evaluate this check (for §4.6 step 2).
    pub fn collect_goal_refs(&self, out: &mut Vec<crate::goal::GoalRef>) {
        match self {
            CheckKind::Srm(c) => c.denominator.collect_goal_refs(out),
            CheckKind::SumRatio(c) => {
                c.nominator.collect_goal_refs(out);
                c.denominator.collect_goal_refs(out);
            }
        }
    }

    pub fn unify_dimensions(&mut self, all_dimensions: &std::collections::BTreeSet<String>) {
        match self {
            CheckKind::Srm(c) => c.denominator.unify_dimensions(all_dimensions),
            CheckKind::SumRatio(c) => {
                c.nominator.unify_dimensions(all_dimensions);
                c.denominator.unify_dimensions(all_dimensions);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::goal::parse_expression;
    use std::collections::BTreeMap;

    fn row(variant: &str, goal: &str, count: f64) -> AggregatedGoalRow {
        AggregatedGoalRow {
            exp_id: "test-conversion".into(),
            exp_variant_id: variant.into(),
            unit_type: "T".into(),
            agg_type: "global".into(),
            goal: goal.into(),
            dimensions: BTreeMap::new(),
            count,
            sum_sqr_count: count,
            sum_value: 0.0,
            sum_sqr_value: 0.0,
            count_unique: 0.0,
        }
    }

    #[test]
    fn srm_end_to_end_fixture() {
        let variants = VariantIndex::new(vec!["a".into(), "b".into(), "c".into()]);
        let rows = vec![row("a", "exposure", 21.0), row("b", "exposure", 26.0), row("c", "exposure", 30.0)];
        let denominator = parse_expression("count(T.global.exposure)").unwrap();
        let check = SrmCheck { id: 1, name: "SRM".into(), denominator, confidence_level: 0.999 };
        let stats = check.evaluate(&variants, &rows).unwrap();
        let p = stats.iter().find(|(k, _)| k == "p_value").unwrap().1;
        let stat = stats.iter().find(|(k, _)| k == "test_stat").unwrap().1;
        assert!((p - 0.4528).abs() < 0.01);
        assert!((stat - 1.584).abs() < 0.01);
    }

    #[test]
    fn sum_ratio_emits_all_five_variables() {
        let variants = VariantIndex::new(vec!["a".into(), "b".into(), "c".into()]);
        let rows = vec![row("a", "exposure", 21.0), row("b", "exposure", 26.0), row("c", "exposure", 30.0)];
        let nominator = parse_expression("count(T.global.exposure)").unwrap();
        let denominator = parse_expression("count(T.global.exposure)").unwrap();
        let check = SumRatioCheck {
            id: 2,
            name: "SumRatio".into(),
            nominator,
            denominator,
            max_ratio: 0.01,
            confidence_level: 0.999,
        };
        let stats = check.evaluate(&variants, &rows).unwrap();
        assert_eq!(stats.len(), 5);
        let ratio = stats.iter().find(|(k, _)| k == "sum_ratio").unwrap().1;
        assert!(ratio >= 0.0);
    }
}
