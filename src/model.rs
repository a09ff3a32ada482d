//! Core domain types: `Metric`, `Filter`, and `Experiment` (§3).
//!
//! These are the parsed, validated, request-scoped entities the orchestrator
//! (`experiment.rs`) operates on — distinct from the wire schema in
//! `server::schema`, which deserializes raw strings and hands them to the
//! constructors here for parsing.

use chrono::NaiveDate;

use crate::checks::CheckKind;
use crate::error::AppError;
use crate::expr::Expr;
use crate::goal::parse_expression;

/// A ratio of two goal expressions plus its identity (§3).
pub struct Metric {
    pub id: String,
    pub name: String,
    pub nominator: Expr,
    pub denominator: Expr,
    pub minimum_effect: Option<f64>,
    /// Presentation hint, carried through but never read by the kernel (SPEC_FULL §11).
    pub format: String,
    /// Presentation hint, carried through but never read by the kernel (SPEC_FULL §11).
    pub value_multiplier: f64,
}

impl Metric {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        nominator: &str,
        denominator: &str,
        minimum_effect: Option<f64>,
    ) -> Result<Self, AppError> {
        Ok(Metric {
            id: id.into(),
            name: name.into(),
            nominator: parse_expression(nominator)?,
            denominator: parse_expression(denominator)?,
            minimum_effect,
            format: "{:.2%}".to_string(),
            value_multiplier: 1.0,
        })
    }

    /// Convenience constructor matching `toolkit/metric.py::SimpleMetric`: wraps
    /// two bare goal names as `value(unit_type.global.<name>)` expressions
    /// (SPEC_FULL §11).
    pub fn simple(
        id: impl Into<String>,
        name: impl Into<String>,
        unit_type: &str,
        numerator_goal: &str,
        denominator_goal: &str,
        minimum_effect: Option<f64>,
    ) -> Result<Self, AppError> {
        let nominator = format!("value({unit_type}.global.{numerator_goal})");
        let denominator = format!("value({unit_type}.global.{denominator_goal})");
        Metric::new(id, name, &nominator, &denominator, minimum_effect)
    }
}

/// Which side of the pipeline a filter applies to (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterScope {
    Exposure,
    Goal,
}

/// `(dimension, values[], scope)` applied by the data collaborator before the
/// core sees rows (§3, §6).
#[derive(Debug, Clone)]
pub struct Filter {
    pub dimension: String,
    pub values: Vec<String>,
    pub scope: FilterScope,
}

/// Identity, variant layout, date window, and the metric/check/filter lists
/// that define one evaluation request (§3).
pub struct Experiment {
    pub id: String,
    pub control_variant: String,
    pub unit_type: String,
    pub variants: Option<Vec<String>>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub date_for: Option<NaiveDate>,
    pub confidence_level: f64,
    pub metrics: Vec<Metric>,
    pub checks: Vec<CheckKind>,
    pub filters: Vec<Filter>,
}

impl Experiment {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: impl Into<String>,
        control_variant: impl Into<String>,
        unit_type: impl Into<String>,
        variants: Option<Vec<String>>,
        date_from: Option<NaiveDate>,
        date_to: Option<NaiveDate>,
        date_for: Option<NaiveDate>,
        confidence_level: f64,
        metrics: Vec<Metric>,
        checks: Vec<CheckKind>,
        filters: Vec<Filter>,
    ) -> Result<Self, AppError> {
        let mut seen = std::collections::HashSet::new();
        for m in &metrics {
            if !seen.insert(m.id.clone()) {
                return Err(AppError::validation(format!("duplicate metric id '{}'", m.id)));
            }
        }

        if let Some(for_date) = date_for {
            match (date_from, date_to) {
                (Some(from), Some(to)) => {
                    if !(from <= for_date && for_date <= to) {
                        return Err(AppError::validation(
                            "date_for must lie within [date_from, date_to]",
                        ));
                    }
                }
                _ => {
                    return Err(AppError::validation(
                        "date_for requires both date_from and date_to to be set",
                    ));
                }
            }
        }
        if let (Some(from), Some(to)) = (date_from, date_to) {
            if from > to {
                return Err(AppError::validation("date_from must be <= date_to"));
            }
        }

        Ok(Experiment {
            id: id.into(),
            control_variant: control_variant.into(),
            unit_type: unit_type.into(),
            variants,
            date_from,
            date_to,
            date_for,
            confidence_level,
            metrics,
            checks,
            filters,
        })
    }

    /// The synthetic exposure goal every experiment implicitly references
    /// (§4.6 step 2): `count({unit_type}.global.exposure)`.
    pub fn exposure_expr(&self) -> Expr {
        parse_expression(&format!("count({}.global.exposure)", self.unit_type))
            .expect("synthesized exposure expression is always well-formed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_metric_id_is_rejected() {
        let m1 = Metric::new("m1", "Metric 1", "value(T.unit.a)", "count(T.unit.a)", None).unwrap();
        let m2 = Metric::new("m1", "Metric 1 dup", "value(T.unit.b)", "count(T.unit.b)", None).unwrap();
        let result = Experiment::new(
            "exp",
            "a",
            "T",
            None,
            None,
            None,
            None,
            0.95,
            vec![m1, m2],
            vec![],
            vec![],
        );
        assert!(result.is_err());
    }

    #[test]
    fn date_for_requires_full_range() {
        let result = Experiment::new(
            "exp",
            "a",
            "T",
            None,
            None,
            None,
            Some(NaiveDate::from_ymd_opt(2020, 1, 1).unwrap()),
            0.95,
            vec![],
            vec![],
            vec![],
        );
        assert!(result.is_err());
    }

    #[test]
    fn simple_metric_builds_value_over_value_expression() {
        let m = Metric::simple("ctr", "CTR", "T", "click", "exposure", None).unwrap();
        assert_eq!(m.nominator.canonical_goal_strings(), vec!["T.global.click".to_string()]);
        assert_eq!(m.denominator.canonical_goal_strings(), vec!["T.global.exposure".to_string()]);
    }
}
