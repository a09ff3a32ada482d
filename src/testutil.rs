//! Test-only fixture helpers (SPEC_FULL §10.4, §11).
//!
//! Grounded on the original Python's `toolkit/utils.py::goals_wide_to_long`
//! (melt a one-row-per-variant wide table into the long `AggregatedGoalRow`
//! form) and `toolkit/testing/test_dao.py::TestDao` (an in-memory
//! `DataCollaborator` that applies the experiment's date range and filters
//! before handing rows back). Neither is a product feature — CSV/file-backed
//! fixture loading stays a Non-goal (§1) — this module only builds
//! `AggregatedGoalRow` vectors in memory for use by tests.

use crate::error::AppError;
use crate::experiment::DataCollaborator;
use crate::model::{Experiment, FilterScope};
use crate::table::AggregatedGoalRow;
use std::collections::BTreeMap;

/// One variant's wide-format row: a goal name paired with its `sum_value`,
/// and optionally a `_squared` counterpart for `sum_sqr_value`. When the
/// squared value is omitted it defaults to `sum_value` itself, mirroring the
/// Python helper's `_add_value_squared_where_missing`.
pub struct WideGoal<'a> {
    pub goal: &'a str,
    pub sum_value: f64,
    pub sum_sqr_value: Option<f64>,
}

impl<'a> WideGoal<'a> {
    pub fn new(goal: &'a str, sum_value: f64) -> Self {
        WideGoal { goal, sum_value, sum_sqr_value: None }
    }

    pub fn with_sqr(goal: &'a str, sum_value: f64, sum_sqr_value: f64) -> Self {
        WideGoal { goal, sum_value, sum_sqr_value: Some(sum_sqr_value) }
    }
}

/// Melt a wide one-row-per-variant fixture (`variant -> [goal: value]`) into
/// the long `AggregatedGoalRow` form the core consumes (§3, §4.6 step 4).
/// `count`/`sum_sqr_count`/`count_unique` are left at zero: fixtures that
/// exercise `count(...)` expressions should build rows directly instead.
pub fn goals_wide_to_long(exp_id: &str, unit_type: &str, rows: &[(&str, Vec<WideGoal>)]) -> Vec<AggregatedGoalRow> {
    let mut out = Vec::new();
    for (variant, goals) in rows {
        for g in goals {
            out.push(AggregatedGoalRow {
                exp_id: exp_id.to_string(),
                exp_variant_id: variant.to_string(),
                unit_type: unit_type.to_string(),
                agg_type: "global".to_string(),
                goal: g.goal.to_string(),
                dimensions: BTreeMap::new(),
                count: 0.0,
                sum_sqr_count: 0.0,
                sum_value: g.sum_value,
                sum_sqr_value: g.sum_sqr_value.unwrap_or(g.sum_value),
                count_unique: 0.0,
            });
        }
    }
    out
}

/// An in-memory `DataCollaborator` over a fixed fixture, applying the §6
/// "Data collaborator contract" filtering rules (exp_id scoping, date range,
/// and filter scope=exposure/goal) the way `toolkit/testing/test_dao.py`'s
/// `TestDao.get_agg_goals` does. Dates are not modelled here since none of
/// the fixtures in this crate's tests need a `date` column; callers that
/// need date-range filtering should filter their rows before construction.
pub struct FixtureDataCollaborator {
    pub rows: Vec<AggregatedGoalRow>,
}

impl FixtureDataCollaborator {
    pub fn new(rows: Vec<AggregatedGoalRow>) -> Self {
        FixtureDataCollaborator { rows }
    }
}

impl DataCollaborator for FixtureDataCollaborator {
    fn get_agg_goals(&self, experiment: &Experiment) -> Result<Vec<AggregatedGoalRow>, AppError> {
        let mut rows: Vec<AggregatedGoalRow> =
            self.rows.iter().filter(|r| r.exp_id == experiment.id).cloned().collect();

        for f in &experiment.filters {
            rows.retain(|r| {
                let is_exposure = r.goal == "exposure";
                let applies = match f.scope {
                    FilterScope::Exposure => is_exposure,
                    FilterScope::Goal => !is_exposure,
                };
                if !applies {
                    return true;
                }
                r.dimensions.get(&f.dimension).map(|v| f.values.contains(v)).unwrap_or(false)
            });
        }

        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wide_to_long_defaults_missing_squared_to_value() {
        let rows = goals_wide_to_long(
            "e",
            "T",
            &[("a", vec![WideGoal::new("bookings", 17152.0)])],
        );
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].sum_value, 17152.0);
        assert_eq!(rows[0].sum_sqr_value, 17152.0);
    }

    #[test]
    fn wide_to_long_keeps_explicit_squared_value() {
        let rows = goals_wide_to_long(
            "e",
            "T",
            &[("a", vec![WideGoal::with_sqr("bookings", 17152.0, 803105.0)])],
        );
        assert_eq!(rows[0].sum_sqr_value, 803105.0);
    }
}
