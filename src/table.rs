//! `AggregatedGoalRow` table representation, variant indexing, and the
//! missing-cell filler (§3, §4.3, §9 "Dimension schema unification").
//!
//! Grounded on spec.md §9's own design note: "A design alternative to
//! column-wise masking would be to pre-bucket rows into a `(GoalRef → row-set)`
//! map; prefer this in languages without columnar tables." We follow that
//! note directly rather than forcing clarium's polars `DataFrame` idiom onto a
//! table whose dimension columns vary per request.

use std::collections::BTreeMap;

use crate::goal::GoalRef;

/// One row of the input table consumed by the core (§3).
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedGoalRow {
    pub exp_id: String,
    pub exp_variant_id: String,
    pub unit_type: String,
    pub agg_type: String,
    pub goal: String,
    /// Zero-or-more dimension columns, keyed by dimension name.
    pub dimensions: BTreeMap<String, String>,
    pub count: f64,
    pub sum_sqr_count: f64,
    pub sum_value: f64,
    pub sum_sqr_value: f64,
    pub count_unique: f64,
}

impl AggregatedGoalRow {
    /// True iff this row matches a `GoalRef`'s unit/agg/goal/predicate fields,
    /// per §9: "a row matches a GoalRef iff every dimension column equals the
    /// predicate literal under its operator."
    pub fn matches(&self, goal_ref: &GoalRef) -> bool {
        if self.unit_type != goal_ref.unit_type
            || self.agg_type != goal_ref.agg_type
            || self.goal != goal_ref.goal_name
        {
            return false;
        }
        for (dim, (op, literal)) in &goal_ref.dimension_predicates {
            let value = self.dimensions.get(dim).map(String::as_str).unwrap_or("");
            if !op.matches(value, literal) {
                return false;
            }
        }
        true
    }

    fn field(&self, column: &str) -> f64 {
        match column {
            "count" => self.count,
            "sum_sqr_count" => self.sum_sqr_count,
            "sum_value" => self.sum_value,
            "sum_sqr_value" => self.sum_sqr_value,
            "count_unique" => self.count_unique,
            _ => 0.0,
        }
    }
}

/// Dense `variant name -> index` map, built once per request (§9 "Variant
/// indexing"). The control variant is looked up by name, never by position.
#[derive(Debug, Clone)]
pub struct VariantIndex {
    order: Vec<String>,
    index: BTreeMap<String, usize>,
}

impl VariantIndex {
    pub fn new(mut variants: Vec<String>) -> Self {
        variants.sort();
        variants.dedup();
        let index = variants.iter().cloned().enumerate().map(|(i, v)| (v, i)).collect();
        VariantIndex { order: variants, index }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn position(&self, variant: &str) -> Option<usize> {
        self.index.get(variant).copied()
    }

    pub fn variants(&self) -> &[String] {
        &self.order
    }

    /// Index of the control variant, found by name (§9).
    pub fn control_index(&self, control_variant: &str) -> Option<usize> {
        self.position(control_variant)
    }

    fn zeros(&self) -> Vec<f64> {
        vec![0.0; self.order.len()]
    }

    /// Sum a column's values per variant for rows matching `goal_ref` (§4.2 `eval_agg`).
    pub fn sum_by_variant(&self, rows: &[AggregatedGoalRow], goal_ref: &GoalRef, column: &str) -> Vec<f64> {
        let mut out = self.zeros();
        for row in rows {
            if row.matches(goal_ref) {
                if let Some(i) = self.position(&row.exp_variant_id) {
                    out[i] += row.field(column);
                }
            }
        }
        out
    }
}

/// Fill in a zero row for every (variant × GoalRef) combination absent from
/// `rows`, then group-and-sum by (variant, unit_type, agg_type, goal, all
/// dimension columns) so the result has exactly one row per cell (§4.3).
pub fn fill_missing_cells(
    exp_id: &str,
    rows: &[AggregatedGoalRow],
    goal_refs: &[GoalRef],
    variants: &[String],
) -> Vec<AggregatedGoalRow> {
    let mut grouped: BTreeMap<(String, String, String, String, Vec<(String, String)>), AggregatedGoalRow> =
        BTreeMap::new();

    let key_of = |variant: &str, unit_type: &str, agg_type: &str, goal: &str, dims: &BTreeMap<String, String>| {
        (
            variant.to_string(),
            unit_type.to_string(),
            agg_type.to_string(),
            goal.to_string(),
            dims.iter().map(|(k, v)| (k.clone(), v.clone())).collect::<Vec<_>>(),
        )
    };

    for variant in variants {
        for goal_ref in goal_refs {
            let dims: BTreeMap<String, String> =
                goal_ref.dimension_predicates.iter().map(|(d, (_, lit))| (d.clone(), lit.clone())).collect();
            let key = key_of(variant, &goal_ref.unit_type, &goal_ref.agg_type, &goal_ref.goal_name, &dims);
            grouped.entry(key).or_insert_with(|| AggregatedGoalRow {
                exp_id: exp_id.to_string(),
                exp_variant_id: variant.clone(),
                unit_type: goal_ref.unit_type.clone(),
                agg_type: goal_ref.agg_type.clone(),
                goal: goal_ref.goal_name.clone(),
                dimensions: dims.clone(),
                count: 0.0,
                sum_sqr_count: 0.0,
                sum_value: 0.0,
                sum_sqr_value: 0.0,
                count_unique: 0.0,
            });
        }
    }

    for row in rows {
        let key = key_of(&row.exp_variant_id, &row.unit_type, &row.agg_type, &row.goal, &row.dimensions);
        let entry = grouped.entry(key).or_insert_with(|| AggregatedGoalRow {
            exp_id: exp_id.to_string(),
            exp_variant_id: row.exp_variant_id.clone(),
            unit_type: row.unit_type.clone(),
            agg_type: row.agg_type.clone(),
            goal: row.goal.clone(),
            dimensions: row.dimensions.clone(),
            count: 0.0,
            sum_sqr_count: 0.0,
            sum_value: 0.0,
            sum_sqr_value: 0.0,
            count_unique: 0.0,
        });
        entry.count += row.count;
        entry.sum_sqr_count += row.sum_sqr_count;
        entry.sum_value += row.sum_value;
        entry.sum_sqr_value += row.sum_sqr_value;
        entry.count_unique += row.count_unique;
    }

    grouped.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::goal::parse_expression;

    fn goal_ref(expr: &str) -> GoalRef {
        let e = parse_expression(expr).unwrap();
        e.canonical_goal_strings();
        match e {
            crate::expr::Expr::Goal(g) => *g,
            _ => panic!("expected goal leaf"),
        }
    }

    #[test]
    fn missing_variant_yields_zero_row() {
        let g = goal_ref("count(T.global.exposure)");
        let variants = vec!["a".to_string(), "b".to_string()];
        let rows = vec![AggregatedGoalRow {
            exp_id: "e".into(),
            exp_variant_id: "a".into(),
            unit_type: "T".into(),
            agg_type: "global".into(),
            goal: "exposure".into(),
            dimensions: BTreeMap::new(),
            count: 10.0,
            sum_sqr_count: 10.0,
            sum_value: 0.0,
            sum_sqr_value: 0.0,
            count_unique: 0.0,
        }];
        let filled = fill_missing_cells("e", &rows, &[g], &variants);
        let b_row = filled.iter().find(|r| r.exp_variant_id == "b").unwrap();
        assert_eq!(b_row.count, 0.0);
        assert_eq!(b_row.sum_value, 0.0);
    }
}
