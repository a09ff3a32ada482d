//! The expression tree produced by the goal-algebra parser, and its evaluator
//! (§3 "Expression", §4.2).
//!
//! Per §9 "Expression tree ownership": each parse produces a fresh tree, not a
//! DAG; `Box` children are the natural fit without arena bookkeeping at this
//! tree size.

use std::collections::BTreeSet;

use crate::goal::GoalRef;
use crate::table::{AggregatedGoalRow, VariantIndex};

#[derive(Debug, Clone)]
pub enum Expr {
    Number(f64),
    Goal(Box<GoalRef>),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    Div(Box<Expr>, Box<Expr>),
    /// "Subtract in value/count space, add in squared-value space" (§3).
    Tilde(Box<Expr>, Box<Expr>),
}

fn elementwise(a: &[f64], b: &[f64], f: impl Fn(f64, f64) -> f64) -> Vec<f64> {
    a.iter().zip(b.iter()).map(|(&x, &y)| f(x, y)).collect()
}

impl Expr {
    /// `eval_agg` over `count`/`sum_value` style columns (§4.2).
    pub fn eval_agg(&self, variants: &VariantIndex, rows: &[AggregatedGoalRow]) -> Vec<f64> {
        match self {
            Expr::Number(n) => vec![*n; variants.len()],
            Expr::Goal(g) => variants.sum_by_variant(rows, g, g.column),
            Expr::Add(a, b) => elementwise(&a.eval_agg(variants, rows), &b.eval_agg(variants, rows), |x, y| x + y),
            Expr::Sub(a, b) => elementwise(&a.eval_agg(variants, rows), &b.eval_agg(variants, rows), |x, y| x - y),
            Expr::Mul(a, b) => elementwise(&a.eval_agg(variants, rows), &b.eval_agg(variants, rows), |x, y| x * y),
            Expr::Div(a, b) => elementwise(&a.eval_agg(variants, rows), &b.eval_agg(variants, rows), |x, y| x / y),
            Expr::Tilde(a, b) => elementwise(&a.eval_agg(variants, rows), &b.eval_agg(variants, rows), |x, y| x - y),
        }
    }

    /// `eval_sqr` over `sum_sqr_*` columns, combining per §4.2's per-operator rule:
    /// `+` adds sqrs, `-` subtracts sqrs, `*` multiplies sqrs, `/` divides sqrs,
    /// `~` adds sqrs (while its `eval_agg` subtracts values).
    pub fn eval_sqr(&self, variants: &VariantIndex, rows: &[AggregatedGoalRow]) -> Vec<f64> {
        match self {
            Expr::Number(n) => vec![n * n; variants.len()],
            Expr::Goal(g) => variants.sum_by_variant(rows, g, g.column_sqr),
            Expr::Add(a, b) => elementwise(&a.eval_sqr(variants, rows), &b.eval_sqr(variants, rows), |x, y| x + y),
            Expr::Sub(a, b) => elementwise(&a.eval_sqr(variants, rows), &b.eval_sqr(variants, rows), |x, y| x - y),
            Expr::Mul(a, b) => elementwise(&a.eval_sqr(variants, rows), &b.eval_sqr(variants, rows), |x, y| x * y),
            Expr::Div(a, b) => elementwise(&a.eval_sqr(variants, rows), &b.eval_sqr(variants, rows), |x, y| x / y),
            Expr::Tilde(a, b) => elementwise(&a.eval_sqr(variants, rows), &b.eval_sqr(variants, rows), |x, y| x + y),
        }
    }

    /// Collect every `GoalRef` leaf in this tree (cloned), for the orchestrator's
    /// union-of-referenced-goals step (§4.6 step 2).
    pub fn collect_goal_refs(&self, out: &mut Vec<GoalRef>) {
        match self {
            Expr::Number(_) => {}
            Expr::Goal(g) => out.push((**g).clone()),
            Expr::Add(a, b) | Expr::Sub(a, b) | Expr::Mul(a, b) | Expr::Div(a, b) | Expr::Tilde(a, b) => {
                a.collect_goal_refs(out);
                b.collect_goal_refs(out);
            }
        }
    }

    /// Canonical strings of every `GoalRef` leaf, used by tests and dimension
    /// discovery.
    pub fn canonical_goal_strings(&self) -> Vec<String> {
        let mut refs = Vec::new();
        self.collect_goal_refs(&mut refs);
        refs.iter().map(GoalRef::canonical_string).collect()
    }

    /// All dimension names referenced anywhere in this tree.
    pub fn dimension_names(&self, out: &mut BTreeSet<String>) {
        match self {
            Expr::Number(_) => {}
            Expr::Goal(g) => out.extend(g.dimension_predicates.keys().cloned()),
            Expr::Add(a, b) | Expr::Sub(a, b) | Expr::Mul(a, b) | Expr::Div(a, b) | Expr::Tilde(a, b) => {
                a.dimension_names(out);
                b.dimension_names(out);
            }
        }
    }

    /// Extend every `GoalRef` leaf's predicate map with `(=, "")` entries for
    /// dimensions it doesn't reference (§4.1 dimension-schema unification).
    pub fn unify_dimensions(&mut self, all_dimensions: &BTreeSet<String>) {
        match self {
            Expr::Number(_) => {}
            Expr::Goal(g) => g.unify_dimensions(all_dimensions),
            Expr::Add(a, b) | Expr::Sub(a, b) | Expr::Mul(a, b) | Expr::Div(a, b) | Expr::Tilde(a, b) => {
                a.unify_dimensions(all_dimensions);
                b.unify_dimensions(all_dimensions);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::goal::parse_expression;
    use std::collections::BTreeMap;

    fn row(variant: &str, goal: &str, count: f64, sum_value: f64, sum_sqr_value: f64) -> AggregatedGoalRow {
        AggregatedGoalRow {
            exp_id: "e".into(),
            exp_variant_id: variant.into(),
            unit_type: "T".into(),
            agg_type: "unit".into(),
            goal: goal.into(),
            dimensions: BTreeMap::new(),
            count,
            sum_sqr_count: count,
            sum_value,
            sum_sqr_value,
            count_unique: 0.0,
        }
    }

    #[test]
    fn sub_and_tilde_agree_on_value_differ_on_sqr() {
        let vi = VariantIndex::new(vec!["a".into()]);
        let rows = vec![row("a", "x", 10.0, 100.0, 1200.0), row("a", "y", 5.0, 20.0, 100.0)];
        let minus = parse_expression("value(T.unit.x) - value(T.unit.y)").unwrap();
        let tilde = parse_expression("value(T.unit.x) ~ value(T.unit.y)").unwrap();
        assert_eq!(minus.eval_agg(&vi, &rows), tilde.eval_agg(&vi, &rows));
        assert_eq!(minus.eval_agg(&vi, &rows), vec![80.0]);
        assert_eq!(minus.eval_sqr(&vi, &rows), vec![1100.0]);
        assert_eq!(tilde.eval_sqr(&vi, &rows), vec![1300.0]);
    }

    #[test]
    fn division_by_literal_scales() {
        let vi = VariantIndex::new(vec!["a".into()]);
        let rows = vec![row("a", "x", 2000.0, 0.0, 0.0)];
        let e = parse_expression("count(T.unit.x) / 1000").unwrap();
        assert_eq!(e.eval_agg(&vi, &rows), vec![2.0]);
    }
}
