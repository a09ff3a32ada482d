//! The experiment orchestrator (§4.6): joins the goal algebra, the expression
//! evaluator, the missing-cell filler, and the statistical kernel into the
//! three output tables described in §3 (`metrics`, `checks`, `exposures`).
//!
//! The orchestrator itself never suspends or does I/O (§5): `DataCollaborator`
//! is a synchronous trait, invoked once per evaluation; only the HTTP boundary
//! awaits a worker-pool slot around the call into this module.

use std::collections::BTreeSet;
use std::time::Instant;

use tracing::warn;

use crate::checks::CheckKind;
use crate::error::AppError;
use crate::goal::GoalRef;
use crate::metrics_registry::METRICS;
use crate::model::Experiment;
use crate::stats::{self, Moments};
use crate::table::{fill_missing_cells, AggregatedGoalRow, VariantIndex};

/// Synchronous contract between the core and whatever owns the actual data
/// store (§6 "Data collaborator contract"). No async: the core does not
/// suspend on I/O (§5).
pub trait DataCollaborator {
    /// Rows restricted to `experiment.id`, already filtered by date range and
    /// filters — that filtering is the collaborator's responsibility, not the
    /// core's.
    fn get_agg_goals(&self, experiment: &Experiment) -> Result<Vec<AggregatedGoalRow>, AppError>;

    fn close(&mut self) {}
}

#[derive(Debug, Clone)]
pub struct MetricStat {
    pub exp_variant_id: String,
    pub count: f64,
    pub mean: f64,
    pub std: f64,
    pub sum_value: f64,
    pub confidence_level: f64,
    pub diff: f64,
    pub test_stat: f64,
    pub p_value: f64,
    pub confidence_interval: f64,
    pub standard_error: f64,
    pub degrees_of_freedom: f64,
    pub minimum_effect: Option<f64>,
    pub sample_size: f64,
    pub required_sample_size: f64,
    pub power: f64,
}

pub struct MetricResult {
    pub id: String,
    pub name: String,
    pub stats: Vec<MetricStat>,
}

#[derive(Debug, Clone)]
pub struct CheckStat {
    pub variable_id: String,
    pub value: f64,
}

pub struct CheckResult {
    pub id: i64,
    pub name: String,
    pub stats: Vec<CheckStat>,
}

#[derive(Debug, Clone)]
pub struct ExposureStat {
    pub exp_variant_id: String,
    pub count: f64,
}

pub struct ExposureResult {
    pub unit_type: String,
    pub stats: Vec<ExposureStat>,
}

/// The full, request-scoped evaluation result (§3 "Evaluation").
pub struct Evaluation {
    pub exp_id: String,
    pub metrics: Vec<MetricResult>,
    pub checks: Vec<CheckResult>,
    pub exposures: ExposureResult,
}

/// Union every `GoalRef` referenced by metrics, checks, and the synthetic
/// exposure goal (§4.6 step 2), unify dimension schemas across them (§4.1,
/// step 3), and return the unified list alongside the set of dimension names.
fn collect_and_unify_goal_refs(experiment: &mut Experiment) -> (Vec<GoalRef>, BTreeSet<String>) {
    let mut all_dimensions = BTreeSet::new();
    for metric in &experiment.metrics {
        metric.nominator.dimension_names(&mut all_dimensions);
        metric.denominator.dimension_names(&mut all_dimensions);
    }
    for check in &experiment.checks {
        let mut refs = Vec::new();
        check.collect_goal_refs(&mut refs);
        for r in &refs {
            all_dimensions.extend(r.dimension_predicates.keys().cloned());
        }
    }

    for metric in &mut experiment.metrics {
        metric.nominator.unify_dimensions(&all_dimensions);
        metric.denominator.unify_dimensions(&all_dimensions);
    }
    for check in &mut experiment.checks {
        check.unify_dimensions(&all_dimensions);
    }

    let mut goal_refs = Vec::new();
    for metric in &experiment.metrics {
        metric.nominator.collect_goal_refs(&mut goal_refs);
        metric.denominator.collect_goal_refs(&mut goal_refs);
    }
    for check in &experiment.checks {
        check.collect_goal_refs(&mut goal_refs);
    }
    goal_refs.push(exposure_goal_ref(experiment, &all_dimensions));

    let mut seen = std::collections::HashSet::new();
    goal_refs.retain(|g| seen.insert(g.canonical_string()));

    (goal_refs, all_dimensions)
}

/// The synthetic exposure `GoalRef` every experiment implicitly references
/// (§4.6 step 2, step 9), routed through `Experiment::exposure_expr()` so
/// there is exactly one place that builds it.
fn exposure_goal_ref(experiment: &Experiment, all_dimensions: &BTreeSet<String>) -> GoalRef {
    let mut goal_ref = match experiment.exposure_expr() {
        crate::expr::Expr::Goal(g) => *g,
        _ => unreachable!("exposure_expr always parses to a single GoalRef leaf"),
    };
    goal_ref.unify_dimensions(all_dimensions);
    goal_ref
}

/// Determine the evaluation-wide variant order (§4.6 step 5, §9 "Variant indexing").
fn determine_variants(experiment: &Experiment, rows: &[AggregatedGoalRow]) -> Vec<String> {
    if let Some(explicit) = &experiment.variants {
        let mut v = explicit.clone();
        v.sort();
        v.dedup();
        return v;
    }
    let mut set: BTreeSet<String> = rows.iter().map(|r| r.exp_variant_id.clone()).collect();
    set.insert(experiment.control_variant.clone());
    set.into_iter().collect()
}

/// Working confidence level for this evaluation after O'Brien-Fleming alpha
/// spending (§4.4), or the experiment's nominal confidence level when no date
/// range is configured.
fn working_confidence_level(experiment: &Experiment) -> f64 {
    match (experiment.date_from, experiment.date_to, experiment.date_for) {
        (Some(from), Some(to), Some(for_date)) => {
            let total_length = (to - from).num_days() as f64 + 1.0;
            let actual_day = ((for_date - from).num_days() as f64 + 1.0).clamp(1.0, total_length);
            stats::obf_alpha_spending(experiment.confidence_level, total_length, actual_day)
        }
        _ => experiment.confidence_level,
    }
}

fn evaluate_metric(
    metric: &crate::model::Metric,
    experiment: &Experiment,
    confidence_level: f64,
    variants: &VariantIndex,
    rows: &[AggregatedGoalRow],
) -> Result<MetricResult, AppError> {
    let count = metric.denominator.eval_agg(variants, rows);
    let sum_value = metric.nominator.eval_agg(variants, rows);
    let sum_sqr_value = metric.nominator.eval_sqr(variants, rows);

    let moments: Vec<Moments> = (0..variants.len())
        .map(|i| Moments::from_sums(count[i], sum_value[i], sum_sqr_value[i]))
        .collect();

    let control_idx = variants
        .control_index(&experiment.control_variant)
        .ok_or_else(|| AppError::evaluation(format!("control variant '{}' not present among evaluated variants", experiment.control_variant)))?;
    let control_moments = moments[control_idx];

    let mut stats_rows = Vec::with_capacity(variants.len());
    let mut raw_pvalues_by_variant: Vec<(usize, f64)> = Vec::new();
    let mut welch_by_variant: std::collections::HashMap<usize, stats::WelchResult> = std::collections::HashMap::new();

    for (i, variant) in variants.variants().iter().enumerate() {
        if i == control_idx {
            stats_rows.push(MetricStat {
                exp_variant_id: variant.clone(),
                count: moments[i].count,
                mean: moments[i].mean,
                std: moments[i].std,
                sum_value: sum_value[i],
                confidence_level,
                diff: 0.0,
                test_stat: 0.0,
                p_value: 1.0,
                confidence_interval: 0.0,
                standard_error: 0.0,
                degrees_of_freedom: 0.0,
                minimum_effect: metric.minimum_effect,
                sample_size: moments[i].count,
                required_sample_size: f64::NAN,
                power: f64::NAN,
            });
            continue;
        }

        let welch = stats::welch_ttest(control_moments, moments[i], confidence_level);
        raw_pvalues_by_variant.push((i, welch.p));
        welch_by_variant.insert(i, welch);

        stats_rows.push(MetricStat {
            exp_variant_id: variant.clone(),
            count: moments[i].count,
            mean: moments[i].mean,
            std: moments[i].std,
            sum_value: sum_value[i],
            confidence_level,
            diff: welch.rel_diff,
            test_stat: welch.t,
            p_value: welch.p,
            confidence_interval: welch.conf_int,
            standard_error: welch.rel_se,
            degrees_of_freedom: welch.df,
            minimum_effect: metric.minimum_effect,
            sample_size: moments[i].count,
            required_sample_size: f64::NAN,
            power: f64::NAN,
        });
    }

    // Holm-Bonferroni across treatment p-values, only when k >= 3 (§4.4).
    if variants.len() >= 3 && !raw_pvalues_by_variant.is_empty() {
        let raw: Vec<f64> = raw_pvalues_by_variant.iter().map(|(_, p)| *p).collect();
        let adjusted = stats::holm_bonferroni(&raw);
        let alpha = 1.0 - confidence_level;
        for (rank, (variant_idx, raw_p)) in raw_pvalues_by_variant.iter().enumerate() {
            let adj_p = adjusted[rank];
            let welch = &welch_by_variant[variant_idx];
            let conf_int_adj = stats::widen_conf_int_for_holm(welch.rel_se, welch.df, alpha, *raw_p, adj_p);
            let row = stats_rows.iter_mut().find(|r| &r.exp_variant_id == &variants.variants()[*variant_idx]).unwrap();
            row.p_value = adj_p;
            row.confidence_interval = conf_int_adj;
        }
    }

    // Required sample size and achieved power (§4.4), only meaningful with a
    // stated minimum_effect; otherwise these columns are NaN (numeric anomaly,
    // not an error — §9).
    if let Some(mei) = metric.minimum_effect {
        for (i, row) in stats_rows.iter_mut().enumerate() {
            match stats::required_sample_size_per_variant(
                confidence_level,
                stats::DEFAULT_POWER,
                variants.len() as u32,
                mei,
                control_moments.mean,
                control_moments.std,
                Some(moments[i].std),
            ) {
                Ok(n_req) => {
                    row.required_sample_size = n_req;
                    row.power = stats::power_from_required_sample_size_per_variant(
                        confidence_level,
                        variants.len() as u32,
                        row.sample_size,
                        n_req,
                    );
                }
                Err(_) => {
                    row.required_sample_size = f64::NAN;
                    row.power = f64::NAN;
                }
            }
        }
    }

    Ok(MetricResult { id: metric.id.clone(), name: metric.name.clone(), stats: stats_rows })
}

/// Run the full orchestrator (§4.6).
pub fn evaluate(mut experiment: Experiment, collaborator: &dyn DataCollaborator) -> Result<Evaluation, AppError> {
    // Step 1 (metric id uniqueness) already enforced by Experiment::new.

    // Steps 2-3: union goal refs across metrics/checks/exposure, unify dimensions.
    let (goal_refs, all_dimensions) = collect_and_unify_goal_refs(&mut experiment);

    // Step 4: ask the data collaborator for aggregated rows.
    let query_started = Instant::now();
    let rows = collaborator.get_agg_goals(&experiment)?;
    METRICS.query_duration_seconds.observe(query_started.elapsed().as_secs_f64());

    // Step 5: determine variants.
    let variant_names = determine_variants(&experiment, &rows);
    let variants = VariantIndex::new(variant_names);
    if variants.is_empty() {
        return Err(AppError::evaluation("no variants to evaluate"));
    }

    // Step 6: fill missing cells.
    let filled = fill_missing_cells(&experiment.id, &rows, &goal_refs, variants.variants());

    let confidence_level = working_confidence_level(&experiment);

    // Step 7: per-metric evaluation.
    let stats_started = Instant::now();
    let mut metric_results = Vec::with_capacity(experiment.metrics.len());
    for metric in &experiment.metrics {
        metric_results.push(evaluate_metric(metric, &experiment, confidence_level, &variants, &filled)?);
    }
    METRICS.stats_computation_duration_seconds.observe(stats_started.elapsed().as_secs_f64());

    // Step 8: per-check evaluation, isolated (§9 "Check isolation").
    let mut check_results = Vec::with_capacity(experiment.checks.len());
    for check in &experiment.checks {
        match check.evaluate(&variants, &filled) {
            Ok(stats) => check_results.push(CheckResult {
                id: check.id(),
                name: check.name().to_string(),
                stats: stats.into_iter().map(|(variable_id, value)| CheckStat { variable_id, value }).collect(),
            }),
            Err(e) => {
                METRICS.errors_check_total.inc();
                warn!(check_id = check.id(), check_name = check.name(), error = %e, "check failed, omitting from result");
            }
        }
    }

    // Step 9: exposures.
    let exposure_expr = exposure_goal_ref(&experiment, &all_dimensions);
    let exposure_vec = variants.sum_by_variant(&filled, &exposure_expr, exposure_expr.column);
    let exposure_stats = variants
        .variants()
        .iter()
        .zip(exposure_vec.iter())
        .map(|(v, &c)| ExposureStat { exp_variant_id: v.clone(), count: c })
        .collect();

    // Step 10: assemble.
    Ok(Evaluation {
        exp_id: experiment.id.clone(),
        metrics: metric_results,
        checks: check_results,
        exposures: ExposureResult { unit_type: experiment.unit_type.clone(), stats: exposure_stats },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Metric;
    use std::collections::BTreeMap;

    struct FixtureCollaborator {
        rows: Vec<AggregatedGoalRow>,
    }

    impl DataCollaborator for FixtureCollaborator {
        fn get_agg_goals(&self, _experiment: &Experiment) -> Result<Vec<AggregatedGoalRow>, AppError> {
            Ok(self.rows.clone())
        }
    }

    fn row(variant: &str, goal: &str, agg_type: &str, count: f64, sum_value: f64, sum_sqr_value: f64) -> AggregatedGoalRow {
        AggregatedGoalRow {
            exp_id: "test-conversion".into(),
            exp_variant_id: variant.into(),
            unit_type: "T".into(),
            agg_type: agg_type.into(),
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
    fn ctr_end_to_end_fixture() {
        let rows = vec![
            row("a", "exposure", "global", 21.0, 21.0, 21.0),
            row("b", "exposure", "global", 26.0, 26.0, 26.0),
            row("c", "exposure", "global", 30.0, 30.0, 30.0),
            row("a", "click", "global", 5.0, 5.0, 5.0),
            row("b", "click", "global", 7.0, 7.0, 7.0),
            row("c", "click", "global", 9.0, 9.0, 9.0),
        ];
        let ctr = Metric::new("ctr", "CTR", "value(T.global.click)", "count(T.global.exposure)", None).unwrap();
        let experiment = Experiment::new(
            "test-conversion",
            "a",
            "T",
            Some(vec!["a".into(), "b".into(), "c".into()]),
            None,
            None,
            None,
            0.95,
            vec![ctr],
            vec![],
            vec![],
        )
        .unwrap();

        let collaborator = FixtureCollaborator { rows };
        let eval = evaluate(experiment, &collaborator).unwrap();

        let ctr_result = &eval.metrics[0];
        let a = ctr_result.stats.iter().find(|s| s.exp_variant_id == "a").unwrap();
        let b = ctr_result.stats.iter().find(|s| s.exp_variant_id == "b").unwrap();
        let c = ctr_result.stats.iter().find(|s| s.exp_variant_id == "c").unwrap();

        assert!((a.mean - 0.23810).abs() < 1e-4);
        assert!((b.mean - 0.26923).abs() < 1e-4);
        assert!((c.mean - 0.30000).abs() < 1e-4);
        assert!((b.diff - 0.13077).abs() < 1e-3);
        assert!((c.diff - 0.26000).abs() < 1e-3);
        for s in &ctr_result.stats {
            assert!(s.p_value > 0.0 && s.p_value <= 1.0);
        }
    }

    #[test]
    fn absent_variant_fills_zero_via_orchestrator() {
        let rows = vec![row("a", "exposure", "global", 10.0, 10.0, 10.0), row("a", "click", "global", 2.0, 2.0, 2.0)];
        let ctr = Metric::new("ctr", "CTR", "value(T.global.click)", "count(T.global.exposure)", None).unwrap();
        let experiment = Experiment::new(
            "exp",
            "a",
            "T",
            Some(vec!["a".into(), "b".into()]),
            None,
            None,
            None,
            0.95,
            vec![ctr],
            vec![],
            vec![],
        )
        .unwrap();
        let collaborator = FixtureCollaborator { rows };
        let eval = evaluate(experiment, &collaborator).unwrap();
        let b = eval.metrics[0].stats.iter().find(|s| s.exp_variant_id == "b").unwrap();
        assert_eq!(b.count, 0.0);
        assert!(b.mean.is_nan());
    }
}
