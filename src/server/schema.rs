//! HTTP request/response schema (§6) and the thin validation that sits in
//! front of the core. Deliberately minimal: dates and identifiers are checked
//! here; everything else (expression syntax, duplicate metric ids, date
//! ordering invariants) is re-validated by the domain constructors in
//! `model.rs`, which is the single source of truth for those rules.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::checks::{CheckKind, SrmCheck, SumRatioCheck};
use crate::error::AppError;
use crate::experiment::Evaluation;
use crate::json_numeric::JsonFloat;
use crate::model::{Experiment, Filter, FilterScope, Metric};

#[derive(Debug, Deserialize)]
pub struct MetricRequest {
    pub id: String,
    pub name: String,
    pub nominator: String,
    pub denominator: String,
    pub minimum_effect: Option<f64>,
}

fn default_check_type() -> String {
    "SRM".to_string()
}

#[derive(Debug, Deserialize)]
pub struct CheckRequest {
    pub id: i64,
    pub name: String,
    #[serde(default = "default_check_type", rename = "type")]
    pub check_type: String,
    pub nominator: Option<String>,
    pub denominator: String,
    pub confidence_level: Option<f64>,
    pub max_ratio: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterScopeWire {
    Exposure,
    Goal,
}

#[derive(Debug, Deserialize)]
pub struct FilterRequest {
    pub dimension: String,
    pub value: Vec<String>,
    pub scope: FilterScopeWire,
}

#[derive(Debug, Deserialize)]
pub struct EvaluateRequest {
    pub id: String,
    pub control_variant: String,
    pub unit_type: String,
    pub variants: Option<Vec<String>>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub date_for: Option<String>,
    #[serde(default)]
    pub confidence_level: Option<f64>,
    pub metrics: Vec<MetricRequest>,
    #[serde(default)]
    pub checks: Vec<CheckRequest>,
    #[serde(default)]
    pub filters: Vec<FilterRequest>,
    /// Opaque bag forwarded to the data collaborator untouched (§6); the core
    /// never interprets it.
    #[serde(default)]
    pub query_parameters: Option<serde_json::Value>,
}

fn parse_date(field: &str, s: &str) -> Result<NaiveDate, AppError> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|_| AppError::validation(format!("{field} must match YYYY-MM-DD, got '{s}'")))
}

fn require_non_empty(field: &str, value: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(AppError::validation(format!("{field} must not be empty")));
    }
    Ok(())
}

/// Validate and parse the wire request into the domain `Experiment` (§6
/// validation rules). When `date_from`/`date_to` are set but `date_for` is
/// not, `date_for` defaults to `date_to` — evaluate "as of test end" absent an
/// explicit as-of date, which keeps the core itself a pure function of its
/// inputs (§3 Lifecycle) rather than reaching for a wall clock.
///
/// `default_confidence_level` (§10.3 `EPSTATS_DEFAULT_CONFIDENCE_LEVEL`) is
/// used when the request itself does not set `confidence_level`.
pub fn parse_evaluate_request(req: EvaluateRequest, default_confidence_level: f64) -> Result<Experiment, AppError> {
    require_non_empty("id", &req.id)?;
    require_non_empty("control_variant", &req.control_variant)?;
    require_non_empty("unit_type", &req.unit_type)?;

    let date_from = req.date_from.as_deref().map(|s| parse_date("date_from", s)).transpose()?;
    let date_to = req.date_to.as_deref().map(|s| parse_date("date_to", s)).transpose()?;
    let mut date_for = req.date_for.as_deref().map(|s| parse_date("date_for", s)).transpose()?;
    if date_for.is_none() {
        if let (Some(_), Some(to)) = (date_from, date_to) {
            date_for = Some(to);
        }
    }

    let metrics = req
        .metrics
        .into_iter()
        .map(|m| Metric::new(m.id, m.name, &m.nominator, &m.denominator, m.minimum_effect))
        .collect::<Result<Vec<_>, _>>()?;

    let checks = req
        .checks
        .into_iter()
        .map(|c| -> Result<CheckKind, AppError> {
            match c.check_type.as_str() {
                "SRM" => Ok(CheckKind::Srm(SrmCheck::new(c.id, c.name, &c.denominator, c.confidence_level)?)),
                "SumRatio" => {
                    let nominator = c.nominator.filter(|n| !n.trim().is_empty()).ok_or_else(|| {
                        AppError::validation("SumRatio check requires a non-empty nominator")
                    })?;
                    Ok(CheckKind::SumRatio(SumRatioCheck::new(
                        c.id,
                        c.name,
                        &nominator,
                        &c.denominator,
                        c.max_ratio,
                        c.confidence_level,
                    )?))
                }
                other => Err(AppError::validation(format!("unknown check type '{other}', expected SRM or SumRatio"))),
            }
        })
        .collect::<Result<Vec<_>, _>>()?;

    let filters = req
        .filters
        .into_iter()
        .map(|f| Filter {
            dimension: f.dimension,
            values: f.value,
            scope: match f.scope {
                FilterScopeWire::Exposure => FilterScope::Exposure,
                FilterScopeWire::Goal => FilterScope::Goal,
            },
        })
        .collect();

    Experiment::new(
        req.id,
        req.control_variant,
        req.unit_type,
        req.variants,
        date_from,
        date_to,
        date_for,
        req.confidence_level.unwrap_or(default_confidence_level),
        metrics,
        checks,
        filters,
    )
}

#[derive(Debug, Serialize)]
pub struct MetricStatResponse {
    pub exp_variant_id: String,
    pub diff: JsonFloat,
    pub mean: JsonFloat,
    pub sum_value: JsonFloat,
    pub p_value: JsonFloat,
    pub confidence_interval: JsonFloat,
    pub confidence_level: JsonFloat,
    pub sample_size: JsonFloat,
    pub required_sample_size: JsonFloat,
    pub power: JsonFloat,
}

#[derive(Debug, Serialize)]
pub struct MetricResultResponse {
    pub id: String,
    pub name: String,
    pub stats: Vec<MetricStatResponse>,
}

#[derive(Debug, Serialize)]
pub struct CheckStatResponse {
    pub variable_id: String,
    pub value: JsonFloat,
}

#[derive(Debug, Serialize)]
pub struct CheckResultResponse {
    pub id: i64,
    pub name: String,
    pub stats: Vec<CheckStatResponse>,
}

#[derive(Debug, Serialize)]
pub struct ExposureStatResponse {
    pub exp_variant_id: String,
    pub count: JsonFloat,
}

#[derive(Debug, Serialize)]
pub struct ExposureResultResponse {
    pub unit_type: String,
    pub stats: Vec<ExposureStatResponse>,
}

#[derive(Debug, Serialize)]
pub struct EvaluateResponse {
    pub id: String,
    pub metrics: Vec<MetricResultResponse>,
    pub checks: Vec<CheckResultResponse>,
    pub exposure: ExposureResultResponse,
}

/// Project the internal `Evaluation` table set onto the §6 HTTP response shape.
pub fn evaluation_to_response(eval: Evaluation) -> EvaluateResponse {
    EvaluateResponse {
        id: eval.exp_id,
        metrics: eval
            .metrics
            .into_iter()
            .map(|m| MetricResultResponse {
                id: m.id,
                name: m.name,
                stats: m
                    .stats
                    .into_iter()
                    .map(|s| MetricStatResponse {
                        exp_variant_id: s.exp_variant_id,
                        diff: s.diff.into(),
                        mean: s.mean.into(),
                        sum_value: s.sum_value.into(),
                        p_value: s.p_value.into(),
                        confidence_interval: s.confidence_interval.into(),
                        confidence_level: s.confidence_level.into(),
                        sample_size: s.sample_size.into(),
                        required_sample_size: s.required_sample_size.into(),
                        power: s.power.into(),
                    })
                    .collect(),
            })
            .collect(),
        checks: eval
            .checks
            .into_iter()
            .map(|c| CheckResultResponse {
                id: c.id,
                name: c.name,
                stats: c
                    .stats
                    .into_iter()
                    .map(|s| CheckStatResponse { variable_id: s.variable_id, value: s.value.into() })
                    .collect(),
            })
            .collect(),
        exposure: ExposureResultResponse {
            unit_type: eval.exposures.unit_type,
            stats: eval
                .exposures
                .stats
                .into_iter()
                .map(|s| ExposureStatResponse { exp_variant_id: s.exp_variant_id, count: s.count.into() })
                .collect(),
        },
    }
}

#[derive(Debug, Deserialize)]
pub struct SampleSizeRequest {
    pub n_variants: u32,
    pub minimum_effect: f64,
    pub mean: f64,
    pub std: Option<f64>,
    #[serde(default)]
    pub confidence_level: Option<f64>,
    #[serde(default = "default_power")]
    pub power: f64,
}

fn default_power() -> f64 {
    crate::stats::DEFAULT_POWER
}

#[derive(Debug, Serialize)]
pub struct SampleSizeResponse {
    pub sample_size_per_variant: JsonFloat,
}

/// `std` absent selects the Bernoulli convenience form, with `mean` read as
/// `p` (§6). `req.confidence_level` absent falls back to
/// `default_confidence_level` (§10.3 `EPSTATS_DEFAULT_CONFIDENCE_LEVEL`).
pub fn compute_sample_size(req: &SampleSizeRequest, default_confidence_level: f64) -> Result<f64, AppError> {
    let confidence_level = req.confidence_level.unwrap_or(default_confidence_level);
    match req.std {
        Some(std) => crate::stats::required_sample_size_per_variant(
            confidence_level,
            req.power,
            req.n_variants,
            req.minimum_effect,
            req.mean,
            std,
            None,
        )
        .map_err(AppError::validation),
        None => crate::stats::required_sample_size_per_variant_bernoulli(
            confidence_level,
            req.power,
            req.n_variants,
            req.minimum_effect,
            req.mean,
        )
        .map_err(AppError::validation),
    }
}
