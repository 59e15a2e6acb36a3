//! Insight Assembler (`spec.md` §4.7): builds the `MetricInsight` document
//! the engine returns, plus one sub-insight per ratio metric's numerator
//! and denominator legs.

use std::collections::BTreeMap;

use polars::prelude::*;
use serde::{Deserialize, Serialize};

use crate::cube::CubeResult;
use crate::errors::Result;
use crate::key_dimension;
use crate::metric::{Filter, Metric, SingleMetric};
use crate::ranker;
use crate::request::AnalysisRequest;
use crate::segment::{DimensionScore, DimensionValuePair, PeriodValue, SegmentInfo, SegmentKey};
use crate::significance;

/// One `{date, value}` point in a metric's by-date series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatedValue {
    /// `YYYY-MM-DD`.
    pub date: String,
    /// The metric's aggregated value on this date.
    pub value: f64,
}

/// The engine's root output document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricInsight {
    /// Metric id.
    pub id: String,
    /// Metric display name.
    pub name: String,
    /// Echoed pre-aggregation filters, if any were set.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<Filter>,
    /// `"SUM" | "COUNT" | "DISTINCT" | "RATIO"`.
    pub aggregation_method: String,
    /// The request's expected relative change.
    pub expected_change_percentage: f64,
    /// `[from, to]`, inclusive, `YYYY-MM-DD`.
    pub baseline_date_range: [String; 2],
    /// `[from, to]`, inclusive, `YYYY-MM-DD`.
    pub comparison_date_range: [String; 2],
    /// Total row count in the baseline window.
    pub baseline_num_rows: i64,
    /// Total row count in the comparison window.
    pub comparison_num_rows: i64,
    /// The metric's overall baseline value.
    pub baseline_value: f64,
    /// The metric's overall comparison value.
    pub comparison_value: f64,
    /// Baseline value by date, ascending.
    pub baseline_value_by_date: Vec<DatedValue>,
    /// Comparison value by date, ascending.
    pub comparison_value_by_date: Vec<DatedValue>,
    /// Every analyzed dimension, by name.
    pub dimensions: BTreeMap<String, DimensionScore>,
    /// Segment count surviving the `>1%` prune, before the 20,000-row cap.
    pub total_segments: usize,
    /// Dimensions clearing the key-dimension gate.
    pub key_dimensions: Vec<String>,
    /// Serialized keys of the top (at most 1,000) driver segments.
    pub top_driver_slice_keys: Vec<String>,
    /// Every segment surviving the prune and cap, by serialized key.
    pub dimension_slice_info: BTreeMap<String, SegmentInfo>,
    /// For sub-metric insights (a ratio metric's numerator/denominator
    /// leg), the parent metric's id. `None` for the metric the request
    /// actually asked for.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_metric: Option<String>,
}

/// Replaces non-finite floats with `0.0`, the Rust equivalent of the
/// Python original's `NpEncoder`: `serde_json` has no wire representation
/// for `NaN`/`±Infinity` and would otherwise fail the whole response.
pub fn sanitize_f64(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

fn value_by_date(df: &DataFrame, metric: &Metric) -> Result<Vec<DatedValue>> {
    let metric_id = metric.id();
    let grouped = df
        .clone()
        .lazy()
        .group_by([col(crate::frame::DATE_COLUMN)])
        .agg(metric.aggregation_exprs())
        .sort([crate::frame::DATE_COLUMN], SortMultipleOptions::default())
        .collect()?;

    let dates = grouped.column(crate::frame::DATE_COLUMN)?.date()?;
    let values = grouped.column(&metric_id)?.f64()?;

    Ok(dates
        .into_iter()
        .zip(values.into_iter())
        .filter_map(|(d, v)| {
            let d = d?;
            let date = chrono::NaiveDate::from_num_days_from_ce_opt(d + 719_163)?;
            Some(DatedValue {
                date: date.format("%Y-%m-%d").to_string(),
                value: sanitize_f64(v.unwrap_or(0.0)),
            })
        })
        .collect())
}

fn segment_key_from_row(dimension_names: &[String], dimension_values: &[String]) -> SegmentKey {
    let pairs = dimension_names
        .iter()
        .zip(dimension_values.iter())
        .map(|(d, v)| DimensionValuePair {
            dimension: d.clone(),
            value: v.clone(),
        })
        .collect();
    SegmentKey::new(pairs)
}

pub(crate) fn build_segment_infos(
    segments: &DataFrame,
    metric: &Metric,
    comparison_total_rows: i64,
    baseline_total_rows: i64,
) -> Result<BTreeMap<String, SegmentInfo>> {
    let metric_id = metric.id();
    let metric_baseline_id = format!("{metric_id}_baseline");

    let serialized_keys = segments.column("serialized_key")?.str()?;
    let dimension_name_col = segments.column("dimension_name")?.list()?;
    let dimension_value_col = segments.column("dimension_value")?.list()?;
    let count = segments.column("count")?.i64()?;
    let count_baseline = segments.column("count_baseline")?.i64()?;
    let values = segments.column(&metric_id)?.f64()?;
    let values_baseline = segments.column(&metric_baseline_id)?.f64()?;
    let change = segments.column("change")?.f64()?;
    let absolute_contribution = segments.column("absolute_contribution")?.f64()?;
    let change_variance = segments.column("change_variance")?.f64()?;

    let mut out = BTreeMap::new();
    for i in 0..segments.height() {
        let Some(serialized) = serialized_keys.get(i) else {
            continue;
        };
        let names: Vec<String> = dimension_name_col
            .get_as_series(i)
            .map(|s| {
                s.str()
                    .map(|ca| ca.into_iter().flatten().map(str::to_string).collect())
                    .unwrap_or_default()
            })
            .unwrap_or_default();
        let vals: Vec<String> = dimension_value_col
            .get_as_series(i)
            .map(|s| {
                s.str()
                    .map(|ca| ca.into_iter().flatten().map(str::to_string).collect())
                    .unwrap_or_default()
            })
            .unwrap_or_default();
        let key = segment_key_from_row(&names, &vals);

        let c = values.get(i).unwrap_or(0.0);
        let b = values_baseline.get(i).unwrap_or(0.0);
        let info = SegmentInfo {
            key,
            serialized_key: serialized.to_string(),
            baseline_value: PeriodValue::new(count_baseline.get(i).unwrap_or(0), baseline_total_rows, b),
            comparison_value: PeriodValue::new(count.get(i).unwrap_or(0), comparison_total_rows, c),
            impact: sanitize_f64(c - b),
            change: sanitize_f64(change.get(i).unwrap_or(0.0)),
            absolute_contribution: absolute_contribution.get(i).map(sanitize_f64),
            change_dev: change_variance.get(i).map(sanitize_f64),
            confidence: None,
        };
        out.insert(info.serialized_key.clone(), info);
    }
    Ok(out)
}

/// Assembles the `MetricInsight` for `metric`, reusing a [`CubeResult`]
/// already computed by [`crate::cube::analyze`] against `metric`'s columns.
#[allow(clippy::too_many_arguments)]
pub fn assemble(
    request: &AnalysisRequest,
    metric: &Metric,
    display_name: Option<&str>,
    baseline: &DataFrame,
    comparison: &DataFrame,
    cube: &CubeResult,
    parent_metric: Option<String>,
    skip_significance: bool,
) -> Result<MetricInsight> {
    let metric_id = metric.id();

    let dimension_scores = key_dimension::score_dimensions(&cube.single_dimension_scores);
    let key_dimensions: Vec<String> = dimension_scores
        .iter()
        .filter(|d| d.is_key)
        .map(|d| d.name.clone())
        .collect();

    let top_drivers = ranker::top_drivers(&cube.segments, &dimension_scores)?;
    let top_driver_keys = top_drivers.column("serialized_key")?.str()?;
    let top_driver_slice_keys: Vec<String> = top_driver_keys
        .into_iter()
        .flatten()
        .map(str::to_string)
        .collect();

    let mut dimension_slice_info = build_segment_infos(
        &cube.segments,
        metric,
        cube.totals.comparison_count,
        cube.totals.baseline_count,
    )?;

    if !skip_significance {
        for serialized in &top_driver_slice_keys {
            if let Some(info) = dimension_slice_info.get_mut(serialized) {
                info.confidence = significance::test_segment(
                    &cube.joined_base,
                    &info.key,
                    metric,
                    request.expected_change,
                )?
                .map(sanitize_f64);
            }
        }
    }

    let filters = match metric {
        Metric::Single(m) => m.filters.clone(),
        Metric::Dual { .. } => Vec::new(),
    };

    Ok(MetricInsight {
        id: metric_id.clone(),
        name: display_name.map(str::to_string).unwrap_or_else(|| metric.display_name()),
        filters,
        aggregation_method: metric.metric_type().to_string(),
        expected_change_percentage: request.expected_change,
        baseline_date_range: request.baseline_range.to_iso_pair(),
        comparison_date_range: request.comparison_range.to_iso_pair(),
        baseline_num_rows: cube.totals.baseline_count,
        comparison_num_rows: cube.totals.comparison_count,
        baseline_value: sanitize_f64(cube.totals.metric_value_baseline()),
        comparison_value: sanitize_f64(cube.totals.metric_value_comparison()),
        baseline_value_by_date: value_by_date(baseline, metric)?,
        comparison_value_by_date: value_by_date(comparison, metric)?,
        dimensions: dimension_scores
            .into_iter()
            .map(|d| (d.name.clone(), d))
            .collect(),
        total_segments: cube.total_segments,
        key_dimensions,
        top_driver_slice_keys,
        dimension_slice_info,
        parent_metric,
    })
}

/// Runs `assemble` for `request.metric` and, for ratio metrics, its
/// numerator/denominator sub-metrics — each reusing the same `cube`
/// (the sub-metrics' aggregate columns are already present in `Σ` and the
/// joined base, so no second cube pass is needed). Significance testing is
/// skipped for sub-metric insights, per `spec.md` §4.7.
pub fn assemble_all(
    request: &AnalysisRequest,
    baseline: &DataFrame,
    comparison: &DataFrame,
    cube: &CubeResult,
) -> Result<BTreeMap<String, MetricInsight>> {
    let mut out = BTreeMap::new();
    let parent_id = request.metric.id();

    let parent = assemble(
        request,
        &request.metric,
        None,
        baseline,
        comparison,
        cube,
        None,
        false,
    )?;
    out.insert(parent_id.clone(), parent);

    for (sub, display_name) in request.metric.sub_metrics() {
        let sub_metric = Metric::Single(sub);
        let insight = assemble(
            request,
            &sub_metric,
            Some(&display_name),
            baseline,
            comparison,
            cube,
            Some(parent_id.clone()),
            true,
        )?;
        out.insert(sub_metric.id(), insight);
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_non_finite() {
        assert_eq!(sanitize_f64(f64::NAN), 0.0);
        assert_eq!(sanitize_f64(f64::INFINITY), 0.0);
        assert_eq!(sanitize_f64(1.5), 1.5);
    }

    #[test]
    fn single_metric_has_no_filters_echoed_when_empty() {
        let m = SingleMetric::new("revenue", crate::metric::AggregateMethod::Sum);
        assert!(m.filters.is_empty());
    }
}
