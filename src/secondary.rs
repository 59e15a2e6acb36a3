//! Secondary endpoints (`spec.md` §6, supplemented from
//! `original_source/backend/app/insight/services/segment_insight_builder.py`):
//! related segments, a single segment's time series, and a waterfall over an
//! ordered list of segments. These are plain library functions — there is no
//! HTTP server in this crate — exposed as CLI subcommands.

use std::collections::BTreeMap;

use polars::prelude::*;

use crate::cube::CubeResult;
use crate::errors::Result;
use crate::frame::DATE_COLUMN;
use crate::insight::{build_segment_infos, DatedValue};
use crate::metric::Metric;
use crate::segment::{SegmentInfo, SegmentKey};

/// Every segment in `Σ` sharing `key`'s dimension set (the same subset of
/// dimensions, varying only in value) — grounded in the original's
/// `get_related_segments`.
pub fn related_segments(
    cube: &CubeResult,
    metric: &Metric,
    key: &SegmentKey,
) -> Result<Vec<SegmentInfo>> {
    let target_dims = key.dimension_names();

    let all = build_segment_infos(
        &cube.segments,
        metric,
        cube.totals.comparison_count,
        cube.totals.baseline_count,
    )?;

    Ok(all
        .into_values()
        .filter(|info| info.key.dimension_names() == target_dims)
        .collect())
}

/// `baselineValueByDate`/`comparisonValueByDate` restricted to the rows
/// matching every `dimension=value` pair in `key` — grounded in the
/// original's `get_segment_insight`.
pub fn segment_time_series(
    baseline: &DataFrame,
    comparison: &DataFrame,
    metric: &Metric,
    key: &SegmentKey,
) -> Result<(Vec<DatedValue>, Vec<DatedValue>)> {
    let metric_id = metric.id();

    let mut predicate = lit(true);
    for pair in &key.0 {
        predicate = predicate.and(
            col(&pair.dimension)
                .cast(DataType::String)
                .eq(lit(pair.value.clone())),
        );
    }

    let agg_for = |df: &DataFrame| -> Result<Vec<DatedValue>> {
        let exprs = metric.aggregation_exprs();
        let grouped = df
            .clone()
            .lazy()
            .filter(predicate.clone())
            .group_by([col(DATE_COLUMN)])
            .agg(exprs)
            .sort([DATE_COLUMN], SortMultipleOptions::default())
            .collect()?;

        let dates = grouped.column(DATE_COLUMN)?.date()?;
        let values = grouped.column(&metric_id)?.f64()?;
        Ok(dates
            .into_iter()
            .zip(values.into_iter())
            .filter_map(|(d, v)| {
                let d = d?;
                let date = chrono::NaiveDate::from_num_days_from_ce_opt(d + 719_163)?;
                Some(DatedValue {
                    date: date.format("%Y-%m-%d").to_string(),
                    value: crate::insight::sanitize_f64(v.unwrap_or(0.0)),
                })
            })
            .collect())
    };

    Ok((agg_for(baseline)?, agg_for(comparison)?))
}

/// One step of a waterfall: a segment's own contribution and the running
/// total after it.
#[derive(Debug, Clone)]
pub struct WaterfallStep {
    /// The segment's serialized key.
    pub serialized_key: String,
    /// The segment's own `absolute_contribution` (`0.0` when unset).
    pub contribution: f64,
    /// Sum of `contribution` for this step and every step before it.
    pub cumulative: f64,
}

/// Builds a running `absolute_contribution` waterfall over `ordered_keys`,
/// in the order given — grounded in the original's `get_waterfall_insight`.
/// Keys absent from `dimension_slice_info` contribute `0.0` and still
/// appear in the output, preserving the caller's ordering.
pub fn waterfall(
    dimension_slice_info: &BTreeMap<String, SegmentInfo>,
    ordered_keys: &[String],
) -> Vec<WaterfallStep> {
    let mut cumulative = 0.0;
    ordered_keys
        .iter()
        .map(|key| {
            let contribution = dimension_slice_info
                .get(key)
                .and_then(|info| info.absolute_contribution)
                .unwrap_or(0.0);
            cumulative += contribution;
            WaterfallStep {
                serialized_key: key.clone(),
                contribution,
                cumulative,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::{DimensionValuePair, PeriodValue};

    fn sample_info(key: &str, contribution: f64) -> SegmentInfo {
        SegmentInfo {
            key: SegmentKey::new(vec![DimensionValuePair {
                dimension: "country".to_string(),
                value: key.to_string(),
            }]),
            serialized_key: format!("country:{key}"),
            baseline_value: PeriodValue::new(1, 1, 1.0),
            comparison_value: PeriodValue::new(1, 1, 1.0),
            impact: 0.0,
            change: 0.0,
            absolute_contribution: Some(contribution),
            change_dev: None,
            confidence: None,
        }
    }

    #[test]
    fn waterfall_accumulates_in_order() {
        let mut map = BTreeMap::new();
        map.insert("country:US".to_string(), sample_info("US", 0.3));
        map.insert("country:CA".to_string(), sample_info("CA", -0.1));

        let steps = waterfall(
            &map,
            &["country:US".to_string(), "country:CA".to_string()],
        );
        assert_eq!(steps[0].cumulative, 0.3);
        assert!((steps[1].cumulative - 0.2).abs() < 1e-9);
    }

    #[test]
    fn waterfall_treats_missing_keys_as_zero() {
        let map = BTreeMap::new();
        let steps = waterfall(&map, &["country:US".to_string()]);
        assert_eq!(steps[0].contribution, 0.0);
        assert_eq!(steps[0].cumulative, 0.0);
    }
}
