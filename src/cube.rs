//! Cube Analyzer (`spec.md` §4.4): the core algorithm. Builds the joined
//! baseline/comparison base, enumerates dimension subsets in parallel, and
//! produces the pruned, capped, stably-sorted segment frame `Σ`.

use itertools::Itertools;
use polars::prelude::*;
use rayon::prelude::*;
use tracing::instrument;

use crate::context::EngineContext;
use crate::errors::Result;
use crate::metric::Metric;
use crate::request::AnalysisRequest;

/// Row-count fraction below which a segment is pruned from `Σ`
/// (`spec.md` §4.4 step 5: "segment covers >1% of joined rows").
const PRUNE_THRESHOLD: f64 = 0.01;
/// Hard cap on the number of scored segments kept in `Σ` (`spec.md` §4.4
/// step 7, invariant 5 in §8).
const MAX_SEGMENTS: i64 = 20_000;

/// Row-count and metric-sum totals computed once over the full baseline
/// and comparison frames, used both for the `>1%` pruning denominator and
/// for `absolute_contribution`'s counterfactual-removal formula.
#[derive(Debug, Clone, Copy, Default)]
pub struct OverallTotals {
    /// Total baseline row count.
    pub baseline_count: i64,
    /// Total comparison row count.
    pub comparison_count: i64,
    /// Σ of the metric's "mass" column in the baseline period: the metric
    /// itself for `Single`, the numerator for `Dual`.
    pub numerator_baseline_sum: f64,
    /// Σ of the metric's "mass" column in the comparison period.
    pub numerator_comparison_sum: f64,
    /// Σ of the denominator's baseline values, for ratio metrics only.
    pub denominator_baseline_sum: Option<f64>,
    /// Σ of the denominator's comparison values, for ratio metrics only.
    pub denominator_comparison_sum: Option<f64>,
}

impl OverallTotals {
    /// Computes the totals from the baseline/comparison sub-frames.
    pub fn compute(baseline: &DataFrame, comparison: &DataFrame, metric: &Metric) -> Result<Self> {
        let exprs = metric.aggregation_exprs();
        let baseline_row = baseline.clone().lazy().select(exprs.clone()).collect()?;
        let comparison_row = comparison.clone().lazy().select(exprs).collect()?;

        let scalar = |df: &DataFrame, name: &str| -> f64 {
            df.column(name)
                .and_then(|c| c.f64())
                .ok()
                .and_then(|ca| ca.get(0))
                .unwrap_or(0.0)
        };

        // For `Dual` metrics, `metric.id()` names the *ratio* column; the
        // counterfactual-removal formula needs the numerator/denominator
        // sums underneath it, not the ratio itself.
        let (mass_id, denominator_baseline_sum, denominator_comparison_sum) = match metric {
            Metric::Dual {
                numerator,
                denominator,
                ..
            } => {
                let den_id = denominator.id();
                (
                    numerator.id(),
                    Some(scalar(&baseline_row, &den_id)),
                    Some(scalar(&comparison_row, &den_id)),
                )
            }
            Metric::Single(_) => (metric.id(), None, None),
        };

        Ok(Self {
            baseline_count: baseline.height() as i64,
            comparison_count: comparison.height() as i64,
            numerator_baseline_sum: scalar(&baseline_row, &mass_id),
            numerator_comparison_sum: scalar(&comparison_row, &mass_id),
            denominator_baseline_sum,
            denominator_comparison_sum,
        })
    }

    /// Total row count across both periods, the pruning denominator.
    pub fn total_rows(&self) -> i64 {
        self.baseline_count + self.comparison_count
    }

    /// The metric's overall displayed value for the baseline period: the
    /// mass sum for `Single`, `numerator_sum / denominator_sum` for `Dual`.
    pub fn metric_value_baseline(&self) -> f64 {
        match self.denominator_baseline_sum {
            Some(den) if den != 0.0 => self.numerator_baseline_sum / den,
            Some(_) => 0.0,
            None => self.numerator_baseline_sum,
        }
    }

    /// The metric's overall displayed value for the comparison period.
    pub fn metric_value_comparison(&self) -> f64 {
        match self.denominator_comparison_sum {
            Some(den) if den != 0.0 => self.numerator_comparison_sum / den,
            Some(_) => 0.0,
            None => self.numerator_comparison_sum,
        }
    }
}

/// Output of the Cube Analyzer.
pub struct CubeResult {
    /// `Σ`: the pruned, capped, stably-sorted segment frame.
    pub segments: DataFrame,
    /// Number of segments surviving the `>1%` prune, before the 20,000-row
    /// cap.
    pub total_segments: usize,
    /// The full-dimension joined base (grouped by *all* chosen
    /// dimensions, not a subset) — retained for the significance tester,
    /// which reconstructs per-segment sample vectors from it.
    pub joined_base: DataFrame,
    /// Totals used for pruning and absolute-contribution.
    pub totals: OverallTotals,
    /// `(dimension, weighted_relative_change_std)` for every
    /// single-dimension subset, read off the pruned (pre-cap) `Σ` before
    /// the 20,000-row cap can drop any of them. Feeds the Key Dimension
    /// Scorer (`spec.md` §4.5).
    pub single_dimension_scores: Vec<(String, f64)>,
}

fn safe_divide(n: Expr, d: Expr) -> Expr {
    when(d.clone().eq(lit(0))).then(lit(0.0)).otherwise(n / d)
}

/// Builds the full-dimension joined base: groups baseline and comparison
/// by every chosen dimension, outer-joins on those dimensions, and fills
/// nulls/NaNs with 0.
fn build_joined_base(
    baseline: &DataFrame,
    comparison: &DataFrame,
    dimensions: &[String],
    metric: &Metric,
) -> Result<DataFrame> {
    let mut agg_exprs = metric.aggregation_exprs();
    agg_exprs.push(col(crate::frame::DATE_COLUMN).count().alias("count"));

    let group_cols: Vec<Expr> = dimensions.iter().map(|d| col(d)).collect();

    let baseline_agg = baseline
        .clone()
        .lazy()
        .group_by(group_cols.clone())
        .agg(agg_exprs.clone())
        .collect()?;
    let comparison_agg = comparison
        .clone()
        .lazy()
        .group_by(group_cols.clone())
        .agg(agg_exprs)
        .collect()?;

    let on: Vec<Expr> = dimensions.iter().map(|d| col(d)).collect();
    let joined = comparison_agg
        .lazy()
        .join(
            baseline_agg.lazy(),
            on.clone(),
            on,
            JoinArgs {
                how: JoinType::Full,
                suffix: Some("_baseline".into()),
                coalesce: JoinCoalesce::CoalesceColumns,
                ..Default::default()
            },
        )
        .fill_null(lit(0))
        .fill_nan(lit(0))
        .collect()?;

    Ok(joined)
}

/// Aggregates a subset `S` of the joined base's metric/count columns,
/// attaches the `dimension_name`/`dimension_value`/`serialized_key`
/// columns, and computes the subset-level statistics of `spec.md` §4.4
/// step 4.
fn analyze_subset(
    joined_base: &DataFrame,
    subset: &[String],
    metric: &Metric,
    totals: &OverallTotals,
    expected_change: f64,
) -> Result<DataFrame> {
    let metric_id = metric.id();
    let metric_baseline_id = format!("{metric_id}_baseline");
    let weight_col = metric.weight_column();
    let weight_baseline_col = format!("{weight_col}_baseline");

    let mut sum_exprs: Vec<Expr> = match metric {
        Metric::Single(_) => vec![col(&metric_id).sum(), col(&metric_baseline_id).sum()],
        Metric::Dual {
            numerator,
            denominator,
            ..
        } => {
            let num_id = numerator.id();
            let den_id = denominator.id();
            vec![
                safe_divide(col(&num_id).sum(), col(&den_id).sum()).alias(&metric_id),
                col(&num_id).sum().alias(&num_id),
                col(&den_id).sum().alias(&den_id),
                safe_divide(
                    col(&format!("{num_id}_baseline")).sum(),
                    col(&format!("{den_id}_baseline")).sum(),
                )
                .alias(&metric_baseline_id),
                col(&format!("{num_id}_baseline"))
                    .sum()
                    .alias(&format!("{num_id}_baseline")),
                col(&format!("{den_id}_baseline"))
                    .sum()
                    .alias(&format!("{den_id}_baseline")),
            ]
        }
    };
    sum_exprs.push(col("count").sum().alias("count"));
    sum_exprs.push(col("count_baseline").sum().alias("count_baseline"));

    let group_cols: Vec<Expr> = subset.iter().map(|d| col(d)).collect();
    let dimension_value_parts: Vec<Expr> =
        subset.iter().map(|d| col(d).cast(DataType::String)).collect();
    let serialized_parts: Vec<Expr> = subset
        .iter()
        .map(|d| concat_str([lit(format!("{d}:")), col(d).cast(DataType::String)], "", true))
        .collect();

    let mut aggregated = joined_base
        .clone()
        .lazy()
        .group_by(group_cols)
        .agg(sum_exprs)
        .with_columns([
            lit(Series::new(
                "".into(),
                vec![Series::new("".into(), subset.to_vec())],
            ))
            .alias("dimension_name"),
            concat_list(dimension_value_parts)?.alias("dimension_value"),
            concat_str(serialized_parts, "|", true).alias("serialized_key"),
        ])
        .drop(subset)
        .collect()?;

    // weight = weight_col + weight_col_baseline (row-wise); Wsum is the
    // subset-wide total, broadcast onto every row as `sum`.
    let weight_sum: f64 = aggregated.column(&weight_col)?.f64()?.sum().unwrap_or(0.0)
        + aggregated
            .column(&weight_baseline_col)?
            .f64()?
            .sum()
            .unwrap_or(0.0);

    aggregated = aggregated
        .lazy()
        .with_columns([
            lit(weight_sum).alias("sum"),
            (col(&weight_col) + col(&weight_baseline_col)).alias("weight"),
        ])
        .with_columns([when(col(&metric_baseline_id).eq(lit(0)))
            .then(when(col(&metric_id).gt(lit(0))).then(lit(1.0)).otherwise(lit(-1.0)))
            .otherwise((col(&metric_id) - col(&metric_baseline_id)) / col(&metric_baseline_id))
            .alias("change")])
        .with_columns([(col("change") - lit(expected_change)).alias("calibrated_change")])
        .with_columns([(col("weight") * col("calibrated_change")).alias("weighted_change")])
        .collect()?;

    let weighted_change_mean = {
        let weight_sum: f64 = aggregated.column("weight")?.f64()?.sum().unwrap_or(0.0);
        let weighted_change_sum: f64 = aggregated
            .column("weighted_change")?
            .f64()?
            .sum()
            .unwrap_or(0.0);
        if weight_sum == 0.0 {
            0.0
        } else {
            weighted_change_sum / weight_sum
        }
    };

    aggregated = aggregated
        .lazy()
        .with_columns([lit(weighted_change_mean).alias("weighted_change_mean_subset")])
        .collect()?;

    let weighted_relative_change_std = {
        let weight = aggregated.column("weight")?.f64()?;
        let change = aggregated.column("change")?.f64()?;
        let mut weighted_sq = 0.0;
        let mut weight_sum = 0.0;
        for (w, c) in weight.into_iter().zip(change.into_iter()) {
            if let (Some(w), Some(c)) = (w, c) {
                weighted_sq += w * (c - weighted_change_mean).powi(2);
                weight_sum += w;
            }
        }
        if weight_sum == 0.0 {
            0.0
        } else {
            (weighted_sq / weight_sum).sqrt()
        }
    };

    aggregated = aggregated
        .lazy()
        .with_columns([lit(weighted_relative_change_std).alias("weighted_relative_change_std")])
        .collect()?;

    let absolute_contribution_expr = match metric {
        Metric::Single(_) => {
            let overall_change = if totals.numerator_baseline_sum == 0.0 {
                0.0
            } else {
                (totals.numerator_comparison_sum - totals.numerator_baseline_sum)
                    / totals.numerator_baseline_sum
            };
            let overall_change_without = safe_divide(
                (lit(totals.numerator_comparison_sum) - col(&metric_id))
                    - (lit(totals.numerator_baseline_sum) - col(&metric_baseline_id)),
                lit(totals.numerator_baseline_sum) - col(&metric_baseline_id),
            );
            (lit(overall_change) - overall_change_without).alias("absolute_contribution")
        }
        Metric::Dual {
            numerator,
            denominator,
            ..
        } => {
            let num_id = numerator.id();
            let den_id = denominator.id();
            let num_sum = totals.numerator_comparison_sum;
            let num_sum_baseline = totals.numerator_baseline_sum;
            let den_sum = totals.denominator_comparison_sum.unwrap_or(0.0);
            let den_sum_baseline = totals.denominator_baseline_sum.unwrap_or(0.0);

            let overall_ratio_change = safe_divide(lit(num_sum), lit(den_sum))
                - safe_divide(lit(num_sum_baseline), lit(den_sum_baseline));
            let overall_ratio_change_without = safe_divide(
                lit(num_sum) - col(&num_id),
                lit(den_sum) - col(&den_id),
            ) - safe_divide(
                lit(num_sum_baseline) - col(&format!("{num_id}_baseline")),
                lit(den_sum_baseline) - col(&format!("{den_id}_baseline")),
            );
            (overall_ratio_change - overall_ratio_change_without).alias("absolute_contribution")
        }
    };

    let result = aggregated
        .lazy()
        .with_columns([absolute_contribution_expr])
        .collect()?;

    Ok(result)
}

/// Runs the Cube Analyzer: builds the joined base, enumerates subsets of
/// `request.dimensions` up to `request.max_dimensions` on
/// `context`'s thread pool, concatenates, prunes, and produces the final
/// stably-sorted, capped segment frame.
#[instrument(skip(baseline, comparison, context, request))]
pub fn analyze(
    baseline: &DataFrame,
    comparison: &DataFrame,
    request: &AnalysisRequest,
    context: &EngineContext,
) -> Result<CubeResult> {
    let totals = OverallTotals::compute(baseline, comparison, &request.metric)?;
    let joined_base = build_joined_base(baseline, comparison, &request.dimensions, &request.metric)?;

    let subsets: Vec<Vec<String>> = (1..=request.max_dimensions.min(request.dimensions.len()))
        .flat_map(|k| {
            request
                .dimensions
                .iter()
                .cloned()
                .combinations(k)
                .collect::<Vec<_>>()
        })
        .collect();

    tracing::info!(subset_count = subsets.len(), "enumerating dimension subsets");

    let subset_frames: Vec<DataFrame> = context.pool().install(|| {
        subsets
            .par_iter()
            .map(|subset| {
                analyze_subset(&joined_base, subset, &request.metric, &totals, request.expected_change)
            })
            .collect::<Result<Vec<_>>>()
    })?;

    let mut combined = subset_frames
        .into_iter()
        .reduce(|acc, frame| acc.vstack(&frame).expect("subset frames share a schema"))
        .unwrap_or_default();

    let total_rows = totals.total_rows().max(1) as f64;
    combined = combined
        .lazy()
        .filter(
            ((col("count") + col("count_baseline")).cast(DataType::Float64) / lit(total_rows))
                .gt(lit(PRUNE_THRESHOLD)),
        )
        .collect()?;

    let total_segments = combined.height();

    let single_dimension_scores = {
        let single_dim = combined
            .clone()
            .lazy()
            .filter(col("dimension_name").list().len().eq(lit(1)))
            .select([
                col("dimension_name")
                    .list()
                    .get(lit(0), false)
                    .alias("dimension"),
                col("weighted_relative_change_std"),
            ])
            .group_by([col("dimension")])
            .agg([col("weighted_relative_change_std").mean().alias("score")])
            .collect()?;

        let names = single_dim.column("dimension")?.str()?;
        let scores = single_dim.column("score")?.f64()?;
        names
            .into_iter()
            .zip(scores.into_iter())
            .filter_map(|(n, s)| match (n, s) {
                (Some(n), Some(s)) => Some((n.to_string(), s)),
                _ => None,
            })
            .collect::<Vec<_>>()
    };

    // Global change_variance inputs, recomputed over the full pruned Σ
    // (distinct from each subset's own weighted_change_mean/std, which
    // remain on `weighted_change_mean_subset`/`weighted_relative_change_std`).
    let (global_weighted_change_mean, global_weighted_std) = {
        let weight = combined.column("weight")?.f64()?;
        let change = combined.column("change")?.f64()?;
        let weighted_change: f64 = combined
            .column("weighted_change")?
            .f64()?
            .sum()
            .unwrap_or(0.0);
        let weight_sum: f64 = weight.sum().unwrap_or(0.0);
        let mean = if weight_sum == 0.0 {
            0.0
        } else {
            weighted_change / weight_sum
        };
        let mut weighted_sq = 0.0;
        for (w, c) in weight.into_iter().zip(change.into_iter()) {
            if let (Some(w), Some(c)) = (w, c) {
                weighted_sq += w * (c - mean).powi(2);
            }
        }
        let std = if weight_sum == 0.0 {
            0.0
        } else {
            (weighted_sq / weight_sum).sqrt()
        };
        (mean, std)
    };

    let dimension_weight_expr = when(col("dimension_name").list().len().eq(lit(1)))
        .then(lit(1))
        .otherwise(lit(0))
        .alias("dimension_weight");
    let change_variance_expr = if global_weighted_std == 0.0 {
        lit(0.0).alias("change_variance")
    } else {
        ((col("change") - lit(request.expected_change)).abs() / lit(global_weighted_std)
            * (col("weight") / col("sum")).sqrt())
        .alias("change_variance")
    };

    combined = combined
        .lazy()
        .with_columns([
            lit(global_weighted_change_mean).alias("weighted_change_mean"),
            lit(global_weighted_std).alias("weighted_std"),
            request.metric.sorting_expr(),
            dimension_weight_expr,
        ])
        .with_columns([change_variance_expr])
        .sort_by_exprs(
            [col("dimension_weight"), col("sort").abs()],
            SortMultipleOptions::default().with_order_descending(true),
        )
        .limit(MAX_SEGMENTS as u32)
        .sort_by_exprs(
            [col("sort").abs()],
            SortMultipleOptions::default().with_order_descending(true),
        )
        .collect()?;

    Ok(CubeResult {
        segments: combined,
        total_segments,
        joined_base,
        totals,
        single_dimension_scores,
    })
}
