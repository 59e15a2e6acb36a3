//! Significance tester (`spec.md` §4.6): tests whether a top-driver
//! segment's change is significantly different from the expected change,
//! using a one-sample t-test over the segment's per-row sample vector.
//!
//! Grounded in the original's significance step, which re-filters the
//! full-dimension joined base (not the subset-level `Σ`) by the segment's
//! fixed `dimension=value` predicates and reads off the remaining rows'
//! metric values as the test's sample vector — one sample per distinct
//! combination of whichever dimensions weren't fixed, not one sample per
//! calendar day.

use polars::prelude::*;

use crate::errors::Result;
use crate::metric::Metric;
use crate::segment::SegmentKey;
use crate::statistical_tests::StudentTTest;

/// Tests whether `key`'s comparison-vs-baseline change is significant.
///
/// Filters `joined_base` (the full-dimension joined base built by
/// [`crate::cube::analyze`]) down to the rows matching every
/// `dimension=value` pair in `key`. Single-column metrics compare
/// `relative_diff_i = (m_i - m_B,i) / m_B,i · 100`, dropping the
/// infinities/NaNs a zero baseline produces; ratio metrics compare the
/// absolute per-row diff `m - m_baseline` instead, which has no such
/// singularity. If fewer than half of the matched rows survive dropping
/// non-finite values, the sample is too thin to trust and the test is
/// skipped. Returns `None` whenever the test isn't computable (including
/// zero variance) rather than an error — the absence of a `confidence`
/// value is a valid outcome, not a failure.
pub fn test_segment(
    joined_base: &DataFrame,
    key: &SegmentKey,
    metric: &Metric,
    expected_change: f64,
) -> Result<Option<f64>> {
    let metric_id = metric.id();
    let metric_baseline_id = format!("{metric_id}_baseline");

    let mut predicate = lit(true);
    for pair in &key.0 {
        predicate = predicate.and(col(&pair.dimension).cast(DataType::String).eq(lit(pair.value.clone())));
    }

    let filtered = joined_base.clone().lazy().filter(predicate).collect()?;
    let matched_rows = filtered.height();
    if matched_rows < 2 {
        return Ok(None);
    }

    let comparison = filtered.column(&metric_id)?.f64()?;
    let baseline = filtered.column(&metric_baseline_id)?.f64()?;
    let is_ratio = matches!(metric, Metric::Dual { .. });

    let diffs: Vec<f64> = comparison
        .into_iter()
        .zip(baseline.into_iter())
        .filter_map(|(c, b)| {
            let (c, b) = (c?, b?);
            let diff = if is_ratio {
                c - b
            } else {
                (c - b) / b * 100.0
            };
            diff.is_finite().then_some(diff)
        })
        .collect();

    if diffs.len() * 2 <= matched_rows {
        return Ok(None);
    }

    Ok(StudentTTest::from_samples(diffs, expected_change).map(|t| t.p_value()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::{AggregateMethod, SingleMetric};
    use crate::segment::DimensionValuePair;

    #[test]
    fn insignificant_with_too_few_matching_rows() {
        let df = df![
            "country" => ["US"],
            "revenue" => [10.0],
            "revenue_baseline" => [8.0],
        ]
        .unwrap();
        let metric = Metric::Single(SingleMetric::new("revenue", AggregateMethod::Sum));
        let key = SegmentKey::new(vec![DimensionValuePair {
            dimension: "country".to_string(),
            value: "US".to_string(),
        }]);
        let result = test_segment(&df, &key, &metric, 0.0).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn significant_with_consistent_large_change() {
        let df = df![
            "country" => ["US", "US", "US", "US"],
            "device" => ["ios", "android", "web", "desktop"],
            "revenue" => [20.0, 22.0, 19.0, 21.0],
            "revenue_baseline" => [10.0, 10.0, 10.0, 10.0],
        ]
        .unwrap();
        let metric = Metric::Single(SingleMetric::new("revenue", AggregateMethod::Sum));
        let key = SegmentKey::new(vec![DimensionValuePair {
            dimension: "country".to_string(),
            value: "US".to_string(),
        }]);
        let result = test_segment(&df, &key, &metric, 0.0).unwrap();
        assert!(result.unwrap() < 0.05);
    }
}
