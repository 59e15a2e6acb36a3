//! Data structures for segments, periods, and dimension scores.

use serde::{Deserialize, Serialize};

/// A single `dimension=value` predicate. `value` is always the stringified
/// form of whatever the source column held — numeric dimensions lose
/// trailing-zero formatting on purpose (see `spec.md` §9).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DimensionValuePair {
    /// Dimension (column) name.
    pub dimension: String,
    /// Stringified value. `""` and `"ALL"` are reserved sentinels for the
    /// cube rollup level and are never produced by this crate's own
    /// aggregation, but are accepted on the read side (secondary
    /// endpoints) for interoperability.
    pub value: String,
}

/// An ordered tuple of [`DimensionValuePair`], sorted by dimension name.
/// The sort order makes equality canonical and is what makes
/// [`SegmentKey::serialize`] stable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentKey(pub Vec<DimensionValuePair>);

impl SegmentKey {
    /// Builds a key from `(dimension, value)` pairs, sorting by dimension
    /// name so that equal segments always compare equal regardless of the
    /// order dimensions were enumerated in.
    pub fn new(mut pairs: Vec<DimensionValuePair>) -> Self {
        pairs.sort_by(|a, b| a.dimension.cmp(&b.dimension));
        Self(pairs)
    }

    /// Serialized form `"d1:v1|d2:v2|..."`.
    pub fn serialize(&self) -> String {
        self.0
            .iter()
            .map(|pair| format!("{}:{}", pair.dimension, pair.value))
            .collect::<Vec<_>>()
            .join("|")
    }

    /// The dimension names in this key, in sorted order.
    pub fn dimension_names(&self) -> Vec<&str> {
        self.0.iter().map(|pair| pair.dimension.as_str()).collect()
    }
}

/// A single period's value for one segment: its row count, its share of
/// the period's total row count, and the metric's value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PeriodValue {
    /// Number of rows in this segment for this period.
    pub count: i64,
    /// `count / total_count_in_period`, always in `[0, 1]`.
    pub size: f64,
    /// The metric's aggregated value for this segment in this period.
    pub value: f64,
}

impl PeriodValue {
    /// Builds a `PeriodValue`, treating a zero-row period total as a
    /// zero-size segment rather than dividing by zero.
    pub fn new(count: i64, total_count: i64, value: f64) -> Self {
        let size = if total_count == 0 {
            0.0
        } else {
            count as f64 / total_count as f64
        };
        Self { count, size, value }
    }
}

/// Computed, immutable-after-construction information about one segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentInfo {
    /// The segment's key.
    pub key: SegmentKey,
    /// `key.serialize()`, cached for fast lookups.
    pub serialized_key: String,
    /// Baseline period value.
    pub baseline_value: PeriodValue,
    /// Comparison period value.
    pub comparison_value: PeriodValue,
    /// `comparison_value.value - baseline_value.value`.
    pub impact: f64,
    /// Relative delta `(comparison - baseline) / baseline`, sign-fallback
    /// when baseline is zero.
    pub change: f64,
    /// Counterfactual contribution to the overall metric change.
    pub absolute_contribution: Option<f64>,
    /// Dispersion-normalized measure of how unusual this segment's change
    /// is relative to the rest of its subset (`change_variance` in
    /// `spec.md` §4.4).
    pub change_dev: Option<f64>,
    /// p-value from the per-segment significance test, only set for the
    /// headline top-driver segments.
    pub confidence: Option<f64>,
}

/// Score threshold below which a dimension is never considered key,
/// regardless of the mean score across dimensions. Fixes the Open Question
/// in `spec.md` §9 at the value already implied by the data model
/// invariant in §3 (`threshold = 0.01`).
pub const KEY_DIMENSION_THRESHOLD: f64 = 0.01;

/// A scored dimension, as returned in [`crate::insight::MetricInsight::dimensions`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DimensionScore {
    /// Dimension (column) name.
    pub name: String,
    /// Weighted relative-change dispersion score.
    pub score: f64,
    /// `score > max(0.01, mean_score_across_dimensions)`.
    pub is_key: bool,
}
