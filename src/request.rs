//! Request Parser (`spec.md` §4.1): converts the external wire shape into
//! a typed [`AnalysisRequest`].

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::errors::{EngineError, Result};
use crate::metric::{Filter, Metric, RatioMetricSpec, SingularMetricSpec};

/// Default cap on subset size (`D_max`) when the request omits it.
pub const DEFAULT_MAX_DIMENSIONS: usize = 3;
/// Hard cap on `D_max` regardless of what the request asks for.
pub const MAX_DIMENSIONS_CAP: usize = 4;

/// How the `dateColumn` should be interpreted before being truncated to a
/// calendar date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DateColumnType {
    /// Already a date (or a date-like string).
    Date,
    /// Milliseconds since the Unix epoch.
    TimestampMs,
    /// Seconds since the Unix epoch.
    TimestampS,
    /// An integer epoch value; same handling as `TimestampS`.
    EpochInt,
}

impl Default for DateColumnType {
    fn default() -> Self {
        Self::Date
    }
}

/// An inclusive `[from, to]` calendar-date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    /// Inclusive start.
    pub from: NaiveDate,
    /// Inclusive end.
    pub to: NaiveDate,
}

impl DateRange {
    fn parse(raw: &RawDateRange) -> Result<Self> {
        Ok(Self {
            from: parse_iso_date(&raw.from)?,
            to: parse_iso_date(&raw.to)?,
        })
    }

    /// `[from, to]` formatted as `YYYY-MM-DD`, the shape `MetricInsight`
    /// serializes date ranges in.
    pub fn to_iso_pair(self) -> [String; 2] {
        [
            self.from.format("%Y-%m-%d").to_string(),
            self.to.format("%Y-%m-%d").to_string(),
        ]
    }
}

/// Parses an ISO-8601 date or date-time string, accepting both a bare
/// `YYYY-MM-DD` date and a full `YYYY-MM-DDTHH:MM:SS(.fff)Z` timestamp (the
/// shape the original request bodies use).
fn parse_iso_date(raw: &str) -> Result<NaiveDate> {
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Ok(date);
    }
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.date_naive());
    }
    // Accept the `.%fZ` shape even when chrono's RFC3339 parser is picky
    // about fractional-second width.
    for fmt in ["%Y-%m-%dT%H:%M:%S%.fZ", "%Y-%m-%dT%H:%M:%SZ"] {
        if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(raw, fmt) {
            return Ok(dt.date());
        }
    }
    Err(EngineError::InvalidRequest(format!(
        "invalid date {raw:?}"
    )))
}

/// A fully parsed analysis request, ready to hand to the Frame Preparer
/// and Cube Analyzer.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    /// Baseline window, inclusive.
    pub baseline_range: DateRange,
    /// Comparison window, inclusive.
    pub comparison_range: DateRange,
    /// Column holding the event date/timestamp.
    pub date_column: String,
    /// How to interpret `date_column` before truncating to a date.
    pub date_column_type: DateColumnType,
    /// Dimensions to cube over.
    pub dimensions: Vec<String>,
    /// The metric under analysis.
    pub metric: Metric,
    /// Row filters applied before any aggregation.
    pub filters: Vec<Filter>,
    /// Cap on subset size (`D_max`), already clamped to
    /// [`MAX_DIMENSIONS_CAP`].
    pub max_dimensions: usize,
    /// Expected relative change, subtracted from each segment's `change`
    /// to get `calibrated_change`.
    pub expected_change: f64,
}

/// Raw `{from, to}` wire shape for a date range.
#[derive(Debug, Clone, Deserialize)]
pub struct RawDateRange {
    /// Inclusive start, ISO-8601.
    pub from: String,
    /// Inclusive end, ISO-8601.
    pub to: String,
}

/// Raw metric-column wire shape (`spec.md` §6).
#[derive(Debug, Clone, Deserialize)]
pub struct RawMetricColumn {
    /// `"sum" | "count" | "distinct" | "ratio"`.
    #[serde(rename = "aggregationOption")]
    pub aggregation_option: String,
    /// Present when `aggregation_option != "ratio"`.
    #[serde(rename = "singularMetric")]
    pub singular_metric: Option<SingularMetricSpec>,
    /// Present when `aggregation_option == "ratio"`.
    #[serde(rename = "ratioMetric")]
    pub ratio_metric: Option<RatioMetricSpec>,
}

/// Raw analysis-request wire shape (`spec.md` §6), deserialized directly
/// from the JSON request body.
#[derive(Debug, Clone, Deserialize)]
pub struct RawAnalysisRequest {
    /// Baseline window.
    #[serde(rename = "baseDateRange")]
    pub base_date_range: RawDateRange,
    /// Comparison window.
    #[serde(rename = "comparisonDateRange")]
    pub comparison_date_range: RawDateRange,
    /// Event date column.
    #[serde(rename = "dateColumn")]
    pub date_column: String,
    /// How to interpret the date column.
    #[serde(rename = "dateColumnType", default)]
    pub date_column_type: Option<DateColumnType>,
    /// Dimensions to cube over.
    #[serde(rename = "groupByColumns")]
    pub group_by_columns: Vec<String>,
    /// Cap on subset size.
    #[serde(rename = "maxNumDimensions", default)]
    pub max_num_dimensions: Option<usize>,
    /// Metric descriptor.
    #[serde(rename = "metricColumn")]
    pub metric_column: RawMetricColumn,
    /// Row filters.
    #[serde(default)]
    pub filters: Vec<Filter>,
    /// Expected relative change.
    #[serde(rename = "expectedValue")]
    pub expected_value: f64,
}

impl AnalysisRequest {
    /// Parses a [`RawAnalysisRequest`] into a typed [`AnalysisRequest`],
    /// validating dates, the metric descriptor, and dimension bounds.
    pub fn parse(raw: RawAnalysisRequest) -> Result<Self> {
        if raw.group_by_columns.is_empty() {
            return Err(EngineError::InvalidRequest(
                "groupByColumns must not be empty".to_string(),
            ));
        }
        let metric = Metric::from_request(
            &raw.metric_column.aggregation_option,
            raw.metric_column.singular_metric,
            raw.metric_column.ratio_metric,
        )?;
        let max_dimensions = raw
            .max_num_dimensions
            .unwrap_or(DEFAULT_MAX_DIMENSIONS)
            .min(MAX_DIMENSIONS_CAP)
            .max(1);

        // Sorted so every subset's `serialized_key` comes out in a
        // canonical dimension-name order, matching the original's
        // `self.group_by_columns.sort()`.
        let mut dimensions = raw.group_by_columns;
        dimensions.sort();

        Ok(Self {
            baseline_range: DateRange::parse(&raw.base_date_range)?,
            comparison_range: DateRange::parse(&raw.comparison_date_range)?,
            date_column: raw.date_column,
            date_column_type: raw.date_column_type.unwrap_or_default(),
            dimensions,
            metric,
            filters: raw.filters,
            max_dimensions,
            expected_change: raw.expected_value,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_raw() -> RawAnalysisRequest {
        RawAnalysisRequest {
            base_date_range: RawDateRange {
                from: "2024-01-01".to_string(),
                to: "2024-01-02".to_string(),
            },
            comparison_date_range: RawDateRange {
                from: "2024-02-01".to_string(),
                to: "2024-02-02".to_string(),
            },
            date_column: "date".to_string(),
            date_column_type: None,
            group_by_columns: vec!["country".to_string(), "device".to_string()],
            max_num_dimensions: None,
            metric_column: RawMetricColumn {
                aggregation_option: "sum".to_string(),
                singular_metric: Some(SingularMetricSpec {
                    column_name: "revenue".to_string(),
                    filter: None,
                }),
                ratio_metric: None,
            },
            filters: Vec::new(),
            expected_value: 0.0,
        }
    }

    #[test]
    fn parses_minimal_request() {
        let request = AnalysisRequest::parse(base_raw()).unwrap();
        assert_eq!(request.max_dimensions, DEFAULT_MAX_DIMENSIONS);
        assert_eq!(request.dimensions, vec!["country", "device"]);
    }

    #[test]
    fn sorts_dimensions_by_name() {
        let mut raw = base_raw();
        raw.group_by_columns = vec!["device".to_string(), "country".to_string()];
        let request = AnalysisRequest::parse(raw).unwrap();
        assert_eq!(request.dimensions, vec!["country", "device"]);
    }

    #[test]
    fn clamps_max_dimensions_to_cap() {
        let mut raw = base_raw();
        raw.max_num_dimensions = Some(10);
        let request = AnalysisRequest::parse(raw).unwrap();
        assert_eq!(request.max_dimensions, MAX_DIMENSIONS_CAP);
    }

    #[test]
    fn rejects_bad_date() {
        let mut raw = base_raw();
        raw.base_date_range.from = "not-a-date".to_string();
        let err = AnalysisRequest::parse(raw).unwrap_err();
        assert!(matches!(err, EngineError::InvalidRequest(_)));
    }

    #[test]
    fn accepts_rfc3339_timestamps() {
        let mut raw = base_raw();
        raw.base_date_range.from = "2024-01-01T00:00:00.000Z".to_string();
        raw.base_date_range.to = "2024-01-02T00:00:00.000Z".to_string();
        let request = AnalysisRequest::parse(raw).unwrap();
        assert_eq!(
            request.baseline_range.from,
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
        );
    }
}
