//! # segment-insight
//!
//! Explains a metric's shift between two time windows across
//! multi-dimensional segments: which segments moved, how much each
//! contributed, and which dimensions actually matter.
//!
//! The pipeline is a straight line from a raw [`polars::frame::DataFrame`]
//! to a [`MetricInsight`]:
//!
//! 1. [`request::AnalysisRequest::parse`] — validate the wire request.
//! 2. [`frame::prepare`] — apply filters, derive the date column, split
//!    into baseline/comparison.
//! 3. [`cube::analyze`] — enumerate dimension subsets, aggregate, prune,
//!    sort, cap.
//! 4. [`key_dimension::score_dimensions`] / [`ranker::top_drivers`] /
//!    [`significance::test_segment`] — score dimensions, pick drivers,
//!    test significance.
//! 5. [`insight::assemble_all`] — assemble the output document(s).
//!
//! [`run_analysis`] drives all five steps for a caller that already has a
//! parsed request, a loaded frame, and an [`EngineContext`].
//!
//! ## Example
//!
//! ```no_run
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use segment_insight::{run_analysis, AnalysisRequest, EngineContext, RawAnalysisRequest};
//! use polars::prelude::*;
//!
//! let raw: RawAnalysisRequest = serde_json::from_str(r#"{
//!     "baseDateRange": {"from": "2024-01-01", "to": "2024-01-31"},
//!     "comparisonDateRange": {"from": "2024-02-01", "to": "2024-02-29"},
//!     "dateColumn": "event_date",
//!     "groupByColumns": ["country", "device"],
//!     "metricColumn": {
//!         "aggregationOption": "sum",
//!         "singularMetric": {"columnName": "revenue"}
//!     },
//!     "expectedValue": 0.0
//! }"#)?;
//! let request = AnalysisRequest::parse(raw)?;
//! let df = CsvReadOptions::default().try_into_reader_with_file_path(Some("events.csv".into()))?.finish()?;
//! let context = EngineContext::new();
//!
//! let insights = run_analysis(df, &request, &context)?;
//! for (metric_id, insight) in &insights {
//!     println!("{metric_id}: {} segments", insight.total_segments);
//! }
//! # Ok(())
//! # }
//! ```

pub mod context;
pub mod cube;
pub mod errors;
pub mod frame;
pub mod insight;
pub mod key_dimension;
pub mod metric;
pub mod ranker;
pub mod request;
pub mod secondary;
pub mod segment;
pub mod significance;
pub mod staging;
pub mod statistical_tests;

use std::collections::BTreeMap;

use polars::prelude::DataFrame;
use tracing::instrument;

pub use context::EngineContext;
pub use errors::{EngineError, Result};
pub use insight::MetricInsight;
pub use request::{AnalysisRequest, RawAnalysisRequest};

/// Runs the full pipeline — Frame Preparer, Cube Analyzer, Key Dimension
/// Scorer, Ranker, Significance Tester, Insight Assembler — over `df`, and
/// returns one [`MetricInsight`] per metric id (the requested metric, plus
/// one per numerator/denominator leg when it's a ratio metric).
#[instrument(skip(df, request, context), fields(rows = df.height()))]
pub fn run_analysis(
    df: DataFrame,
    request: &AnalysisRequest,
    context: &EngineContext,
) -> Result<BTreeMap<String, MetricInsight>> {
    let prepared = frame::prepare(df, request)?;
    let cube_result = cube::analyze(&prepared.baseline, &prepared.comparison, request, context)?;
    insight::assemble_all(request, &prepared.baseline, &prepared.comparison, &cube_result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use metric::{AggregateMethod, Metric, SingleMetric};
    use polars::df;
    use request::{DateColumnType, DateRange};

    fn sample_request() -> AnalysisRequest {
        AnalysisRequest {
            baseline_range: DateRange {
                from: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                to: NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
            },
            comparison_range: DateRange {
                from: NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
                to: NaiveDate::from_ymd_opt(2024, 2, 28).unwrap(),
            },
            date_column: "date".to_string(),
            date_column_type: DateColumnType::Date,
            dimensions: vec!["country".to_string(), "device".to_string()],
            metric: Metric::Single(SingleMetric::new("revenue", AggregateMethod::Sum)),
            filters: Vec::new(),
            max_dimensions: 2,
            expected_change: 0.0,
        }
    }

    fn sample_df() -> DataFrame {
        df![
            "date" => [
                "2024-01-05", "2024-01-10", "2024-01-15", "2024-01-20",
                "2024-02-05", "2024-02-10", "2024-02-15", "2024-02-20",
            ],
            "country" => ["US", "US", "CA", "CA", "US", "US", "CA", "CA"],
            "device" => ["ios", "android", "ios", "android", "ios", "android", "ios", "android"],
            "revenue" => [10.0, 5.0, 8.0, 4.0, 30.0, 6.0, 9.0, 4.0],
        ]
        .unwrap()
    }

    #[test]
    fn run_analysis_produces_one_insight_for_a_single_metric() {
        let request = sample_request();
        let context = EngineContext::with_threads(2);
        let insights = run_analysis(sample_df(), &request, &context).unwrap();
        assert_eq!(insights.len(), 1);
        let insight = insights.get("revenue_SUM").unwrap();
        assert!(insight.total_segments > 0);
        assert!(insight.dimension_slice_info.len() <= insight.total_segments);
    }

    #[test]
    fn empty_dataset_is_an_error() {
        let mut request = sample_request();
        request.baseline_range = DateRange {
            from: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            to: NaiveDate::from_ymd_opt(2024, 5, 2).unwrap(),
        };
        let context = EngineContext::new();
        let err = run_analysis(sample_df(), &request, &context).unwrap_err();
        assert!(matches!(err, EngineError::EmptyDataset));
    }
}
