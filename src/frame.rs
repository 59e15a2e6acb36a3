//! Frame Preparer (`spec.md` §4.2): applies row filters, derives the
//! canonical `date` column, and splits the frame into baseline/comparison
//! sub-frames by inclusive date-range selection.

use polars::prelude::*;
use tracing::instrument;

use crate::errors::{EngineError, Result};
use crate::metric::filter_expression;
use crate::request::{AnalysisRequest, DateColumnType};

/// The name of the canonical derived date column every downstream stage
/// groups and filters on.
pub const DATE_COLUMN: &str = "date";

/// Baseline and comparison sub-frames produced by the Frame Preparer.
pub struct PreparedFrames {
    /// Rows whose derived `date` falls in `request.baseline_range`.
    pub baseline: DataFrame,
    /// Rows whose derived `date` falls in `request.comparison_range`.
    pub comparison: DataFrame,
}

/// Casts/truncates `request.date_column` into a canonical `date` column,
/// applies `request.filters`, and splits the result into baseline and
/// comparison sub-frames.
///
/// # Errors
///
/// Returns [`EngineError::EmptyDataset`] if the filtered frame has zero
/// rows, before either sub-frame is materialized.
#[instrument(skip(df, request), fields(rows = df.height()))]
pub fn prepare(df: DataFrame, request: &AnalysisRequest) -> Result<PreparedFrames> {
    let with_date = df
        .lazy()
        .with_column(derive_date_expr(request).alias(DATE_COLUMN))
        .filter(filter_expression(&request.filters))
        .collect()?;

    if with_date.height() == 0 {
        return Err(EngineError::EmptyDataset);
    }

    let baseline = with_date
        .clone()
        .lazy()
        .filter(date_between(request.baseline_range.from, request.baseline_range.to))
        .collect()?;
    let comparison = with_date
        .lazy()
        .filter(date_between(request.comparison_range.from, request.comparison_range.to))
        .collect()?;

    if baseline.height() == 0 || comparison.height() == 0 {
        return Err(EngineError::EmptyDataset);
    }

    tracing::info!(
        baseline_rows = baseline.height(),
        comparison_rows = comparison.height(),
        "frame prepared"
    );

    Ok(PreparedFrames { baseline, comparison })
}

fn date_between(from: chrono::NaiveDate, to: chrono::NaiveDate) -> Expr {
    col(DATE_COLUMN).is_between(lit(from), lit(to), ClosedInterval::Both)
}

fn derive_date_expr(request: &AnalysisRequest) -> Expr {
    let source = col(&request.date_column);
    match request.date_column_type {
        DateColumnType::Date => source.cast(DataType::String).str().to_date(StrptimeOptions {
            format: Some("%Y-%m-%d".into()),
            strict: false,
            exact: false,
            cache: true,
        }),
        DateColumnType::TimestampMs => (source.cast(DataType::Int64) / lit(1000))
            .cast(DataType::Datetime(TimeUnit::Milliseconds, None))
            .cast(DataType::Date),
        DateColumnType::TimestampS | DateColumnType::EpochInt => source
            .cast(DataType::Int64)
            .cast(DataType::Datetime(TimeUnit::Milliseconds, None))
            .cast(DataType::Date),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::{AggregateMethod, Metric, SingleMetric};
    use crate::request::{AnalysisRequest, DateRange};
    use chrono::NaiveDate;

    fn sample_request() -> AnalysisRequest {
        AnalysisRequest {
            baseline_range: DateRange {
                from: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                to: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            },
            comparison_range: DateRange {
                from: NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
                to: NaiveDate::from_ymd_opt(2024, 2, 2).unwrap(),
            },
            date_column: "date".to_string(),
            date_column_type: DateColumnType::Date,
            dimensions: vec!["country".to_string()],
            metric: Metric::Single(SingleMetric::new("revenue", AggregateMethod::Sum)),
            filters: Vec::new(),
            max_dimensions: 2,
            expected_change: 0.0,
        }
    }

    fn sample_df() -> DataFrame {
        df![
            "date" => ["2024-01-01", "2024-01-02", "2024-02-01", "2024-02-02", "2024-03-01"],
            "country" => ["US", "CA", "US", "CA", "US"],
            "revenue" => [10.0, 3.0, 20.0, 10.0, 99.0],
        ]
        .unwrap()
    }

    #[test]
    fn splits_into_baseline_and_comparison() {
        let prepared = prepare(sample_df(), &sample_request()).unwrap();
        assert_eq!(prepared.baseline.height(), 2);
        assert_eq!(prepared.comparison.height(), 2);
    }

    #[test]
    fn empty_after_filtering_is_empty_dataset_error() {
        let mut request = sample_request();
        request.baseline_range.from = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        request.baseline_range.to = NaiveDate::from_ymd_opt(2024, 5, 31).unwrap();
        request.comparison_range = request.baseline_range;

        let df = df![
            "date" => ["2024-06-01"],
            "country" => ["US"],
            "revenue" => [1.0],
        ]
        .unwrap();

        let err = prepare(df, &request).unwrap_err();
        assert!(matches!(err, EngineError::EmptyDataset));
    }
}
