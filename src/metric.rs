//! Metric algebra: single-column aggregates and numerator/denominator
//! ratio metrics, each with its own pre-aggregation row filters.
//!
//! `Metric` generalizes the Python original's `Metric` ABC
//! (`SingleColumnMetric`/`DualColumnMetric`) into a tagged sum type, per
//! the Design Notes in `spec.md` §9: "Polymorphic metrics become a tagged
//! sum type."

use polars::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::errors::{EngineError, Result};

/// Column-level aggregation method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateMethod {
    /// Σ column, nulls ignored.
    Sum,
    /// Count of non-null rows (after the metric's own filter).
    Count,
    /// Count of distinct non-null values.
    Distinct,
}

impl AggregateMethod {
    fn parse(s: &str) -> Result<Self> {
        match s {
            "sum" => Ok(Self::Sum),
            "count" => Ok(Self::Count),
            "distinct" | "nunique" => Ok(Self::Distinct),
            other => Err(EngineError::InvalidRequest(format!(
                "unknown aggregation method {other:?}"
            ))),
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Sum => "SUM",
            Self::Count => "COUNT",
            Self::Distinct => "DISTINCT",
        }
    }
}

/// A row-level predicate applied to a column before aggregation. Filters
/// on a ratio metric apply to numerator and denominator independently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    /// Column the filter applies to.
    pub column: String,
    /// Comparison operator.
    pub operator: FilterOperator,
    /// Comparison values, required for `Eq`/`Neq`.
    #[serde(default)]
    pub values: Option<Vec<String>>,
}

/// Filter comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOperator {
    /// Column value is one of `values`.
    Eq,
    /// Column value is none of `values`.
    Neq,
    /// Column value is null or an empty string.
    Empty,
    /// Column value is neither null nor an empty string.
    NonEmpty,
}

/// Folds a list of filters into one boolean expression with logical AND,
/// matching the Python original's `get_filter_expression`. An empty filter
/// list is the identity: `lit(true)`.
pub fn filter_expression(filters: &[Filter]) -> Expr {
    filters
        .iter()
        .map(row_predicate)
        .fold(lit(true), |acc, expr| acc.and(expr))
}

fn row_predicate(filter: &Filter) -> Expr {
    let col_expr = col(&filter.column).cast(DataType::String);
    match filter.operator {
        FilterOperator::Eq => {
            let values = filter.values.clone().unwrap_or_default();
            col_expr.is_in(lit(Series::new("".into(), values)))
        }
        FilterOperator::Neq => {
            let values = filter.values.clone().unwrap_or_default();
            col_expr.is_in(lit(Series::new("".into(), values))).not()
        }
        FilterOperator::Empty => col(&filter.column).is_null().or(col_expr.eq(lit(""))),
        FilterOperator::NonEmpty => col(&filter.column)
            .is_not_null()
            .and(col_expr.neq(lit(""))),
    }
}

/// Every aggregate is cast to `Float64` regardless of method: `COUNT`
/// and `DISTINCT` would otherwise produce an integer column, and every
/// downstream consumer (the Cube Analyzer's arithmetic, the significance
/// tester, `MetricInsight`'s by-date series) reads metric value columns
/// as `f64`.
fn build_agg(expr: Expr, method: AggregateMethod) -> Expr {
    let agg = match method {
        AggregateMethod::Sum => expr.sum(),
        AggregateMethod::Count => expr.drop_nulls().count(),
        AggregateMethod::Distinct => expr.drop_nulls().n_unique(),
    };
    agg.cast(DataType::Float64)
}

/// A single-column aggregate, with its own pre-aggregation filters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SingleMetric {
    /// User-supplied display/id override. When absent, both are derived
    /// from the column, aggregation method, and a hash of the filters.
    pub name: Option<String>,
    /// Source column.
    pub column: String,
    /// Aggregation method.
    pub aggregate_method: AggregateMethod,
    /// Pre-aggregation row filters, applied to this metric only.
    pub filters: Vec<Filter>,
}

impl SingleMetric {
    /// Builds a metric with no name override and no filters.
    pub fn new(column: impl Into<String>, aggregate_method: AggregateMethod) -> Self {
        Self {
            name: None,
            column: column.into(),
            aggregate_method,
            filters: Vec::new(),
        }
    }

    /// Column-derived id: `column_AGG[_<hash6(filters)>]`, or the
    /// user-supplied name when present.
    pub fn id(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        let suffix = if self.filters.is_empty() {
            String::new()
        } else {
            format!("_{}", hash6(&self.filters))
        };
        format!("{}_{}{}", self.column, self.aggregate_method.as_str(), suffix)
    }

    /// Display name: the user-supplied name, or `"{AGG} {column}"`.
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("{} {}", self.aggregate_method.as_str(), self.column))
    }

    /// Aggregation expression, aliased to [`SingleMetric::id`].
    pub fn aggregation_expr(&self) -> Expr {
        let mut col_expr = col(&self.column);
        if !self.filters.is_empty() {
            col_expr = col_expr.filter(filter_expression(&self.filters));
        }
        build_agg(col_expr, self.aggregate_method).alias(&self.id())
    }
}

/// Stable 6-hex-character digest of a filter list, used to disambiguate
/// metric ids when the same column/aggregate pair is used with different
/// filters. Grounded in the Python original's `hashlib.sha1(...)[:6]` over
/// the sorted-key JSON encoding of the filters; this crate uses
/// `sha2::Sha256` (already in the dependency stack via the retrieved
/// example pack) truncated the same way rather than pulling in a
/// dedicated SHA-1 crate.
fn hash6(filters: &[Filter]) -> String {
    let encoded = serde_json::to_vec(filters).unwrap_or_default();
    let digest = Sha256::digest(&encoded);
    let hex = format!("{digest:x}");
    hex[..6].to_string()
}

/// How the numerator and denominator of a [`Metric::Dual`] are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CombineMethod {
    /// `numerator / denominator`, with a zero-or-null fallback to `0`.
    Ratio,
}

/// A metric: either a single-column aggregate, or a numerator/denominator
/// ratio of two single-column aggregates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Metric {
    /// Single-column aggregate.
    Single(SingleMetric),
    /// Ratio metric. The id/display name are user-supplied.
    Dual {
        /// User-supplied metric name (required; unlike `Single`, a `Dual`
        /// metric's identity is never derived).
        name: String,
        /// How to combine the two legs.
        combine: CombineMethod,
        /// Numerator leg.
        numerator: SingleMetric,
        /// Denominator leg.
        denominator: SingleMetric,
    },
}

impl Metric {
    /// Parses the `{aggregationOption, singularMetric?, ratioMetric?}`
    /// wire shape from `spec.md` §6 into a `Metric`.
    pub fn from_request(
        aggregation_option: &str,
        singular: Option<SingularMetricSpec>,
        ratio: Option<RatioMetricSpec>,
    ) -> Result<Self> {
        if aggregation_option == "ratio" {
            let ratio = ratio.ok_or_else(|| {
                EngineError::InvalidRequest("ratio metric requires ratioMetric".to_string())
            })?;
            let numerator = SingleMetric {
                name: None,
                column: ratio.numerator.column_name,
                aggregate_method: AggregateMethod::parse(&ratio.numerator.aggregation_method)?,
                filters: ratio.numerator.filters,
            };
            let denominator = SingleMetric {
                name: None,
                column: ratio.denominator.column_name,
                aggregate_method: AggregateMethod::parse(&ratio.denominator.aggregation_method)?,
                filters: ratio.denominator.filters,
            };
            Ok(Metric::Dual {
                name: ratio.metric_name,
                combine: CombineMethod::Ratio,
                numerator,
                denominator,
            })
        } else {
            let singular = singular.ok_or_else(|| {
                EngineError::InvalidRequest("singular metric requires singularMetric".to_string())
            })?;
            Ok(Metric::Single(SingleMetric {
                name: None,
                column: singular.column_name,
                aggregate_method: AggregateMethod::parse(aggregation_option)?,
                filters: singular.filter.into_iter().collect(),
            }))
        }
    }

    /// The metric's canonical id.
    pub fn id(&self) -> String {
        match self {
            Metric::Single(m) => m.id(),
            Metric::Dual { name, .. } => name.clone(),
        }
    }

    /// The metric's display name.
    pub fn display_name(&self) -> String {
        match self {
            Metric::Single(m) => m.display_name(),
            Metric::Dual { name, .. } => name.clone(),
        }
    }

    /// `"SUM"`/`"COUNT"`/`"DISTINCT"` for single metrics, `"RATIO"` for
    /// dual metrics.
    pub fn metric_type(&self) -> &'static str {
        match self {
            Metric::Single(m) => m.aggregate_method.as_str(),
            Metric::Dual { .. } => "RATIO",
        }
    }

    /// All aggregation expressions this metric contributes to a group-by:
    /// one expression for `Single`, three (ratio, numerator, denominator)
    /// for `Dual`.
    pub fn aggregation_exprs(&self) -> Vec<Expr> {
        match self {
            Metric::Single(m) => vec![m.aggregation_expr()],
            Metric::Dual {
                name,
                numerator,
                denominator,
                ..
            } => {
                let num_expr = numerator.aggregation_expr();
                let den_expr = denominator.aggregation_expr();
                let num_id = numerator.id();
                let den_id = denominator.id();
                let ratio = when(col(&den_id).eq(lit(0)).or(col(&num_id).is_null()).or(col(&den_id).is_null()))
                    .then(lit(0.0))
                    .otherwise(col(&num_id).cast(DataType::Float64) / col(&den_id).cast(DataType::Float64))
                    .alias(name);
                vec![num_expr, den_expr, ratio]
            }
        }
    }

    /// The weight column name: the metric's own id for `Single`, the
    /// numerator's id for `Dual` (the numerator is the metric's "mass").
    pub fn weight_column(&self) -> String {
        match self {
            Metric::Single(m) => m.id(),
            Metric::Dual { numerator, .. } => numerator.id(),
        }
    }

    /// Sort expression: `|current - baseline|` of the weight column,
    /// aliased `"sort"`.
    pub fn sorting_expr(&self) -> Expr {
        let weight_col = self.weight_column();
        (col(&weight_col) - col(&format!("{weight_col}_baseline")))
            .abs()
            .alias("sort")
    }

    /// For `Dual` metrics, the numerator and denominator sub-metrics the
    /// Insight Assembler emits alongside the parent (`spec.md` §4.7), paired
    /// with the display name each should carry. The sub-metric's `id()`
    /// stays column-derived (unchanged from `numerator`/`denominator`) since
    /// it must match the aggregate columns the Cube Analyzer already
    /// produced for the parent ratio metric; only the display name differs.
    pub fn sub_metrics(&self) -> Vec<(SingleMetric, String)> {
        match self {
            Metric::Single(_) => Vec::new(),
            Metric::Dual {
                name,
                numerator,
                denominator,
                ..
            } => vec![
                (numerator.clone(), format!("{name} numerator")),
                (denominator.clone(), format!("{name} denominator")),
            ],
        }
    }
}

/// Wire shape for a singular (non-ratio) metric descriptor.
#[derive(Debug, Clone, Deserialize)]
pub struct SingularMetricSpec {
    /// Column to aggregate.
    #[serde(rename = "columnName")]
    pub column_name: String,
    /// Optional single pre-aggregation filter.
    pub filter: Option<Filter>,
}

/// Wire shape for one leg (numerator or denominator) of a ratio metric.
#[derive(Debug, Clone, Deserialize)]
pub struct RatioLegSpec {
    /// Column to aggregate.
    #[serde(rename = "columnName")]
    pub column_name: String,
    /// `"sum" | "count" | "distinct"`.
    #[serde(rename = "aggregationMethod")]
    pub aggregation_method: String,
    /// Pre-aggregation filters.
    #[serde(default)]
    pub filters: Vec<Filter>,
}

/// Wire shape for a ratio metric descriptor.
#[derive(Debug, Clone, Deserialize)]
pub struct RatioMetricSpec {
    /// User-supplied metric name.
    #[serde(rename = "metricName")]
    pub metric_name: String,
    /// Numerator leg.
    pub numerator: RatioLegSpec,
    /// Denominator leg.
    pub denominator: RatioLegSpec,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_metric_id_without_filters() {
        let m = SingleMetric::new("revenue", AggregateMethod::Sum);
        assert_eq!(m.id(), "revenue_SUM");
    }

    #[test]
    fn single_metric_id_with_filters_is_stable() {
        let mut m = SingleMetric::new("revenue", AggregateMethod::Sum);
        m.filters.push(Filter {
            column: "device".to_string(),
            operator: FilterOperator::Eq,
            values: Some(vec!["ios".to_string()]),
        });
        let id_a = m.id();
        let id_b = m.id();
        assert_eq!(id_a, id_b);
        assert!(id_a.starts_with("revenue_SUM_"));
        assert_eq!(id_a.len(), "revenue_SUM_".len() + 6);
    }

    #[test]
    fn dual_metric_weight_column_is_numerator() {
        let metric = Metric::Dual {
            name: "conv_rate".to_string(),
            combine: CombineMethod::Ratio,
            numerator: SingleMetric::new("conversions", AggregateMethod::Sum),
            denominator: SingleMetric::new("visits", AggregateMethod::Sum),
        };
        assert_eq!(metric.weight_column(), "conversions_SUM");
    }

    #[test]
    fn unknown_aggregation_is_rejected() {
        let err = AggregateMethod::parse("median").unwrap_err();
        assert!(matches!(err, EngineError::InvalidRequest(_)));
    }
}
