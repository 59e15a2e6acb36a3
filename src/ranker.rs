//! Ranker (`spec.md` §4.6, first half): selects the top driver segments
//! from `Σ`, restricted to subsets built entirely from key dimensions.

use polars::prelude::*;

use crate::errors::Result;
use crate::segment::DimensionScore;

/// Hard cap on the number of driver segments returned.
pub const MAX_DRIVERS: usize = 1000;

/// Filters `segments` (`Σ`, already sorted by `|sort|` descending) down to
/// rows whose `dimension_name` is entirely made of key dimensions, and
/// takes the first [`MAX_DRIVERS`].
///
/// `segments` must already carry the `sort` ordering the Cube Analyzer
/// produced; this function only filters and truncates, it does not
/// re-sort.
pub fn top_drivers(segments: &DataFrame, dimension_scores: &[DimensionScore]) -> Result<DataFrame> {
    let key_dimensions: Vec<String> = dimension_scores
        .iter()
        .filter(|d| d.is_key)
        .map(|d| d.name.clone())
        .collect();

    if key_dimensions.is_empty() {
        return Ok(segments.head(Some(0)));
    }

    let key_series = Series::new("".into(), key_dimensions);
    let filtered = segments
        .clone()
        .lazy()
        .filter(
            col("dimension_name")
                .list()
                .eval(col("").is_in(lit(key_series)), true)
                .list()
                .all(),
        )
        .collect()?;

    Ok(filtered.head(Some(MAX_DRIVERS)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_scores() -> Vec<DimensionScore> {
        vec![
            DimensionScore {
                name: "country".to_string(),
                score: 0.5,
                is_key: true,
            },
            DimensionScore {
                name: "device".to_string(),
                score: 0.01,
                is_key: false,
            },
        ]
    }

    #[test]
    fn no_key_dimensions_yields_empty_frame() {
        let df = df!["dimension_name" => [Series::new("".into(), ["device"])]].unwrap();
        let scores = vec![DimensionScore {
            name: "device".to_string(),
            score: 0.0,
            is_key: false,
        }];
        let result = top_drivers(&df, &scores).unwrap();
        assert_eq!(result.height(), 0);
    }

    #[test]
    fn truncates_to_max_drivers() {
        let rows = 5;
        let df = df![
            "dimension_name" => (0..rows).map(|_| Series::new("".into(), ["country"])).collect::<Vec<_>>(),
        ]
        .unwrap();
        let result = top_drivers(&df, &sample_scores()).unwrap();
        assert_eq!(result.height(), rows as usize);
    }
}
