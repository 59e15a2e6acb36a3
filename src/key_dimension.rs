//! Key Dimension Scorer (`spec.md` §4.5): scores each analyzed dimension by
//! how dispersed its segments' weighted relative change is, and gates which
//! dimensions are "key" for the Ranker to restrict drivers to.
//!
//! The score itself is not recomputed here — it's the single-dimension
//! subset's `weighted_relative_change_std`, already produced as a byproduct
//! of the Cube Analyzer's subset enumeration
//! ([`crate::cube::CubeResult::single_dimension_scores`]), exactly as the
//! Python original derives `dimension_info_df` from the same
//! `multi_dimension_grouping_result` it builds for segment scoring rather
//! than re-aggregating the source frames a second time.

use crate::segment::{DimensionScore, KEY_DIMENSION_THRESHOLD};

/// Scores every dimension and marks which ones clear the key-dimension
/// gate: `score > max(`[`KEY_DIMENSION_THRESHOLD`]`, mean(scores))`.
pub fn score_dimensions(single_dimension_scores: &[(String, f64)]) -> Vec<DimensionScore> {
    if single_dimension_scores.is_empty() {
        return Vec::new();
    }

    let mean_score: f64 = single_dimension_scores.iter().map(|(_, s)| *s).sum::<f64>()
        / single_dimension_scores.len() as f64;
    let gate = KEY_DIMENSION_THRESHOLD.max(mean_score);

    single_dimension_scores
        .iter()
        .map(|(dimension, score)| DimensionScore {
            name: dimension.clone(),
            score: *score,
            is_key: *score > gate,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_scores_nothing() {
        assert!(score_dimensions(&[]).is_empty());
    }

    #[test]
    fn gate_uses_larger_of_threshold_and_mean() {
        let scores = vec![
            ("country".to_string(), 0.5),
            ("device".to_string(), 0.01),
            ("browser".to_string(), 0.02),
        ];
        let result = score_dimensions(&scores);
        let mean = (0.5 + 0.01 + 0.02) / 3.0;
        assert!(mean > KEY_DIMENSION_THRESHOLD);

        let country = result.iter().find(|d| d.name == "country").unwrap();
        assert!(country.is_key);
        let device = result.iter().find(|d| d.name == "device").unwrap();
        assert!(!device.is_key);
    }

    #[test]
    fn low_variance_dimensions_fall_back_to_fixed_threshold() {
        let scores = vec![
            ("country".to_string(), 0.005),
            ("device".to_string(), 0.003),
        ];
        let result = score_dimensions(&scores);
        assert!(result.iter().all(|d| !d.is_key));
    }
}
