//! One-sample Student's t-test, used by the Ranker/Significance tester
//! (`spec.md` §4.6) to test whether a segment's per-row change is
//! significantly different from the expected change.
//!
//! Adapted from the teacher's paired-sample t-test. Unlike the teacher,
//! which treats an unfittable test (fewer than two samples, zero variance)
//! as an error, this crate's significance test is optional by design:
//! `spec.md` §4.6 calls for `confidence: None` rather than a propagated
//! error whenever the test can't be computed.

use statrs::distribution::ContinuousCDF;
use statrs::distribution::StudentsT;
use statrs::statistics::Statistics;

/// A fitted one-sample Student's t-test against a fixed expected mean.
#[derive(Debug, Clone)]
pub struct StudentTTest {
    mean: f64,
    var: f64,
    t_stat: f64,
    p_value: f64,
}

impl StudentTTest {
    /// Computes a one-sample t-test of `samples` against `expected_mean`.
    ///
    /// Returns `None` rather than an error when the test isn't
    /// computable: fewer than two samples, or zero variance.
    pub fn from_samples<I>(samples: I, expected_mean: f64) -> Option<Self>
    where
        I: IntoIterator<Item = f64>,
    {
        let samples: Vec<f64> = samples.into_iter().collect();
        if samples.len() <= 1 {
            return None;
        }
        let mean = Statistics::mean(&samples);
        let var = Statistics::variance(&samples);
        if var == 0.0 {
            return None;
        }
        let n = samples.len() as f64;
        let t_stat = (mean - expected_mean) / (var / n).sqrt();
        let t_dist = StudentsT::new(0.0, 1.0, n - 1.0).ok()?;
        let p_value = t_dist.sf(t_stat.abs()) * 2.0; // two-tailed
        Some(Self {
            mean,
            var,
            t_stat,
            p_value,
        })
    }

    /// Computes a one-sample t-test of paired differences `a - b` against
    /// `expected_mean`.
    pub fn from_paired_samples<I>(paired_samples: I, expected_mean: f64) -> Option<Self>
    where
        I: IntoIterator<Item = (f64, f64)>,
    {
        let (a, b): (Vec<f64>, Vec<f64>) = paired_samples.into_iter().unzip();
        let diffs = a.into_iter().zip(b).map(|(x, y)| x - y);
        Self::from_samples(diffs, expected_mean)
    }

    /// Sample mean.
    pub const fn mean(&self) -> f64 {
        self.mean
    }

    /// Unbiased sample variance.
    pub const fn var(&self) -> f64 {
        self.var
    }

    /// t-statistic.
    pub const fn t_stat(&self) -> f64 {
        self.t_stat
    }

    /// Two-tailed p-value.
    pub const fn p_value(&self) -> f64 {
        self.p_value
    }

    /// Whether the difference from `expected_mean` is significant at
    /// `significance_level`.
    pub fn is_significant(&self, significance_level: f64) -> bool {
        self.p_value < significance_level
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn empty_sample_is_none() {
        assert!(StudentTTest::from_samples(Vec::<f64>::new(), 0.0).is_none());
    }

    #[test]
    fn single_sample_is_none() {
        assert!(StudentTTest::from_samples(vec![1.0], 0.0).is_none());
    }

    #[test]
    fn zero_variance_is_none() {
        assert!(StudentTTest::from_samples(vec![1.0, 1.0, 1.0], 0.0).is_none());
    }

    #[test]
    fn computes_mean_and_p_value() {
        let result = StudentTTest::from_samples(vec![0.1, 0.2, 0.15, 0.05, 0.3], 0.0).unwrap();
        assert_abs_diff_eq!(result.mean(), 0.16, epsilon = 1e-6);
        assert!(result.p_value() >= 0.0 && result.p_value() <= 1.0);
    }

    #[test]
    fn larger_deviation_from_expected_is_more_significant() {
        let near_zero = StudentTTest::from_samples(vec![0.01, -0.01, 0.02, -0.02, 0.01], 0.0).unwrap();
        let far_from_zero = StudentTTest::from_samples(vec![1.0, 0.9, 1.1, 0.95, 1.05], 0.0).unwrap();
        assert!(far_from_zero.p_value() < near_zero.p_value());
    }
}
