use statrs::distribution::{ContinuousCDF, StudentsT};

use super::{Side, StatisticalTest, TestResult};

/// Welch's t-test for two independent samples with possibly unequal variances.
///
/// Used by the analyzer to tell whether one cluster configuration becomes
/// ready faster than another, rather than just differing by noise.
#[derive(Debug, Clone)]
pub struct WelchTTest {
    pub confidence_level: f64,
}

impl Default for WelchTTest {
    fn default() -> Self {
        Self {
            confidence_level: 0.95,
        }
    }
}

/// Sample size, mean and (n-1) variance.
struct Moments {
    n: usize,
    mean: f64,
    variance: f64,
}

impl Moments {
    fn of(samples: &[f64]) -> Self {
        let n = samples.len();
        if n == 0 {
            return Self {
                n,
                mean: 0.0,
                variance: 0.0,
            };
        }
        let mean = samples.iter().sum::<f64>() / n as f64;
        let variance = if n < 2 {
            0.0
        } else {
            samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1) as f64
        };
        Self { n, mean, variance }
    }

    /// Squared standard error of the mean.
    fn sem_sq(&self) -> f64 {
        self.variance / self.n as f64
    }
}

impl WelchTTest {
    /// # Panics
    /// Panics if `confidence_level` is not in (0, 1).
    pub fn new(confidence_level: f64) -> Self {
        assert!(
            confidence_level > 0.0 && confidence_level < 1.0,
            "confidence_level must be between 0 and 1 (exclusive)"
        );
        Self { confidence_level }
    }

    /// Welch-Satterthwaite degrees of freedom.
    fn degrees_of_freedom(a: &Moments, b: &Moments) -> f64 {
        let (sa, sb) = (a.sem_sq(), b.sem_sq());
        let denominator = sa.powi(2) / (a.n - 1) as f64 + sb.powi(2) / (b.n - 1) as f64;
        if denominator == 0.0 {
            return (a.n.min(b.n) - 1) as f64;
        }
        (sa + sb).powi(2) / denominator
    }

    fn effect_size(baseline_mean: f64, candidate_mean: f64) -> f64 {
        if baseline_mean != 0.0 {
            (baseline_mean - candidate_mean) / baseline_mean * 100.0
        } else {
            0.0
        }
    }

    fn faster(baseline_mean: f64, candidate_mean: f64) -> Option<Side> {
        if baseline_mean > candidate_mean {
            Some(Side::Candidate)
        } else if candidate_mean > baseline_mean {
            Some(Side::Baseline)
        } else {
            None
        }
    }

    fn result(&self, a: &Moments, b: &Moments, p_value: f64) -> TestResult {
        let statistically_significant = p_value < 1.0 - self.confidence_level;
        TestResult {
            p_value,
            statistically_significant,
            effect_size: Self::effect_size(a.mean, b.mean),
            confidence_level: self.confidence_level,
            winner: if statistically_significant {
                Self::faster(a.mean, b.mean)
            } else {
                None
            },
            baseline_mean_secs: a.mean,
            candidate_mean_secs: b.mean,
        }
    }
}

impl StatisticalTest for WelchTTest {
    fn analyze(&self, baseline: &[f64], candidate: &[f64]) -> TestResult {
        let a = Moments::of(baseline);
        let b = Moments::of(candidate);

        if a.n < 2 || b.n < 2 {
            let mut result = self.result(&a, &b, 1.0);
            result.effect_size = 0.0;
            return result;
        }

        let se = (a.sem_sq() + b.sem_sq()).sqrt();
        if se == 0.0 {
            // Both samples constant: any difference in means is exact.
            let p_value = if a.mean == b.mean { 1.0 } else { 0.0 };
            return self.result(&a, &b, p_value);
        }

        let t_statistic = (a.mean - b.mean) / se;
        let df = Self::degrees_of_freedom(&a, &b);
        let p_value = match StudentsT::new(0.0, 1.0, df) {
            Ok(dist) => 2.0 * (1.0 - dist.cdf(t_statistic.abs())),
            Err(_) => 1.0,
        };

        self.result(&a, &b, p_value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_samples() {
        let test = WelchTTest::default();
        let result = test.analyze(&[3.0, 3.0, 3.0], &[3.0, 3.0, 3.0]);

        assert!(!result.statistically_significant);
        assert!(result.winner.is_none());
        assert_eq!(result.effect_size, 0.0);
    }

    #[test]
    fn test_more_workers_slower() {
        let test = WelchTTest::default();
        let two_workers = [3.70, 3.75, 3.85, 3.72, 3.78];
        let eight_workers = [7.9, 8.1, 8.0, 8.2, 7.95];

        let result = test.analyze(&two_workers, &eight_workers);

        assert!(result.statistically_significant);
        assert_eq!(result.winner, Some(Side::Baseline));
        assert!(result.effect_size < 0.0);
        assert!(result.p_value < 0.05);
    }

    #[test]
    fn test_candidate_faster() {
        let test = WelchTTest::default();
        let result = test.analyze(&[10.0, 10.1, 9.9, 10.05], &[5.0, 5.1, 4.9, 5.05]);

        assert!(result.statistically_significant);
        assert_eq!(result.winner, Some(Side::Candidate));
        assert!((result.effect_size - 50.0).abs() < 1.0);
    }

    #[test]
    fn test_insufficient_samples() {
        let test = WelchTTest::default();
        let result = test.analyze(&[3.0], &[4.0, 4.1]);

        assert!(!result.statistically_significant);
        assert!(result.winner.is_none());
        assert_eq!(result.p_value, 1.0);
        assert_eq!(result.baseline_mean_secs, 3.0);
    }

    #[test]
    fn test_constant_but_different_samples() {
        let test = WelchTTest::default();
        let result = test.analyze(&[2.0, 2.0], &[1.0, 1.0]);

        assert_eq!(result.p_value, 0.0);
        assert_eq!(result.winner, Some(Side::Candidate));
    }

    #[test]
    #[should_panic(expected = "confidence_level must be between 0 and 1")]
    fn test_invalid_confidence_level() {
        WelchTTest::new(1.5);
    }
}
