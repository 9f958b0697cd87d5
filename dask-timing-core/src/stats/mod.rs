use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::record::TimingRecord;

/// Summary statistics for one metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricStats {
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    /// Sample standard deviation (n-1 denominator). `0.0` for a single sample.
    pub std_dev: f64,
    pub count: usize,
    #[serde(default)]
    pub median: f64,
    /// False when there were too few samples for a standard deviation.
    #[serde(default = "default_true")]
    pub std_dev_defined: bool,
}

fn default_true() -> bool {
    true
}

impl MetricStats {
    /// Compute statistics over a set of values.
    ///
    /// Returns `None` for an empty slice. Non-finite values are ignored.
    pub fn from_values(values: &[f64]) -> Option<Self> {
        let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
        if sorted.is_empty() {
            return None;
        }
        sorted.sort_by(|a, b| a.total_cmp(b));

        let n = sorted.len();
        let mean = sorted.iter().sum::<f64>() / n as f64;

        let (std_dev, std_dev_defined) = if n < 2 {
            (0.0, false)
        } else {
            let sum_sq_diff: f64 = sorted.iter().map(|x| (x - mean).powi(2)).sum();
            ((sum_sq_diff / (n - 1) as f64).sqrt(), true)
        };

        let median = if n % 2 == 1 {
            sorted[n / 2]
        } else {
            (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
        };

        Some(Self {
            mean,
            min: sorted[0],
            max: sorted[n - 1],
            std_dev,
            count: n,
            median,
            std_dev_defined,
        })
    }
}

/// Per-metric statistics derived from a set of records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatisticsSummary {
    metrics: BTreeMap<String, MetricStats>,
}

impl StatisticsSummary {
    /// Derive statistics from every record given.
    ///
    /// Each metric is computed over the records that contain it, so a record
    /// missing a key only drops out of that key's denominator.
    pub fn from_records<'a, I>(records: I) -> Self
    where
        I: IntoIterator<Item = &'a TimingRecord>,
    {
        let mut values: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
        for record in records {
            for (key, value) in &record.timings {
                values.entry(key.as_str()).or_default().push(*value);
            }
        }

        let metrics = values
            .into_iter()
            .filter_map(|(key, vals)| MetricStats::from_values(&vals).map(|s| (key.to_string(), s)))
            .collect();

        Self { metrics }
    }

    pub fn get(&self, metric: &str) -> Option<&MetricStats> {
        self.metrics.get(metric)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &MetricStats)> {
        self.metrics.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Metrics in display order (phases first, then the total).
    pub fn ordered(&self) -> Vec<(&str, &MetricStats)> {
        let mut entries: Vec<_> = self.iter().collect();
        entries.sort_by_key(|(key, _)| (crate::record::metric_rank(key), *key));
        entries
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}

/// Identifies which side of a comparison (baseline or candidate).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Baseline,
    Candidate,
}

/// The result of a statistical comparison between two sets of durations.
#[derive(Debug, Clone, Serialize)]
pub struct TestResult {
    /// Probability of observing the difference by chance.
    pub p_value: f64,
    pub statistically_significant: bool,
    /// Percent difference; positive means the candidate is faster.
    pub effect_size: f64,
    pub confidence_level: f64,
    /// The faster side if significant.
    pub winner: Option<Side>,
    pub baseline_mean_secs: f64,
    pub candidate_mean_secs: f64,
}

/// Trait for statistical tests that compare two sets of durations in seconds.
pub trait StatisticalTest: Send + Sync {
    fn analyze(&self, baseline: &[f64], candidate: &[f64]) -> TestResult;
}

mod ttest;
pub use ttest::WelchTTest;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Phase, TOTAL_CLUSTER_READY};
    use chrono::Utc;

    fn record_with(pairs: &[(&str, f64)]) -> TimingRecord {
        TimingRecord {
            run: 1,
            timestamp: Utc::now(),
            timings: pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            requested_workers: 2,
            threads: 1,
            actual_workers: 2,
            failure: None,
        }
    }

    #[test]
    fn test_three_run_scenario() {
        let stats = MetricStats::from_values(&[3.70, 3.75, 3.85]).unwrap();

        assert!((stats.mean - 3.766_666_666).abs() < 1e-6);
        assert!((stats.std_dev - 0.076_376).abs() < 1e-4);
        assert_eq!(stats.min, 3.70);
        assert_eq!(stats.max, 3.85);
        assert_eq!(stats.median, 3.75);
        assert_eq!(stats.count, 3);
        assert!(stats.std_dev_defined);
    }

    #[test]
    fn test_single_sample_has_undefined_std_dev() {
        let stats = MetricStats::from_values(&[2.5]).unwrap();

        assert_eq!(stats.count, 1);
        assert_eq!(stats.std_dev, 0.0);
        assert!(!stats.std_dev_defined);
        assert!(!stats.std_dev.is_nan());
        assert_eq!(stats.median, 2.5);
    }

    #[test]
    fn test_empty_values() {
        assert!(MetricStats::from_values(&[]).is_none());
        assert!(MetricStats::from_values(&[f64::NAN]).is_none());
    }

    #[test]
    fn test_even_count_median() {
        let stats = MetricStats::from_values(&[4.0, 1.0, 3.0, 2.0]).unwrap();
        assert_eq!(stats.median, 2.5);
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 4.0);
    }

    #[test]
    fn test_mean_matches_arithmetic_mean() {
        let values = [1.25, 0.5, 7.75, 3.0, 2.125];
        let stats = MetricStats::from_values(&values).unwrap();
        let expected = values.iter().sum::<f64>() / values.len() as f64;
        assert!((stats.mean - expected).abs() < 1e-12);
    }

    #[test]
    fn test_partial_records_use_per_key_denominator() {
        let records = vec![
            record_with(&[(Phase::ClusterInit.key(), 1.0), (Phase::BatchTasks.key(), 0.5)]),
            record_with(&[(Phase::ClusterInit.key(), 3.0)]),
        ];
        let summary = StatisticsSummary::from_records(&records);

        assert_eq!(summary.get(Phase::ClusterInit.key()).unwrap().count, 2);
        assert_eq!(summary.get(Phase::ClusterInit.key()).unwrap().mean, 2.0);
        assert_eq!(summary.get(Phase::BatchTasks.key()).unwrap().count, 1);
        assert!(summary.get(TOTAL_CLUSTER_READY).is_none());
    }

    #[test]
    fn test_ordered_puts_total_after_phases() {
        let records = vec![record_with(&[
            (TOTAL_CLUSTER_READY, 4.0),
            (Phase::FirstTask.key(), 0.1),
            (Phase::ClusterInit.key(), 1.0),
        ])];
        let summary = StatisticsSummary::from_records(&records);
        let keys: Vec<&str> = summary.ordered().into_iter().map(|(k, _)| k).collect();

        assert_eq!(
            keys,
            vec![Phase::ClusterInit.key(), Phase::FirstTask.key(), TOTAL_CLUSTER_READY]
        );
    }
}
