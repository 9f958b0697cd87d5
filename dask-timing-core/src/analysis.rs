//! Cross-file analysis of stored results.
//!
//! Successful records from every loaded file are grouped by configuration and
//! statistics are re-derived per group. Groups are never merged with each
//! other, so a 2-worker run can never leak into a 4-worker aggregate.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::record::{TimingRecord, TOTAL_CLUSTER_READY};
use crate::stats::{MetricStats, StatisticalTest, StatisticsSummary, TestResult};
use crate::store::ResultFile;

/// Configuration a group of records shares.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ConfigKey {
    pub study: String,
    pub workers: usize,
    pub threads: usize,
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}w-{}t", self.study, self.workers, self.threads)
    }
}

/// All successful records for one configuration.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigGroup {
    pub key: ConfigKey,
    /// Number of files contributing to this group.
    pub files: usize,
    /// Failed runs seen in those files.
    pub failed_runs: usize,
    #[serde(skip)]
    pub records: Vec<TimingRecord>,
    pub statistics: StatisticsSummary,
}

impl ConfigGroup {
    pub fn runs(&self) -> usize {
        self.records.len()
    }

    /// `total_cluster_ready` samples for this group.
    pub fn ready_times(&self) -> Vec<f64> {
        self.records
            .iter()
            .filter_map(TimingRecord::total_cluster_ready)
            .collect()
    }
}

/// One row of a configuration comparison.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigComparison {
    pub key: ConfigKey,
    pub mean_ready_secs: f64,
    pub runs: usize,
    /// Test against the fastest configuration; `None` for the fastest itself.
    pub versus_fastest: Option<TestResult>,
}

/// Analysis over a set of result files.
#[derive(Debug, Clone, Serialize)]
pub struct Analysis {
    pub file_count: usize,
    pub groups: Vec<ConfigGroup>,
    /// `total_cluster_ready` across every successful run of every group.
    pub overall_ready: Option<MetricStats>,
}

impl Analysis {
    /// Group the records of `files` by configuration.
    pub fn from_files(files: &[ResultFile]) -> Self {
        let mut grouped: BTreeMap<ConfigKey, ConfigGroup> = BTreeMap::new();

        for file in files {
            let key = ConfigKey {
                study: file.parameters.study.clone(),
                workers: file.parameters.workers,
                threads: file.parameters.threads,
            };
            let group = grouped.entry(key.clone()).or_insert_with(|| ConfigGroup {
                key,
                files: 0,
                failed_runs: 0,
                records: Vec::new(),
                statistics: StatisticsSummary::default(),
            });
            group.files += 1;
            group.failed_runs += file.results.failure_count();
            group.records.extend(file.results.successful().cloned());
        }

        let mut groups: Vec<ConfigGroup> = grouped.into_values().collect();
        for group in &mut groups {
            group.statistics = StatisticsSummary::from_records(&group.records);
        }

        let all_ready: Vec<f64> = groups.iter().flat_map(|g| g.ready_times()).collect();

        Self {
            file_count: files.len(),
            groups,
            overall_ready: MetricStats::from_values(&all_ready),
        }
    }

    /// Compare groups by mean `total_cluster_ready`, fastest first.
    ///
    /// Groups with no readiness samples are left out.
    pub fn compare(&self, test: &dyn StatisticalTest) -> Vec<ConfigComparison> {
        let mut rows: Vec<(&ConfigGroup, Vec<f64>, f64)> = self
            .groups
            .iter()
            .filter_map(|group| {
                let times = group.ready_times();
                let mean = group.statistics.get(TOTAL_CLUSTER_READY)?.mean;
                Some((group, times, mean))
            })
            .collect();
        rows.sort_by(|a, b| a.2.total_cmp(&b.2));

        let Some((_, fastest_times, _)) = rows.first() else {
            return Vec::new();
        };
        let fastest_times = fastest_times.clone();

        rows.iter()
            .enumerate()
            .map(|(i, (group, times, mean))| ConfigComparison {
                key: group.key.clone(),
                mean_ready_secs: *mean,
                runs: times.len(),
                versus_fastest: (i > 0).then(|| test.analyze(&fastest_times, times)),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{FailureKind, Phase, RunFailure, RunSet};
    use crate::stats::WelchTTest;
    use crate::store::Parameters;
    use chrono::Utc;

    fn record(workers: usize, ready: f64) -> TimingRecord {
        let mut timings = BTreeMap::new();
        timings.insert(Phase::ClusterInit.key().to_string(), ready / 3.0);
        timings.insert(TOTAL_CLUSTER_READY.to_string(), ready);
        TimingRecord {
            run: 1,
            timestamp: Utc::now(),
            timings,
            requested_workers: workers,
            threads: 1,
            actual_workers: workers,
            failure: None,
        }
    }

    fn file(workers: usize, ready: &[f64]) -> ResultFile {
        let runs: RunSet = ready.iter().map(|r| record(workers, *r)).collect();
        ResultFile::new(
            Utc::now(),
            Parameters {
                study: "local".to_string(),
                workers,
                threads: 1,
                runs: ready.len() as u32,
                batch_tasks: 0,
                worker_timeout_secs: 60.0,
                detailed: false,
            },
            runs,
            None,
        )
    }

    #[test]
    fn test_groups_are_not_blended() {
        let files = vec![file(2, &[3.70, 3.75, 3.85]), file(4, &[5.0, 5.2])];
        let analysis = Analysis::from_files(&files);

        assert_eq!(analysis.file_count, 2);
        assert_eq!(analysis.groups.len(), 2);

        let two = &analysis.groups[0];
        assert_eq!(two.key.workers, 2);
        let ready = two.statistics.get(TOTAL_CLUSTER_READY).unwrap();
        assert_eq!(ready.count, 3);
        assert!((ready.mean - 3.766_666_7).abs() < 1e-6);

        let four = &analysis.groups[1];
        assert_eq!(four.key.workers, 4);
        let ready = four.statistics.get(TOTAL_CLUSTER_READY).unwrap();
        assert_eq!(ready.count, 2);
        assert!((ready.mean - 5.1).abs() < 1e-9);

        assert_eq!(analysis.overall_ready.as_ref().unwrap().count, 5);
    }

    #[test]
    fn test_same_config_files_merge() {
        let files = vec![file(2, &[3.0]), file(2, &[4.0, 5.0])];
        let analysis = Analysis::from_files(&files);

        assert_eq!(analysis.groups.len(), 1);
        assert_eq!(analysis.groups[0].files, 2);
        assert_eq!(analysis.groups[0].runs(), 3);
    }

    #[test]
    fn test_failed_runs_counted_not_aggregated() {
        let mut f = file(2, &[3.0, 3.2]);
        let mut bad = record(2, 0.0);
        bad.timings.remove(TOTAL_CLUSTER_READY);
        bad.failure = Some(RunFailure {
            kind: FailureKind::WorkerTimeout,
            message: "timeout".to_string(),
        });
        f.results.push(bad);

        let analysis = Analysis::from_files(&[f]);
        let group = &analysis.groups[0];
        assert_eq!(group.failed_runs, 1);
        assert_eq!(group.statistics.get(TOTAL_CLUSTER_READY).unwrap().count, 2);
        assert_eq!(group.statistics.get(Phase::ClusterInit.key()).unwrap().count, 2);
    }

    #[test]
    fn test_compare_sorted_fastest_first() {
        let files = vec![
            file(8, &[8.0, 8.1, 7.9]),
            file(2, &[3.70, 3.75, 3.85]),
            file(4, &[5.0, 5.1, 5.2]),
        ];
        let analysis = Analysis::from_files(&files);
        let rows = analysis.compare(&WelchTTest::default());

        let workers: Vec<usize> = rows.iter().map(|r| r.key.workers).collect();
        assert_eq!(workers, vec![2, 4, 8]);
        assert!(rows[0].versus_fastest.is_none());
        let vs = rows[2].versus_fastest.as_ref().unwrap();
        assert!(vs.statistically_significant);
    }

    #[test]
    fn test_compare_empty() {
        let analysis = Analysis::from_files(&[]);
        assert!(analysis.compare(&WelchTTest::default()).is_empty());
        assert!(analysis.overall_ready.is_none());
    }
}
