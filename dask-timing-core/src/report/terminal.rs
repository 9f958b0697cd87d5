use std::io::{self, Write};

use colored::Colorize;

use super::{AnalysisReport, ReportError, Reporter};
use crate::analysis::{ConfigComparison, ConfigGroup};
use crate::record::{metric_label, Phase, TimingRecord};
use crate::stats::{MetricStats, Side, StatisticsSummary};
use crate::store::{ClusterDetails, ResultFile};

/// Width of the run table header, the widest fixed-layout line.
const RULE_WIDTH: usize = 5 + 17 * Phase::ALL.len() + 13 + 9 + 2 + "Status".len();
const PLOT_WIDTH: usize = 50;

/// A reporter that prints tables to the terminal.
#[derive(Debug, Clone, Default)]
pub struct TerminalReporter {
    /// Whether to use colors in output (defaults to true).
    use_colors: bool,
}

impl TerminalReporter {
    pub fn new() -> Self {
        Self { use_colors: true }
    }

    pub fn without_colors() -> Self {
        Self { use_colors: false }
    }

    /// Format seconds the way every table in this report does.
    fn format_secs(secs: f64) -> String {
        format!("{:.4}s", secs)
    }

    fn format_optional(secs: Option<f64>) -> String {
        secs.map(Self::format_secs).unwrap_or_else(|| "-".to_string())
    }

    fn bold(&self, text: &str) -> String {
        if self.use_colors {
            text.bold().to_string()
        } else {
            text.to_string()
        }
    }

    fn status(&self, record: &TimingRecord) -> String {
        match &record.failure {
            None if self.use_colors => "ok".green().to_string(),
            None => "ok".to_string(),
            Some(failure) => {
                let text = format!("{}: {}", failure.kind, failure.message);
                if self.use_colors {
                    text.red().to_string()
                } else {
                    text
                }
            }
        }
    }

    fn print_banner(&self, writer: &mut impl Write, title: &str) -> io::Result<()> {
        writeln!(writer)?;
        writeln!(writer, "{}", "=".repeat(RULE_WIDTH))?;
        writeln!(writer, "{}", self.bold(title))?;
        writeln!(writer, "{}", "=".repeat(RULE_WIDTH))?;
        Ok(())
    }

    /// One row per run, one column per phase.
    fn print_runs(&self, writer: &mut impl Write, result: &ResultFile) -> io::Result<()> {
        let mut header = format!("{:<5}", "Run");
        for phase in Phase::ALL {
            header.push_str(&format!(" {:>16}", phase.label()));
        }
        header.push_str(&format!(" {:>12} {:>8}  {}", "Ready", "Workers", "Status"));
        writeln!(writer, "{}", self.bold(&header))?;
        writeln!(writer, "{}", "-".repeat(RULE_WIDTH))?;

        for record in result.results.records() {
            let mut row = format!("{:<5}", record.run);
            for phase in Phase::ALL {
                row.push_str(&format!(" {:>16}", Self::format_optional(record.phase(phase))));
            }
            let workers = format!("{}/{}", record.actual_workers, record.requested_workers);
            row.push_str(&format!(
                " {:>12} {:>8}  {}",
                Self::format_optional(record.total_cluster_ready()),
                workers,
                self.status(record)
            ));
            writeln!(writer, "{}", row)?;
        }
        Ok(())
    }

    fn print_statistics(
        &self,
        writer: &mut impl Write,
        statistics: &StatisticsSummary,
    ) -> io::Result<()> {
        let header = format!(
            "{:<24} {:>11} {:>11} {:>11} {:>11} {:>11} {:>6}",
            "Metric", "Mean", "Median", "Min", "Max", "Std Dev", "Count"
        );
        writeln!(writer, "{}", self.bold(&header))?;
        writeln!(writer, "{}", "-".repeat(RULE_WIDTH))?;

        for (key, stats) in statistics.ordered() {
            writeln!(
                writer,
                "{:<24} {:>11} {:>11} {:>11} {:>11} {:>11} {:>6}",
                metric_label(key),
                Self::format_secs(stats.mean),
                Self::format_secs(stats.median),
                Self::format_secs(stats.min),
                Self::format_secs(stats.max),
                Self::format_std_dev(stats),
                stats.count
            )?;
        }
        Ok(())
    }

    fn format_std_dev(stats: &MetricStats) -> String {
        if stats.std_dev_defined {
            Self::format_secs(stats.std_dev)
        } else {
            "n/a".to_string()
        }
    }

    fn print_details(&self, writer: &mut impl Write, details: &ClusterDetails) -> io::Result<()> {
        writeln!(writer)?;
        writeln!(writer, "{}", self.bold("Detailed information:"))?;
        writeln!(writer, "{}", "-".repeat(RULE_WIDTH))?;
        writeln!(writer, "Scheduler:            {} ({})", details.scheduler_address, details.scheduler_id)?;
        writeln!(writer, "Setup time:           {}", Self::format_secs(details.setup_time))?;
        writeln!(writer, "Number of workers:    {}", details.workers.len())?;
        writeln!(
            writer,
            "Task execution time:  {} ({} tasks)",
            Self::format_secs(details.task_execution_time),
            details.tasks
        )?;
        writeln!(writer, "Tasks per second:     {:.2}", details.tasks_per_second)?;
        for worker in &details.workers {
            writeln!(
                writer,
                "  - {}: {} threads, {:.2} GB memory limit",
                worker.name,
                worker.nthreads,
                worker.memory_limit as f64 / 1e9
            )?;
        }
        Ok(())
    }

    fn print_session_summary(&self, writer: &mut impl Write, result: &ResultFile) -> io::Result<()> {
        let ok = format!("{} succeeded", result.results.success_count());
        let failed = format!("{} failed", result.results.failure_count());
        writeln!(writer)?;
        writeln!(writer, "{}", "-".repeat(RULE_WIDTH))?;
        if self.use_colors {
            writeln!(writer, "{} {}, {}", "Summary:".bold(), ok.green(), failed.red())?;
        } else {
            writeln!(writer, "Summary: {}, {}", ok, failed)?;
        }
        writeln!(writer)?;
        Ok(())
    }

    fn write_session(&self, writer: &mut impl Write, result: &ResultFile) -> io::Result<()> {
        let p = &result.parameters;
        self.print_banner(
            writer,
            &format!(
                "DASK TIMING STUDY: {} cluster, {} worker(s) x {} thread(s), {} run(s)",
                p.study, p.workers, p.threads, p.runs
            ),
        )?;
        self.print_runs(writer, result)?;

        if !result.statistics.is_empty() {
            writeln!(writer)?;
            writeln!(
                writer,
                "Statistics across {} successful run(s):",
                result.results.success_count()
            )?;
            self.print_statistics(writer, &result.statistics)?;
        }

        if let Some(details) = &result.detailed {
            self.print_details(writer, details)?;
        }

        self.print_session_summary(writer, result)
    }

    fn print_group(&self, writer: &mut impl Write, group: &ConfigGroup) -> io::Result<()> {
        writeln!(writer)?;
        writeln!(
            writer,
            "{}",
            self.bold(&format!(
                "Configuration: {} cluster, {} worker(s), {} thread(s) per worker",
                group.key.study, group.key.workers, group.key.threads
            ))
        )?;
        writeln!(
            writer,
            "Successful runs: {} from {} file(s), {} failed run(s) excluded",
            group.runs(),
            group.files,
            group.failed_runs
        )?;
        if group.statistics.is_empty() {
            writeln!(writer, "  (no successful runs)")?;
            return Ok(());
        }
        self.print_statistics(writer, &group.statistics)
    }

    fn print_overall(&self, writer: &mut impl Write, overall: Option<&MetricStats>) -> io::Result<()> {
        self.print_banner(writer, "OVERALL SUMMARY")?;
        match overall {
            Some(stats) => {
                writeln!(writer, "Total cluster ready (all runs, {} samples):", stats.count)?;
                writeln!(writer, "  Mean:   {:>12}", Self::format_secs(stats.mean))?;
                writeln!(writer, "  Median: {:>12}", Self::format_secs(stats.median))?;
                writeln!(writer, "  StdDev: {:>12}", Self::format_std_dev(stats))?;
                writeln!(writer, "  Min:    {:>12}", Self::format_secs(stats.min))?;
                writeln!(writer, "  Max:    {:>12}", Self::format_secs(stats.max))?;
            }
            None => writeln!(writer, "No total_cluster_ready samples found.")?,
        }
        Ok(())
    }

    /// Verdict against the fastest configuration.
    fn verdict(&self, row: &ConfigComparison) -> String {
        let Some(result) = &row.versus_fastest else {
            let text = "fastest";
            return if self.use_colors {
                text.green().bold().to_string()
            } else {
                text.to_string()
            };
        };
        let text = match (result.statistically_significant, result.winner) {
            (true, Some(Side::Baseline)) => format!("slower (p={:.4})", result.p_value),
            (true, Some(Side::Candidate)) => format!("faster (p={:.4})", result.p_value),
            _ => format!("inconclusive (p={:.4})", result.p_value),
        };
        if !self.use_colors {
            return text;
        }
        if result.statistically_significant {
            text.red().to_string()
        } else {
            text.yellow().to_string()
        }
    }

    fn print_comparison(&self, writer: &mut impl Write, rows: &[ConfigComparison]) -> io::Result<()> {
        self.print_banner(writer, "CONFIGURATION COMPARISON")?;
        if rows.len() < 2 {
            writeln!(writer, "Need at least two configurations with readiness samples to compare.")?;
            return Ok(());
        }
        let header = format!(
            "{:<14} {:>8} {:>8} {:>14} {:>6}  {}",
            "Study", "Workers", "Threads", "Mean ready", "Runs", "Versus fastest"
        );
        writeln!(writer, "{}", self.bold(&header))?;
        writeln!(writer, "{}", "-".repeat(RULE_WIDTH))?;
        for row in rows {
            writeln!(
                writer,
                "{:<14} {:>8} {:>8} {:>14} {:>6}  {}",
                row.key.study,
                row.key.workers,
                row.key.threads,
                Self::format_secs(row.mean_ready_secs),
                row.runs,
                self.verdict(row)
            )?;
        }
        Ok(())
    }

    /// Horizontal bar chart of mean readiness per configuration.
    fn print_plot(&self, writer: &mut impl Write, groups: &[ConfigGroup]) -> io::Result<()> {
        self.print_banner(writer, "MEAN TIME TO READY BY CONFIGURATION")?;
        let means: Vec<(String, f64)> = groups
            .iter()
            .filter_map(|g| {
                g.statistics
                    .get(crate::record::TOTAL_CLUSTER_READY)
                    .map(|s| (g.key.to_string(), s.mean))
            })
            .collect();
        let Some(max) = means.iter().map(|(_, m)| *m).reduce(f64::max) else {
            writeln!(writer, "Nothing to plot.")?;
            return Ok(());
        };

        for (label, mean) in &means {
            let width = if max > 0.0 {
                ((mean / max) * PLOT_WIDTH as f64).round() as usize
            } else {
                0
            };
            let bar = "#".repeat(width.max(1));
            let bar = if self.use_colors {
                bar.cyan().to_string()
            } else {
                bar
            };
            writeln!(writer, "{:<24} {} {}", label, bar, Self::format_secs(*mean))?;
        }
        Ok(())
    }

    fn write_analysis(&self, writer: &mut impl Write, report: &AnalysisReport<'_>) -> io::Result<()> {
        let analysis = report.analysis;
        self.print_banner(
            writer,
            &format!("ANALYSIS OF {} RESULT FILE(S)", analysis.file_count),
        )?;
        for group in &analysis.groups {
            self.print_group(writer, group)?;
        }
        self.print_overall(writer, analysis.overall_ready.as_ref())?;

        if let Some(rows) = &report.comparisons {
            self.print_comparison(writer, rows)?;
        }
        if report.plot {
            self.print_plot(writer, &analysis.groups)?;
        }
        writeln!(writer)?;
        Ok(())
    }
}

impl Reporter for TerminalReporter {
    fn report_session(&self, result: &ResultFile) -> Result<(), ReportError> {
        let stdout = io::stdout();
        let mut writer = stdout.lock();
        self.write_session(&mut writer, result)?;
        Ok(())
    }

    fn report_analysis(&self, report: &AnalysisReport<'_>) -> Result<(), ReportError> {
        let stdout = io::stdout();
        let mut writer = stdout.lock();
        self.write_analysis(&mut writer, report)?;
        Ok(())
    }
}
