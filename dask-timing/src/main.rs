use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::Parser;
use dask_timing::{
    check_dependencies, load_results, logging, run_study, Analysis, AnalysisReport, AnalyzeArgs,
    Cli, ClusterLauncher, Command, Config, Interrupt, JsonReporter, Reporter, RunArgs,
    SessionError, TerminalReporter, WelchTTest,
};
use tracing::{debug, error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    match cli.command {
        Command::Run(args) => run(args).await,
        Command::Analyze(args) => analyze(args),
    }
}

fn reporter(json: bool) -> Box<dyn Reporter> {
    if json {
        Box::new(JsonReporter::new())
    } else {
        Box::new(TerminalReporter::new())
    }
}

async fn run(args: RunArgs) -> Result<()> {
    // Load config and apply CLI overrides
    let mut config = Config::load_or_default(&args.config)?;
    args.apply_to_config(&mut config)?;
    let preset = args.preset()?;
    debug!("Configuration: {:?}", config);

    let timestamp = Utc::now();
    let studies = preset.build(&config, args.output.as_deref(), timestamp)?;
    check_dependencies(&config.cluster, config.study_kind()?)?;

    let reporter = reporter(args.json);
    let interrupt = Interrupt::on_signals();
    let mut empty = 0;

    for study in &studies {
        let launcher = ClusterLauncher::new(study.launch_settings());
        match run_study(study, &launcher, timestamp, &interrupt).await {
            Ok(result) => {
                result
                    .write(&study.output)
                    .with_context(|| format!("Failed to save {}", study.output.display()))?;
                info!("Results saved to {}", study.output.display());
                reporter.report_session(&result)?;
            }
            // One empty configuration should not discard the rest of a sweep.
            Err(SessionError::InsufficientRuns { attempted }) if studies.len() > 1 => {
                error!(
                    "No successful runs out of {} for {} worker(s); nothing saved",
                    attempted, study.workers
                );
                empty += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }

    if empty > 0 {
        bail!(
            "{} of {} configurations had no successful runs",
            empty,
            studies.len()
        );
    }
    Ok(())
}

fn analyze(args: AnalyzeArgs) -> Result<()> {
    if !(args.confidence_level > 0.0 && args.confidence_level < 1.0) {
        bail!(
            "confidence level must be between 0 and 1 (got {})",
            args.confidence_level
        );
    }

    info!("Loading results from: {}", args.pattern);
    let loaded = load_results(&args.pattern)?;
    if loaded.files.is_empty() {
        warn!("No results found matching pattern: {}", args.pattern);
        return Ok(());
    }
    info!(
        "Loaded {} result file(s), skipped {}",
        loaded.files.len(),
        loaded.skipped.len()
    );

    let analysis = Analysis::from_files(&loaded.files);
    let comparisons = args
        .compare
        .then(|| analysis.compare(&WelchTTest::new(args.confidence_level)));

    reporter(args.json).report_analysis(&AnalysisReport {
        analysis: &analysis,
        comparisons,
        plot: args.plot,
    })?;
    Ok(())
}
