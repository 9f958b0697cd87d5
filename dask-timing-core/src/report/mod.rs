use crate::analysis::{Analysis, ConfigComparison};
use crate::store::ResultFile;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// What the analyzer asks a reporter to render.
#[derive(Debug, Clone)]
pub struct AnalysisReport<'a> {
    pub analysis: &'a Analysis,
    /// Present when a comparison across configurations was requested.
    pub comparisons: Option<Vec<ConfigComparison>>,
    pub plot: bool,
}

pub trait Reporter: Send + Sync {
    /// Render the outcome of one timing session.
    fn report_session(&self, result: &ResultFile) -> Result<(), ReportError>;

    /// Render a cross-file analysis.
    fn report_analysis(&self, report: &AnalysisReport<'_>) -> Result<(), ReportError>;
}

mod json;
mod terminal;
pub use json::JsonReporter;
pub use terminal::TerminalReporter;
