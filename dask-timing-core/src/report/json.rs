use std::io::{self, Write};

use serde_json::json;

use super::{AnalysisReport, ReportError, Reporter};
use crate::store::ResultFile;

/// Writes results as pretty-printed JSON on stdout.
#[derive(Debug, Clone, Default)]
pub struct JsonReporter;

impl JsonReporter {
    pub fn new() -> Self {
        Self
    }

    fn write_analysis(
        &self,
        writer: &mut impl Write,
        report: &AnalysisReport<'_>,
    ) -> Result<(), ReportError> {
        let value = json!({
            "analysis": report.analysis,
            "comparisons": report.comparisons,
        });
        serde_json::to_writer_pretty(&mut *writer, &value)?;
        writeln!(writer)?;
        Ok(())
    }
}

impl Reporter for JsonReporter {
    fn report_session(&self, result: &ResultFile) -> Result<(), ReportError> {
        let stdout = io::stdout();
        let mut writer = stdout.lock();
        writer.write_all(result.to_json().map_err(to_report_error)?.as_bytes())?;
        Ok(())
    }

    fn report_analysis(&self, report: &AnalysisReport<'_>) -> Result<(), ReportError> {
        let stdout = io::stdout();
        let mut writer = stdout.lock();
        self.write_analysis(&mut writer, report)
    }
}

fn to_report_error(err: crate::store::StoreError) -> ReportError {
    match err {
        crate::store::StoreError::Json(e) => ReportError::Json(e),
        other => ReportError::Io(io::Error::other(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::Analysis;

    #[test]
    fn test_analysis_json_shape() {
        let analysis = Analysis::from_files(&[]);
        let report = AnalysisReport {
            analysis: &analysis,
            comparisons: None,
            plot: false,
        };

        let mut buffer = Vec::new();
        JsonReporter::new().write_analysis(&mut buffer, &report).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&buffer).unwrap();

        assert_eq!(value["analysis"]["file_count"], 0);
        assert!(value["analysis"]["groups"].as_array().unwrap().is_empty());
        assert!(value["comparisons"].is_null());
    }

    #[test]
    fn test_store_io_error_keeps_path() {
        let err = to_report_error(crate::store::StoreError::Io {
            path: "results/a.json".into(),
            source: io::Error::from(io::ErrorKind::PermissionDenied),
        });

        match err {
            ReportError::Io(e) => {
                assert_eq!(e.kind(), io::ErrorKind::Other);
                assert!(e.to_string().contains("results/a.json"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
