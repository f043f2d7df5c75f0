//! Script report model: per-script counters, screenshot test results and
//! run-level export.

pub mod export;
pub mod reporter;
pub mod types;

use std::path::PathBuf;

pub use export::RunReport;
pub use reporter::{BaselineUpdateSummary, ComparisonFailure, ScriptReporter, diff_images};
pub use types::{
    DisplayOption, ImageComparisonResult, ReportTotals, ResultCode, ScreenshotTestInfo,
    ScriptReport, TraceLevel, TraceMessage,
};

/// Result type for report file operations
pub type ReportResult<T> = Result<T, ReportError>;

/// Errors raised while maintaining baselines or writing reports
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("file operation on '{path}' failed: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no screenshot test {test} in report {report}")]
    NoSuchScreenshot { report: usize, test: usize },

    #[error("could not determine baseline path for '{0}'")]
    NoBaselinePath(String),

    #[error(
        "Could not find source folder '{}'. Copying to source baseline can only be used on dev platforms.",
        .0.display()
    )]
    SourceFolderMissing(PathBuf),

    #[error("failed to serialize report: {0}")]
    Json(#[from] serde_json::Error),
}
