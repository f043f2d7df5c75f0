use serde::{Deserialize, Serialize};

use crate::tolerance::ToleranceLevel;

/// Outcome of one baseline comparison
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResultCode {
    /// Not compared yet
    #[default]
    None,
    Pass,
    ThresholdExceeded,
    WrongSize,
    FileNotFound,
    FileNotLoaded,
    WrongFormat,
    NullToleranceLevel,
}

/// Scores and outcome of comparing a capture against one baseline
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageComparisonResult {
    pub result_code: ResultCode,
    pub standard_diff_score: f32,
    /// Score after discarding imperceptible pixel differences
    pub filtered_diff_score: f32,
    /// The score that was checked against the threshold
    pub final_diff_score: f32,
}

impl ImageComparisonResult {
    /// Short description for report headers
    pub fn summary_string(&self) -> String {
        match self.result_code {
            ResultCode::Pass | ResultCode::ThresholdExceeded => {
                format!("Diff Score: {:.6}", self.final_diff_score)
            }
            ResultCode::WrongSize => "Wrong size".to_string(),
            ResultCode::FileNotFound => "File not found".to_string(),
            ResultCode::FileNotLoaded => "File load failed".to_string(),
            ResultCode::WrongFormat => "Format is not supported".to_string(),
            ResultCode::NullToleranceLevel => "ImageComparisonToleranceLevel not provided".to_string(),
            // Seen while the run is still in progress
            ResultCode::None => "No results".to_string(),
        }
    }

    /// Mark as an exact match after the baseline was replaced by the capture
    pub fn clear_to_pass(&mut self) {
        *self = Self {
            result_code: ResultCode::Pass,
            ..Self::default()
        };
    }

    pub fn passed(&self) -> bool {
        self.result_code == ResultCode::Pass
    }
}

/// Everything recorded about one screenshot comparison test
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScreenshotTestInfo {
    pub screenshot_file_path: String,
    /// Checked-in expected image
    pub official_baseline_path: String,
    /// This machine's previous capture
    pub local_baseline_path: String,
    /// Tolerance applied to the official comparison
    pub tolerance_level: ToleranceLevel,
    pub official_comparison: ImageComparisonResult,
    pub local_comparison: ImageComparisonResult,
}

impl ScreenshotTestInfo {
    pub fn new(screenshot_file_path: impl Into<String>) -> Self {
        Self {
            screenshot_file_path: screenshot_file_path.into(),
            ..Self::default()
        }
    }

    /// Official comparison passed
    pub fn passed(&self) -> bool {
        self.official_comparison.passed()
    }

    /// The local baseline did not match
    pub fn has_local_warning(&self) -> bool {
        !self.local_comparison.passed()
    }

    /// File name of the capture, for compact headers
    pub fn file_name(&self) -> &str {
        self.screenshot_file_path
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(&self.screenshot_file_path)
    }
}

/// Counters and screenshot tests for one executed script
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScriptReport {
    pub script_path: String,
    pub assert_count: u32,
    pub general_error_count: u32,
    pub screenshot_error_count: u32,
    pub general_warning_count: u32,
    pub screenshot_warning_count: u32,
    pub screenshot_tests: Vec<ScreenshotTestInfo>,
}

impl ScriptReport {
    pub fn new(script_path: impl Into<String>) -> Self {
        Self {
            script_path: script_path.into(),
            ..Self::default()
        }
    }

    /// No asserts, general errors or screenshot errors
    pub fn passed(&self) -> bool {
        self.assert_count == 0 && self.general_error_count == 0 && self.screenshot_error_count == 0
    }

    pub fn has_warnings(&self) -> bool {
        self.general_warning_count > 0 || self.screenshot_warning_count > 0
    }

    /// Count one message according to its severity and text
    pub(crate) fn record(&mut self, level: TraceLevel, message: &str) {
        match level {
            TraceLevel::Assert => self.assert_count += 1,
            TraceLevel::Error if message.contains(SCREENSHOT_ERROR_MARKER) => {
                self.screenshot_error_count += 1
            }
            TraceLevel::Error => self.general_error_count += 1,
            TraceLevel::Warning if message.contains(SCREENSHOT_WARNING_MARKER) => {
                self.screenshot_warning_count += 1
            }
            TraceLevel::Warning => self.general_warning_count += 1,
        }
    }
}

/// Errors containing this text count as screenshot failures
pub const SCREENSHOT_ERROR_MARKER: &str = "Screenshot check failed";

/// Warnings containing this text count as screenshot warnings
pub const SCREENSHOT_WARNING_MARKER: &str = "Screenshot does not match the local baseline";

/// Severity of a reported message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TraceLevel {
    Assert,
    Error,
    Warning,
}

/// A message seen by the reporter, kept for display and tests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceMessage {
    pub level: TraceLevel,
    pub text: String,
    /// Index of the report the message was counted against
    pub report: Option<usize>,
}

/// Which results the report view shows
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisplayOption {
    #[default]
    AllResults,
    WarningsAndErrors,
    ErrorsOnly,
}

impl DisplayOption {
    pub fn label(self) -> &'static str {
        match self {
            DisplayOption::AllResults => "All Results",
            DisplayOption::WarningsAndErrors => "Warnings & Errors",
            DisplayOption::ErrorsOnly => "Errors Only",
        }
    }

    pub fn show_warnings(self) -> bool {
        matches!(self, DisplayOption::AllResults | DisplayOption::WarningsAndErrors)
    }

    pub fn show_all(self) -> bool {
        self == DisplayOption::AllResults
    }
}

/// Run-wide sums over every script report
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportTotals {
    pub scripts: usize,
    pub asserts: u32,
    /// General errors only; screenshot errors are counted separately
    pub errors: u32,
    pub warnings: u32,
    pub screenshots: usize,
    pub screenshot_failures: u32,
    pub screenshot_warnings: u32,
}

impl ReportTotals {
    pub fn from_reports(reports: &[ScriptReport]) -> Self {
        reports.iter().fold(
            Self {
                scripts: reports.len(),
                ..Self::default()
            },
            |mut totals, report| {
                totals.asserts += report.assert_count;
                totals.errors += report.general_error_count;
                totals.warnings += report.general_warning_count;
                totals.screenshots += report.screenshot_tests.len();
                totals.screenshot_failures += report.screenshot_error_count;
                totals.screenshot_warnings += report.screenshot_warning_count;
                totals
            },
        )
    }

    pub fn failed(&self) -> bool {
        self.asserts > 0 || self.errors > 0 || self.screenshot_failures > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_strings() {
        let mut result = ImageComparisonResult {
            result_code: ResultCode::ThresholdExceeded,
            final_diff_score: 0.25,
            ..Default::default()
        };
        assert_eq!(result.summary_string(), "Diff Score: 0.250000");

        result.result_code = ResultCode::FileNotFound;
        assert_eq!(result.summary_string(), "File not found");
        result.result_code = ResultCode::NullToleranceLevel;
        assert_eq!(result.summary_string(), "ImageComparisonToleranceLevel not provided");
        result.result_code = ResultCode::None;
        assert_eq!(result.summary_string(), "No results");
    }

    #[test]
    fn test_clear_to_pass_zeroes_scores() {
        let mut result = ImageComparisonResult {
            result_code: ResultCode::ThresholdExceeded,
            standard_diff_score: 0.3,
            filtered_diff_score: 0.2,
            final_diff_score: 0.2,
        };
        result.clear_to_pass();
        assert_eq!(result.result_code, ResultCode::Pass);
        assert_eq!(result.final_diff_score, 0.0);
        assert_eq!(result.standard_diff_score, 0.0);
    }

    #[test]
    fn test_record_classifies_messages() {
        let mut report = ScriptReport::new("a.lua");
        report.record(TraceLevel::Error, "Script: Screenshot check failed. Diff score 1.0");
        report.record(TraceLevel::Error, "Script: something else");
        report.record(
            TraceLevel::Warning,
            "Script: Screenshot check failed. Screenshot does not match the local baseline; something has changed.",
        );
        report.record(TraceLevel::Warning, "Script: Screenshot check failed. Could not find image file 'x'.");
        report.record(TraceLevel::Assert, "boom");

        assert_eq!(report.screenshot_error_count, 1);
        assert_eq!(report.general_error_count, 1);
        assert_eq!(report.screenshot_warning_count, 1);
        assert_eq!(report.general_warning_count, 1);
        assert_eq!(report.assert_count, 1);
        assert!(!report.passed());
        assert!(report.has_warnings());
    }

    #[test]
    fn test_file_name() {
        let info = ScreenshotTestInfo::new("/u/scripts/screenshots/shadow/frame.png");
        assert_eq!(info.file_name(), "frame.png");
    }
}
