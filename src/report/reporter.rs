//! Collects per-script counters and screenshot results for a run.
//!
//! Reports form a flat list in execution order plus a stack of indices for
//! the scripts currently executing. Every message is counted against the top
//! of that stack, so errors raised by a nested script land in the nested
//! script's report and attribution returns to the caller once it is popped.

use std::path::{Path, PathBuf};

use tracing::{error, warn};

use super::types::{
    DisplayOption, ImageComparisonResult, ReportTotals, ResultCode, ScreenshotTestInfo,
    ScriptReport, TraceLevel, TraceMessage,
};
use super::{ReportError, ReportResult};
use crate::compare::{self, CompareError, DiffError, DiffScores};
use crate::config::IMPERCEPTIBLE_DIFF_FILTER;
use crate::paths::ScreenshotPaths;
use crate::tolerance::{self, ToleranceLevel};

/// Why a pair of images could not be scored
#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonFailure {
    pub code: ResultCode,
    /// Fully formatted message, ready to report
    pub message: String,
}

/// Outcome of a baseline copy, with the text shown to the user
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BaselineUpdateSummary {
    pub success: u32,
    pub failure: u32,
    pub message: String,
}

/// Per-run report model
#[derive(Debug)]
pub struct ScriptReporter {
    paths: ScreenshotPaths,
    available_tolerance_levels: Vec<ToleranceLevel>,
    invalidation_message: String,
    script_reports: Vec<ScriptReport>,
    current_script_index_stack: Vec<usize>,
    messages: Vec<TraceMessage>,
    show_report_dialog: bool,
    display_option: DisplayOption,
}

impl ScriptReporter {
    pub fn new(paths: ScreenshotPaths) -> Self {
        Self {
            paths,
            available_tolerance_levels: Vec::new(),
            invalidation_message: String::new(),
            script_reports: Vec::new(),
            current_script_index_stack: Vec::new(),
            messages: Vec::new(),
            show_report_dialog: false,
            display_option: DisplayOption::default(),
        }
    }

    pub fn paths(&self) -> &ScreenshotPaths {
        &self.paths
    }

    /// Levels used to suggest a tolerance that would have matched
    pub fn set_available_tolerance_levels(&mut self, levels: &[ToleranceLevel]) {
        self.available_tolerance_levels = levels.to_vec();
    }

    pub fn available_tolerance_levels(&self) -> &[ToleranceLevel] {
        &self.available_tolerance_levels
    }

    /// Clear every report, the active stack and the invalidation message
    pub fn reset(&mut self) {
        self.script_reports.clear();
        self.current_script_index_stack.clear();
        self.invalidation_message.clear();
        self.messages.clear();
    }

    /// Replace every report with previously exported results.
    ///
    /// Used to inspect a finished run without executing it again. Ignored
    /// while scripts are active.
    pub fn load_reports(&mut self, reports: Vec<ScriptReport>, invalidation_message: impl Into<String>) {
        if self.has_active_script() {
            warn!(target: "automation", "not loading reports while scripts are active");
            return;
        }
        self.reset();
        self.script_reports = reports;
        self.invalidation_message = invalidation_message.into();
    }

    /// Mark subsequent results as non-authoritative. An empty message clears it.
    pub fn set_invalidation_message(&mut self, message: impl Into<String>) {
        self.invalidation_message = message.into();
        if !self.invalidation_message.is_empty() {
            let text = format!(
                "Subsequent test results will be invalid because '{}'",
                self.invalidation_message
            );
            self.error(&text);
        }
    }

    pub fn invalidation_message(&self) -> &str {
        &self.invalidation_message
    }

    // ========================================================================
    // Active script stack
    // ========================================================================

    /// Start a new report; it receives all messages until popped
    pub fn push_script(&mut self, script_path: impl Into<String>) {
        self.current_script_index_stack.push(self.script_reports.len());
        self.script_reports.push(ScriptReport::new(script_path));
    }

    /// Stop attributing messages to the current report
    pub fn pop_script(&mut self) {
        if self.current_script_index_stack.pop().is_none() {
            warn!(target: "automation", "pop_script called with no active script");
        }
    }

    pub fn has_active_script(&self) -> bool {
        !self.current_script_index_stack.is_empty()
    }

    /// Number of reports on the active stack
    pub fn active_depth(&self) -> usize {
        self.current_script_index_stack.len()
    }

    pub fn current_report_index(&self) -> Option<usize> {
        self.current_script_index_stack.last().copied()
    }

    pub fn current_script_report(&self) -> Option<&ScriptReport> {
        self.current_report_index()
            .and_then(|index| self.script_reports.get(index))
    }

    fn current_script_report_mut(&mut self) -> Option<&mut ScriptReport> {
        let index = self.current_report_index()?;
        self.script_reports.get_mut(index)
    }

    pub fn script_reports(&self) -> &[ScriptReport] {
        &self.script_reports
    }

    // ========================================================================
    // Message channel
    // ========================================================================

    /// Log a message and count it against the active report, if any
    pub fn trace(&mut self, level: TraceLevel, text: &str) {
        match level {
            TraceLevel::Assert => error!(target: "automation", assert = true, "{}", text),
            TraceLevel::Error => error!(target: "automation", "{}", text),
            TraceLevel::Warning => warn!(target: "automation", "{}", text),
        }

        let report = self.current_report_index();
        if let Some(current) = self.current_script_report_mut() {
            current.record(level, text);
        }
        self.messages.push(TraceMessage {
            level,
            text: text.to_string(),
            report,
        });
    }

    pub fn error(&mut self, text: &str) {
        self.trace(TraceLevel::Error, text);
    }

    pub fn warning(&mut self, text: &str) {
        self.trace(TraceLevel::Warning, text);
    }

    pub fn assert_failed(&mut self, text: &str) {
        self.trace(TraceLevel::Assert, text);
    }

    /// Report an error on behalf of a script
    pub fn report_script_error(&mut self, message: &str) {
        self.error(&format!("Script: {}", message));
    }

    /// Report a warning on behalf of a script
    pub fn report_script_warning(&mut self, message: &str) {
        self.warning(&format!("Script: {}", message));
    }

    pub fn report_script_issue(&mut self, message: &str, level: TraceLevel) {
        match level {
            TraceLevel::Warning => self.report_script_warning(message),
            TraceLevel::Error | TraceLevel::Assert => self.report_script_error(message),
        }
    }

    /// Every message seen since the last reset
    pub fn messages(&self) -> &[TraceMessage] {
        &self.messages
    }

    // ========================================================================
    // Screenshot tests
    // ========================================================================

    /// Record that a capture is about to be written to `path`.
    ///
    /// Returns false when no script is active.
    pub fn add_screenshot_test(&mut self, path: impl Into<String>) -> bool {
        match self.current_script_report_mut() {
            Some(report) => {
                report.screenshot_tests.push(ScreenshotTestInfo::new(path));
                true
            }
            None => {
                warn!(target: "automation", "add_screenshot_test called with no active script");
                false
            }
        }
    }

    /// Compare the most recent capture of the active script against its
    /// official baseline (errors) and its local baseline (warnings)
    pub fn check_latest_screenshot(&mut self, tolerance_level: Option<&ToleranceLevel>) {
        let Some(mut info) = self
            .current_script_report()
            .and_then(|report| report.screenshot_tests.last())
            .cloned()
        else {
            self.report_script_error("CheckLatestScreenshot() did not find any screenshots to check.");
            return;
        };

        let mut issues: Vec<(TraceLevel, String)> = Vec::new();

        match tolerance_level {
            None => {
                info.official_comparison.result_code = ResultCode::NullToleranceLevel;
                issues.push((
                    TraceLevel::Error,
                    "Screenshot check failed. No ImageComparisonToleranceLevel provided.".to_string(),
                ));
                self.store_latest_screenshot(info, issues);
                return;
            }
            Some(level) => {
                info.tolerance_level = level.clone();
                info.official_baseline_path = self.paths.official_baseline_for(&info.screenshot_file_path);
                if info.official_baseline_path.is_empty() {
                    issues.push((
                        TraceLevel::Error,
                        format!(
                            "Screenshot check failed. Could not determine expected screenshot path for '{}'",
                            info.screenshot_file_path
                        ),
                    ));
                    info.official_comparison.result_code = ResultCode::FileNotFound;
                } else {
                    match diff_images(&info.official_baseline_path, &info.screenshot_file_path) {
                        Ok(scores) => {
                            let result = &mut info.official_comparison;
                            set_scores(result, scores);
                            result.final_diff_score = if level.filter_imperceptible_diffs {
                                scores.filtered
                            } else {
                                scores.standard
                            };
                            if result.final_diff_score <= level.threshold {
                                result.result_code = ResultCode::Pass;
                            } else {
                                result.result_code = ResultCode::ThresholdExceeded;
                                issues.push((
                                    TraceLevel::Error,
                                    comparison_issue(
                                        &format!(
                                            "Screenshot check failed. Diff score {:.6} exceeds threshold of {:.6} ('{}').",
                                            result.final_diff_score, level.threshold, level.name
                                        ),
                                        &info.official_baseline_path,
                                        &info.screenshot_file_path,
                                    ),
                                ));
                            }
                        }
                        Err(failure) => {
                            info.official_comparison.result_code = failure.code;
                            issues.push((TraceLevel::Error, failure.message));
                        }
                    }
                }
            }
        }

        info.local_baseline_path = self.paths.local_baseline_for(&info.screenshot_file_path);
        if info.local_baseline_path.is_empty() {
            issues.push((
                TraceLevel::Warning,
                format!(
                    "Screenshot check failed. Could not determine local baseline screenshot path for '{}'",
                    info.screenshot_file_path
                ),
            ));
            info.local_comparison.result_code = ResultCode::FileNotFound;
        } else {
            match diff_images(&info.local_baseline_path, &info.screenshot_file_path) {
                Ok(scores) => {
                    let result = &mut info.local_comparison;
                    set_scores(result, scores);
                    if scores.standard == 0.0 {
                        result.result_code = ResultCode::Pass;
                    } else {
                        result.result_code = ResultCode::ThresholdExceeded;
                        issues.push((
                            TraceLevel::Warning,
                            comparison_issue(
                                &format!(
                                    "Screenshot check failed. Screenshot does not match the local baseline; something has changed. Diff score is {:.6}.",
                                    scores.standard
                                ),
                                &info.local_baseline_path,
                                &info.screenshot_file_path,
                            ),
                        ));
                    }
                }
                Err(failure) => {
                    info.local_comparison.result_code = failure.code;
                    issues.push((TraceLevel::Warning, failure.message));
                }
            }
        }

        self.store_latest_screenshot(info, issues);
    }

    fn store_latest_screenshot(&mut self, info: ScreenshotTestInfo, issues: Vec<(TraceLevel, String)>) {
        if let Some(slot) = self
            .current_script_report_mut()
            .and_then(|report| report.screenshot_tests.last_mut())
        {
            *slot = info;
        }
        for (level, message) in issues {
            self.report_script_issue(&message, level);
        }
    }

    // ========================================================================
    // Aggregates
    // ========================================================================

    pub fn totals(&self) -> ReportTotals {
        ReportTotals::from_reports(&self.script_reports)
    }

    /// True if any script produced asserts, general errors or screenshot errors
    pub fn has_errors_asserts_in_report(&self) -> bool {
        self.script_reports.iter().any(|report| !report.passed())
    }

    pub fn failed_script_reports(&self) -> impl Iterator<Item = &ScriptReport> {
        self.script_reports.iter().filter(|report| !report.passed())
    }

    /// Failed reports first, then reports with warnings, then passed ones.
    /// Relative order within each group is kept.
    pub fn sort_reports(&mut self) {
        if self.has_active_script() {
            warn!(target: "automation", "not sorting reports while scripts are active");
            return;
        }
        self.script_reports.sort_by_key(|report| match (report.passed(), report.has_warnings()) {
            (false, _) => 0,
            (true, true) => 1,
            (true, false) => 2,
        });
    }

    /// Suggest the strictest level that would have accepted `diff_score`
    pub fn find_best_tolerance_level(&self, diff_score: f32, filter_imperceptible_diffs: bool) -> Option<&ToleranceLevel> {
        tolerance::find_best_tolerance_level(
            &self.available_tolerance_levels,
            diff_score,
            filter_imperceptible_diffs,
        )
    }

    // ========================================================================
    // Report dialog state
    // ========================================================================

    pub fn open_report_dialog(&mut self) {
        self.show_report_dialog = true;
    }

    pub fn close_report_dialog(&mut self) {
        self.show_report_dialog = false;
    }

    pub fn is_report_dialog_open(&self) -> bool {
        self.show_report_dialog
    }

    pub fn display_option(&self) -> DisplayOption {
        self.display_option
    }

    pub fn set_display_option(&mut self, option: DisplayOption) {
        self.display_option = option;
    }

    // ========================================================================
    // Baseline maintenance
    // ========================================================================

    fn screenshot_test_mut(&mut self, report: usize, test: usize) -> ReportResult<&mut ScreenshotTestInfo> {
        self.script_reports
            .get_mut(report)
            .and_then(|r| r.screenshot_tests.get_mut(test))
            .ok_or(ReportError::NoSuchScreenshot { report, test })
    }

    fn copy_to_local_baseline(&mut self, report: usize, test: usize) -> ReportResult<()> {
        let source = self.screenshot_test_mut(report, test)?.screenshot_file_path.clone();
        let destination = self.paths.local_baseline_for(&source);
        if destination.is_empty() {
            return Err(ReportError::NoBaselinePath(source));
        }
        copy_file(Path::new(&source), Path::new(&destination))?;
        self.screenshot_test_mut(report, test)?.local_comparison.clear_to_pass();
        Ok(())
    }

    /// Replace one local baseline with the captured screenshot
    pub fn update_local_baseline(&mut self, report: usize, test: usize) -> BaselineUpdateSummary {
        match self.copy_to_local_baseline(report, test) {
            Ok(()) => self.local_update_summary(1, 0),
            Err(err) => {
                self.error(&err.to_string());
                self.local_update_summary(0, 1)
            }
        }
    }

    /// Replace every local baseline with this run's captures
    pub fn update_all_local_baselines(&mut self) -> BaselineUpdateSummary {
        let targets: Vec<(usize, usize)> = self
            .script_reports
            .iter()
            .enumerate()
            .flat_map(|(r, report)| (0..report.screenshot_tests.len()).map(move |t| (r, t)))
            .collect();

        let (mut success, mut failure) = (0, 0);
        for (report, test) in targets {
            match self.copy_to_local_baseline(report, test) {
                Ok(()) => success += 1,
                Err(err) => {
                    self.error(&err.to_string());
                    failure += 1;
                }
            }
        }
        self.local_update_summary(success, failure)
    }

    fn local_update_summary(&self, success: u32, failure: u32) -> BaselineUpdateSummary {
        let message = if success == 0 && failure == 0 {
            "No screenshots found.".to_string()
        } else {
            let mut message = format!("Destination: {}\n", self.paths.local_baseline_folder(true));
            if success > 0 {
                message.push_str(&format!("Successfully copied {} files.\n", success));
            }
            if failure > 0 {
                message.push_str(&format!("Failed to copy {} files.\n", failure));
            }
            message
        };
        BaselineUpdateSummary {
            success,
            failure,
            message,
        }
    }

    /// Copy a capture into the checked-in baseline tree at
    /// `<source_root>/<baseline parent folder>/<file name>`
    pub fn update_official_baseline(&mut self, report: usize, test: usize, source_root: &Path) -> BaselineUpdateSummary {
        match self.copy_to_official_baseline(report, test, source_root) {
            Ok(destination) => BaselineUpdateSummary {
                success: 1,
                failure: 0,
                message: format!("Destination: {}\nCopy successful!.\n", destination.display()),
            },
            Err(err) => {
                self.error(&err.to_string());
                BaselineUpdateSummary {
                    success: 0,
                    failure: 1,
                    message: format!("{}\nCopy failed!\n", err),
                }
            }
        }
    }

    fn copy_to_official_baseline(&mut self, report: usize, test: usize, source_root: &Path) -> ReportResult<PathBuf> {
        if !source_root.is_dir() {
            return Err(ReportError::SourceFolderMissing(source_root.to_path_buf()));
        }

        let source = self.screenshot_test_mut(report, test)?.screenshot_file_path.clone();
        let cache_path = self.paths.official_baseline_for(&source);
        let mut components = cache_path.rsplit('/').filter(|c| !c.is_empty());
        let (Some(file_name), Some(folder)) = (components.next(), components.next()) else {
            return Err(ReportError::NoBaselinePath(source));
        };

        let destination = source_root.join(folder).join(file_name);
        copy_file(Path::new(&source), &destination)?;
        self.screenshot_test_mut(report, test)?.official_comparison.clear_to_pass();
        Ok(destination)
    }
}

fn copy_file(source: &Path, destination: &Path) -> ReportResult<()> {
    if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| ReportError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    std::fs::copy(source, destination).map_err(|err| ReportError::Io {
        path: source.to_path_buf(),
        source: err,
    })?;
    Ok(())
}

fn set_scores(result: &mut ImageComparisonResult, scores: DiffScores) {
    result.standard_diff_score = scores.standard;
    result.filtered_diff_score = scores.filtered;
    result.final_diff_score = scores.standard;
}

fn comparison_issue(message: &str, expected: &str, actual: &str) -> String {
    format!(
        "{}\n    Expected: '{}'\n    Actual:   '{}'",
        message, expected, actual
    )
}

/// Load and score two PNG files.
///
/// Every failure message starts with "Screenshot check failed." so that it
/// is counted as a screenshot error at error severity.
pub fn diff_images(expected_path: &str, actual_path: &str) -> Result<DiffScores, ComparisonFailure> {
    let actual = load_for_comparison(actual_path)?;
    let expected = load_for_comparison(expected_path)?;

    compare::calc_image_diff_rms(&expected, &actual, IMPERCEPTIBLE_DIFF_FILTER).map_err(|err| {
        let (code, text) = match err {
            DiffError::WrongSize { .. } => (ResultCode::WrongSize, format!("Screenshot check failed. {}", err)),
            DiffError::WrongFormat { .. } => (
                ResultCode::WrongFormat,
                "Screenshot check failed. Could not compare screenshots due to a format issue.".to_string(),
            ),
        };
        ComparisonFailure {
            code,
            message: comparison_issue(&text, expected_path, actual_path),
        }
    })
}

fn load_for_comparison(path: &str) -> Result<compare::PixelBuffer, ComparisonFailure> {
    compare::load_png(Path::new(path)).map_err(|err| match err {
        CompareError::NotFound(_) => ComparisonFailure {
            code: ResultCode::FileNotFound,
            message: format!("Screenshot check failed. Could not find image file '{}'.", path),
        },
        other => ComparisonFailure {
            code: ResultCode::FileNotLoaded,
            message: format!(
                "Screenshot check failed. Failed to load PNG file '{}' with error '{}'",
                path, other
            ),
        },
    })
}
