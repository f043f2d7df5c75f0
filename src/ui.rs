//! Plain-text views of the report model and the wizard.
//!
//! Every function returns a `String`; printing is left to the caller.

use std::fmt::Write as _;

use crate::report::{DisplayOption, ResultCode, ScreenshotTestInfo, ScriptReport, ScriptReporter};
use crate::tolerance::ToleranceOptions;
use crate::wizard::{DifferenceLevel, PrecommitWizard, WizardStage};

const SEPARATOR: &str = "----------------------------------------";

pub const BANNER_RUNNING: &str = "Script is running... (_ _)zzz";
pub const BANNER_FAILED: &str = "(>_<)  FAILED  (>_<)";
pub const BANNER_PASSED: &str = "\\(^_^)/  PASSED  \\(^_^)/";
pub const BANNER_INVALID: &str = "(-_-) INVALID ... but passed (-_-)";

fn status(passed: bool) -> &'static str {
    if passed { "PASSED" } else { "FAILED" }
}

/// The report dialog: banner, totals and the per-script tree
pub fn render_report(reporter: &ScriptReporter, option: DisplayOption, running: bool) -> String {
    let totals = reporter.totals();
    let invalidation = reporter.invalidation_message();
    let mut out = String::new();

    let banner = if running {
        BANNER_RUNNING
    } else if totals.failed() {
        BANNER_FAILED
    } else if invalidation.is_empty() {
        BANNER_PASSED
    } else {
        BANNER_INVALID
    };
    let _ = writeln!(out, "{banner}");
    if !invalidation.is_empty() {
        let _ = writeln!(out, "({invalidation})");
    }

    let _ = writeln!(out, "{SEPARATOR}");
    let _ = writeln!(out, "Test Script Count: {}", totals.scripts);
    let _ = writeln!(out, "Total Asserts:  {}", totals.asserts);
    let _ = writeln!(out, "Total Errors:   {}", totals.errors);
    let _ = writeln!(out, "Total Warnings: {}", totals.warnings);
    let _ = writeln!(out, "Total Screenshot Count: {}", totals.screenshots);
    let _ = writeln!(out, "Total Screenshot Failures: {}", totals.screenshot_failures);
    let _ = writeln!(out, "Total Screenshot Warnings: {}", totals.screenshot_warnings);
    let _ = writeln!(out, "Display: {}", option.label());
    let _ = writeln!(out, "{SEPARATOR}");

    for report in reporter.script_reports() {
        render_script(&mut out, reporter, report, option);
    }
    out
}

fn render_script(out: &mut String, reporter: &ScriptReporter, report: &ScriptReport, option: DisplayOption) {
    let passed = report.passed();
    let warnings = report.has_warnings();
    if passed && !warnings && !option.show_all() {
        return;
    }
    if passed && warnings && !option.show_warnings() {
        return;
    }

    let _ = writeln!(out, "{} {}", status(passed), report.script_path);
    let _ = writeln!(out, "    Asserts:  {}", report.assert_count);
    let _ = writeln!(out, "    Errors:   {}", report.general_error_count);
    let _ = writeln!(out, "    Warnings: {}", report.general_warning_count);
    let _ = writeln!(out, "    Screenshot Test Count: {}", report.screenshot_tests.len());
    let _ = writeln!(out, "    Screenshot Tests Failed: {}", report.screenshot_error_count);
    let _ = writeln!(out, "    Screenshot Warnings:     {}", report.screenshot_warning_count);

    for test in &report.screenshot_tests {
        render_screenshot(out, reporter, test, option);
    }
}

fn render_screenshot(out: &mut String, reporter: &ScriptReporter, test: &ScreenshotTestInfo, option: DisplayOption) {
    let passed = test.passed();
    let local_warning = test.has_local_warning();
    if passed && !local_warning && !option.show_all() {
        return;
    }
    if passed && local_warning && !option.show_warnings() {
        return;
    }

    let mut summary = String::new();
    if !passed {
        summary = format!("({}) ", test.official_comparison.summary_string());
    }
    if local_warning {
        summary.push_str("(Local Baseline Warning)");
    }
    let _ = writeln!(out, "    {} {} {}", status(passed), test.file_name(), summary.trim_end());

    let official = &test.official_comparison;
    let _ = writeln!(out, "        Screenshot:        {}", test.screenshot_file_path);
    let _ = writeln!(out, "        Official Baseline: {}", test.official_baseline_path);
    let _ = writeln!(out, "            {}", official.summary_string());
    if matches!(official.result_code, ResultCode::Pass | ResultCode::ThresholdExceeded) {
        let level = &test.tolerance_level;
        let _ = writeln!(out, "            Used Tolerance: {level}");

        if let Some(suggested) =
            reporter.find_best_tolerance_level(official.final_diff_score, level.filter_imperceptible_diffs)
        {
            let _ = writeln!(out, "            Suggested Tolerance: {suggested}");
        }

        if level.filter_imperceptible_diffs {
            let unfiltered = reporter
                .find_best_tolerance_level(official.standard_diff_score, false)
                .map(|l| format!(" ~ '{}'", l.name))
                .unwrap_or_default();
            let _ = writeln!(
                out,
                "            (Unfiltered Diff Score: {:.6}{})",
                official.standard_diff_score, unfiltered
            );
        }
    }
    let _ = writeln!(out, "        Local Baseline:    {}", test.local_baseline_path);
    let _ = writeln!(out, "            {}", test.local_comparison.summary_string());
}

/// Tolerance catalog listing, marking the active selection
pub fn render_tolerance_catalog(options: &ToleranceOptions) -> String {
    let mut out = String::new();
    for (choice, name) in options.override_options().iter().enumerate() {
        let marker = if choice == options.selected_override() { "*" } else { " " };
        match choice.checked_sub(1).and_then(|i| options.available_levels().get(i)) {
            Some(level) => {
                let _ = writeln!(out, "{marker} {level}");
            }
            None => {
                let _ = writeln!(out, "{marker} {name}");
            }
        }
    }
    if options.is_level_adjusted() {
        let _ = writeln!(out, "Level adjustment: {:+}", options.adjustment());
    }
    out
}

/// The wizard page for the current stage
pub fn render_wizard(wizard: &PrecommitWizard, reporter: &ScriptReporter) -> String {
    let mut out = String::new();
    match wizard.stage() {
        WizardStage::Intro => {
            let _ = writeln!(out, "This wizard runs the full test suite and walks through");
            let _ = writeln!(out, "every screenshot that exceeded its tolerance.");
            let _ = writeln!(out, "Suite: {}", wizard.suite_path());
        }
        WizardStage::RunFullSuiteTest => {
            let _ = writeln!(out, "Running {}...", wizard.suite_path());
        }
        WizardStage::ReportFullSuiteSummary => {
            let summary = wizard.full_suite_summary(reporter);
            let _ = writeln!(out, "{}", if summary.passed { BANNER_PASSED } else { BANNER_FAILED });
            if !summary.invalidation_message.is_empty() {
                let _ = writeln!(out, "({})", summary.invalidation_message);
            }
            let _ = writeln!(out, "Scripts: {}", summary.totals.scripts);
            let _ = writeln!(out, "Screenshots: {}", summary.totals.screenshots);
            let _ = writeln!(out, "Screenshot failures: {}", summary.totals.screenshot_failures);
            let _ = writeln!(out, "Screenshots to inspect manually: {}", summary.to_inspect);
        }
        WizardStage::ManualInspection => {
            let total = wizard.inspection_list().len();
            if let Some(entry) = wizard.current_entry() {
                let _ = writeln!(out, "Screenshot {} of {}", wizard.cursor() + 1, total);
                if let Some((report, test)) = reporter
                    .script_reports()
                    .get(entry.index.script)
                    .and_then(|r| r.screenshot_tests.get(entry.index.screenshot).map(|t| (r, t)))
                {
                    let _ = writeln!(out, "Script:     {}", report.script_path);
                    let _ = writeln!(out, "Screenshot: {}", test.screenshot_file_path);
                    let _ = writeln!(out, "Baseline:   {}", test.official_baseline_path);
                }
                let _ = writeln!(out, "Diff score: {:.6}", entry.diff_score);
            }
            for (i, level) in DifferenceLevel::ALL.iter().enumerate() {
                let marker = if wizard.selection() == Some(*level) { "(x)" } else { "( )" };
                let _ = writeln!(out, "{marker} {}. {}", i + 1, level.option_text());
            }
        }
        WizardStage::ReportFinalSummary => {
            out.push_str(&wizard.final_summary(reporter).text);
        }
    }
    out
}
