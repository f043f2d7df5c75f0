//! Pre-commit wizard.
//!
//! Guides a developer through a full-suite run before submitting a change:
//! run the suite, review the summary, classify every screenshot that exceeded
//! its threshold by eye, then copy a final report into the change description.
//!
//! ```text
//! Intro ─▶ RunFullSuiteTest ─▶ ReportFullSuiteSummary ─▶ ManualInspection ⇄ ReportFinalSummary
//!                                        └──────── nothing to inspect ────────▶┘
//! ```

use std::collections::HashMap;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::host::AutomationHost;
use crate::report::{ReportTotals, ResultCode, ScriptReporter};
use crate::runner::ScriptRunner;

/// Result type for wizard navigation
pub type WizardResult<T> = Result<T, WizardError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WizardError {
    #[error("action requires stage {expected:?} but the wizard is at {actual:?}")]
    WrongStage {
        expected: WizardStage,
        actual: WizardStage,
    },
    #[error("select a difference level before moving on")]
    NoSelection,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WizardStage {
    #[default]
    Intro,
    RunFullSuiteTest,
    ReportFullSuiteSummary,
    ManualInspection,
    ReportFinalSummary,
}

/// How different a screenshot looks to a human, lowest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DifferenceLevel {
    NoDifference,
    Low,
    Moderate,
    High,
}

impl DifferenceLevel {
    pub const ALL: [DifferenceLevel; 4] = [
        DifferenceLevel::NoDifference,
        DifferenceLevel::Low,
        DifferenceLevel::Moderate,
        DifferenceLevel::High,
    ];

    pub fn label(self) -> &'static str {
        match self {
            DifferenceLevel::NoDifference => "No Difference",
            DifferenceLevel::Low => "Low Difference",
            DifferenceLevel::Moderate => "Moderate Difference",
            DifferenceLevel::High => "High Difference",
        }
    }

    /// Radio button text shown during inspection
    pub fn option_text(self) -> &'static str {
        match self {
            DifferenceLevel::NoDifference => "I don't see any difference",
            DifferenceLevel::Low => "I see a benign difference",
            DifferenceLevel::Moderate => "I see a difference that's *probably* benign",
            DifferenceLevel::High => "This looks like a problem",
        }
    }
}

/// Script report index and screenshot index within it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReportIndex {
    pub script: usize,
    pub screenshot: usize,
}

/// A screenshot awaiting manual inspection
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InspectionEntry {
    pub index: ReportIndex,
    pub diff_score: f32,
}

/// Shown after the suite finishes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FullSuiteSummary {
    pub passed: bool,
    pub invalidation_message: String,
    pub totals: ReportTotals,
    pub to_inspect: usize,
}

/// A screenshot that failed for a reason other than its diff score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomaticFailure {
    pub index: ReportIndex,
    pub script_path: String,
    pub screenshot: String,
    pub result_code: ResultCode,
}

/// Shown at the end of the wizard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalSummary {
    pub render_api: String,
    pub script_count: usize,
    pub screenshot_count: usize,
    /// Classified entries per level, indexed like `DifferenceLevel::ALL`
    pub buckets: [Vec<ReportIndex>; 4],
    pub automatic_failures: Vec<AutomaticFailure>,
    /// Inspection entries left unclassified
    pub unreviewed: usize,
    /// Copy-pasteable text
    pub text: String,
}

impl FinalSummary {
    pub fn count(&self, level: DifferenceLevel) -> usize {
        self.buckets[level as usize].len()
    }
}

#[derive(Debug, Clone, Default)]
pub struct PrecommitWizard {
    stage: WizardStage,
    suite_path: String,
    inspection: Vec<InspectionEntry>,
    cursor: usize,
    selection: Option<DifferenceLevel>,
    classifications: HashMap<ReportIndex, DifferenceLevel>,
}

impl PrecommitWizard {
    pub fn new(suite_path: impl Into<String>) -> Self {
        Self {
            suite_path: suite_path.into(),
            ..Self::default()
        }
    }

    pub fn stage(&self) -> WizardStage {
        self.stage
    }

    pub fn suite_path(&self) -> &str {
        &self.suite_path
    }

    fn expect_stage(&self, expected: WizardStage) -> WizardResult<()> {
        if self.stage == expected {
            Ok(())
        } else {
            Err(WizardError::WrongStage {
                expected,
                actual: self.stage,
            })
        }
    }

    fn set_stage(&mut self, stage: WizardStage) {
        info!(target: "automation", from = ?self.stage, to = ?stage, "wizard stage");
        self.stage = stage;
    }

    /// Kick off the full suite on `runner`
    pub fn start_full_suite<H: AutomationHost>(&mut self, runner: &mut ScriptRunner<H>) -> WizardResult<()> {
        self.expect_stage(WizardStage::Intro)?;
        self.set_stage(WizardStage::RunFullSuiteTest);
        runner.prepare_and_execute_script(&self.suite_path);
        Ok(())
    }

    /// Review results that were loaded instead of produced by a run
    pub fn review_finished_run(&mut self) -> WizardResult<()> {
        self.expect_stage(WizardStage::Intro)?;
        self.set_stage(WizardStage::ReportFullSuiteSummary);
        Ok(())
    }

    /// Call once per frame; leaves `RunFullSuiteTest` once the run has
    /// completely finished
    pub fn update<H: AutomationHost>(&mut self, runner: &ScriptRunner<H>) {
        if self.stage == WizardStage::RunFullSuiteTest && runner.is_idle() {
            self.set_stage(WizardStage::ReportFullSuiteSummary);
        }
    }

    /// Leave the suite summary: inspect near-threshold screenshots, or go
    /// straight to the final summary when there are none
    pub fn begin_inspection(&mut self, reporter: &ScriptReporter) -> WizardResult<()> {
        self.expect_stage(WizardStage::ReportFullSuiteSummary)?;
        self.inspection = inspection_list(reporter);
        self.cursor = 0;
        if self.inspection.is_empty() {
            self.set_stage(WizardStage::ReportFinalSummary);
        } else {
            self.set_stage(WizardStage::ManualInspection);
            self.restore_selection();
        }
        Ok(())
    }

    pub fn inspection_list(&self) -> &[InspectionEntry] {
        &self.inspection
    }

    /// Position within the inspection list
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn current_entry(&self) -> Option<&InspectionEntry> {
        self.inspection.get(self.cursor)
    }

    pub fn selection(&self) -> Option<DifferenceLevel> {
        self.selection
    }

    pub fn select(&mut self, level: DifferenceLevel) {
        self.selection = Some(level);
    }

    pub fn classification(&self, index: ReportIndex) -> Option<DifferenceLevel> {
        self.classifications.get(&index).copied()
    }

    pub fn classifications(&self) -> &HashMap<ReportIndex, DifferenceLevel> {
        &self.classifications
    }

    fn restore_selection(&mut self) {
        self.selection = self
            .current_entry()
            .and_then(|entry| self.classifications.get(&entry.index).copied());
    }

    fn record_selection(&mut self) {
        if let (Some(level), Some(entry)) = (self.selection, self.inspection.get(self.cursor)) {
            self.classifications.insert(entry.index, level);
        }
    }

    /// Record the selection and move to the next entry, or to the final
    /// summary after the last one
    pub fn next(&mut self) -> WizardResult<()> {
        self.expect_stage(WizardStage::ManualInspection)?;
        if self.selection.is_none() {
            return Err(WizardError::NoSelection);
        }
        self.record_selection();

        if self.cursor + 1 < self.inspection.len() {
            self.cursor += 1;
            self.restore_selection();
        } else {
            self.set_stage(WizardStage::ReportFinalSummary);
        }
        Ok(())
    }

    pub fn back(&mut self) -> WizardResult<()> {
        match self.stage {
            WizardStage::ManualInspection => {
                self.record_selection();
                if self.cursor == 0 {
                    self.set_stage(WizardStage::ReportFullSuiteSummary);
                } else {
                    self.cursor -= 1;
                    self.restore_selection();
                }
                Ok(())
            }
            WizardStage::ReportFinalSummary => {
                if self.inspection.is_empty() {
                    self.set_stage(WizardStage::ReportFullSuiteSummary);
                } else {
                    self.cursor = self.cursor.min(self.inspection.len() - 1);
                    self.set_stage(WizardStage::ManualInspection);
                    self.restore_selection();
                }
                Ok(())
            }
            actual => Err(WizardError::WrongStage {
                expected: WizardStage::ManualInspection,
                actual,
            }),
        }
    }

    /// Skip the remaining entries; they stay unclassified
    pub fn finish_inspection(&mut self) -> WizardResult<()> {
        self.expect_stage(WizardStage::ManualInspection)?;
        self.record_selection();
        self.set_stage(WizardStage::ReportFinalSummary);
        Ok(())
    }

    /// Throw away every classification and start over. Does nothing unless
    /// `confirmed`; returns whether the reset happened.
    pub fn return_to_intro(&mut self, confirmed: bool) -> bool {
        if !confirmed || self.stage == WizardStage::Intro {
            return false;
        }
        *self = Self::new(std::mem::take(&mut self.suite_path));
        true
    }

    pub fn full_suite_summary(&self, reporter: &ScriptReporter) -> FullSuiteSummary {
        let totals = reporter.totals();
        FullSuiteSummary {
            passed: !totals.failed(),
            invalidation_message: reporter.invalidation_message().to_string(),
            totals,
            to_inspect: inspection_list(reporter).len(),
        }
    }

    pub fn final_summary(&self, reporter: &ScriptReporter) -> FinalSummary {
        let reports = reporter.script_reports();

        let mut buckets: [Vec<ReportIndex>; 4] = Default::default();
        for entry in &self.inspection {
            if let Some(level) = self.classifications.get(&entry.index) {
                buckets[*level as usize].push(entry.index);
            }
        }
        let reviewed: usize = buckets.iter().map(Vec::len).sum();

        let mut automatic_failures = Vec::new();
        for (script, report) in reports.iter().enumerate() {
            for (screenshot, test) in report.screenshot_tests.iter().enumerate() {
                let code = test.official_comparison.result_code;
                if code != ResultCode::Pass && code != ResultCode::ThresholdExceeded {
                    automatic_failures.push(AutomaticFailure {
                        index: ReportIndex { script, screenshot },
                        script_path: report.script_path.clone(),
                        screenshot: test.file_name().to_string(),
                        result_code: code,
                    });
                }
            }
        }

        let totals = reporter.totals();
        let mut summary = FinalSummary {
            render_api: reporter.paths().render_api().to_string(),
            script_count: totals.scripts,
            screenshot_count: totals.screenshots,
            buckets,
            automatic_failures,
            unreviewed: self.inspection.len() - reviewed,
            text: String::new(),
        };
        summary.text = compose_report_text(&summary, reporter);
        summary
    }
}

/// Screenshots whose official comparison exceeded the threshold, worst first.
/// Equal scores keep report order.
pub fn inspection_list(reporter: &ScriptReporter) -> Vec<InspectionEntry> {
    let mut entries: Vec<InspectionEntry> = reporter
        .script_reports()
        .iter()
        .enumerate()
        .flat_map(|(script, report)| {
            report
                .screenshot_tests
                .iter()
                .enumerate()
                .filter(|(_, test)| test.official_comparison.result_code == ResultCode::ThresholdExceeded)
                .map(move |(screenshot, test)| InspectionEntry {
                    index: ReportIndex { script, screenshot },
                    diff_score: test.official_comparison.final_diff_score,
                })
        })
        .collect();
    entries.sort_by(|a, b| b.diff_score.total_cmp(&a.diff_score));
    entries
}

fn compose_report_text(summary: &FinalSummary, reporter: &ScriptReporter) -> String {
    let reports = reporter.script_reports();
    let describe = |index: ReportIndex| -> String {
        reports
            .get(index.script)
            .and_then(|report| {
                report.screenshot_tests.get(index.screenshot).map(|test| {
                    format!(
                        "{} ({}, diff score {:.6})",
                        test.file_name(),
                        report.script_path,
                        test.official_comparison.final_diff_score
                    )
                })
            })
            .unwrap_or_else(|| format!("missing report entry {}:{}", index.script, index.screenshot))
    };

    let mut text = String::new();
    let _ = writeln!(text, "Precommit wizard report");
    let _ = writeln!(text, "Render API: {}", summary.render_api);
    let _ = writeln!(text, "Scripts run: {}", summary.script_count);
    let _ = writeln!(
        text,
        "Screenshots: {} total, {} failed automatically, {} inspected manually, {} not reviewed",
        summary.screenshot_count,
        summary.automatic_failures.len(),
        summary.buckets.iter().map(Vec::len).sum::<usize>(),
        summary.unreviewed
    );
    if !reporter.invalidation_message().is_empty() {
        let _ = writeln!(text, "Results are invalid: {}", reporter.invalidation_message());
    }

    for level in DifferenceLevel::ALL.iter().rev() {
        let bucket = &summary.buckets[*level as usize];
        let _ = writeln!(text);
        let _ = writeln!(text, "{} ({}):", level.label(), bucket.len());
        for index in bucket {
            let _ = writeln!(text, "    {}", describe(*index));
        }
    }

    if !summary.automatic_failures.is_empty() {
        let _ = writeln!(text);
        let _ = writeln!(text, "Automatic failures ({}):", summary.automatic_failures.len());
        for failure in &summary.automatic_failures {
            let _ = writeln!(
                text,
                "    {} ({}): {:?}",
                failure.screenshot, failure.script_path, failure.result_code
            );
        }
    }
    text
}
