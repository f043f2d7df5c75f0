//! End-to-end runs against the headless host: real script files, real PNG
//! captures and baselines on disk.

use std::fs;
use std::path::{Path, PathBuf};

use pretty_assertions::assert_eq;
use tempfile::TempDir;

use viewer_automation::config::Config;
use viewer_automation::host::HeadlessHost;
use viewer_automation::paths::PathResolver;
use viewer_automation::report::{ResultCode, RunReport, ScriptReport};
use viewer_automation::runner::ScriptRunner;
use viewer_automation::ui;
use viewer_automation::wizard::{DifferenceLevel, PrecommitWizard, WizardStage};
use viewer_automation::{DisplayOption, Framebuffer};

const CATALOG: &str = r#"{
    "toleranceLevels": [
        { "name": "Zero", "threshold": 0.0, "filterImperceptibleDiffs": false },
        { "name": "Minor", "threshold": 0.01, "filterImperceptibleDiffs": true }
    ]
}"#;

struct Workspace {
    dir: TempDir,
    config: Config,
}

impl Workspace {
    fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = Config::defaults().rooted_at(dir.path()).render_api("null");
        fs::create_dir_all(&config.paths.scripts_dir).unwrap();

        let catalog = dir.path().join("image_comparison_config.json");
        fs::write(&catalog, CATALOG).unwrap();
        config.paths.tolerance_config = catalog;

        let ws = Self { dir, config };
        ws.write_script(
            "_fullsuite_.lua",
            "RunScript('shadow.lua')\nRunScript('bloom.lua')\n",
        );
        for name in ["shadow", "bloom"] {
            ws.write_script(
                &format!("{name}.lua"),
                &format!(
                    "SelectImageComparisonToleranceLevel('Zero')\n\
                     CaptureScreenshot('@user@/scripts/screenshots/{name}.png')\n"
                ),
            );
        }
        ws
    }

    fn write_script(&self, name: &str, source: &str) {
        fs::write(self.config.paths.scripts_dir.join(name), source).unwrap();
    }

    fn runner(&self) -> ScriptRunner<HeadlessHost> {
        ScriptRunner::from_config(HeadlessHost::new("null"), &self.config).expect("runner")
    }

    fn captured(&self, name: &str) -> PathBuf {
        self.dir.path().join(format!("user/scripts/screenshots/{name}.png"))
    }

    fn official(&self, name: &str) -> PathBuf {
        self.dir
            .path()
            .join(format!("devassets/scripts/expectedscreenshots/{name}.png"))
    }

    fn local(&self, name: &str) -> PathBuf {
        self.dir
            .path()
            .join(format!("user/scripts/screenshotslocalbaseline/null/{name}.png"))
    }

    /// Accept the last captures as baselines, altering one pixel of the
    /// official baseline for each name in `altered`
    fn accept_captures(&self, altered: &[&str]) {
        for name in ["shadow", "bloom"] {
            let captured = self.captured(name);
            copy(&captured, &self.local(name));

            if altered.contains(&name) {
                let mut frame = Framebuffer::from_png_bytes(&fs::read(&captured).unwrap()).unwrap();
                let [r, g, b, _] = frame.get_pixel(0, 0);
                frame.set_pixel(0, 0, [255 - r, 255 - g, 255 - b, 255]);
                frame.save_png(&self.official(name)).unwrap();
            } else {
                copy(&captured, &self.official(name));
            }
        }
    }
}

fn copy(from: &Path, to: &Path) {
    fs::create_dir_all(to.parent().unwrap()).unwrap();
    fs::copy(from, to).unwrap();
}

fn run_to_completion(runner: &mut ScriptRunner<HeadlessHost>, script: &str) {
    runner.prepare_and_execute_script(script);
    for _ in 0..1000 {
        runner.tick(1.0 / 60.0);
        if runner.is_idle() {
            return;
        }
    }
    panic!("run of {script} did not finish");
}

fn report_for<'a>(reports: &'a [ScriptReport], script: &str) -> &'a ScriptReport {
    reports
        .iter()
        .find(|r| r.script_path == script)
        .unwrap_or_else(|| panic!("no report for {script}"))
}

#[test]
fn test_first_run_has_no_baselines() {
    let ws = Workspace::new();
    let mut runner = ws.runner();
    run_to_completion(&mut runner, "_fullsuite_.lua");

    let reporter = runner.reporter();
    assert_eq!(reporter.script_reports().len(), 3);

    let totals = reporter.totals();
    assert_eq!(totals.screenshots, 2);
    assert_eq!(totals.screenshot_failures, 2);
    assert!(totals.failed());

    let shadow = report_for(reporter.script_reports(), "shadow.lua");
    let test = &shadow.screenshot_tests[0];
    assert_eq!(test.official_comparison.result_code, ResultCode::FileNotFound);
    assert!(ws.captured("shadow").is_file());
    assert!(reporter.is_report_dialog_open());
}

#[test]
fn test_baselines_then_threshold_failure() {
    let ws = Workspace::new();
    let mut runner = ws.runner();
    run_to_completion(&mut runner, "_fullsuite_.lua");
    ws.accept_captures(&["shadow"]);

    run_to_completion(&mut runner, "_fullsuite_.lua");
    let reports = runner.reporter().script_reports();

    let shadow = &report_for(reports, "shadow.lua").screenshot_tests[0];
    assert_eq!(shadow.official_comparison.result_code, ResultCode::ThresholdExceeded);
    assert!(shadow.official_comparison.final_diff_score > 0.0);
    assert_eq!(shadow.local_comparison.result_code, ResultCode::Pass);
    assert_eq!(shadow.tolerance_level.name, "Zero");

    let bloom = report_for(reports, "bloom.lua");
    assert!(bloom.passed());
    assert_eq!(bloom.screenshot_tests[0].official_comparison.result_code, ResultCode::Pass);

    let text = ui::render_report(runner.reporter(), DisplayOption::ErrorsOnly, false);
    assert!(text.starts_with(ui::BANNER_FAILED));
    assert!(text.contains("FAILED shadow.png"));
    assert!(!text.contains("bloom.png"));
}

#[test]
fn test_wizard_reviews_a_real_run() {
    let ws = Workspace::new();
    let mut runner = ws.runner();
    run_to_completion(&mut runner, "_fullsuite_.lua");
    ws.accept_captures(&["shadow"]);

    let mut wizard = PrecommitWizard::new("_fullsuite_.lua");
    wizard.start_full_suite(&mut runner).unwrap();
    assert_eq!(wizard.stage(), WizardStage::RunFullSuiteTest);

    for _ in 0..1000 {
        runner.tick(1.0 / 60.0);
        wizard.update(&runner);
        if wizard.stage() != WizardStage::RunFullSuiteTest {
            break;
        }
    }
    assert_eq!(wizard.stage(), WizardStage::ReportFullSuiteSummary);

    let summary = wizard.full_suite_summary(runner.reporter());
    assert!(!summary.passed);
    assert_eq!(summary.to_inspect, 1);

    wizard.begin_inspection(runner.reporter()).unwrap();
    assert_eq!(wizard.stage(), WizardStage::ManualInspection);
    wizard.select(DifferenceLevel::High);
    wizard.next().unwrap();
    assert_eq!(wizard.stage(), WizardStage::ReportFinalSummary);

    let summary = wizard.final_summary(runner.reporter());
    assert_eq!(summary.count(DifferenceLevel::High), 1);
    assert_eq!(summary.unreviewed, 0);
    assert!(summary.text.contains("shadow.png"));
    assert!(summary.text.contains("Render API: null"));
}

#[test]
fn test_exported_run_can_be_reviewed_later() {
    let ws = Workspace::new();
    let mut runner = ws.runner();
    run_to_completion(&mut runner, "_fullsuite_.lua");
    ws.accept_captures(&["shadow"]);
    run_to_completion(&mut runner, "_fullsuite_.lua");

    let path = ws.dir.path().join("out/report.json");
    RunReport::from_reporter(runner.reporter()).write_to(&path).unwrap();

    let loaded = RunReport::read_from(&path).unwrap();
    assert!(!loaded.passed);
    assert_eq!(loaded.render_api, "null");

    let reporter = loaded.into_reporter(PathResolver::from_config(&ws.config));
    assert_eq!(reporter.script_reports(), runner.reporter().script_reports());
    assert_eq!(reporter.totals(), runner.reporter().totals());

    let mut wizard = PrecommitWizard::new(path.to_string_lossy());
    wizard.review_finished_run().unwrap();
    wizard.begin_inspection(&reporter).unwrap();
    assert_eq!(wizard.inspection_list().len(), 1);
}

#[test]
fn test_automated_run_reports_failure_through_exit_code() {
    let ws = Workspace::new();
    let mut runner = ws.runner();
    runner.run_main_test_suite("_fullsuite_.lua", true, 7);

    for _ in 0..1000 {
        runner.tick(1.0 / 60.0);
        if runner.is_idle() {
            break;
        }
    }

    assert_eq!(runner.host().exit_code(), Some(1));
    assert!(runner.host().exit_requested());
}

#[test]
fn test_missing_suite_is_an_error() {
    let ws = Workspace::new();
    let mut runner = ws.runner();
    run_to_completion(&mut runner, "does_not_exist.lua");

    assert!(runner
        .reporter()
        .messages()
        .iter()
        .any(|m| m.text.contains("Could not find or load script asset 'does_not_exist.lua'.")));
    assert!(runner.reporter().script_reports().is_empty());
}
