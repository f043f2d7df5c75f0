use clap::{Parser, Subcommand, ValueEnum};
use std::error::Error;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use viewer_automation::config::{self, Config};
use viewer_automation::host::{AutomationHost, HeadlessHost};
use viewer_automation::logging::init_logging;
use viewer_automation::paths::PathResolver;
use viewer_automation::report::{DisplayOption, RunReport, ScriptReporter, diff_images};
use viewer_automation::runner::ScriptRunner;
use viewer_automation::tolerance::{ToleranceCatalog, ToleranceOptions};
use viewer_automation::ui;
use viewer_automation::wizard::{DifferenceLevel, PrecommitWizard, WizardStage};

/// Viewer Automation - script-driven screenshot testing
#[derive(Parser, Debug)]
#[command(
    name = "viewer-automation",
    about = "Run viewer automation scripts headlessly, compare screenshots and review differences",
    after_help = "ENVIRONMENT VARIABLES:\n\
        VIEWER_AUTOMATION_USER_DIR           Directory behind @user@\n\
        VIEWER_AUTOMATION_DEVASSETS_DIR      Directory behind @devassets@\n\
        VIEWER_AUTOMATION_SCRIPTS_DIR        Root searched for scripts\n\
        VIEWER_AUTOMATION_TOLERANCE_CONFIG   Tolerance catalog JSON\n\
        VIEWER_AUTOMATION_RENDER_API         Render API name\n\
        VIEWER_AUTOMATION_PAUSE_TIMEOUT      Default pause timeout (seconds)\n\
        VIEWER_AUTOMATION_LOG_LEVEL          Log level filter\n\
        VIEWER_AUTOMATION_LOG_FORMAT         pretty, compact or json"
)]
struct Args {
    /// Root holding user/, devassets/ and scripts/ (overrides the per-folder settings)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a script against the headless host
    Run {
        /// Script path, relative to the scripts folder or alias-prefixed
        script: String,

        /// Root searched for scripts
        #[arg(long, env = config::ENV_SCRIPTS_DIR)]
        scripts_dir: Option<PathBuf>,

        /// Run as an automated suite and set the exit code from the results
        #[arg(long)]
        exit_on_finish: bool,

        /// Seed reported to scripts through GetRandomTestSeed
        #[arg(long, default_value = "0")]
        seed: i32,

        /// Write the run report as JSON
        #[arg(long)]
        report: Option<PathBuf>,

        /// Give up after this many frames
        #[arg(long, default_value = "100000")]
        max_frames: u64,

        /// Simulated frame time in seconds
        #[arg(long, default_value = "0.016666")]
        delta: f32,

        /// Copy every capture over its local baseline after the run
        #[arg(long)]
        update_local_baselines: bool,

        /// Which results to print
        #[arg(long, value_enum, default_value = "errors")]
        display: DisplayArg,
    },

    /// Compare two PNG files
    Compare {
        /// Expected image
        expected: PathBuf,

        /// Actual image
        actual: PathBuf,

        /// Tolerance level to judge the score against
        #[arg(short, long)]
        tolerance: Option<String>,
    },

    /// List the tolerance catalog
    Tolerance {
        /// Catalog file
        #[arg(long, env = config::ENV_TOLERANCE_CONFIG)]
        config: Option<PathBuf>,
    },

    /// Print a saved run report
    Report {
        /// JSON file written by `run --report`
        file: PathBuf,

        /// Which results to print
        #[arg(long, value_enum, default_value = "all")]
        display: DisplayArg,
    },

    /// Review screenshot differences interactively
    Wizard {
        /// Suite script to run, or a JSON report from an earlier run
        suite: String,

        /// Simulated frame time in seconds
        #[arg(long, default_value = "0.016666")]
        delta: f32,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum DisplayArg {
    All,
    Warnings,
    Errors,
}

impl From<DisplayArg> for DisplayOption {
    fn from(arg: DisplayArg) -> Self {
        match arg {
            DisplayArg::All => DisplayOption::AllResults,
            DisplayArg::Warnings => DisplayOption::WarningsAndErrors,
            DisplayArg::Errors => DisplayOption::ErrorsOnly,
        }
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    let mut config = Config::from_env();
    if let Some(root) = &args.root {
        config = config.rooted_at(root);
    }
    init_logging(&config.log)?;

    match args.command {
        Some(Commands::Run {
            script,
            scripts_dir,
            exit_on_finish,
            seed,
            report,
            max_frames,
            delta,
            update_local_baselines,
            display,
        }) => {
            if let Some(dir) = scripts_dir {
                config.paths.scripts_dir = dir;
            }
            let host = HeadlessHost::new(config.runner.render_api.clone());
            let mut runner = ScriptRunner::from_config(host, &config)?;

            runner.run_main_test_suite(&script, exit_on_finish, seed);
            let frames = run_frames(&mut runner, max_frames, delta);
            if runner.is_running() {
                runner.abort_scripts(&format!("Run did not finish within {frames} frames."));
                run_frames(&mut runner, 1, delta);
            }

            if update_local_baselines {
                let summary = runner.reporter_mut().update_all_local_baselines();
                println!("{}", summary.message);
            }

            print!("{}", ui::render_report(runner.reporter(), display.into(), false));

            if let Some(path) = report {
                RunReport::from_reporter(runner.reporter()).write_to(&path)?;
                println!("Report: {}", path.display());
            }

            let code = runner
                .host()
                .exit_code()
                .unwrap_or(i32::from(runner.reporter().totals().failed()));
            if code != 0 {
                std::process::exit(code);
            }
        }

        Some(Commands::Compare {
            expected,
            actual,
            tolerance,
        }) => {
            let scores = match diff_images(&path_str(&expected), &path_str(&actual)) {
                Ok(scores) => scores,
                Err(failure) => {
                    eprintln!("{}", failure.message);
                    std::process::exit(2);
                }
            };
            println!("Standard diff score: {:.6}", scores.standard);
            println!("Filtered diff score: {:.6}", scores.filtered);

            if let Some(name) = tolerance {
                let catalog = ToleranceCatalog::load(&config.paths.tolerance_config)?;
                let level = catalog
                    .get(&name)
                    .ok_or_else(|| format!("ImageComparisonToleranceLevel '{name}' not found."))?;
                let score = if level.filter_imperceptible_diffs {
                    scores.filtered
                } else {
                    scores.standard
                };
                let passed = score <= level.threshold;
                println!("{} against {level}", if passed { "PASSED" } else { "FAILED" });
                if !passed {
                    std::process::exit(1);
                }
            }
        }

        Some(Commands::Tolerance { config: catalog_path }) => {
            let path = catalog_path.unwrap_or(config.paths.tolerance_config);
            let catalog = ToleranceCatalog::load(&path)?;
            println!("Tolerance levels from {}:", path.display());
            print!("{}", ui::render_tolerance_catalog(&ToleranceOptions::new(catalog)));
        }

        Some(Commands::Report { file, display }) => {
            let reporter = load_report(&file, &config)?;
            print!("{}", ui::render_report(&reporter, display.into(), false));
        }

        Some(Commands::Wizard { suite, delta }) => {
            let mut wizard = PrecommitWizard::new(suite.clone());

            // Either replay a saved run or execute the suite now
            let reporter = if suite.ends_with(".json") {
                wizard.review_finished_run()?;
                load_report(Path::new(&suite), &config)?
            } else {
                let host = HeadlessHost::new(config.runner.render_api.clone());
                let mut runner = ScriptRunner::from_config(host, &config)?;
                wizard.start_full_suite(&mut runner)?;
                while wizard.stage() == WizardStage::RunFullSuiteTest {
                    runner.tick(delta);
                    wizard.update(&runner);
                }
                runner.into_reporter()
            };

            review(&mut wizard, &reporter)?;
        }

        None => {
            println!("Viewer Automation - script-driven screenshot testing");
            println!();
            println!("Usage: viewer-automation <COMMAND>");
            println!();
            println!("Commands:");
            println!("  run        Run a script against the headless host");
            println!("  compare    Compare two PNG files");
            println!("  tolerance  List the tolerance catalog");
            println!("  report     Print a saved run report");
            println!("  wizard     Review screenshot differences interactively");
            println!();
            println!("Run with --help for more information.");
        }
    }

    Ok(())
}

/// Tick until the runner goes idle; returns the number of frames run
fn run_frames<H: AutomationHost>(runner: &mut ScriptRunner<H>, max_frames: u64, delta: f32) -> u64 {
    let mut frames = 0;
    while runner.is_running() && frames < max_frames {
        runner.tick(delta);
        frames += 1;
    }
    frames
}

fn load_report(path: &Path, config: &Config) -> Result<ScriptReporter, Box<dyn Error>> {
    let report = RunReport::read_from(path)?;
    Ok(report.into_reporter(PathResolver::from_config(config)))
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Line-driven navigation: 1-4 pick a level, n/b move, f finishes, q quits
fn review(wizard: &mut PrecommitWizard, reporter: &ScriptReporter) -> Result<(), Box<dyn Error>> {
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();

    loop {
        println!();
        print!("{}", ui::render_wizard(wizard, reporter));

        let prompt = match wizard.stage() {
            WizardStage::ReportFullSuiteSummary => "[enter] continue, q quit",
            WizardStage::ManualInspection => "1-4 select, n next, b back, f finish, q quit",
            WizardStage::ReportFinalSummary => "b back, r restart, q quit",
            _ => "q quit",
        };
        print!("{prompt}> ");
        io::stdout().flush()?;

        let Some(line) = lines.next().transpose()? else {
            break;
        };
        let input = line.trim();
        if input == "q" {
            break;
        }

        let outcome = match (wizard.stage(), input) {
            (WizardStage::ReportFullSuiteSummary, _) => wizard.begin_inspection(reporter),
            (WizardStage::ManualInspection, "n") => wizard.next(),
            (WizardStage::ManualInspection | WizardStage::ReportFinalSummary, "b") => wizard.back(),
            (WizardStage::ManualInspection, "f") => wizard.finish_inspection(),
            (WizardStage::ManualInspection, digit) => {
                if let Some(level) = digit
                    .parse::<usize>()
                    .ok()
                    .and_then(|n| n.checked_sub(1))
                    .and_then(|i| DifferenceLevel::ALL.get(i).copied())
                {
                    wizard.select(level);
                }
                Ok(())
            }
            (WizardStage::ReportFinalSummary, "r") => {
                // Restarting needs a fresh run, so leave the review here
                wizard.return_to_intro(true);
                break;
            }
            _ => Ok(()),
        };
        if let Err(err) = outcome {
            eprintln!("{err}");
        }
    }
    Ok(())
}
