//! Viewer Automation - script-driven screenshot testing for a sample viewer.
//!
//! This crate provides:
//! - RMS image comparison with an imperceptible-difference filter
//! - A tolerance catalog and the selection/override state around it
//! - Per-script reports with official and local baseline comparisons
//! - A frame-driven runner that executes queued script operations
//! - A pre-commit wizard for reviewing screenshot differences
//! - A headless host that renders and captures without a GPU
//!
//! # Example
//!
//! ```rust,no_run
//! use viewer_automation::config::Config;
//! use viewer_automation::host::HeadlessHost;
//! use viewer_automation::runner::ScriptRunner;
//!
//! let config = Config::from_env();
//! let host = HeadlessHost::new(config.runner.render_api.clone());
//! let mut runner = ScriptRunner::from_config(host, &config).unwrap();
//! runner.prepare_and_execute_script("_fullsuite_.lua");
//! while runner.is_running() {
//!     runner.tick(1.0 / 60.0);
//! }
//! println!("{:?}", runner.reporter().totals());
//! ```

pub mod bridge;
pub mod compare;
pub mod config;
pub mod engine;
pub mod host;
pub mod logging;
pub mod paths;
pub mod report;
pub mod runner;
pub mod tolerance;
pub mod ui;
pub mod wizard;

// Re-export comparison types
pub use compare::{DiffScores, Framebuffer, PixelBuffer, PixelFormat, calc_image_diff_rms, load_png};

// Re-export configuration and logging
pub use config::Config;
pub use logging::{LogConfig, LogFormat, init_logging};

// Re-export tolerance and report types
pub use report::{
    DisplayOption, ImageComparisonResult, ReportTotals, ResultCode, RunReport, ScreenshotTestInfo,
    ScriptReport, ScriptReporter,
};
pub use tolerance::{ToleranceCatalog, ToleranceLevel, ToleranceOptions};

// Re-export the runner and its host seams
pub use bridge::{ScriptApi, ScriptEngine, ScriptValue};
pub use engine::LuaScriptEngine;
pub use host::{AutomationHost, HeadlessHost};
pub use runner::ScriptRunner;

// Re-export the wizard
pub use wizard::{DifferenceLevel, PrecommitWizard, WizardStage};
