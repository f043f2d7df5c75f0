//! JSON export of a finished run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::reporter::ScriptReporter;
use super::types::{ReportTotals, ScriptReport};
use super::{ReportError, ReportResult};
use crate::paths::{PathResolver, ScreenshotPaths};

/// Snapshot of a run's results, suitable for CI artifacts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    #[serde(with = "chrono::serde::ts_seconds")]
    pub timestamp: DateTime<Utc>,
    pub host: String,
    pub render_api: String,
    pub passed: bool,
    /// Present when tolerances were overridden or the run was aborted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invalidation_message: Option<String>,
    pub totals: ReportTotals,
    pub scripts: Vec<ScriptReport>,
}

impl RunReport {
    /// Capture the reporter's current state
    pub fn from_reporter(reporter: &ScriptReporter) -> Self {
        let invalidation = reporter.invalidation_message();
        Self {
            timestamp: Utc::now(),
            host: hostname::get()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|_| "unknown".to_string()),
            render_api: reporter.paths().render_api().to_string(),
            passed: !reporter.has_errors_asserts_in_report(),
            invalidation_message: (!invalidation.is_empty()).then(|| invalidation.to_string()),
            totals: reporter.totals(),
            scripts: reporter.script_reports().to_vec(),
        }
    }

    /// Read a report written by `write_to`
    pub fn read_from(path: &Path) -> ReportResult<Self> {
        let json = std::fs::read_to_string(path).map_err(|source| ReportError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Rebuild a reporter holding these results
    pub fn into_reporter(self, resolver: PathResolver) -> ScriptReporter {
        let mut reporter = ScriptReporter::new(ScreenshotPaths::new(resolver, self.render_api));
        reporter.load_reports(self.scripts, self.invalidation_message.unwrap_or_default());
        reporter
    }

    pub fn to_json(&self) -> ReportResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write pretty JSON to `path`, creating parent directories
    pub fn write_to(&self, path: &Path) -> ReportResult<()> {
        let json = self.to_json()?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| ReportError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(path, json).map_err(|source| ReportError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_report_reflects_reporter() {
        let paths = ScreenshotPaths::new(PathResolver::new("/u", "/d"), "vulkan");
        let mut reporter = ScriptReporter::new(paths);
        reporter.push_script("scripts/a.lua");
        reporter.report_script_error("bad argument");
        reporter.pop_script();

        let report = RunReport::from_reporter(&reporter);
        assert!(!report.passed);
        assert_eq!(report.render_api, "vulkan");
        assert_eq!(report.totals.errors, 1);
        assert!(report.invalidation_message.is_none());

        let json = report.to_json().unwrap();
        assert!(json.contains("\"script_path\": \"scripts/a.lua\""));
        assert!(!json.contains("invalidation_message"));
    }

    #[test]
    fn test_write_to_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ScreenshotPaths::new(PathResolver::new("/u", "/d"), "null");
        let reporter = ScriptReporter::new(paths);
        let out = dir.path().join("reports/run.json");
        RunReport::from_reporter(&reporter).write_to(&out).unwrap();

        let parsed = RunReport::read_from(&out).unwrap();
        assert!(parsed.passed);
        assert_eq!(parsed.totals.scripts, 0);
    }

    #[test]
    fn test_exported_run_restores_into_reporter() {
        let paths = ScreenshotPaths::new(PathResolver::new("/u", "/d"), "metal");
        let mut reporter = ScriptReporter::new(paths);
        reporter.set_invalidation_message("overridden");
        reporter.push_script("scripts/a.lua");
        reporter.add_screenshot_test("/u/scripts/screenshots/a.png");
        reporter.pop_script();

        let restored = RunReport::from_reporter(&reporter).into_reporter(PathResolver::new("/u", "/d"));
        assert_eq!(restored.paths().render_api(), "metal");
        assert_eq!(restored.invalidation_message(), "overridden");
        assert_eq!(restored.script_reports(), reporter.script_reports());
        assert!(!restored.has_active_script());
    }
}
