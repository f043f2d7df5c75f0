//! Configuration management with environment variable support.
//!
//! This module provides centralized configuration for the automation harness:
//! - Environment variables for all configurable values
//! - Defaults that reproduce the standard folder layout
//! - Builder methods for programmatic configuration (tests, embedding hosts)
//!
//! # Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `VIEWER_AUTOMATION_USER_DIR` | Directory behind the `@user@` alias | `./user` |
//! | `VIEWER_AUTOMATION_DEVASSETS_DIR` | Directory behind the `@devassets@` alias | `.` |
//! | `VIEWER_AUTOMATION_SCRIPTS_DIR` | Root searched for script files | `./scripts` |
//! | `VIEWER_AUTOMATION_TOLERANCE_CONFIG` | Tolerance catalog JSON file | `config/image_comparison_config.json` |
//! | `VIEWER_AUTOMATION_RENDER_API` | Render API name (local baseline subfolder) | `null` |
//! | `VIEWER_AUTOMATION_PAUSE_TIMEOUT` | Default pause timeout in seconds | `5.0` |
//! | `VIEWER_AUTOMATION_LOG_LEVEL` | Log level filter | `info` |
//! | `VIEWER_AUTOMATION_LOG_FORMAT` | `pretty`, `compact` or `json` | `pretty` |
//!
//! # Example
//!
//! ```bash
//! # Keep captures and local baselines out of the source tree
//! export VIEWER_AUTOMATION_USER_DIR="/var/tmp/viewer-user"
//! export VIEWER_AUTOMATION_RENDER_API="vulkan"
//! ```

use std::env;
use std::path::PathBuf;
use std::sync::OnceLock;

use crate::logging::{LogConfig, LogFormat};

// ============================================================================
// Default Values
// ============================================================================

/// Default directory behind `@user@`
pub const DEFAULT_USER_DIR: &str = "./user";

/// Default directory behind `@devassets@`
pub const DEFAULT_DEVASSETS_DIR: &str = ".";

/// Default script root
pub const DEFAULT_SCRIPTS_DIR: &str = "./scripts";

/// Default tolerance catalog location
pub const DEFAULT_TOLERANCE_CONFIG: &str = "config/image_comparison_config.json";

/// Default render API name
pub const DEFAULT_RENDER_API: &str = "null";

/// Default pause timeout (seconds) used by captures and `pause_script`
pub const DEFAULT_PAUSE_TIMEOUT: f32 = 5.0;

/// Default log level
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Diffs at or below this normalized value are ignored by the filtered score
pub const IMPERCEPTIBLE_DIFF_FILTER: f32 = 0.01;

/// Frames a freshly opened sample needs before it consumes scripted input
pub const SAMPLE_WARMUP_FRAMES: u32 = 6;

/// Screenshots must be captured under this folder
pub const SCREENSHOTS_FOLDER: &str = "@user@/scripts/screenshots/";

/// Local baselines live under this folder, one subfolder per render API
pub const LOCAL_BASELINE_FOLDER: &str = "@user@/scripts/screenshotslocalbaseline";

/// Official baselines, relative to `@devassets@`
pub const OFFICIAL_BASELINE_FOLDER: &str = "scripts/expectedscreenshots/";

// ============================================================================
// Environment Variable Names
// ============================================================================

/// Environment variable for the `@user@` directory
pub const ENV_USER_DIR: &str = "VIEWER_AUTOMATION_USER_DIR";

/// Environment variable for the `@devassets@` directory
pub const ENV_DEVASSETS_DIR: &str = "VIEWER_AUTOMATION_DEVASSETS_DIR";

/// Environment variable for the script root
pub const ENV_SCRIPTS_DIR: &str = "VIEWER_AUTOMATION_SCRIPTS_DIR";

/// Environment variable for the tolerance catalog
pub const ENV_TOLERANCE_CONFIG: &str = "VIEWER_AUTOMATION_TOLERANCE_CONFIG";

/// Environment variable for the render API name
pub const ENV_RENDER_API: &str = "VIEWER_AUTOMATION_RENDER_API";

/// Environment variable for the default pause timeout
pub const ENV_PAUSE_TIMEOUT: &str = "VIEWER_AUTOMATION_PAUSE_TIMEOUT";

/// Environment variable for the log level
pub const ENV_LOG_LEVEL: &str = "VIEWER_AUTOMATION_LOG_LEVEL";

/// Environment variable for the log format
pub const ENV_LOG_FORMAT: &str = "VIEWER_AUTOMATION_LOG_FORMAT";

// ============================================================================
// Configuration Getters (with caching)
// ============================================================================

static CONFIG: OnceLock<Config> = OnceLock::new();

/// Get the global configuration (initialized from environment on first access)
pub fn get() -> &'static Config {
    CONFIG.get_or_init(Config::from_env)
}

/// Centralized configuration for the automation harness
#[derive(Debug, Clone)]
pub struct Config {
    /// Folder layout and alias roots
    pub paths: PathSettings,
    /// Script runner behaviour
    pub runner: RunnerSettings,
    /// Logging
    pub log: LogConfig,
}

/// Folder layout settings
#[derive(Debug, Clone)]
pub struct PathSettings {
    /// Directory behind `@user@`
    pub user_dir: PathBuf,
    /// Directory behind `@devassets@`
    pub devassets_dir: PathBuf,
    /// Root used to look up script files
    pub scripts_dir: PathBuf,
    /// Tolerance catalog JSON
    pub tolerance_config: PathBuf,
}

/// Script runner settings
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    /// Name of the active render API
    pub render_api: String,
    /// Default pause timeout in seconds
    pub pause_timeout: f32,
}

impl Config {
    /// Create configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        Self {
            paths: PathSettings::from_env(),
            runner: RunnerSettings::from_env(),
            log: log_config_from_env(),
        }
    }

    /// Create configuration with all defaults (ignoring environment)
    pub fn defaults() -> Self {
        Self {
            paths: PathSettings::defaults(),
            runner: RunnerSettings::defaults(),
            log: LogConfig::default(),
        }
    }

    /// Point both alias roots at one directory, as tests and the CLI sandbox do
    pub fn rooted_at(mut self, root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        self.paths.user_dir = root.join("user");
        self.paths.devassets_dir = root.join("devassets");
        self.paths.scripts_dir = root.join("scripts");
        self
    }

    /// Set the render API name
    pub fn render_api(mut self, api: impl Into<String>) -> Self {
        self.runner.render_api = api.into();
        self
    }

    /// Set the default pause timeout
    pub fn pause_timeout(mut self, seconds: f32) -> Self {
        self.runner.pause_timeout = seconds;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

impl PathSettings {
    /// Create path settings from environment variables
    pub fn from_env() -> Self {
        Self {
            user_dir: env_path(ENV_USER_DIR, DEFAULT_USER_DIR),
            devassets_dir: env_path(ENV_DEVASSETS_DIR, DEFAULT_DEVASSETS_DIR),
            scripts_dir: env_path(ENV_SCRIPTS_DIR, DEFAULT_SCRIPTS_DIR),
            tolerance_config: env_path(ENV_TOLERANCE_CONFIG, DEFAULT_TOLERANCE_CONFIG),
        }
    }

    /// Create path settings with defaults
    pub fn defaults() -> Self {
        Self {
            user_dir: PathBuf::from(DEFAULT_USER_DIR),
            devassets_dir: PathBuf::from(DEFAULT_DEVASSETS_DIR),
            scripts_dir: PathBuf::from(DEFAULT_SCRIPTS_DIR),
            tolerance_config: PathBuf::from(DEFAULT_TOLERANCE_CONFIG),
        }
    }
}

impl RunnerSettings {
    /// Create runner settings from environment variables
    pub fn from_env() -> Self {
        Self {
            render_api: env::var(ENV_RENDER_API).unwrap_or_else(|_| DEFAULT_RENDER_API.to_string()),
            pause_timeout: env::var(ENV_PAUSE_TIMEOUT)
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|t: &f32| t.is_finite() && *t > 0.0)
                .unwrap_or(DEFAULT_PAUSE_TIMEOUT),
        }
    }

    /// Create runner settings with defaults
    pub fn defaults() -> Self {
        Self {
            render_api: DEFAULT_RENDER_API.to_string(),
            pause_timeout: DEFAULT_PAUSE_TIMEOUT,
        }
    }
}

fn env_path(var: &str, default: &str) -> PathBuf {
    env::var(var)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(default))
}

fn log_config_from_env() -> LogConfig {
    LogConfig {
        level: env::var(ENV_LOG_LEVEL).unwrap_or_else(|_| DEFAULT_LOG_LEVEL.to_string()),
        format: env::var(ENV_LOG_FORMAT)
            .ok()
            .and_then(|s| parse_log_format(&s))
            .unwrap_or_default(),
        file: None,
    }
}

/// Parse a log format name
pub fn parse_log_format(s: &str) -> Option<LogFormat> {
    match s.to_lowercase().as_str() {
        "pretty" => Some(LogFormat::Pretty),
        "compact" => Some(LogFormat::Compact),
        "json" => Some(LogFormat::Json),
        _ => None,
    }
}

/// Get the render API name (convenience function)
pub fn render_api() -> String {
    get().runner.render_api.clone()
}

/// Get the default pause timeout (convenience function)
pub fn pause_timeout() -> f32 {
    get().runner.pause_timeout
}
