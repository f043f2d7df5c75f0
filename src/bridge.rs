//! The script-visible API surface.
//!
//! A `ScriptEngine` runs script text and forwards every host function call
//! to `call`, which checks the arguments and invokes the matching `ScriptApi`
//! method. Query functions return a value immediately; every other function
//! returns `Nil` and only enqueues work on the runner.

use std::fmt;

use crate::host::CameraCommand;
use crate::paths;

/// Result type for API calls
pub type BridgeResult<T> = Result<T, BridgeError>;

/// A value passed between script code and the host
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptValue {
    Nil,
    Bool(bool),
    Number(f64),
    String(String),
    /// A table used as an array
    List(Vec<ScriptValue>),
    Vector2([f32; 2]),
    Vector3([f32; 3]),
}

impl ScriptValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            ScriptValue::Nil => "nil",
            ScriptValue::Bool(_) => "boolean",
            ScriptValue::Number(_) => "number",
            ScriptValue::String(_) => "string",
            ScriptValue::List(_) => "table",
            ScriptValue::Vector2(_) => "Vector2",
            ScriptValue::Vector3(_) => "Vector3",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ScriptValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            ScriptValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ScriptValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn is_string(&self) -> bool {
        matches!(self, ScriptValue::String(_))
    }
}

impl fmt::Display for ScriptValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptValue::Nil => write!(f, "nil"),
            ScriptValue::Bool(b) => write!(f, "{}", b),
            ScriptValue::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => write!(f, "{}", *n as i64),
            ScriptValue::Number(n) => write!(f, "{}", n),
            ScriptValue::String(s) => write!(f, "{}", s),
            ScriptValue::List(items) => write!(f, "table({})", items.len()),
            ScriptValue::Vector2([x, y]) => write!(f, "Vector2({}, {})", x, y),
            ScriptValue::Vector3([x, y, z]) => write!(f, "Vector3({}, {}, {})", x, y, z),
        }
    }
}

impl From<&str> for ScriptValue {
    fn from(s: &str) -> Self {
        ScriptValue::String(s.to_string())
    }
}

impl From<String> for ScriptValue {
    fn from(s: String) -> Self {
        ScriptValue::String(s)
    }
}

impl From<f64> for ScriptValue {
    fn from(n: f64) -> Self {
        ScriptValue::Number(n)
    }
}

impl From<bool> for ScriptValue {
    fn from(b: bool) -> Self {
        ScriptValue::Bool(b)
    }
}

/// A call the bridge could not bind
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BridgeError {
    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    #[error("{function} expects {expected} argument(s), got {actual}")]
    ArgumentCount {
        function: String,
        expected: &'static str,
        actual: usize,
    },

    #[error("{function} argument {index} must be a {expected}, got {actual}")]
    ArgumentType {
        function: String,
        index: usize,
        expected: &'static str,
        actual: &'static str,
    },
}

/// Errors from running script text
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("{script}: {message}")]
    Syntax { script: String, message: String },

    #[error("{script}: {source}")]
    Call {
        script: String,
        #[source]
        source: BridgeError,
    },

    #[error("{script}: {message}")]
    Runtime { script: String, message: String },
}

/// Executes script text against the API
pub trait ScriptEngine {
    /// Run `source` to completion. Calls reach `api` synchronously, in
    /// program order.
    fn execute(&self, source: &str, script_name: &str, api: &mut dyn ScriptApi) -> Result<(), EngineError>;
}

/// Host callbacks reachable from scripts.
///
/// Functions that take raw arguments validate them themselves and report
/// misuse as script errors instead of failing the script.
pub trait ScriptApi {
    // Utilities
    fn run_script(&mut self, path: &str);
    fn error(&mut self, message: &str);
    fn warning(&mut self, message: &str);
    fn print(&mut self, message: &str);
    fn idle_frames(&mut self, frames: u32);
    fn idle_seconds(&mut self, seconds: f32);
    fn lock_frame_time(&mut self, seconds: f32);
    fn unlock_frame_time(&mut self);
    fn resize_viewport(&mut self, width: u32, height: u32);
    fn set_show_imgui(&mut self, show: bool);
    fn execute_console_command(&mut self, command: &str);

    // Queries; these never touch the operation queue
    fn resolve_path(&self, path: &str) -> String;
    fn normalize_path(&self, path: &str) -> String {
        paths::normalize_path(path)
    }
    fn deg_to_rad(&self, degrees: f32) -> f32 {
        degrees.to_radians()
    }
    fn render_api_name(&self) -> String;
    fn random_test_seed(&self) -> i32;

    // Samples and tools
    fn open_sample(&mut self, name: &str);
    fn set_imgui_value(&mut self, args: &[ScriptValue]);
    fn show_tool(&mut self, name: &str, enable: bool);

    // Screenshots
    fn select_image_comparison_tolerance_level(&mut self, name: &str);
    fn capture_screenshot(&mut self, path: &str);
    fn capture_screenshot_with_imgui(&mut self, path: &str);
    fn capture_screenshot_with_preview(&mut self, path: &str);
    fn capture_pass_attachment(&mut self, args: &[ScriptValue]);

    // Profiling
    fn capture_pass_timestamp(&mut self, args: &[ScriptValue]);
    fn capture_cpu_frame_time(&mut self, args: &[ScriptValue]);
    fn capture_pass_pipeline_statistics(&mut self, args: &[ScriptValue]);
    fn capture_cpu_profiling_statistics(&mut self, args: &[ScriptValue]);
    fn capture_benchmark_metadata(&mut self, args: &[ScriptValue]);

    // Camera
    fn camera_command(&mut self, command: CameraCommand);

    // Asset tracking
    fn asset_tracking_start(&mut self);
    fn asset_tracking_expect_asset(&mut self, path: &str, expected_count: u32);
    fn asset_tracking_idle_until_expected_assets_finish(&mut self, timeout: f32);
    fn asset_tracking_stop(&mut self);
}

/// Functions that return a value and may be nested inside other calls
pub const QUERY_FUNCTIONS: [&str; 5] = [
    "ResolvePath",
    "NormalizePath",
    "DegToRad",
    "GetRenderApiName",
    "GetRandomTestSeed",
];

/// Every function name `call` understands
pub const SCRIPT_FUNCTIONS: [&str; 44] = [
    "RunScript",
    "Error",
    "Warning",
    "Print",
    "IdleFrames",
    "IdleSeconds",
    "LockFrameTime",
    "UnlockFrameTime",
    "ResizeViewport",
    "SetShowImGui",
    "ExecuteConsoleCommand",
    "ResolvePath",
    "NormalizePath",
    "DegToRad",
    "GetRenderApiName",
    "GetRandomTestSeed",
    "OpenSample",
    "SetImguiValue",
    "ShowTool",
    "SelectImageComparisonToleranceLevel",
    "CaptureScreenshot",
    "CaptureScreenshotWithImGui",
    "CaptureScreenshotWithPreview",
    "CapturePassAttachment",
    "CapturePassTimestamp",
    "CaptureCpuFrameTime",
    "CapturePassPipelineStatistics",
    "CaptureCpuProfilingStatistics",
    "CaptureBenchmarkMetadata",
    "ArcBallCameraController_SetCenter",
    "ArcBallCameraController_SetPan",
    "ArcBallCameraController_SetDistance",
    "ArcBallCameraController_SetHeading",
    "ArcBallCameraController_SetPitch",
    "NoClipCameraController_SetPosition",
    "NoClipCameraController_SetHeading",
    "NoClipCameraController_SetPitch",
    "NoClipCameraController_SetFov",
    "AssetTracking_Start",
    "AssetTracking_ExpectAsset",
    "AssetTracking_IdleUntilExpectedAssetsFinish",
    "AssetTracking_Stop",
    "Vector2",
    "Vector3",
];

pub fn is_query(name: &str) -> bool {
    QUERY_FUNCTIONS.contains(&name)
}

/// Bind one script call to the API
pub fn call(api: &mut dyn ScriptApi, name: &str, args: &[ScriptValue]) -> BridgeResult<ScriptValue> {
    let a = Args { function: name, args };
    match name {
        "RunScript" => api.run_script(a.one_str()?),
        "Error" => api.error(a.one_str()?),
        "Warning" => api.warning(a.one_str()?),
        "Print" => {
            a.count(1)?;
            api.print(&args[0].to_string());
        }
        "IdleFrames" => api.idle_frames(a.one_count()?),
        "IdleSeconds" => api.idle_seconds(a.one_f32()?),
        "LockFrameTime" => api.lock_frame_time(a.one_f32()?),
        "UnlockFrameTime" => {
            a.count(0)?;
            api.unlock_frame_time();
        }
        "ResizeViewport" => {
            a.count(2)?;
            api.resize_viewport(a.count_at(0)?, a.count_at(1)?);
        }
        "SetShowImGui" => {
            a.count(1)?;
            api.set_show_imgui(a.bool_at(0)?);
        }
        "ExecuteConsoleCommand" => api.execute_console_command(a.one_str()?),

        "ResolvePath" => return Ok(api.resolve_path(a.one_str()?).into()),
        "NormalizePath" => return Ok(api.normalize_path(a.one_str()?).into()),
        "DegToRad" => return Ok(ScriptValue::Number(f64::from(api.deg_to_rad(a.one_f32()?)))),
        "GetRenderApiName" => {
            a.count(0)?;
            return Ok(api.render_api_name().into());
        }
        "GetRandomTestSeed" => {
            a.count(0)?;
            return Ok(ScriptValue::Number(f64::from(api.random_test_seed())));
        }

        "OpenSample" => api.open_sample(a.one_str()?),
        "SetImguiValue" => api.set_imgui_value(args),
        "ShowTool" => {
            a.count(2)?;
            api.show_tool(a.str_at(0)?, a.bool_at(1)?);
        }

        "SelectImageComparisonToleranceLevel" => api.select_image_comparison_tolerance_level(a.one_str()?),
        "CaptureScreenshot" => api.capture_screenshot(a.one_str()?),
        "CaptureScreenshotWithImGui" => api.capture_screenshot_with_imgui(a.one_str()?),
        "CaptureScreenshotWithPreview" => api.capture_screenshot_with_preview(a.one_str()?),
        "CapturePassAttachment" => api.capture_pass_attachment(args),

        "CapturePassTimestamp" => api.capture_pass_timestamp(args),
        "CaptureCpuFrameTime" => api.capture_cpu_frame_time(args),
        "CapturePassPipelineStatistics" => api.capture_pass_pipeline_statistics(args),
        "CaptureCpuProfilingStatistics" => api.capture_cpu_profiling_statistics(args),
        "CaptureBenchmarkMetadata" => api.capture_benchmark_metadata(args),

        "ArcBallCameraController_SetCenter" => api.camera_command(CameraCommand::ArcBallSetCenter(a.one_vec3()?)),
        "ArcBallCameraController_SetPan" => api.camera_command(CameraCommand::ArcBallSetPan(a.one_vec3()?)),
        "ArcBallCameraController_SetDistance" => api.camera_command(CameraCommand::ArcBallSetDistance(a.one_f32()?)),
        "ArcBallCameraController_SetHeading" => api.camera_command(CameraCommand::ArcBallSetHeading(a.one_f32()?)),
        "ArcBallCameraController_SetPitch" => api.camera_command(CameraCommand::ArcBallSetPitch(a.one_f32()?)),
        "NoClipCameraController_SetPosition" => api.camera_command(CameraCommand::NoClipSetPosition(a.one_vec3()?)),
        "NoClipCameraController_SetHeading" => api.camera_command(CameraCommand::NoClipSetHeading(a.one_f32()?)),
        "NoClipCameraController_SetPitch" => api.camera_command(CameraCommand::NoClipSetPitch(a.one_f32()?)),
        "NoClipCameraController_SetFov" => api.camera_command(CameraCommand::NoClipSetFov(a.one_f32()?)),

        "AssetTracking_Start" => {
            a.count(0)?;
            api.asset_tracking_start();
        }
        "AssetTracking_ExpectAsset" => {
            a.count_between(1, 2, "1 or 2")?;
            let expected = if args.len() == 2 { a.count_at(1)? } else { 1 };
            api.asset_tracking_expect_asset(a.str_at(0)?, expected);
        }
        "AssetTracking_IdleUntilExpectedAssetsFinish" => {
            api.asset_tracking_idle_until_expected_assets_finish(a.one_f32()?)
        }
        "AssetTracking_Stop" => {
            a.count(0)?;
            api.asset_tracking_stop();
        }

        "Vector2" => {
            a.count(2)?;
            return Ok(ScriptValue::Vector2([a.f32_at(0)?, a.f32_at(1)?]));
        }
        "Vector3" => {
            a.count(3)?;
            return Ok(ScriptValue::Vector3([a.f32_at(0)?, a.f32_at(1)?, a.f32_at(2)?]));
        }

        other => return Err(BridgeError::UnknownFunction(other.to_string())),
    }
    Ok(ScriptValue::Nil)
}

/// Typed access to call arguments
struct Args<'a> {
    function: &'a str,
    args: &'a [ScriptValue],
}

impl<'a> Args<'a> {
    fn count(&self, expected: usize) -> BridgeResult<()> {
        if self.args.len() == expected {
            return Ok(());
        }
        Err(BridgeError::ArgumentCount {
            function: self.function.to_string(),
            expected: match expected {
                0 => "0",
                1 => "1",
                2 => "2",
                3 => "3",
                _ => "more",
            },
            actual: self.args.len(),
        })
    }

    fn count_between(&self, min: usize, max: usize, label: &'static str) -> BridgeResult<()> {
        if (min..=max).contains(&self.args.len()) {
            return Ok(());
        }
        Err(BridgeError::ArgumentCount {
            function: self.function.to_string(),
            expected: label,
            actual: self.args.len(),
        })
    }

    fn type_error(&self, index: usize, expected: &'static str) -> BridgeError {
        BridgeError::ArgumentType {
            function: self.function.to_string(),
            index: index + 1,
            expected,
            actual: self.args.get(index).map_or("nil", ScriptValue::type_name),
        }
    }

    fn str_at(&self, index: usize) -> BridgeResult<&'a str> {
        self.args
            .get(index)
            .and_then(ScriptValue::as_str)
            .ok_or_else(|| self.type_error(index, "string"))
    }

    fn f32_at(&self, index: usize) -> BridgeResult<f32> {
        self.args
            .get(index)
            .and_then(ScriptValue::as_number)
            .map(|n| n as f32)
            .ok_or_else(|| self.type_error(index, "number"))
    }

    /// A non-negative integer; fractions are truncated
    fn count_at(&self, index: usize) -> BridgeResult<u32> {
        self.args
            .get(index)
            .and_then(ScriptValue::as_number)
            .filter(|n| *n >= 0.0)
            .map(|n| n as u32)
            .ok_or_else(|| self.type_error(index, "non-negative number"))
    }

    fn bool_at(&self, index: usize) -> BridgeResult<bool> {
        self.args
            .get(index)
            .and_then(ScriptValue::as_bool)
            .ok_or_else(|| self.type_error(index, "boolean"))
    }

    fn one_str(&self) -> BridgeResult<&'a str> {
        self.count(1)?;
        self.str_at(0)
    }

    fn one_f32(&self) -> BridgeResult<f32> {
        self.count(1)?;
        self.f32_at(0)
    }

    fn one_count(&self) -> BridgeResult<u32> {
        self.count(1)?;
        self.count_at(0)
    }

    fn one_vec3(&self) -> BridgeResult<[f32; 3]> {
        self.count(1)?;
        match &self.args[0] {
            ScriptValue::Vector3(v) => Ok(*v),
            _ => Err(self.type_error(0, "Vector3")),
        }
    }
}
