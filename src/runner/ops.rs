//! Deferred operations and the transient state of a run.

use serde::{Deserialize, Serialize};

use crate::host::{CameraCommand, CaptureRequest, CaptureTicket, ImguiValue};

/// One unit of deferred work.
///
/// Script calls enqueue these; `ScriptRunner::tick` executes them one at a
/// time in FIFO order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ScriptOp {
    /// Start a report for a script; later messages count against it
    PushScript(String),
    /// Plain progress line
    Log(String),
    /// The script's own operations are done; pop its report next tick
    MarkScriptFinished,

    Print(String),
    Error(String),
    Warning(String),

    IdleFrames(u32),
    IdleSeconds(f32),
    LockFrameTime(f32),
    UnlockFrameTime,
    ResizeViewport { width: u32, height: u32 },
    SetShowImGui(bool),
    /// Put back the ImGui visibility from before the last `SetShowImGui`
    RestoreShowImGui,
    ExecuteConsoleCommand(String),

    /// An empty name resets to the home screen
    OpenSample(String),
    SetImguiValue { field: String, value: ImguiValue },
    ShowTool { name: String, enable: bool },

    SelectToleranceLevel(String),
    /// Request a capture and pause until it completes
    Capture(CaptureRequest),
    /// Compare the most recent capture of the active script
    CheckLatestScreenshot,

    Camera(CameraCommand),

    AssetTrackingStart,
    AssetTrackingExpectAsset { path: String, expected_count: u32 },
    AssetTrackingIdleUntilFinished { timeout: f32 },
    AssetTrackingStop,
}

impl ScriptOp {
    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            ScriptOp::PushScript(_) => "PushScript",
            ScriptOp::Log(_) => "Log",
            ScriptOp::MarkScriptFinished => "MarkScriptFinished",
            ScriptOp::Print(_) => "Print",
            ScriptOp::Error(_) => "Error",
            ScriptOp::Warning(_) => "Warning",
            ScriptOp::IdleFrames(_) => "IdleFrames",
            ScriptOp::IdleSeconds(_) => "IdleSeconds",
            ScriptOp::LockFrameTime(_) => "LockFrameTime",
            ScriptOp::UnlockFrameTime => "UnlockFrameTime",
            ScriptOp::ResizeViewport { .. } => "ResizeViewport",
            ScriptOp::SetShowImGui(_) => "SetShowImGui",
            ScriptOp::RestoreShowImGui => "RestoreShowImGui",
            ScriptOp::ExecuteConsoleCommand(_) => "ExecuteConsoleCommand",
            ScriptOp::OpenSample(_) => "OpenSample",
            ScriptOp::SetImguiValue { .. } => "SetImguiValue",
            ScriptOp::ShowTool { .. } => "ShowTool",
            ScriptOp::SelectToleranceLevel(_) => "SelectImageComparisonToleranceLevel",
            ScriptOp::Capture(_) => "Capture",
            ScriptOp::CheckLatestScreenshot => "CheckLatestScreenshot",
            ScriptOp::Camera(_) => "Camera",
            ScriptOp::AssetTrackingStart => "AssetTracking_Start",
            ScriptOp::AssetTrackingExpectAsset { .. } => "AssetTracking_ExpectAsset",
            ScriptOp::AssetTrackingIdleUntilFinished { .. } => "AssetTracking_IdleUntilExpectedAssetsFinish",
            ScriptOp::AssetTrackingStop => "AssetTracking_Stop",
        }
    }
}

/// The capture the runner is paused on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingCapture {
    pub ticket: CaptureTicket,
    /// Image capture, as opposed to a profiling capture
    pub frame: bool,
}

/// Flags and counters consulted by every tick
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub paused: bool,
    /// Seconds left before a pause is forcibly ended
    pub pause_timeout: f32,
    pub idle_frames: u32,
    pub idle_seconds: f32,
    pub waiting_for_assets: bool,
    pub asset_tracking_timeout: f32,
    /// A script finished; its report is popped at the start of the next tick
    pub should_pop_script: bool,
    pub do_final_cleanup: bool,
    pub frame_time_locked: bool,
    pub pending_capture: Option<PendingCapture>,
}

/// Automated full-suite run requested from the command line
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestSuiteRunConfig {
    pub automated_run_enabled: bool,
    pub is_started: bool,
    pub close_on_finish: bool,
    pub suite_path: String,
    /// Exposed to scripts to shuffle test order
    pub random_seed: i32,
}
